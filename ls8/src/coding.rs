// Copyright (C) 2024 Ethan Uppal and Utku Melemetci. All rights reserved.

use static_assertions::const_assert_eq;

use crate::op::RawOpCode;

/// Iteratively constructs a bitset of a given type from bit fields, least
/// significant field first.
#[macro_export]
macro_rules! encode {
    (
        $T:ty;
        $([..$($width:literal)?$($width2:ident)?..] = $int:expr),*
    ) => {
        {
            let mut offset = 0;
            let mut result: $T = 0;
            $(
                let encoded_int: $T = $crate::coding::FieldBits::<$T>::into_bits(&$int);
                let mask: $T = (((1 as $T) << $($width)* $($width2)*) - 1) as $T;
                result |= ((encoded_int & mask) << offset);
                offset += $($width)* $($width2)*;
            )*
            let _ = offset;
            result
        }
    };
}

/// Types that can occupy a bit field of an opcode.
pub trait FieldBits<T> {
    /// Places `self` in the low bits of a `T`. Bits beyond the field width
    /// are masked off by [`encode!`].
    fn into_bits(&self) -> T;

    /// Reads `Self` out of the low bits of `encoded`.
    fn from_bits(encoded: T) -> Self;
}

impl FieldBits<RawOpCode> for u8 {
    fn into_bits(&self) -> RawOpCode {
        *self
    }

    fn from_bits(encoded: RawOpCode) -> Self {
        encoded
    }
}

impl FieldBits<RawOpCode> for bool {
    fn into_bits(&self) -> RawOpCode {
        *self as RawOpCode
    }

    fn from_bits(encoded: RawOpCode) -> Self {
        encoded != 0
    }
}

/// Deconstructs a bitset of a given type into bitfields of given types.
#[macro_export]
macro_rules! decode {
    (
        $encoded:expr; $TEnc:ty;
        @($($out:ident: $T:ty =
            [..$($width:literal)?$($width2:ident)?..]),*)
        => $block:expr
    ) => {{
        let mut __offset = 0;
        $(
            let field_width = $($width)*$($width2)* as u32;
            let mask = (1 as $TEnc).checked_shl(field_width).unwrap_or(0).wrapping_sub(1);
            let unsigned_out = ($encoded >> __offset) & mask;
            let $out = <$T as $crate::coding::FieldBits<$TEnc>>::from_bits(unsigned_out);
            __offset += field_width;
        )*
        let _ = __offset;
        $block
    }};
}

pub const IDENTIFIER_BITS: usize = 4;
pub const SETS_PC_BITS: usize = 1;
pub const ALU_BITS: usize = 1;
pub const OPERAND_COUNT_BITS: usize = 2;

// Opcode layout, most significant bit first: `AABCDDDD`.
//   AA   number of operand bytes that follow the opcode
//   B    the instruction is carried out by the ALU
//   C    the instruction sets the PC itself
//   DDDD identifier
const_assert_eq!(
    RawOpCode::BITS as usize,
    IDENTIFIER_BITS + SETS_PC_BITS + ALU_BITS + OPERAND_COUNT_BITS
);

pub const OPERAND_COUNT_SHIFT: usize =
    IDENTIFIER_BITS + SETS_PC_BITS + ALU_BITS;

/// Operand count stored in the top bits of `opcode`.
pub const fn encoded_operand_count(opcode: RawOpCode) -> usize {
    (opcode >> OPERAND_COUNT_SHIFT) as usize
}

/// The bit fields of an opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeFields {
    pub identifier: u8,
    pub sets_pc: bool,
    pub uses_alu: bool,
    pub operand_count: u8,
}

impl OpcodeFields {
    pub fn decode(opcode: RawOpCode) -> Self {
        decode!(opcode; RawOpCode;
            @(
                identifier: u8 = [..IDENTIFIER_BITS..],
                sets_pc: bool = [..SETS_PC_BITS..],
                uses_alu: bool = [..ALU_BITS..],
                operand_count: u8 = [..OPERAND_COUNT_BITS..]
            ) => Self {
                identifier,
                sets_pc,
                uses_alu,
                operand_count,
            }
        )
    }

    pub fn encode(&self) -> RawOpCode {
        encode!(RawOpCode;
            [..IDENTIFIER_BITS..] = self.identifier,
            [..SETS_PC_BITS..] = self.sets_pc,
            [..ALU_BITS..] = self.uses_alu,
            [..OPERAND_COUNT_BITS..] = self.operand_count
        )
    }
}
