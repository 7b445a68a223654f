// Copyright (C) 2024 Ethan Uppal. All rights reserved.

use std::fmt;

use enum_tags::enum_tags;
use paste::paste;
use static_assertions::const_assert_eq;
use thiserror::Error;

use crate::{
    arch::{Address, Word, REGISTER_COUNT, STACK_POINTER},
    coding::encoded_operand_count,
};

/// Smallest sized integer type that can fit an op code.
pub type RawOpCode = u8;

/// A register operand. Only indices below [`REGISTER_COUNT`] can be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register(u8);

impl Register {
    pub const R0: Self = Self(0);
    pub const R1: Self = Self(1);
    pub const R2: Self = Self(2);
    pub const R3: Self = Self(3);
    pub const R4: Self = Self(4);
    pub const R5: Self = Self(5);
    pub const R6: Self = Self(6);
    pub const SP: Self = Self(STACK_POINTER as u8);

    pub const fn new(index: u8) -> Option<Self> {
        if (index as usize) < REGISTER_COUNT {
            Some(Self(index))
        } else {
            None
        }
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<Word> for Register {
    type Error = OpCodingError;

    fn try_from(index: Word) -> Result<Self, Self::Error> {
        Self::new(index).ok_or(OpCodingError::InvalidRegister(index))
    }
}

impl From<Register> for Word {
    fn from(register: Register) -> Self {
        register.0
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OpCodingError {
    #[error("no instruction has opcode {opcode:#010b} at {address:#04x}")]
    UnknownOpcode {
        opcode: RawOpCode,
        address: Address,
    },
    #[error("register index {0} is out of range")]
    InvalidRegister(u8),
    #[error("instruction runs past the end of memory at address {0:#x}")]
    Truncated(Address),
    #[error("no space for an instruction ending at {end:#x}")]
    NoSpace { end: Address },
}

/// An LS-8 instruction. Discriminants are the opcode bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[enum_tags(public, repr(RawOpCode))]
pub enum Instruction {
    /// `Self::Hlt` stops the machine.
    Hlt = 0b0000_0001,
    /// `Self::Ldi(r, i)` loads the immediate `i` into `r`.
    Ldi(Register, Word) = 0b1000_0010,
    /// `Self::Prn(r)` prints the value of `r` in decimal.
    Prn(Register) = 0b0100_0111,
    /// `Self::Add(a, b)` stores `a + b` in `a`.
    Add(Register, Register) = 0b1010_0000,
    /// `Self::Mult(a, b)` stores `a * b` in `a`.
    Mult(Register, Register) = 0b1010_0010,
    /// `Self::Cmp(a, b)` sets the condition flags from comparing `a` with
    /// `b`.
    Cmp(Register, Register) = 0b1010_0111,
    /// `Self::Push(r)` decrements the stack pointer and stores `r` at the
    /// new top of the stack.
    Push(Register) = 0b0100_0101,
    /// `Self::Pop(r)` loads the top of the stack into `r` and increments the
    /// stack pointer.
    Pop(Register) = 0b0100_0110,
    /// `Self::Call(r)` pushes the address of the next instruction and jumps
    /// to the address in `r`.
    Call(Register) = 0b0101_0000,
    /// `Self::Ret` pops a return address and jumps to it.
    Ret = 0b0001_0001,
    /// `Self::Jmp(r)` jumps to the address in `r`.
    Jmp(Register) = 0b0101_0100,
    /// `Self::Jeq(r)` jumps to the address in `r` if the equal flag is set.
    Jeq(Register) = 0b0101_0101,
    /// `Self::Jne(r)` jumps to the address in `r` if the equal flag is
    /// clear.
    Jne(Register) = 0b0101_0110,
}

// The operand count in the top bits of every opcode has to agree with the
// fields of its variant.
macro_rules! assert_operand_bits {
    ($($variant:ident $(($($operand:expr),*))?),* $(,)?) => {
        paste! {
            $(
                const_assert_eq!(
                    encoded_operand_count(Instruction::[<$variant:upper _TAG>]),
                    Instruction::$variant $(($($operand),*))?.operand_count()
                );
            )*
        }
    };
}

assert_operand_bits!(
    Hlt,
    Ldi(Register::R0, 0),
    Prn(Register::R0),
    Add(Register::R0, Register::R0),
    Mult(Register::R0, Register::R0),
    Cmp(Register::R0, Register::R0),
    Push(Register::R0),
    Pop(Register::R0),
    Call(Register::R0),
    Ret,
    Jmp(Register::R0),
    Jeq(Register::R0),
    Jne(Register::R0),
);

impl Instruction {
    /// Number of bytes this instruction occupies, opcode included.
    pub const fn length(&self) -> usize {
        1 + self.operand_count()
    }

    /// Decodes the instruction starting at `at`, returning it along with its
    /// encoded length.
    pub fn decode_from(
        code: &[Word],
        at: Address,
    ) -> Result<(Self, usize), OpCodingError> {
        let opcode = *code.get(at).ok_or(OpCodingError::Truncated(at))?;
        let operand = |offset: usize| {
            code.get(at + offset)
                .copied()
                .ok_or(OpCodingError::Truncated(at + offset))
        };
        let register =
            |offset: usize| operand(offset).and_then(Register::try_from);

        let op = match opcode {
            Self::HLT_TAG => Self::Hlt,
            Self::LDI_TAG => Self::Ldi(register(1)?, operand(2)?),
            Self::PRN_TAG => Self::Prn(register(1)?),
            Self::ADD_TAG => Self::Add(register(1)?, register(2)?),
            Self::MULT_TAG => Self::Mult(register(1)?, register(2)?),
            Self::CMP_TAG => Self::Cmp(register(1)?, register(2)?),
            Self::PUSH_TAG => Self::Push(register(1)?),
            Self::POP_TAG => Self::Pop(register(1)?),
            Self::CALL_TAG => Self::Call(register(1)?),
            Self::RET_TAG => Self::Ret,
            Self::JMP_TAG => Self::Jmp(register(1)?),
            Self::JEQ_TAG => Self::Jeq(register(1)?),
            Self::JNE_TAG => Self::Jne(register(1)?),
            _ => {
                return Err(OpCodingError::UnknownOpcode {
                    opcode,
                    address: at,
                })
            }
        };

        Ok((op, op.length()))
    }

    /// Encodes this instruction at `*pos` and moves `*pos` past it.
    pub fn encode_into(
        &self,
        code: &mut [Word],
        pos: &mut usize,
    ) -> Result<(), OpCodingError> {
        let end = *pos + self.length();
        let slot = code
            .get_mut(*pos..end)
            .ok_or(OpCodingError::NoSpace { end })?;

        slot[0] = self.tag();
        match *self {
            Self::Hlt | Self::Ret => {}
            Self::Ldi(to, immediate) => {
                slot[1] = to.into();
                slot[2] = immediate;
            }
            Self::Add(a, b) | Self::Mult(a, b) | Self::Cmp(a, b) => {
                slot[1] = a.into();
                slot[2] = b.into();
            }
            Self::Prn(r)
            | Self::Push(r)
            | Self::Pop(r)
            | Self::Call(r)
            | Self::Jmp(r)
            | Self::Jeq(r)
            | Self::Jne(r) => slot[1] = r.into(),
        }

        *pos = end;
        Ok(())
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())?;
        match *self {
            Self::Hlt | Self::Ret => Ok(()),
            Self::Ldi(to, immediate) => write!(f, " {},{}", to, immediate),
            Self::Add(a, b) | Self::Mult(a, b) | Self::Cmp(a, b) => {
                write!(f, " {},{}", a, b)
            }
            Self::Prn(r)
            | Self::Push(r)
            | Self::Pop(r)
            | Self::Call(r)
            | Self::Jmp(r)
            | Self::Jeq(r)
            | Self::Jne(r) => write!(f, " {}", r),
        }
    }
}
