// Copyright (C) 2024 Ethan Uppal and Utku Melemetci. All rights reserved.

use num_traits::{PrimInt, WrappingAdd, WrappingMul};

use crate::{coding::OpcodeFields, op::RawOpCode, vm::VmError};

/// Operations the ALU knows, keyed by the identifier bits of their opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Mult,
    Compare,
}

impl AluOp {
    const ADD_ID: u8 = 0b0000;
    const MULT_ID: u8 = 0b0010;
    const COMPARE_ID: u8 = 0b0111;
}

impl TryFrom<RawOpCode> for AluOp {
    type Error = VmError;

    /// Picks the operation an ALU-flagged opcode asks for.
    fn try_from(opcode: RawOpCode) -> Result<Self, Self::Error> {
        let fields = OpcodeFields::decode(opcode);
        if !fields.uses_alu {
            return Err(VmError::UnsupportedAluOperation(opcode));
        }

        match fields.identifier {
            Self::ADD_ID => Ok(Self::Add),
            Self::MULT_ID => Ok(Self::Mult),
            Self::COMPARE_ID => Ok(Self::Compare),
            _ => Err(VmError::UnsupportedAluOperation(opcode)),
        }
    }
}

/// Condition flags. Only [`AluOp::Compare`] writes them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    pub equal: bool,
    pub less: bool,
    pub greater: bool,
}

impl Flags {
    pub fn compare<W: Ord>(a: W, b: W) -> Self {
        Self {
            equal: a == b,
            less: a < b,
            greater: a > b,
        }
    }
}

/// What an ALU operation produced: a new value for its first operand, or new
/// flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOutput<W> {
    Value(W),
    Flags(Flags),
}

/// Applies `op` to `a` and `b`. Arithmetic wraps at the width of `W`.
pub fn apply<W>(op: AluOp, a: W, b: W) -> AluOutput<W>
where
    W: PrimInt + WrappingAdd + WrappingMul,
{
    match op {
        AluOp::Add => AluOutput::Value(a.wrapping_add(&b)),
        AluOp::Mult => AluOutput::Value(a.wrapping_mul(&b)),
        AluOp::Compare => AluOutput::Flags(Flags::compare(a, b)),
    }
}
