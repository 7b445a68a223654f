// Copyright (C) 2024 Ethan Uppal and Utku Melemetci. All rights reserved.

use static_assertions::const_assert;

/// Contents of one register or memory cell.
pub type Word = u8;

/// Index into main memory. Wider than [`Word`] so that running off the end of
/// memory is representable and can be reported.
pub type Address = usize;

pub const MEMORY_SIZE: usize = 256;
const_assert!(MEMORY_SIZE <= Word::MAX as usize + 1);

pub const REGISTER_COUNT: usize = 8;

/// Register 7 doubles as the stack pointer.
pub const STACK_POINTER: usize = REGISTER_COUNT - 1;

/// The stack grows down from here. Addresses above it are reserved.
pub const STACK_POINTER_INIT: Word = 0xF4;
const_assert!((STACK_POINTER_INIT as usize) < MEMORY_SIZE);

/// Longest encoded instruction: opcode plus two operand bytes.
pub const MAX_INSTRUCTION_LENGTH: usize = 3;
