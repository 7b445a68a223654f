// Copyright (C) 2024 Ethan Uppal and Utku Melemetci. All rights reserved.

use crate::{
    arch::{
        Address, Word, MEMORY_SIZE, REGISTER_COUNT, STACK_POINTER,
        STACK_POINTER_INIT,
    },
    op::Register,
    vm::{VmError, VmResult},
};

/// Flat, zero-initialized main memory.
pub struct Memory {
    cells: Box<[Word; MEMORY_SIZE]>,
}

impl Default for Memory {
    fn default() -> Self {
        Self {
            cells: Box::new([0; MEMORY_SIZE]),
        }
    }
}

impl Memory {
    #[inline]
    pub fn read(&self, address: Address) -> VmResult<Word> {
        self.cells
            .get(address)
            .copied()
            .ok_or(VmError::AddressOutOfRange(address))
    }

    #[inline]
    pub fn write(&mut self, address: Address, value: Word) -> VmResult {
        *self
            .cells
            .get_mut(address)
            .ok_or(VmError::AddressOutOfRange(address))? = value;
        Ok(())
    }

    pub fn as_slice(&self) -> &[Word] {
        self.cells.as_slice()
    }

    /// Zeroes all memory, then copies `image` in starting at address 0.
    pub(crate) fn reset_with(&mut self, image: &[Word]) {
        self.cells.fill(0);
        self.cells[..image.len()].copy_from_slice(image);
    }
}

/// The general-purpose registers. The last one is the stack pointer.
pub struct RegisterFile {
    registers: [Word; REGISTER_COUNT],
}

impl Default for RegisterFile {
    fn default() -> Self {
        let mut registers = [0; REGISTER_COUNT];
        registers[STACK_POINTER] = STACK_POINTER_INIT;
        Self { registers }
    }
}

impl RegisterFile {
    #[inline]
    pub fn read(&self, register: Register) -> Word {
        self.registers[register.index()]
    }

    #[inline]
    pub fn write(&mut self, register: Register, value: Word) {
        self.registers[register.index()] = value;
    }

    pub fn stack_pointer(&self) -> Word {
        self.read(Register::SP)
    }

    pub fn as_array(&self) -> &[Word; REGISTER_COUNT] {
        &self.registers
    }
}
