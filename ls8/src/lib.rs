// Copyright (C) 2024 Ethan Uppal and Utku Melemetci. All rights reserved.

#![forbid(unsafe_code)]

pub mod alu;
pub mod arch;
pub mod coding;
pub mod memory;
pub mod op;
pub mod program;
pub mod vm;

pub use op::{Instruction, Register};
pub use program::{LoadError, LoadReport, Program};
pub use vm::{Machine, State, VmError, VmResult};
