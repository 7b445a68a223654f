// Copyright (C) 2024 Ethan Uppal and Utku Melemetci. All rights reserved.

use std::{fmt, io};

use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    alu::{self, AluOp, AluOutput, Flags},
    arch::{Address, Word, MAX_INSTRUCTION_LENGTH, REGISTER_COUNT},
    memory::{Memory, RegisterFile},
    op::{Instruction, OpCodingError, RawOpCode, Register},
    program::Program,
};

#[derive(Debug, Error)]
pub enum VmError {
    #[error("invalid instruction {opcode:#010b} at address {address:#04x}")]
    InvalidInstruction {
        opcode: RawOpCode,
        address: Address,
    },
    #[error("unsupported ALU operation {0:#010b}")]
    UnsupportedAluOperation(RawOpCode),
    #[error("address {0:#x} is outside of memory")]
    AddressOutOfRange(Address),
    #[error("register index {0} is out of range")]
    RegisterOutOfRange(u8),
    #[error("the machine has halted")]
    NotRunning,
    #[error("failed to write output")]
    Output(#[from] io::Error),
}

pub type VmResult<T = ()> = Result<T, VmError>;

impl From<OpCodingError> for VmError {
    fn from(value: OpCodingError) -> Self {
        match value {
            OpCodingError::UnknownOpcode { opcode, address } => {
                VmError::InvalidInstruction { opcode, address }
            }
            OpCodingError::InvalidRegister(index) => {
                VmError::RegisterOutOfRange(index)
            }
            OpCodingError::Truncated(address) => {
                VmError::AddressOutOfRange(address)
            }
            OpCodingError::NoSpace { end } => VmError::AddressOutOfRange(end),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Loaded but not started.
    Idle,
    Running,
    Halted,
}

pub struct Machine<W = io::Stdout> {
    memory: Memory,
    registers: RegisterFile,
    pc: Address,
    flags: Flags,
    state: State,
    output: W,
}

impl<W: io::Write> Machine<W> {
    /// Creates a [`Machine`] that prints to `output`.
    pub fn with_output(output: W) -> Self {
        Self {
            memory: Memory::default(),
            registers: RegisterFile::default(),
            pc: 0,
            flags: Flags::default(),
            state: State::Idle,
            output,
        }
    }

    /// Resets the machine and copies `program` into memory at address 0.
    pub fn load(&mut self, program: &Program) {
        self.memory.reset_with(program.as_bytes());
        self.registers = RegisterFile::default();
        self.pc = 0;
        self.flags = Flags::default();
        self.state = State::Idle;
        debug!(bytes = program.len(), "loaded program");
    }

    /// Runs the [`Machine`] until it executes `HLT` or faults. On a fault,
    /// registers and memory are left as the last successful instruction
    /// left them. A halted machine stays halted until the next
    /// [`Machine::load`].
    pub fn run(&mut self) -> VmResult {
        loop {
            self.step()?;
            if self.state == State::Halted {
                return Ok(());
            }
        }
    }

    /// Fetches, decodes and executes a single instruction.
    pub fn step(&mut self) -> VmResult {
        match self.state {
            State::Halted => return Err(VmError::NotRunning),
            State::Idle => self.state = State::Running,
            State::Running => {}
        }

        trace!("{}", self.trace());

        let result = self.dispatch();
        if result.is_err() {
            self.state = State::Halted;
        }
        result
    }

    fn dispatch(&mut self) -> VmResult {
        let (instruction, length) =
            Instruction::decode_from(self.memory.as_slice(), self.pc)?;
        self.execute(instruction, length)
    }

    fn execute(&mut self, instruction: Instruction, length: usize) -> VmResult {
        let next = self.pc + length;

        self.pc = match instruction {
            Instruction::Hlt => {
                debug!(pc = self.pc, "halted");
                self.state = State::Halted;
                self.pc
            }
            Instruction::Ldi(to, immediate) => {
                self.registers.write(to, immediate);
                next
            }
            Instruction::Prn(from) => {
                let value = self.registers.read(from);
                writeln!(self.output, "{}", value)?;
                next
            }
            Instruction::Add(a, b)
            | Instruction::Mult(a, b)
            | Instruction::Cmp(a, b) => {
                self.apply_alu(instruction.tag(), a, b)?;
                next
            }
            Instruction::Push(from) => {
                // the stack pointer moves before the register is read, so
                // `PUSH R7` stores the decremented value
                let top = self.registers.stack_pointer().wrapping_sub(1);
                self.registers.write(Register::SP, top);
                let value = self.registers.read(from);
                self.memory.write(top as Address, value)?;
                next
            }
            Instruction::Pop(to) => {
                let value = self.memory.read(self.stack_pointer())?;
                self.registers.write(to, value);
                let top = self.registers.stack_pointer().wrapping_add(1);
                self.registers.write(Register::SP, top);
                next
            }
            Instruction::Call(target) => {
                let return_address = Word::try_from(next)
                    .map_err(|_| VmError::AddressOutOfRange(next))?;
                // the return address is pushed first, so `CALL R7` jumps to
                // the decremented stack pointer
                self.push(return_address)?;
                let target = self.registers.read(target) as Address;
                debug!(from = self.pc, to = target, "call");
                target
            }
            Instruction::Ret => {
                let return_address = self.pop()? as Address;
                debug!(from = self.pc, to = return_address, "return");
                return_address
            }
            Instruction::Jmp(target) => self.registers.read(target) as Address,
            Instruction::Jeq(target) => {
                self.jump_target_if(self.flags.equal, target, next)
            }
            Instruction::Jne(target) => {
                self.jump_target_if(!self.flags.equal, target, next)
            }
        };

        Ok(())
    }

    /// Runs the ALU operation selected by `opcode` on registers `a` and `b`.
    /// Arithmetic results land in `a`; comparisons update the flags.
    pub fn apply_alu(
        &mut self,
        opcode: RawOpCode,
        a: Register,
        b: Register,
    ) -> VmResult {
        let op = AluOp::try_from(opcode)?;
        match alu::apply(op, self.registers.read(a), self.registers.read(b)) {
            AluOutput::Value(value) => self.registers.write(a, value),
            AluOutput::Flags(flags) => self.flags = flags,
        }
        Ok(())
    }

    fn jump_target_if(
        &self,
        condition: bool,
        target: Register,
        next: Address,
    ) -> Address {
        if condition {
            self.registers.read(target) as Address
        } else {
            next
        }
    }

    fn push(&mut self, value: Word) -> VmResult {
        let top = self.registers.stack_pointer().wrapping_sub(1);
        self.memory.write(top as Address, value)?;
        self.registers.write(Register::SP, top);
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Word> {
        let top = self.registers.stack_pointer();
        let value = self.memory.read(top as Address)?;
        self.registers.write(Register::SP, top.wrapping_add(1));
        Ok(value)
    }

    fn stack_pointer(&self) -> Address {
        self.registers.stack_pointer() as Address
    }
}

impl<W> Machine<W> {
    pub fn pc(&self) -> Address {
        self.pc
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn register(&self, register: Register) -> Word {
        self.registers.read(register)
    }

    pub fn registers(&self) -> &[Word; REGISTER_COUNT] {
        self.registers.as_array()
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// A snapshot of the PC, the bytes at and after it, and every register.
    pub fn trace(&self) -> Trace<'_> {
        Trace {
            pc: self.pc,
            memory: &self.memory,
            registers: &self.registers,
        }
    }
}

/// Renders as `TRACE: PC | M[PC] M[PC+1] M[PC+2] | R0 .. R7` in hex.
pub struct Trace<'a> {
    pc: Address,
    memory: &'a Memory,
    registers: &'a RegisterFile,
}

impl fmt::Display for Trace<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TRACE: {:02X} |", self.pc)?;
        for offset in 0..MAX_INSTRUCTION_LENGTH {
            let byte = self.memory.read(self.pc + offset).unwrap_or(0);
            write!(f, " {:02X}", byte)?;
        }
        write!(f, " |")?;
        for value in self.registers.as_array() {
            write!(f, " {:02X}", value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{arch::MEMORY_SIZE, coding::OpcodeFields};

    const R0: Register = Register::R0;
    const R1: Register = Register::R1;
    const R2: Register = Register::R2;
    const R3: Register = Register::R3;

    fn machine_with(program: &[Instruction]) -> Machine<Vec<u8>> {
        let program = Program::assemble(program)
            .expect("test program should fit in memory");
        let mut vm = Machine::with_output(Vec::new());
        vm.load(&program);
        vm
    }

    fn machine_from_text(source: &str) -> Machine<Vec<u8>> {
        let report = Program::parse(source).expect("program should load");
        let mut vm = Machine::with_output(Vec::new());
        vm.load(&report.program);
        vm
    }

    fn printed(vm: Machine<Vec<u8>>) -> String {
        String::from_utf8(vm.into_output()).expect("output should be utf-8")
    }

    #[test]
    fn load_immediate() {
        for register in 0..REGISTER_COUNT as u8 {
            for value in [0, 1, 0x7F, 0xF4, 0xFF] {
                let to = Register::new(register).unwrap();
                let mut vm = machine_with(&[Instruction::Ldi(to, value)]);
                vm.step().expect("program should run without errors");
                assert_eq!(value, vm.register(to));
                assert_eq!(3, vm.pc());
            }
        }
    }

    #[test]
    fn multiplies_and_prints() {
        let mut vm = machine_with(&[
            Instruction::Ldi(R0, 8),
            Instruction::Ldi(R1, 9),
            Instruction::Mult(R0, R1),
            Instruction::Prn(R0),
            Instruction::Hlt,
        ]);

        vm.run().expect("program should halt without errors");

        assert_eq!(State::Halted, vm.state());
        assert_eq!(11, vm.pc());
        assert_eq!("72\n", printed(vm));
    }

    #[test]
    fn add_wraps_around() {
        let mut vm = machine_with(&[
            Instruction::Ldi(R0, 200),
            Instruction::Ldi(R1, 100),
            Instruction::Add(R0, R1),
        ]);

        for _ in 0..3 {
            vm.step().expect("program should run without errors");
        }

        assert_eq!(44, vm.register(R0));
        assert_eq!(100, vm.register(R1));
        assert_eq!(9, vm.pc());
    }

    #[test]
    fn compare_sets_flags_and_keeps_them() {
        let mut vm = machine_with(&[
            Instruction::Ldi(R0, 3),
            Instruction::Ldi(R1, 5),
            Instruction::Cmp(R0, R1),
            Instruction::Add(R0, R1),
            Instruction::Cmp(R0, R1),
            Instruction::Cmp(R1, R1),
        ]);

        assert_eq!(Flags::default(), vm.flags());

        for _ in 0..3 {
            vm.step().expect("program should run without errors");
        }
        let less = Flags {
            equal: false,
            less: true,
            greater: false,
        };
        assert_eq!(less, vm.flags());
        assert_eq!(3, vm.register(R0));

        // arithmetic leaves the flags alone
        vm.step().expect("program should run without errors");
        assert_eq!(less, vm.flags());

        vm.step().expect("program should run without errors");
        assert!(vm.flags().greater);
        assert!(!vm.flags().less && !vm.flags().equal);

        vm.step().expect("program should run without errors");
        assert!(vm.flags().equal);
        assert!(!vm.flags().less && !vm.flags().greater);
    }

    #[test]
    fn push_pop_round_trip() {
        let mut vm = machine_with(&[
            Instruction::Ldi(R0, 42),
            Instruction::Push(R0),
            Instruction::Ldi(R0, 0),
            Instruction::Pop(R0),
        ]);

        vm.step().expect("program should run without errors");
        let initial_sp = vm.register(Register::SP);
        assert_eq!(0xF4, initial_sp);

        vm.step().expect("program should run without errors");
        assert_eq!(initial_sp - 1, vm.register(Register::SP));
        assert_eq!(Ok(42), vm.memory().read(0xF3).map_err(|_| ()));

        vm.step().expect("program should run without errors");
        vm.step().expect("program should run without errors");
        assert_eq!(42, vm.register(R0));
        assert_eq!(initial_sp, vm.register(Register::SP));
        assert_eq!(10, vm.pc());
    }

    #[test]
    fn push_stack_pointer() {
        let mut vm = machine_with(&[Instruction::Push(Register::SP)]);
        vm.step().expect("program should run without errors");
        assert_eq!(0xF3, vm.register(Register::SP));
        assert_eq!(Ok(0xF3), vm.memory().read(0xF3).map_err(|_| ()));
    }

    #[test]
    fn pop_into_stack_pointer() {
        // 0: LDI R0,0x10  3: PUSH R0  5: POP R7
        let mut vm = machine_with(&[
            Instruction::Ldi(R0, 0x10),
            Instruction::Push(R0),
            Instruction::Pop(Register::SP),
        ]);
        for _ in 0..3 {
            vm.step().expect("program should run without errors");
        }
        // the popped value lands in R7 and is then incremented
        assert_eq!(0x11, vm.register(Register::SP));
        assert_eq!(7, vm.pc());
    }

    #[test]
    fn call_through_stack_pointer() {
        let mut vm = machine_with(&[Instruction::Call(Register::SP)]);
        vm.step().expect("program should run without errors");
        assert_eq!(0xF3, vm.register(Register::SP));
        assert_eq!(0xF3, vm.pc());
        assert_eq!(Ok(2), vm.memory().read(0xF3).map_err(|_| ()));
    }

    #[test]
    fn only_pc_setting_opcodes_leave_the_sequence() {
        for tag in Instruction::TAGS {
            // R1 holds 0x40, a target no fall-through reaches
            let mut image = vec![Instruction::LDI_TAG, 1, 0x40, tag, 1, 1];
            image.resize(0x40, 0);
            let mut vm = Machine::with_output(Vec::new());
            vm.load(&Program::from_bytes(image).unwrap());
            vm.step().expect("program should run without errors");
            vm.step().expect("program should run without errors");

            let (instruction, length) =
                Instruction::decode_from(&[tag, 1, 1], 0).unwrap();
            let fields = OpcodeFields::decode(tag);
            if !fields.sets_pc {
                let expected = match instruction {
                    Instruction::Hlt => 3,
                    _ => 3 + length,
                };
                assert_eq!(expected, vm.pc(), "{}", instruction);
            } else if instruction != Instruction::Ret {
                let taken = vm.pc() == 0x40;
                let falls_through = vm.pc() == 3 + length;
                assert!(taken || falls_through, "{}", instruction);
            }
        }
    }

    #[test]
    fn run_after_fault_is_not_running() {
        let mut vm = machine_with(&[Instruction::Ldi(R0, 1)]);
        assert!(matches!(
            vm.run(),
            Err(VmError::InvalidInstruction {
                opcode: 0,
                address: 3
            })
        ));
        assert_eq!(State::Halted, vm.state());
        assert!(matches!(vm.run(), Err(VmError::NotRunning)));
        assert_eq!(1, vm.register(R0));
    }

    #[test]
    fn run_after_halt_is_not_running() {
        let mut vm = machine_with(&[Instruction::Hlt]);
        vm.run().expect("program should halt without errors");
        assert!(matches!(vm.run(), Err(VmError::NotRunning)));

        vm.load(&Program::assemble(&[Instruction::Hlt]).unwrap());
        vm.run().expect("a reloaded machine runs again");
    }

    #[test]
    fn call_return() {
        // 0: LDI R1,8  3: CALL R1  5: HLT  6: RET RET  8: LDI R0,7  11: RET
        let mut vm = machine_with(&[
            Instruction::Ldi(R1, 8),
            Instruction::Call(R1),
            Instruction::Hlt,
            Instruction::Ret,
            Instruction::Ret,
            Instruction::Ldi(R0, 7),
            Instruction::Ret,
        ]);

        vm.step().expect("program should run without errors");
        vm.step().expect("program should run without errors");
        assert_eq!(8, vm.pc());
        assert_eq!(0xF3, vm.register(Register::SP));
        // return address is the CALL's address plus two
        assert_eq!(Ok(5), vm.memory().read(0xF3).map_err(|_| ()));

        vm.step().expect("program should run without errors");
        vm.step().expect("program should run without errors");
        assert_eq!(5, vm.pc());
        assert_eq!(0xF4, vm.register(Register::SP));
        assert_eq!(7, vm.register(R0));

        vm.run().expect("program should halt without errors");
        assert_eq!(State::Halted, vm.state());
    }

    #[test]
    fn conditional_jumps() {
        // 0: LDI R0,1  3: LDI R1,2  6: LDI R2,20  9: CMP R0,R1
        // 12: JEQ R2  14: JNE R2  ...  20: CMP R0,R0  23: JNE R2  25: JEQ R3
        let mut vm = machine_with(&[
            Instruction::Ldi(R0, 1),
            Instruction::Ldi(R1, 2),
            Instruction::Ldi(R2, 20),
            Instruction::Cmp(R0, R1),
            Instruction::Jeq(R2),
            Instruction::Jne(R2),
            Instruction::Hlt,
            Instruction::Hlt,
            Instruction::Hlt,
            Instruction::Hlt,
            Instruction::Cmp(R0, R0),
            Instruction::Jne(R2),
            Instruction::Jeq(R3),
        ]);

        for _ in 0..4 {
            vm.step().expect("program should run without errors");
        }
        assert_eq!(12, vm.pc());

        // not equal: JEQ falls through, JNE jumps
        vm.step().expect("program should run without errors");
        assert_eq!(14, vm.pc());
        vm.step().expect("program should run without errors");
        assert_eq!(20, vm.pc());

        // equal: JNE falls through, JEQ jumps
        vm.step().expect("program should run without errors");
        vm.step().expect("program should run without errors");
        assert_eq!(25, vm.pc());
        vm.step().expect("program should run without errors");
        assert_eq!(0, vm.pc());
    }

    #[test]
    fn unconditional_jump() {
        let mut vm = machine_with(&[
            Instruction::Ldi(R0, 6),
            Instruction::Jmp(R0),
            Instruction::Ldi(R1, 1),
        ]);
        vm.step().expect("program should run without errors");
        vm.step().expect("program should run without errors");
        assert_eq!(6, vm.pc());
    }

    #[test]
    fn invalid_instruction_keeps_state() {
        let mut vm = machine_with(&[
            Instruction::Ldi(R0, 5),
            Instruction::Push(R0),
        ]);
        // memory after the program is zero, and no instruction uses 0x00

        let error = vm.run().expect_err("0x00 is not an instruction");
        assert!(matches!(
            error,
            VmError::InvalidInstruction {
                opcode: 0,
                address: 5
            }
        ));
        assert_eq!(
            "invalid instruction 0b00000000 at address 0x05",
            error.to_string()
        );

        assert_eq!(State::Halted, vm.state());
        assert_eq!(5, vm.pc());
        assert_eq!(5, vm.register(R0));
        assert_eq!(0xF3, vm.register(Register::SP));

        assert!(matches!(vm.step(), Err(VmError::NotRunning)));
    }

    #[test]
    fn bad_register_operand() {
        let program = Program::from_bytes(vec![Instruction::PRN_TAG, 9])
            .expect("program should fit in memory");
        let mut vm = Machine::with_output(Vec::new());
        vm.load(&program);
        assert!(matches!(vm.run(), Err(VmError::RegisterOutOfRange(9))));
    }

    #[test]
    fn running_off_the_end_of_memory() {
        let mut image = vec![0; MEMORY_SIZE];
        let mut pos = 0;
        Instruction::Ldi(R2, 0xFF)
            .encode_into(&mut image, &mut pos)
            .unwrap();
        Instruction::Jmp(R2).encode_into(&mut image, &mut pos).unwrap();
        image[0xFF] = Instruction::LDI_TAG;

        let mut vm = Machine::with_output(Vec::new());
        vm.load(&Program::from_bytes(image).unwrap());
        assert!(matches!(
            vm.run(),
            Err(VmError::AddressOutOfRange(0x100))
        ));
        assert_eq!(0xFF, vm.pc());
    }

    #[test]
    fn call_without_room_for_return_address() {
        let mut image = vec![0; MEMORY_SIZE];
        let mut pos = 0;
        Instruction::Ldi(R2, 0xFE)
            .encode_into(&mut image, &mut pos)
            .unwrap();
        Instruction::Jmp(R2).encode_into(&mut image, &mut pos).unwrap();
        image[0xFE] = Instruction::CALL_TAG;
        image[0xFF] = 1;

        let mut vm = Machine::with_output(Vec::new());
        vm.load(&Program::from_bytes(image).unwrap());
        assert!(matches!(
            vm.run(),
            Err(VmError::AddressOutOfRange(0x100))
        ));
        assert_eq!(0xF4, vm.register(Register::SP));
    }

    #[test]
    fn unsupported_alu_operation() {
        let mut vm = machine_with(&[]);
        assert!(matches!(
            vm.apply_alu(Instruction::JMP_TAG, R0, R1),
            Err(VmError::UnsupportedAluOperation(Instruction::JMP_TAG))
        ));
    }

    #[test]
    fn output_errors_are_reported() {
        struct Closed;

        impl io::Write for Closed {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::ErrorKind::BrokenPipe.into())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let program = Program::assemble(&[Instruction::Prn(R0)]).unwrap();
        let mut vm = Machine::with_output(Closed);
        vm.load(&program);
        assert!(matches!(vm.run(), Err(VmError::Output(_))));
        assert_eq!(0, vm.pc());
    }

    #[test]
    fn load_resets_everything() {
        let mut vm = machine_with(&[
            Instruction::Ldi(R0, 1),
            Instruction::Push(R0),
            Instruction::Cmp(R0, R0),
            Instruction::Hlt,
        ]);
        vm.run().expect("program should halt without errors");

        vm.load(&Program::assemble(&[Instruction::Hlt]).unwrap());
        assert_eq!(State::Idle, vm.state());
        assert_eq!(0, vm.pc());
        assert_eq!(Flags::default(), vm.flags());
        assert_eq!(&[0, 0, 0, 0, 0, 0, 0, 0xF4], vm.registers());
        assert_eq!(Ok(0), vm.memory().read(0xF3).map_err(|_| ()));
    }

    #[test]
    fn traces_state() {
        let mut vm = machine_with(&[
            Instruction::Ldi(R0, 0x2A),
            Instruction::Prn(R0),
        ]);
        vm.step().expect("program should run without errors");
        assert_eq!(
            "TRACE: 03 | 47 00 00 | 2A 00 00 00 00 00 00 F4",
            vm.trace().to_string()
        );
    }

    #[test]
    fn skips_invalid_lines_and_still_runs() {
        let mut vm = machine_from_text(
            "10000010\n00000000\nxyz\n00000101\n01000111\n00000000\n00000001\n",
        );
        vm.run().expect("program should halt without errors");
        assert_eq!("5\n", printed(vm));
    }

    #[test]
    fn demo_stack() {
        let mut vm = machine_from_text(include_str!("../../demos/stack.ls8"));
        vm.run().expect("program should halt without errors");
        assert_eq!("2\n4\n1\n", printed(vm));
    }

    #[test]
    fn demo_call() {
        let mut vm = machine_from_text(include_str!("../../demos/call.ls8"));
        vm.run().expect("program should halt without errors");
        assert_eq!("20\n30\n36\n60\n", printed(vm));
    }

    #[test]
    fn demo_sctest() {
        let mut vm = machine_from_text(include_str!("../../demos/sctest.ls8"));
        vm.run().expect("program should halt without errors");
        assert_eq!("1\n4\n5\n", printed(vm));
    }
}
