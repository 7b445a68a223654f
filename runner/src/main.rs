// Copyright (C) 2024 Ethan Uppal and Utku Melemetci. All rights reserved.

use std::{
    fs, io,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use ls8::{Machine, Program, VmError, VmResult};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Process exit codes. `HLT` is a clean exit; faults are told apart from
/// load problems.
const EXIT_HALTED: u8 = 0;
const EXIT_LOAD: u8 = 1;
const EXIT_INVALID_INSTRUCTION: u8 = 2;
const EXIT_FAULT: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "ls8", version, about = "Run an LS-8 program")]
struct Cli {
    /// Program file: one base-2 byte per line, `#` starts a comment
    program: PathBuf,

    /// Log every executed instruction to stderr
    #[arg(long, env = "LS8_TRACE")]
    trace: bool,

    /// Refuse to run a program with lines that are not valid bytes
    #[arg(long, env = "LS8_STRICT")]
    strict: bool,
}

fn init_tracing(trace: bool) -> Result<()> {
    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    if trace {
        filter = filter.add_directive("ls8=trace".parse()?);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();
    Ok(())
}

fn load(path: &Path, strict: bool) -> Result<Program> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let report = Program::parse(&source)
        .with_context(|| format!("failed to load {}", path.display()))?;

    for diagnostic in &report.diagnostics {
        eprintln!("warning: {}: {}", path.display(), diagnostic);
    }
    if strict && !report.diagnostics.is_empty() {
        bail!(
            "{} has {} invalid line(s)",
            path.display(),
            report.diagnostics.len()
        );
    }
    Ok(report.program)
}

fn fault_message(error: &VmError) -> String {
    match error {
        VmError::InvalidInstruction { opcode, address } => format!(
            "Invalid instruction {:#010b} at address {:#04x}",
            opcode, address
        ),
        _ => format!("error: {}", error),
    }
}

fn exit_code(outcome: &VmResult) -> u8 {
    match outcome {
        Ok(()) => EXIT_HALTED,
        Err(VmError::InvalidInstruction { .. }) => EXIT_INVALID_INSTRUCTION,
        Err(_) => EXIT_FAULT,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_tracing(cli.trace) {
        eprintln!("error: {:#}", err);
        return ExitCode::from(EXIT_LOAD);
    }

    let program = match load(&cli.program, cli.strict) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("error: {:#}", err);
            return ExitCode::from(EXIT_LOAD);
        }
    };

    let mut machine = Machine::with_output(io::stdout().lock());
    machine.load(&program);

    let outcome = machine.run();
    if let Err(err) = &outcome {
        eprintln!("{}", fault_message(err));
    }
    debug!(pc = machine.pc(), state = ?machine.state(), "stopped");
    ExitCode::from(exit_code(&outcome))
}
