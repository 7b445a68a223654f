// Copyright (C) 2024 Ethan Uppal and Utku Melemetci. All rights reserved.

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    arch::{Word, MEMORY_SIZE},
    op::{Instruction, OpCodingError},
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("line {line}: invalid number `{text}`")]
    InvalidNumberLiteral { line: usize, text: String },
    #[error("program is {len} bytes but memory only holds {}", MEMORY_SIZE)]
    ProgramTooLarge { len: usize },
}

/// A memory image small enough to load, starting at address 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    image: Vec<Word>,
}

/// A parsed program together with the lines that had to be skipped.
#[derive(Debug)]
pub struct LoadReport {
    pub program: Program,
    pub diagnostics: Vec<LoadError>,
}

impl Program {
    pub fn from_bytes(image: Vec<Word>) -> Result<Self, LoadError> {
        if image.len() > MEMORY_SIZE {
            return Err(LoadError::ProgramTooLarge { len: image.len() });
        }
        Ok(Self { image })
    }

    /// Encodes `instructions` back to back into an image.
    pub fn assemble(
        instructions: &[Instruction],
    ) -> Result<Self, OpCodingError> {
        let mut image = vec![0; MEMORY_SIZE];
        let mut pos = 0;
        for instruction in instructions {
            instruction.encode_into(&mut image, &mut pos)?;
        }
        image.truncate(pos);
        Ok(Self { image })
    }

    /// Parses program text: one base-2 byte per line, `#` starts a comment.
    ///
    /// Lines that are not base-2 numerals in `0..=255` are skipped and
    /// reported without taking up an address. Only an image that does not
    /// fit in memory is fatal.
    pub fn parse(source: &str) -> Result<LoadReport, LoadError> {
        let mut image = Vec::new();
        let mut diagnostics = Vec::new();

        for (index, line) in source.lines().enumerate() {
            let Some(token) = first_token(line) else {
                continue;
            };

            match parse_binary(token) {
                Some(byte) => image.push(byte),
                None => {
                    let diagnostic = LoadError::InvalidNumberLiteral {
                        line: index + 1,
                        text: token.to_owned(),
                    };
                    warn!("{}", diagnostic);
                    diagnostics.push(diagnostic);
                }
            }
        }

        let program = Self::from_bytes(image)?;
        debug!(
            bytes = program.len(),
            skipped = diagnostics.len(),
            "parsed program"
        );

        Ok(LoadReport {
            program,
            diagnostics,
        })
    }

    pub fn as_bytes(&self) -> &[Word] {
        &self.image
    }

    pub fn len(&self) -> usize {
        self.image.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }
}

fn first_token(line: &str) -> Option<&str> {
    let code = line.split_once('#').map_or(line, |(code, _)| code);
    code.split_whitespace().next()
}

fn parse_binary(token: &str) -> Option<Word> {
    if !token.bytes().all(|digit| digit == b'0' || digit == b'1') {
        return None;
    }
    Word::from_str_radix(token, 2).ok()
}
