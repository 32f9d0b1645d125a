//! Worker loop - runs inside the isolated worker process
//!
//! Reads one request frame at a time from stdin, executes it, answers with one
//! response frame on stdout. Single-threaded and blocking: hang protection is
//! the driver's job, since a stuck script stalls this very loop.
//!
//! The loop does NOT:
//! - Retry a failed execution
//! - Abort scripts on its own (the driver kills the whole process)

pub mod lua;

use anyhow::{Context, Result};
use std::fmt;
use std::io::{BufRead, Write};
use tracing::{debug, info};

use crate::protocol::{self, Request, Response};

pub use lua::LuaInterpreter;

/// Longest error message sent back to the driver
const MAX_MESSAGE_BYTES: usize = 16 * 1024;

/// An error raised by a script
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    /// Error type name, e.g. `TypeError`
    pub kind: String,
    pub message: String,
    /// Stack trace or other detail lines
    pub detail: Option<String>,
}

impl ScriptError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        self.detail = if detail.trim().is_empty() {
            None
        } else {
            Some(detail)
        };
        self
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first line must stay a single `Kind: message` header
        let mut message = self.message.replace(['\r', '\n'], " ");
        if message.len() > MAX_MESSAGE_BYTES {
            let mut end = MAX_MESSAGE_BYTES;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
            message.push_str("...");
        }
        if message.is_empty() {
            write!(f, "{}", self.kind)?;
        } else {
            write!(f, "{}: {}", self.kind, message)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\n{}", detail)?;
        }
        Ok(())
    }
}

/// Script engine embedded in the worker
pub trait Interpreter {
    /// Execute source text to completion
    fn execute(&mut self, source: &str) -> std::result::Result<(), ScriptError>;
}

/// How long one interpreter instance lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpreterReuse {
    /// Build a fresh interpreter for every payload
    #[default]
    PerPayload,
    /// Keep one interpreter for the lifetime of the process
    PerProcess,
}

/// The request/response loop, generic over the interpreter it builds
pub struct WorkerLoop<F> {
    factory: F,
    reuse: InterpreterReuse,
}

impl<F, I> WorkerLoop<F>
where
    F: FnMut() -> Result<I>,
    I: Interpreter,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            reuse: InterpreterReuse::default(),
        }
    }

    pub fn with_reuse(mut self, reuse: InterpreterReuse) -> Self {
        self.reuse = reuse;
        self
    }

    /// Serve requests until `::exit::` or end of input.
    ///
    /// Returns the number of payloads executed. Errors only on I/O failure or
    /// when an interpreter cannot be built; script errors are reported in-band.
    pub fn run<R: BufRead, W: Write>(&mut self, mut input: R, mut output: W) -> Result<u64> {
        let mut interpreter: Option<I> = None;
        let mut served = 0u64;

        loop {
            let source = match protocol::read_request(&mut input).context("Failed to read request")? {
                Request::Exit => {
                    info!(served, "Worker received exit request");
                    return Ok(served);
                }
                Request::Payload(source) => source,
            };

            if interpreter.is_none() || self.reuse == InterpreterReuse::PerPayload {
                interpreter = Some((self.factory)().context("Failed to create interpreter")?);
            }
            let Some(engine) = interpreter.as_mut() else {
                continue;
            };

            let response = match engine.execute(&source) {
                Ok(()) => Response::Pass,
                Err(e) => {
                    debug!(kind = %e.kind, "Payload raised an error");
                    Response::Error(e.to_string())
                }
            };

            protocol::write_response(&mut output, &response)
                .context("Failed to write response")?;
            served += 1;
        }
    }
}
