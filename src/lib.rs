//! Process-isolated conformance harness
//!
//! Runs test scripts on a long-lived worker subprocess that embeds the
//! interpreter, so a test that hangs, leaks or crashes costs one worker
//! recycle instead of the whole run.

pub mod classifier;
pub mod client;
pub mod config;
pub mod error;
pub mod outcome;
pub mod payload;
pub mod protocol;
pub mod runner;
pub mod suite;
pub mod supervisor;
pub mod worker;

pub use classifier::classify;
pub use client::{ExecutionClient, Executor};
pub use config::HarnessConfig;
pub use error::{HarnessError, ProtocolError, SuiteError};
pub use outcome::Outcome;
pub use payload::{Expectation, TestPayload};
pub use runner::{SuiteReport, SuiteRunner};
pub use suite::{Suite, TestCase};
pub use supervisor::{Supervisor, SupervisorConfig, WorkerCommand};
