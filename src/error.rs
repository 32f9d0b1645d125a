//! Error taxonomy for the harness
//!
//! Per-test problems (timeouts, crashes, script errors) are never errors here:
//! they become an `Outcome`. What remains are conditions that make the whole
//! run meaningless, such as a worker executable that cannot be started.

use std::path::PathBuf;

/// Fatal harness error
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The worker executable could not be started
    #[error("failed to spawn worker {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The worker was spawned without one of its piped streams
    #[error("worker spawned without piped {0}")]
    MissingPipe(&'static str),

    /// A runner slot task panicked or was cancelled
    #[error("runner task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Framing violation detected before a payload is sent
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("payload line {line} is the reserved sentinel {sentinel}")]
    ReservedSentinel { line: usize, sentinel: &'static str },
}

/// Problem loading a test suite
#[derive(Debug, thiserror::Error)]
pub enum SuiteError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest {path:?}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to read archive {path:?}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("failed to walk {path:?}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("invalid test pattern {pattern:?}: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("manifest must name exactly one of `root` or `archive`")]
    CorpusSource,

    #[error("test {name}: invalid error pattern: {source}")]
    Pattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("duplicate test name {0}")]
    DuplicateName(String),
}
