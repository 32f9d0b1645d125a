//! Worker process: reads framed payloads on stdin, answers on stdout.
//!
//! Logs and payload output go to stderr; stdout carries only the protocol.

use std::fs::File;
use std::io::{self, BufWriter};
use std::os::fd::{AsRawFd, FromRawFd};

use anyhow::{Context, Result};
use clap::Parser;
use nix::sys::resource::{setrlimit, Resource};
use nix::fcntl::{fcntl, FcntlArg};
use nix::unistd::dup2;
use tracing::{error, info};

use harness::worker::{InterpreterReuse, LuaInterpreter, WorkerLoop};

#[derive(Debug, Parser)]
#[command(name = "harness-worker", about = "Executes test payloads for the harness")]
struct Args {
    /// Interpreter heap cap in MB; exceeding it raises a MemoryError
    #[arg(long)]
    memory_limit_mb: Option<usize>,

    /// Address space limit for the whole process in MB
    #[arg(long)]
    max_address_space_mb: Option<u64>,

    /// Keep one interpreter for the process lifetime instead of one per payload
    #[arg(long)]
    reuse_interpreter: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("harness=info".parse()?),
        )
        .init();

    let args = Args::parse();

    if let Some(mb) = args.max_address_space_mb {
        let bytes = mb * 1024 * 1024;
        setrlimit(Resource::RLIMIT_AS, bytes, bytes)
            .with_context(|| format!("Failed to set address space limit to {} MB", mb))?;
    }

    let memory_limit = args.memory_limit_mb.map(|mb| mb * 1024 * 1024);
    let reuse = if args.reuse_interpreter {
        InterpreterReuse::PerProcess
    } else {
        InterpreterReuse::PerPayload
    };

    let protocol = take_protocol_stream()?;

    let mut worker = WorkerLoop::new(|| LuaInterpreter::new(memory_limit)).with_reuse(reuse);
    match worker.run(io::stdin().lock(), BufWriter::new(protocol)) {
        Ok(served) => {
            info!("Worker exiting after {} payloads", served);
            Ok(())
        }
        Err(e) => {
            error!("Worker loop failed: {:#}", e);
            Err(e)
        }
    }
}

/// Move the protocol stream off fd 1 and point fd 1 at stderr, so nothing a
/// payload writes to stdout (from Lua, C or a child process) can reach the driver.
fn take_protocol_stream() -> Result<File> {
    let stdout_fd = io::stdout().as_raw_fd();
    // Close-on-exec, so processes spawned by a payload never inherit the pipe
    let protocol_fd = fcntl(stdout_fd, FcntlArg::F_DUPFD_CLOEXEC(3))
        .context("Failed to duplicate stdout")?;
    dup2(io::stderr().as_raw_fd(), stdout_fd).context("Failed to redirect stdout to stderr")?;
    // SAFETY: `protocol_fd` was just returned by fcntl and nothing else owns it
    Ok(unsafe { File::from_raw_fd(protocol_fd) })
}
