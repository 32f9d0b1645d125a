use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use harness::client::{ExecutionClient, Executor};
use harness::config::HarnessConfig;
use harness::payload::Expectation;
use harness::runner::{SuiteReport, SuiteRunner};
use harness::suite::Suite;
use harness::supervisor::Supervisor;

#[derive(Debug, Parser)]
#[command(name = "harness", version, about = "Process-isolated conformance test runner")]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a suite described by a TOML manifest
    Run {
        manifest: PathBuf,

        /// Write the JSON report here instead of stdout
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Run script files directly
    Exec {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Expect every script to fail with an error kind matching this pattern
        #[arg(long, conflicts_with = "negative")]
        expect_error: Option<String>,

        /// Expect every script to fail with any error
        #[arg(long)]
        negative: bool,
    },
}

/// Command-line overrides for `HARNESS_*` settings
#[derive(Debug, Args)]
struct Overrides {
    /// Parallel worker slots
    #[arg(long, global = true)]
    slots: Option<usize>,

    /// Per-test deadline in seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Tests per worker before it is recycled
    #[arg(long, global = true)]
    recycle_after: Option<u32>,

    /// Worker executable
    #[arg(long, global = true)]
    worker: Option<PathBuf>,
}

impl Overrides {
    fn apply(self, config: &mut HarnessConfig) -> Result<()> {
        if let Some(slots) = self.slots {
            config.slots = slots;
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(count) = self.recycle_after {
            config.recycle_after = count;
        }
        if let Some(worker) = self.worker {
            config.worker_path = worker;
        }
        config.validate()
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("harness=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = HarnessConfig::from_env()?;
    cli.overrides.apply(&mut config)?;
    info!(
        "Harness config: worker={}, slots={}, timeout={}s, recycle_after={}",
        config.worker_path.display(),
        config.slots,
        config.timeout.as_secs(),
        config.recycle_after
    );

    let (suite, report_path) = match cli.command {
        Command::Run { manifest, report } => (
            Suite::load(&manifest)
                .with_context(|| format!("Failed to load suite {}", manifest.display()))?,
            report,
        ),
        Command::Exec {
            files,
            expect_error,
            negative,
        } => {
            let expectation = match expect_error {
                Some(pattern) => Expectation::fail_with(&pattern)
                    .with_context(|| format!("Invalid error pattern: {}", pattern))?,
                None if negative => Expectation::any_failure(),
                None => Expectation::Pass,
            };
            (Suite::from_files(&files, expectation)?, None)
        }
    };

    let runner = SuiteRunner::new(build_executors(&config));
    let report = runner.run(&suite).await?;
    write_report(&report, report_path)?;

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// One supervisor per slot, each with its own worker process.
fn build_executors(config: &HarnessConfig) -> Vec<Arc<dyn Executor>> {
    (0..config.slots)
        .map(|_| {
            let supervisor = Arc::new(Supervisor::new(
                config.worker_command(),
                config.supervisor_config(),
            ));
            Arc::new(ExecutionClient::new(supervisor, config.timeout)) as Arc<dyn Executor>
        })
        .collect()
}

fn write_report(report: &SuiteReport, path: Option<PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    match path {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
