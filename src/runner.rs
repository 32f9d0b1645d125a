//! Batch runner - drives a whole suite through one or more executors
//!
//! Each executor is an independent worker slot; tests are pulled from a shared
//! queue so a slow test on one slot does not hold up the others. Per-test
//! failures are contained in the report; only a fatal harness error stops
//! the run.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::client::Executor;
use crate::error::HarnessError;
use crate::outcome::Outcome;
use crate::suite::{Suite, TestCase};

/// Result of one test in the report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub name: String,
    pub file: String,
    pub status: TestStatus,
    /// Set for executed tests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    /// Ignore reason for skipped tests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    TimedOut,
    Ignored,
}

impl TestStatus {
    fn from_outcome(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::TimedOut => TestStatus::TimedOut,
            o if o.is_success() => TestStatus::Passed,
            _ => TestStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub ignored: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub summary: Summary,
    pub results: Vec<TestReport>,
}

impl SuiteReport {
    /// Whether every executed test matched its expectation
    pub fn is_success(&self) -> bool {
        self.summary.failed == 0 && self.summary.timed_out == 0
    }
}

/// Runs suites over a fixed set of executors
pub struct SuiteRunner {
    executors: Vec<Arc<dyn Executor>>,
}

impl SuiteRunner {
    pub fn new(executors: Vec<Arc<dyn Executor>>) -> Self {
        Self { executors }
    }

    /// Run every test of `suite`. All executors are shut down afterwards,
    /// whether or not the run succeeded.
    pub async fn run(&self, suite: &Suite) -> Result<SuiteReport, HarnessError> {
        let result = self.run_cases(suite).await;
        for executor in &self.executors {
            executor.shutdown().await;
        }
        let results = result?;

        let mut summary = Summary {
            total: results.len(),
            ..Summary::default()
        };
        for report in &results {
            match report.status {
                TestStatus::Passed => summary.passed += 1,
                TestStatus::Failed => summary.failed += 1,
                TestStatus::TimedOut => summary.timed_out += 1,
                TestStatus::Ignored => summary.ignored += 1,
            }
        }

        info!(
            "Suite {} finished: total={}, passed={}, failed={}, timed_out={}, ignored={}",
            suite.name,
            summary.total,
            summary.passed,
            summary.failed,
            summary.timed_out,
            summary.ignored
        );

        Ok(SuiteReport {
            suite: suite.name.clone(),
            summary,
            results,
        })
    }

    async fn run_cases(&self, suite: &Suite) -> Result<Vec<TestReport>, HarnessError> {
        let mut reports: Vec<Option<TestReport>> = vec![None; suite.cases.len()];
        let mut queue = VecDeque::new();

        for (idx, case) in suite.cases.iter().enumerate() {
            match &case.ignore_reason {
                Some(reason) => {
                    reports[idx] = Some(TestReport {
                        name: case.name.clone(),
                        file: case.file.clone(),
                        status: TestStatus::Ignored,
                        outcome: None,
                        reason: Some(reason.clone()),
                        duration_ms: 0,
                    });
                }
                None => queue.push_back((idx, case.clone())),
            }
        }

        let queue = Arc::new(Mutex::new(queue));
        let mut tasks = JoinSet::new();
        for executor in &self.executors {
            let executor = Arc::clone(executor);
            let queue = Arc::clone(&queue);
            tasks.spawn(async move { drain_queue(executor, queue).await });
        }

        let mut fatal = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(done)) => {
                    for (idx, report) in done {
                        reports[idx] = Some(report);
                    }
                }
                Ok(Err(e)) => {
                    error!("Fatal harness error, stopping run: {}", e);
                    // Stop the other slots from picking up more work
                    queue.lock().await.clear();
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    error!("Runner task failed, stopping run: {}", e);
                    queue.lock().await.clear();
                    fatal.get_or_insert(HarnessError::Task(e));
                }
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        Ok(reports.into_iter().flatten().collect())
    }
}

async fn drain_queue(
    executor: Arc<dyn Executor>,
    queue: Arc<Mutex<VecDeque<(usize, TestCase)>>>,
) -> Result<Vec<(usize, TestReport)>, HarnessError> {
    let mut done = Vec::new();
    loop {
        let Some((idx, case)) = queue.lock().await.pop_front() else {
            return Ok(done);
        };

        let started = Instant::now();
        let outcome = executor.execute(&case.payload).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let status = TestStatus::from_outcome(&outcome);
        match status {
            TestStatus::Passed => info!("PASS {} ({}ms)", case.name, duration_ms),
            _ => warn!("{} {}: {:?}", outcome, case.name, outcome),
        }

        done.push((
            idx,
            TestReport {
                name: case.name,
                file: case.file,
                status,
                outcome: Some(outcome),
                reason: None,
                duration_ms,
            },
        ));
    }
}
