use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of the detail text reported when a worker died mid-request
pub const CRASH_MARKER: &str = "[worker crashed]";

/// Final verdict for one test execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    FailedAsExpected,
    UnexpectedPass,
    UnexpectedFailure { detail: String },
    WrongFailureKind { expected: String, actual: String },
    TimedOut,
}

impl Outcome {
    /// Whether the observed behavior matches the expectation
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Passed | Outcome::FailedAsExpected)
    }

    /// Whether the worker died instead of answering
    pub fn is_crash(&self) -> bool {
        matches!(self, Outcome::UnexpectedFailure { detail } if detail.starts_with(CRASH_MARKER))
    }

    pub(crate) fn crashed(detail: impl fmt::Display) -> Self {
        Outcome::UnexpectedFailure {
            detail: format!("{} {}", CRASH_MARKER, detail),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Passed => "passed",
            Outcome::FailedAsExpected => "failed_as_expected",
            Outcome::UnexpectedPass => "unexpected_pass",
            Outcome::UnexpectedFailure { .. } => "unexpected_failure",
            Outcome::WrongFailureKind { .. } => "wrong_failure_kind",
            Outcome::TimedOut => "timed_out",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::Passed.to_string(), "passed");
        assert_eq!(Outcome::TimedOut.to_string(), "timed_out");
        assert_eq!(
            Outcome::WrongFailureKind {
                expected: "TypeError".into(),
                actual: "RangeError".into()
            }
            .to_string(),
            "wrong_failure_kind"
        );
    }

    #[test]
    fn test_outcome_success_and_crash() {
        assert!(Outcome::Passed.is_success());
        assert!(Outcome::FailedAsExpected.is_success());
        assert!(!Outcome::TimedOut.is_success());

        let crash = Outcome::crashed("exit status: 3");
        assert!(crash.is_crash());
        assert!(!crash.is_success());
        assert!(!Outcome::UnexpectedFailure {
            detail: "Error: boom".into()
        }
        .is_crash());
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let json = serde_json::to_value(Outcome::WrongFailureKind {
            expected: "TypeError".into(),
            actual: "RangeError".into(),
        })
        .unwrap();
        assert_eq!(json["outcome"], "wrong_failure_kind");
        assert_eq!(json["actual"], "RangeError");
    }
}
