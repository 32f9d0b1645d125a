//! Outcome classification
//!
//! Maps the body of a worker response frame and the test's expectation onto an
//! `Outcome`. The first line of an error frame follows the grammar
//!
//! ```text
//! header  := (wrapper ':')* kind (':' message)?
//! wrapper := qualified name ending in "Exception"   e.g. Host.ScriptException
//! kind    := identifier | wrapper                    e.g. TypeError
//! ```
//!
//! Wrappers are host-side exception types that some interpreters print ahead of
//! the script-level error kind. One is skipped only when another `kind ':'`
//! follows it, so a message that happens to contain a colon stays a message.

use crate::outcome::Outcome;
use crate::payload::Expectation;
use crate::protocol::PASS;

/// Classify one response frame body against `expectation`.
pub fn classify(raw: &str, expectation: &Expectation) -> Outcome {
    if raw.trim() == PASS {
        return match expectation {
            Expectation::Pass => Outcome::Passed,
            Expectation::FailWith(_) => Outcome::UnexpectedPass,
        };
    }

    let kind = raw.lines().next().and_then(parse_error_kind);

    match (expectation, kind) {
        (Expectation::Pass, _) | (Expectation::FailWith(_), None) => Outcome::UnexpectedFailure {
            detail: raw.to_string(),
        },
        (Expectation::FailWith(None), Some(_)) => Outcome::FailedAsExpected,
        (Expectation::FailWith(Some(pattern)), Some(kind)) => {
            if pattern.is_match(kind) {
                Outcome::FailedAsExpected
            } else {
                Outcome::WrongFailureKind {
                    expected: pattern.to_string(),
                    actual: kind.to_string(),
                }
            }
        }
    }
}

/// Error kind named by the first line of an error frame, behind any wrappers.
pub fn parse_error_kind(line: &str) -> Option<&str> {
    let mut rest = line.trim();
    loop {
        let (head, tail) = match rest.split_once(':') {
            Some((head, tail)) => (head.trim(), Some(tail.trim_start())),
            None => (rest, None),
        };

        if let Some(tail) = tail {
            if is_wrapper(head) && starts_with_kind(tail) {
                rest = tail;
                continue;
            }
        }

        return (is_identifier(head) || is_wrapper(head)).then_some(head);
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn is_wrapper(s: &str) -> bool {
    s.contains('.') && s.ends_with("Exception") && s.split('.').all(is_identifier)
}

/// `kind ':' ...`
fn starts_with_kind(s: &str) -> bool {
    match s.split_once(':') {
        Some((head, _)) => {
            let head = head.trim();
            is_identifier(head) || is_wrapper(head)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail_with(pattern: &str) -> Expectation {
        Expectation::fail_with(pattern).unwrap()
    }

    #[test]
    fn test_pass_frames() {
        assert_eq!(classify("::pass::", &Expectation::Pass), Outcome::Passed);
        assert_eq!(
            classify("::pass::", &Expectation::any_failure()),
            Outcome::UnexpectedPass
        );
        assert_eq!(
            classify("::pass::", &fail_with("TypeError")),
            Outcome::UnexpectedPass
        );
    }

    #[test]
    fn test_error_frame_with_pass_expectation() {
        let raw = "TypeError: attempt to call a nil value\nstack traceback:";
        assert_eq!(
            classify(raw, &Expectation::Pass),
            Outcome::UnexpectedFailure {
                detail: raw.to_string()
            }
        );
    }

    #[test]
    fn test_error_frame_with_fail_expectations() {
        let raw = "TypeError: attempt to call a nil value";
        assert_eq!(
            classify(raw, &Expectation::any_failure()),
            Outcome::FailedAsExpected
        );
        assert_eq!(
            classify(raw, &fail_with("TypeError")),
            Outcome::FailedAsExpected
        );
        assert_eq!(
            classify(raw, &fail_with("^RangeError$")),
            Outcome::WrongFailureKind {
                expected: "^RangeError$".into(),
                actual: "TypeError".into()
            }
        );
    }

    #[test]
    fn test_malformed_frames_are_unexpected_failures() {
        for raw in ["", "something went wrong", ": no kind"] {
            assert_eq!(
                classify(raw, &Expectation::any_failure()),
                Outcome::UnexpectedFailure {
                    detail: raw.to_string()
                },
                "frame {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_parse_error_kind() {
        assert_eq!(
            parse_error_kind("SyntaxError: unexpected symbol near 'x'"),
            Some("SyntaxError")
        );
        assert_eq!(parse_error_kind("RangeError"), Some("RangeError"));
        assert_eq!(parse_error_kind("not an error header"), None);
    }

    #[test]
    fn test_parse_error_kind_skips_wrappers() {
        assert_eq!(
            parse_error_kind("Host.ScriptException: TypeError: undefined is not a function"),
            Some("TypeError")
        );
        assert_eq!(
            parse_error_kind("Host.ScriptException: Engine.InnerException: RangeError: deep"),
            Some("RangeError")
        );
        // A lone exception type with a free-text message is the kind itself
        assert_eq!(
            parse_error_kind("ScriptException: something broke"),
            Some("ScriptException")
        );
        assert_eq!(
            parse_error_kind("Host.ScriptException: something broke"),
            Some("Host.ScriptException")
        );
    }

    #[test]
    fn test_unqualified_exception_kind_keeps_colon_message() {
        assert_eq!(parse_error_kind("ParseException: line: 3"), Some("ParseException"));
        assert_eq!(
            classify("ParseException: line: 3", &fail_with("^ParseException$")),
            Outcome::FailedAsExpected
        );
        // A qualified wrapper still needs an identifier before the next colon
        assert_eq!(
            parse_error_kind("Host.ScriptException: bad input: 3"),
            Some("Host.ScriptException")
        );
    }
}
