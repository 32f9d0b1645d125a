//! Test payloads and their expected results

use regex::Regex;
use std::fmt;

/// Source text for one test execution
#[derive(Debug, Clone)]
pub struct TestPayload {
    /// Shared setup source sent ahead of the body on every call
    pub includes: String,
    /// The test source itself
    pub body: String,
    /// Declared pass/fail contract
    pub expectation: Expectation,
}

impl TestPayload {
    pub fn new(body: impl Into<String>, expectation: Expectation) -> Self {
        Self {
            includes: String::new(),
            body: body.into(),
            expectation,
        }
    }

    pub fn with_includes(mut self, includes: impl Into<String>) -> Self {
        self.includes = includes.into();
        self
    }
}

/// What a test is supposed to do
#[derive(Debug, Clone)]
pub enum Expectation {
    /// Run to completion without raising
    Pass,
    /// Raise an error; `None` accepts any error kind
    FailWith(Option<ErrorPattern>),
}

impl Expectation {
    /// Expect a failure whose kind matches `pattern` (a regular expression).
    pub fn fail_with(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Expectation::FailWith(Some(ErrorPattern::new(pattern)?)))
    }

    /// Expect any failure.
    pub fn any_failure() -> Self {
        Expectation::FailWith(None)
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Pass => write!(f, "pass"),
            Expectation::FailWith(None) => write!(f, "any failure"),
            Expectation::FailWith(Some(pattern)) => write!(f, "failure matching {}", pattern),
        }
    }
}

/// Matcher against the name of a raised error kind
#[derive(Debug, Clone)]
pub struct ErrorPattern {
    source: String,
    regex: Regex,
}

impl ErrorPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            source: pattern.to_string(),
            regex: Regex::new(pattern)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, kind: &str) -> bool {
        self.regex.is_match(kind)
    }
}

impl fmt::Display for ErrorPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
