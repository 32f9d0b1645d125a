//! Suite manifest (TOML)
//!
//! ```toml
//! name = "lua-basics"
//! root = "cases"                 # or: archive = "cases.zip"
//! includes = ["harness/assert.lua"]
//! pattern = "**/*.lua"           # discovered tests are expected to pass
//!
//! [[test]]
//! file = "arith.lua"
//!
//! [[test]]
//! file = "call_nil.lua"
//! error = "TypeError"
//!
//! [ignore]
//! "slow_case" = "takes minutes"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::payload::Expectation;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Suite name (default: manifest file stem)
    pub name: Option<String>,
    /// Directory holding the test files, relative to the manifest
    pub root: Option<PathBuf>,
    /// Zip archive holding the test files, relative to the manifest
    pub archive: Option<PathBuf>,
    /// Setup files prepended to every test, relative to the manifest
    #[serde(default)]
    pub includes: Vec<PathBuf>,
    /// Glob selecting test files inside the corpus
    pub pattern: Option<String>,
    /// Listed tests; an entry for a discovered file overrides its expectation
    #[serde(default, rename = "test")]
    pub tests: Vec<ManifestTest>,
    /// Test name -> reason
    #[serde(default)]
    pub ignore: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestTest {
    /// Path of the test inside the corpus
    pub file: String,
    /// Display name (default: path without extension)
    pub name: Option<String>,
    /// Expected error kind, as a regular expression
    pub error: Option<String>,
    /// Expect some failure of any kind
    #[serde(default)]
    pub negative: bool,
}

impl ManifestTest {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| default_test_name(&self.file))
    }

    /// `error` takes precedence over `negative`.
    pub fn expectation(&self) -> Result<Expectation, regex::Error> {
        match (&self.error, self.negative) {
            (Some(pattern), _) => Expectation::fail_with(pattern),
            (None, true) => Ok(Expectation::any_failure()),
            (None, false) => Ok(Expectation::Pass),
        }
    }
}

/// `lang/arith.lua` -> `lang/arith`
pub fn default_test_name(file: &str) -> String {
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !stem.ends_with('/') && !ext.contains('/') => {
            stem.to_string()
        }
        _ => file.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let manifest: Manifest = toml::from_str(
            r#"
name = "basics"
root = "cases"
includes = ["harness/assert.lua"]

[[test]]
file = "lang/arith.lua"

[[test]]
file = "lang/call_nil.lua"
name = "call-nil"
error = "^TypeError$"

[[test]]
file = "lang/anything.lua"
negative = true

[ignore]
"arith" = "flaky on CI"
"#,
        )
        .unwrap();

        assert_eq!(manifest.name.as_deref(), Some("basics"));
        assert_eq!(manifest.tests.len(), 3);
        assert_eq!(manifest.tests[0].display_name(), "lang/arith");
        assert_eq!(manifest.tests[1].display_name(), "call-nil");
        assert!(matches!(
            manifest.tests[0].expectation().unwrap(),
            Expectation::Pass
        ));
        assert!(matches!(
            manifest.tests[1].expectation().unwrap(),
            Expectation::FailWith(Some(_))
        ));
        assert!(matches!(
            manifest.tests[2].expectation().unwrap(),
            Expectation::FailWith(None)
        ));
        assert_eq!(manifest.ignore["arith"], "flaky on CI");
    }

    #[test]
    fn test_default_test_name() {
        assert_eq!(default_test_name("lang/arith.lua"), "lang/arith");
        assert_eq!(default_test_name("v1.2/README"), "v1.2/README");
        assert_eq!(default_test_name(".hidden"), ".hidden");
        assert_eq!(default_test_name("plain"), "plain");
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let result: Result<Manifest, _> = toml::from_str(
            r#"
root = "cases"
[[test]]
file = "a.lua"
expect = "pass"
"#,
        );
        assert!(result.is_err());
    }
}
