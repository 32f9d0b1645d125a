//! Test suites - loading test payloads from a manifest
//!
//! Only what the harness needs from a corpus: a display name, a payload and an
//! expectation per test, plus the reason a test is ignored.

pub mod archive;
pub mod manifest;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use globset::GlobBuilder;
use tracing::{info, warn};

use crate::error::SuiteError;
use crate::payload::{Expectation, TestPayload};

pub use archive::CorpusSource;
pub use manifest::{default_test_name, Manifest, ManifestTest};

/// One test ready to run
#[derive(Debug, Clone)]
pub struct TestCase {
    /// Display name, unique within the suite
    pub name: String,
    /// Path inside the corpus
    pub file: String,
    pub payload: TestPayload,
    /// Set when the test is on the ignore list
    pub ignore_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Suite {
    pub name: String,
    pub cases: Vec<TestCase>,
}

impl Suite {
    /// Load a suite from a TOML manifest file.
    pub fn load(manifest_path: impl AsRef<Path>) -> Result<Self, SuiteError> {
        let manifest_path = manifest_path.as_ref();
        let content = read_file(manifest_path)?;
        let manifest: Manifest =
            toml::from_str(&content).map_err(|source| SuiteError::Manifest {
                path: manifest_path.to_path_buf(),
                source,
            })?;

        let base_dir = manifest_path.parent().unwrap_or(Path::new("."));
        let default_name = manifest_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "suite".to_string());

        Self::from_manifest(manifest, base_dir, default_name)
    }

    /// Build a suite from a parsed manifest; relative paths resolve against `base_dir`.
    ///
    /// Tests are the files matched by `pattern` plus every `[[test]]` entry,
    /// sorted by display name.
    pub fn from_manifest(
        manifest: Manifest,
        base_dir: &Path,
        default_name: String,
    ) -> Result<Self, SuiteError> {
        let mut source = match (&manifest.root, &manifest.archive) {
            (Some(root), None) => CorpusSource::directory(base_dir.join(root)),
            (None, Some(archive)) => CorpusSource::open_archive(base_dir.join(archive))?,
            _ => return Err(SuiteError::CorpusSource),
        };

        let mut includes = String::new();
        for include in &manifest.includes {
            includes.push_str(&read_file(&base_dir.join(include))?);
            if !includes.ends_with('\n') {
                includes.push('\n');
            }
        }

        // File -> explicit entry, if any
        let mut selected: BTreeMap<String, Option<&ManifestTest>> = BTreeMap::new();
        if let Some(pattern) = &manifest.pattern {
            let matcher = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|source| SuiteError::Glob {
                    pattern: pattern.clone(),
                    source,
                })?
                .compile_matcher();
            let found = source.discover(&matcher)?;
            info!("Discovered {} files matching {}", found.len(), pattern);
            selected.extend(found.into_iter().map(|file| (file, None)));
        }
        for test in &manifest.tests {
            selected.insert(test.file.clone(), Some(test));
        }

        let ignored: Vec<(String, &String)> = manifest
            .ignore
            .iter()
            .map(|(name, reason)| (name.to_lowercase(), reason))
            .collect();

        let mut seen = HashSet::new();
        let mut cases = Vec::with_capacity(selected.len());
        for (file, entry) in selected {
            let (name, expectation) = match entry {
                Some(test) => {
                    let name = test.display_name();
                    let expectation =
                        test.expectation().map_err(|source| SuiteError::Pattern {
                            name: name.clone(),
                            source,
                        })?;
                    (name, expectation)
                }
                None => (default_test_name(&file), Expectation::Pass),
            };
            if !seen.insert(name.to_lowercase()) {
                return Err(SuiteError::DuplicateName(name));
            }

            let body = source.read_to_string(&file)?;
            let ignore_reason = ignored
                .iter()
                .find(|(ignored_name, _)| *ignored_name == name.to_lowercase())
                .map(|(_, reason)| (*reason).clone());

            cases.push(TestCase {
                name,
                file,
                payload: TestPayload::new(body, expectation).with_includes(includes.clone()),
                ignore_reason,
            });
        }
        cases.sort_by(|a, b| a.name.cmp(&b.name));

        for (ignored_name, _) in &ignored {
            if !seen.contains(ignored_name) {
                warn!("Ignore list names unknown test: {}", ignored_name);
            }
        }

        let name = manifest.name.unwrap_or(default_name);
        info!(
            "Loaded suite {}: {} tests, {} ignored",
            name,
            cases.len(),
            cases.iter().filter(|c| c.ignore_reason.is_some()).count()
        );

        Ok(Suite { name, cases })
    }

    /// Ad-hoc suite from script files sharing one expectation.
    pub fn from_files(files: &[PathBuf], expectation: Expectation) -> Result<Self, SuiteError> {
        let mut cases = Vec::with_capacity(files.len());
        for path in files {
            let body = read_file(path)?;
            cases.push(TestCase {
                name: path.display().to_string(),
                file: path.display().to_string(),
                payload: TestPayload::new(body, expectation.clone()),
                ignore_reason: None,
            });
        }
        Ok(Suite {
            name: "ad-hoc".to_string(),
            cases,
        })
    }
}

fn read_file(path: &Path) -> Result<String, SuiteError> {
    std::fs::read_to_string(path).map_err(|source| SuiteError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, relative: &str, content: &str) {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_load_directory_suite() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "harness/assert.lua", "function check(c) assert(c) end");
        write(dir.path(), "cases/arith.lua", "check(1 + 1 == 2)\n");
        write(dir.path(), "cases/call_nil.lua", "local f\nf()\n");
        write(
            dir.path(),
            "basics.toml",
            r#"
root = "cases"
includes = ["harness/assert.lua"]

[[test]]
file = "arith.lua"

[[test]]
file = "call_nil.lua"
error = "TypeError"

[ignore]
"Call_Nil" = "tracked separately"
"#,
        );

        let suite = Suite::load(dir.path().join("basics.toml")).unwrap();
        assert_eq!(suite.name, "basics");
        assert_eq!(suite.cases.len(), 2);

        let arith = &suite.cases[0];
        assert_eq!(arith.name, "arith");
        assert_eq!(arith.payload.includes, "function check(c) assert(c) end\n");
        assert_eq!(arith.payload.body, "check(1 + 1 == 2)\n");
        assert!(arith.ignore_reason.is_none());

        let call_nil = &suite.cases[1];
        assert_eq!(
            call_nil.ignore_reason.as_deref(),
            Some("tracked separately")
        );
    }

    #[test]
    fn test_corpus_source_must_be_unique() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad.toml", "root = \"a\"\narchive = \"b.zip\"\n");
        assert!(matches!(
            Suite::load(dir.path().join("bad.toml")),
            Err(SuiteError::CorpusSource)
        ));

        write(dir.path(), "none.toml", "name = \"x\"\n");
        assert!(matches!(
            Suite::load(dir.path().join("none.toml")),
            Err(SuiteError::CorpusSource)
        ));
    }

    #[test]
    fn test_duplicate_names_and_bad_patterns() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cases/a.lua", "");
        write(dir.path(), "cases/sub/a.lua", "");
        write(
            dir.path(),
            "dup.toml",
            "root = \"cases\"\n[[test]]\nfile = \"a.lua\"\n[[test]]\nfile = \"sub/a.lua\"\nname = \"A\"\n",
        );
        assert!(matches!(
            Suite::load(dir.path().join("dup.toml")),
            Err(SuiteError::DuplicateName(name)) if name == "A"
        ));

        write(
            dir.path(),
            "pattern.toml",
            "root = \"cases\"\n[[test]]\nfile = \"a.lua\"\nerror = \"(\"\n",
        );
        assert!(matches!(
            Suite::load(dir.path().join("pattern.toml")),
            Err(SuiteError::Pattern { .. })
        ));
    }

    #[test]
    fn test_discovery_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cases/lang/arith.lua", "x = 1\n");
        write(dir.path(), "cases/lang/call_nil.lua", "local f\nf()\n");
        write(dir.path(), "cases/builtins/string.lua", "x = ('a'):rep(2)\n");
        write(dir.path(), "cases/notes.txt", "not a test");
        write(dir.path(), "cases/helpers/extra.lua", "x = 2\n");
        write(
            dir.path(),
            "corpus.toml",
            r#"
root = "cases"
pattern = "{lang,builtins}/*.lua"

[[test]]
file = "lang/call_nil.lua"
error = "TypeError"

[[test]]
file = "helpers/extra.lua"
name = "aaa-extra"

[ignore]
"builtins/STRING" = "slow"
"#,
        );

        let suite = Suite::load(dir.path().join("corpus.toml")).unwrap();
        let names: Vec<_> = suite.cases.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            ["aaa-extra", "builtins/string", "lang/arith", "lang/call_nil"]
        );

        assert!(matches!(suite.cases[2].payload.expectation, Expectation::Pass));
        assert!(matches!(
            suite.cases[3].payload.expectation,
            Expectation::FailWith(Some(_))
        ));
        assert_eq!(suite.cases[1].ignore_reason.as_deref(), Some("slow"));
        assert_eq!(suite.cases[3].file, "lang/call_nil.lua");
    }

    #[test]
    fn test_invalid_discovery_pattern() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad.toml", "root = \".\"\npattern = \"[\"\n");
        assert!(matches!(
            Suite::load(dir.path().join("bad.toml")),
            Err(SuiteError::Glob { .. })
        ));
    }

    #[test]
    fn test_from_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "one.lua", "x = 1");
        let suite =
            Suite::from_files(&[dir.path().join("one.lua")], Expectation::any_failure()).unwrap();
        assert_eq!(suite.cases.len(), 1);
        assert_eq!(suite.cases[0].payload.body, "x = 1");
        assert!(suite.cases[0].payload.includes.is_empty());
    }
}
