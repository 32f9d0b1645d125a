//! Where test files come from: a directory tree or a zip archive

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use globset::GlobMatcher;
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::error::SuiteError;

/// Test file storage
pub enum CorpusSource {
    Directory(PathBuf),
    Archive {
        path: PathBuf,
        archive: ZipArchive<File>,
    },
}

impl CorpusSource {
    pub fn directory(root: impl AsRef<Path>) -> Self {
        CorpusSource::Directory(root.as_ref().to_path_buf())
    }

    pub fn open_archive(path: impl AsRef<Path>) -> Result<Self, SuiteError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| SuiteError::Io {
            path: path.clone(),
            source,
        })?;
        let archive = ZipArchive::new(file).map_err(|source| SuiteError::Archive {
            path: path.clone(),
            source,
        })?;
        Ok(CorpusSource::Archive { path, archive })
    }

    /// Paths inside the corpus matching `pattern`, `/`-separated and sorted.
    pub fn discover(&self, pattern: &GlobMatcher) -> Result<Vec<String>, SuiteError> {
        let mut found = Vec::new();
        match self {
            CorpusSource::Directory(root) => {
                for entry in WalkDir::new(root).sort_by_file_name() {
                    let entry = entry.map_err(|source| SuiteError::Walk {
                        path: root.clone(),
                        source,
                    })?;
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let Ok(relative) = entry.path().strip_prefix(root) else {
                        continue;
                    };
                    let relative = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    if pattern.is_match(&relative) {
                        found.push(relative);
                    }
                }
            }
            CorpusSource::Archive { archive, .. } => {
                found.extend(
                    archive
                        .file_names()
                        .filter(|name| !name.ends_with('/') && pattern.is_match(name))
                        .map(str::to_string),
                );
            }
        }
        found.sort();
        Ok(found)
    }

    /// Read one test file, `relative` being its path inside the corpus.
    pub fn read_to_string(&mut self, relative: &str) -> Result<String, SuiteError> {
        match self {
            CorpusSource::Directory(root) => {
                let path = root.join(relative);
                std::fs::read_to_string(&path).map_err(|source| SuiteError::Io { path, source })
            }
            CorpusSource::Archive { path, archive } => {
                let mut entry = archive
                    .by_name(relative)
                    .map_err(|source| SuiteError::Archive {
                        path: path.join(relative),
                        source,
                    })?;
                let mut content = String::new();
                entry
                    .read_to_string(&mut content)
                    .map_err(|source| SuiteError::Io {
                        path: path.join(relative),
                        source,
                    })?;
                Ok(content)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    #[test]
    fn test_read_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("lang")).unwrap();
        std::fs::write(dir.path().join("lang/add.lua"), "assert(1 + 1 == 2)").unwrap();

        let mut source = CorpusSource::directory(dir.path());
        assert_eq!(
            source.read_to_string("lang/add.lua").unwrap(),
            "assert(1 + 1 == 2)"
        );
        assert!(matches!(
            source.read_to_string("missing.lua"),
            Err(SuiteError::Io { .. })
        ));
    }

    #[test]
    fn test_read_from_archive() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("cases.zip");
        {
            let mut writer = ZipWriter::new(File::create(&zip_path).unwrap());
            writer
                .start_file("lang/call.lua", SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"local f = nil\nf()").unwrap();
            writer.finish().unwrap();
        }

        let mut source = CorpusSource::open_archive(&zip_path).unwrap();
        assert_eq!(
            source.read_to_string("lang/call.lua").unwrap(),
            "local f = nil\nf()"
        );
        assert!(matches!(
            source.read_to_string("lang/other.lua"),
            Err(SuiteError::Archive { .. })
        ));
    }

    fn lua_files() -> GlobMatcher {
        globset::GlobBuilder::new("**/*.lua")
            .literal_separator(true)
            .build()
            .unwrap()
            .compile_matcher()
    }

    #[test]
    fn test_discover_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lang/nested")).unwrap();
        std::fs::write(dir.path().join("top.lua"), "").unwrap();
        std::fs::write(dir.path().join("lang/b.lua"), "").unwrap();
        std::fs::write(dir.path().join("lang/nested/a.lua"), "").unwrap();
        std::fs::write(dir.path().join("lang/README.md"), "").unwrap();

        let source = CorpusSource::directory(dir.path());
        assert_eq!(
            source.discover(&lua_files()).unwrap(),
            ["lang/b.lua", "lang/nested/a.lua", "top.lua"]
        );
    }

    #[test]
    fn test_discover_in_archive() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("cases.zip");
        {
            let mut writer = ZipWriter::new(File::create(&zip_path).unwrap());
            writer
                .add_directory("lang/", SimpleFileOptions::default())
                .unwrap();
            for name in ["lang/z.lua", "lang/a.lua", "notes.txt"] {
                writer.start_file(name, SimpleFileOptions::default()).unwrap();
                writer.write_all(b"x = 1").unwrap();
            }
            writer.finish().unwrap();
        }

        let source = CorpusSource::open_archive(&zip_path).unwrap();
        assert_eq!(
            source.discover(&lua_files()).unwrap(),
            ["lang/a.lua", "lang/z.lua"]
        );
    }
}
