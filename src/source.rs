//! Inputs for a tree merge: a directory on disk or a zip archive.

use crate::engine::ReconcileError;
use crate::safety::TargetGuard;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;
use zip::ZipArchive;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// Relative, `/`-separated path.
    pub path: String,
    pub is_dir: bool,
}

impl SourceEntry {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_dir: false,
        }
    }

    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_dir: true,
        }
    }
}

/// Anything that can list entries and open the file ones for reading.
pub trait MergeSource {
    /// All entries, parents before children.
    fn entries(&mut self) -> Result<Vec<SourceEntry>, ReconcileError>;

    fn open(&mut self, path: &str) -> Result<Box<dyn Read + '_>, ReconcileError>;
}

fn relative_name(root: &Path, path: &Path) -> Result<String, ReconcileError> {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component.as_os_str().to_str().ok_or_else(|| {
            ReconcileError::io(
                path,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "file name is not valid UTF-8",
                ),
            )
        })?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}

fn walk(root: &Path) -> Result<Vec<SourceEntry>, ReconcileError> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(root).to_path_buf();
            ReconcileError::io(&path, err.into())
        })?;

        let file_type = entry.file_type();
        let path = relative_name(root, entry.path())?;
        if file_type.is_dir() {
            entries.push(SourceEntry::dir(path));
        } else if file_type.is_file() {
            entries.push(SourceEntry::file(path));
        } else {
            debug!(path = %entry.path().display(), "skipping special file");
        }
    }
    Ok(entries)
}

/// Regular files under `root` as sorted relative paths. A missing root is
/// an empty tree.
pub fn list_files(root: &Path) -> Result<BTreeSet<String>, ReconcileError> {
    if !root.exists() {
        return Ok(BTreeSet::new());
    }
    Ok(walk(root)?
        .into_iter()
        .filter(|entry| !entry.is_dir)
        .map(|entry| entry.path)
        .collect())
}

pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl MergeSource for DirectorySource {
    fn entries(&mut self) -> Result<Vec<SourceEntry>, ReconcileError> {
        walk(&self.root)
    }

    fn open(&mut self, path: &str) -> Result<Box<dyn Read + '_>, ReconcileError> {
        let full = self.root.join(path);
        let file = File::open(&full).map_err(|err| ReconcileError::io(&full, err))?;
        Ok(Box::new(file))
    }
}

fn archive_error(path: &Path, err: impl std::fmt::Display) -> ReconcileError {
    ReconcileError::Archive {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// Zip archive entries. Names are checked with [`TargetGuard`] and missing
/// parent directories are synthesized.
pub struct ArchiveSource {
    path: PathBuf,
    archive: ZipArchive<File>,
    /// Normalized entry name to archive index, filled by `entries`.
    index: HashMap<String, usize>,
}

impl ArchiveSource {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ReconcileError> {
        let path = path.into();
        let file = File::open(&path).map_err(|err| ReconcileError::io(&path, err))?;
        let archive = ZipArchive::new(file).map_err(|err| archive_error(&path, err))?;
        Ok(Self {
            path,
            archive,
            index: HashMap::new(),
        })
    }
}

impl MergeSource for ArchiveSource {
    fn entries(&mut self) -> Result<Vec<SourceEntry>, ReconcileError> {
        let mut found: BTreeMap<String, bool> = BTreeMap::new();

        for idx in 0..self.archive.len() {
            let (raw_name, is_dir) = {
                let file = self
                    .archive
                    .by_index(idx)
                    .map_err(|err| archive_error(&self.path, err))?;
                (file.name().to_string(), file.is_dir())
            };

            let normalized = raw_name.replace('\\', "/");
            let name = normalized.trim_end_matches('/');
            TargetGuard::check_relative(name).map_err(|source| ReconcileError::UnsafePath {
                path: raw_name.clone(),
                source,
            })?;

            for (pos, _) in name.match_indices('/') {
                found.entry(name[..pos].to_string()).or_insert(true);
            }
            found.insert(name.to_string(), is_dir);
            self.index.insert(name.to_string(), idx);
        }

        Ok(found
            .into_iter()
            .map(|(path, is_dir)| SourceEntry { path, is_dir })
            .collect())
    }

    fn open(&mut self, path: &str) -> Result<Box<dyn Read + '_>, ReconcileError> {
        let file = match self.index.get(path) {
            Some(&idx) => self.archive.by_index(idx),
            None => self.archive.by_name(path),
        }
        .map_err(|err| archive_error(&self.path, err))?;
        Ok(Box::new(file))
    }
}
