use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Boundary checks for relative paths that come from untrusted input
/// (diff-file sections, archive entry names).
///
/// Checks are lexical: targets of an `apply` or `merge` frequently do not
/// exist yet, so nothing is canonicalized.
#[derive(Debug, Clone)]
pub struct TargetGuard {
    root: PathBuf,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SafetyError {
    #[error("path is empty")]
    Empty,

    #[error("path is absolute: {0}")]
    Absolute(String),

    #[error("path escapes the target directory: {0}")]
    EscapesTarget(String),
}

impl TargetGuard {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Lexical normal form of a relative path: `.` components dropped and
    /// `dir/..` pairs collapsed, joined with `/`. Fails when the path is
    /// absolute, empty, or climbs above the root.
    pub fn normalize(path: &str) -> Result<String, SafetyError> {
        if path.is_empty() {
            return Err(SafetyError::Empty);
        }
        if path.starts_with('/') || path.starts_with('\\') {
            return Err(SafetyError::Absolute(path.to_string()));
        }

        let mut parts: Vec<&str> = Vec::new();
        for component in Path::new(path).components() {
            match component {
                Component::Prefix(_) | Component::RootDir => {
                    return Err(SafetyError::Absolute(path.to_string()));
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    parts
                        .pop()
                        .ok_or_else(|| SafetyError::EscapesTarget(path.to_string()))?;
                }
                Component::Normal(part) => match part.to_str() {
                    Some(part) => parts.push(part),
                    None => return Err(SafetyError::EscapesTarget(path.to_string())),
                },
            }
        }

        if parts.is_empty() {
            return Err(SafetyError::Empty);
        }
        Ok(parts.join("/"))
    }

    /// Check that `path` is relative, names something below the root and
    /// never climbs above it.
    pub fn check_relative(path: &str) -> Result<(), SafetyError> {
        Self::normalize(path).map(drop)
    }

    /// Validate `relative` and join it onto the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, SafetyError> {
        Ok(self.root.join(Self::normalize(relative)?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
