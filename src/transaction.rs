use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::{Builder, NamedTempFile};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Extension of staged files.
pub const TEMP_EXTENSION: &str = "tmp";

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "commit failed after {completed} of {total} operations at {}: {source}",
        path.display()
    )]
    CommitFailed {
        completed: usize,
        total: usize,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TransactionError {
    fn io(path: &Path, source: io::Error) -> Self {
        TransactionError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A staged change. Dropping a `Replace` deletes its temp file.
#[derive(Debug)]
enum CommitOp {
    Replace { temp: NamedTempFile, target: PathBuf },
    Delete(PathBuf),
}

impl CommitOp {
    fn target(&self) -> &Path {
        match self {
            CommitOp::Replace { target, .. } => target,
            CommitOp::Delete(path) => path,
        }
    }

    fn run(self) -> io::Result<()> {
        match self {
            CommitOp::Replace { temp, target } => {
                temp.persist(&target).map(drop).map_err(|err| err.error)
            }
            CommitOp::Delete(path) => match fs::remove_file(&path) {
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        }
    }
}

/// Staged multi-file mutation.
///
/// Every write goes to a sibling temp file, flushed and fsynced when
/// staged; the visible change (persist or delete) happens in [`commit`],
/// in staging order. Dropping an uncommitted transaction deletes the temp
/// files and every directory it created, newest first.
///
/// Each file is replaced atomically, the batch as a whole is not: a commit
/// that fails half way leaves earlier files in their new state. The
/// remaining temp files are still deleted.
///
/// [`commit`]: Transaction::commit
#[derive(Debug)]
#[must_use = "a transaction rolls back unless committed"]
pub struct Transaction {
    id: String,
    commit_ops: Vec<CommitOp>,
    /// Directories created while staging, in creation order.
    created_dirs: Vec<PathBuf>,
    finished: bool,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    pub fn new() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("{millis}-{}-{seq}", std::process::id()),
            commit_ops: Vec::new(),
            created_dirs: Vec::new(),
            finished: false,
        }
    }

    /// Number of staged writes and deletes.
    pub fn pending(&self) -> usize {
        self.commit_ops.len()
    }

    /// Whether `path` names a temp file staged by some transaction.
    pub fn is_temp_file(path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == TEMP_EXTENSION)
    }

    /// A temp file next to `target`, named `{name}.{random}.{id}.tmp`.
    fn temp_file(&self, target: &Path) -> Result<NamedTempFile, TransactionError> {
        let name = target.file_name().ok_or_else(|| {
            TransactionError::io(
                target,
                io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
            )
        })?;
        let parent = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut prefix = name.to_os_string();
        prefix.push(".");
        let suffix = format!(".{}.{TEMP_EXTENSION}", self.id);
        Builder::new()
            .prefix(&prefix)
            .suffix(&suffix)
            .tempfile_in(parent)
            .map_err(|err| TransactionError::io(target, err))
    }

    /// Create `dir` and any missing parents, removing them again on rollback.
    pub fn ensure_directory(&mut self, dir: &Path) -> Result<(), TransactionError> {
        if dir.as_os_str().is_empty() || dir.is_dir() {
            return Ok(());
        }
        if let Some(parent) = dir.parent() {
            self.ensure_directory(parent)?;
        }

        match fs::create_dir(dir) {
            Ok(()) => {
                debug!(dir = %dir.display(), "created directory");
                self.created_dirs.push(dir.to_path_buf());
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
            Err(err) => Err(TransactionError::io(dir, err)),
        }
    }

    /// Stage a replacement of `target` with whatever `write` produces.
    ///
    /// An error from `write` leaves the transaction usable; the partial temp
    /// file is deleted right away.
    pub fn stage_with<F, E>(&mut self, target: &Path, write: F) -> Result<(), E>
    where
        F: FnOnce(&mut dyn Write) -> Result<(), E>,
        E: From<TransactionError>,
    {
        if let Some(parent) = target.parent() {
            self.ensure_directory(parent)?;
        }

        let mut temp = self.temp_file(target)?;
        let temp_path = temp.path().to_path_buf();

        let mut writer = BufWriter::new(&mut temp);
        write(&mut writer)?;
        writer
            .into_inner()
            .map_err(|err| TransactionError::io(&temp_path, err.into_error()))?;
        temp.as_file()
            .sync_all()
            .map_err(|err| TransactionError::io(&temp_path, err))?;

        debug!(target = %target.display(), temp = %temp_path.display(), "staged write");
        self.commit_ops.push(CommitOp::Replace {
            temp,
            target: target.to_path_buf(),
        });
        Ok(())
    }

    pub fn stage_bytes(&mut self, target: &Path, bytes: &[u8]) -> Result<(), TransactionError> {
        self.stage_with(target, |out| {
            out.write_all(bytes)
                .map_err(|err| TransactionError::io(target, err))
        })
    }

    /// Stage removal of `target`. A file that is already gone is fine.
    pub fn stage_delete(&mut self, target: &Path) {
        debug!(target = %target.display(), "staged delete");
        self.commit_ops.push(CommitOp::Delete(target.to_path_buf()));
    }

    /// Run every staged persist and delete in staging order.
    pub fn commit(mut self) -> Result<(), TransactionError> {
        self.finished = true;
        let ops = std::mem::take(&mut self.commit_ops);
        let total = ops.len();
        let mut ops = ops.into_iter().enumerate();

        while let Some((completed, op)) = ops.next() {
            let path = op.target().to_path_buf();
            if let Err(source) = op.run() {
                warn!(
                    path = %path.display(),
                    completed,
                    total,
                    "commit failed, removing staged files"
                );
                // Deletes the temp files that were not persisted yet.
                drop(ops);
                self.remove_created_dirs();
                return Err(TransactionError::CommitFailed {
                    completed,
                    total,
                    path,
                    source,
                });
            }
        }

        self.created_dirs.clear();
        info!(operations = total, "transaction committed");
        Ok(())
    }

    /// Discard every staged change.
    pub fn rollback(mut self) {
        self.finished = true;
        self.discard();
    }

    fn discard(&mut self) {
        self.commit_ops.clear();
        self.remove_created_dirs();
    }

    /// Fails on directories that received committed files; those stay.
    fn remove_created_dirs(&mut self) {
        for dir in self.created_dirs.drain(..).rev() {
            if let Err(err) = fs::remove_dir(&dir) {
                if err.kind() != io::ErrorKind::NotFound {
                    debug!(dir = %dir.display(), error = %err, "kept directory");
                }
            }
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            if !self.commit_ops.is_empty() {
                debug!(pending = self.commit_ops.len(), "rolling back uncommitted transaction");
            }
            self.discard();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use walkdir::WalkDir;

    fn temp_files(root: &Path) -> Vec<PathBuf> {
        WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .map(|entry| entry.into_path())
            .filter(|path| Transaction::is_temp_file(path))
            .collect()
    }

    #[test]
    fn test_commit_writes_and_deletes() {
        let dir = TempDir::new().unwrap();
        let keep = dir.path().join("keep.txt");
        let gone = dir.path().join("gone.txt");
        fs::write(&keep, "old").unwrap();
        fs::write(&gone, "bye").unwrap();

        let mut tx = Transaction::new();
        tx.stage_bytes(&keep, b"new").unwrap();
        tx.stage_bytes(&dir.path().join("nested/dir/fresh.txt"), b"fresh").unwrap();
        tx.stage_delete(&gone);
        tx.stage_delete(&dir.path().join("never-existed"));

        // Nothing visible before commit.
        assert_eq!(fs::read_to_string(&keep).unwrap(), "old");
        assert!(gone.exists());
        assert_eq!(tx.pending(), 4);

        tx.commit().unwrap();
        assert_eq!(fs::read_to_string(&keep).unwrap(), "new");
        assert_eq!(fs::read_to_string(dir.path().join("nested/dir/fresh.txt")).unwrap(), "fresh");
        assert!(!gone.exists());
        assert!(temp_files(dir.path()).is_empty());
    }

    #[test]
    fn test_drop_rolls_back() {
        let dir = TempDir::new().unwrap();
        let existing = dir.path().join("existing.txt");
        fs::write(&existing, "original").unwrap();

        {
            let mut tx = Transaction::new();
            tx.stage_bytes(&existing, b"changed").unwrap();
            tx.stage_bytes(&dir.path().join("a/b/new.txt"), b"new").unwrap();
            tx.stage_delete(&existing);
        }

        assert_eq!(fs::read_to_string(&existing).unwrap(), "original");
        assert!(!dir.path().join("a").exists());
        assert!(temp_files(dir.path()).is_empty());
    }

    #[test]
    fn test_failed_writer_is_rolled_back() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("sub/file.txt");

        let mut tx = Transaction::new();
        let result: Result<(), TransactionError> = tx.stage_with(&target, |out| {
            out.write_all(b"partial").map_err(|err| TransactionError::io(&target, err))?;
            Err(TransactionError::io(&target, io::Error::new(io::ErrorKind::Other, "boom")))
        });
        assert!(result.is_err());
        tx.rollback();

        assert!(!dir.path().join("sub").exists());
    }

    #[test]
    fn test_commit_failure_keeps_completed_files_and_cleans_temps() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "a-old").unwrap();
        fs::write(&b, "b-old").unwrap();

        let mut tx = Transaction::new();
        tx.stage_bytes(&a, b"a-new").unwrap();
        tx.stage_bytes(&b, b"b-new").unwrap();

        // A non-empty directory in place of b.txt makes its rename fail.
        fs::remove_file(&b).unwrap();
        fs::create_dir(&b).unwrap();
        fs::write(b.join("blocker"), "x").unwrap();

        let err = tx.commit().unwrap_err();
        assert!(matches!(
            err,
            TransactionError::CommitFailed { completed: 1, total: 2, .. }
        ));
        assert_eq!(fs::read_to_string(&a).unwrap(), "a-new");
        assert!(temp_files(dir.path()).is_empty());
    }

    #[test]
    fn test_staged_file_sits_next_to_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("app.properties");

        let mut tx = Transaction::new();
        tx.stage_bytes(&target, b"a=1\n").unwrap();

        let staged = temp_files(dir.path());
        assert_eq!(staged.len(), 1);
        let name = staged[0].file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("app.properties."), "{name}");
        assert!(!target.exists());

        tx.commit().unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "a=1\n");
        assert!(temp_files(dir.path()).is_empty());
    }

    #[test]
    fn test_failed_commit_removes_created_directories() {
        let dir = TempDir::new().unwrap();
        let blocked = dir.path().join("blocked");
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("inner"), "x").unwrap();

        let mut tx = Transaction::new();
        tx.stage_bytes(&blocked, b"file").unwrap();
        tx.stage_bytes(&dir.path().join("fresh/dir/new.txt"), b"new").unwrap();

        assert!(tx.commit().is_err());
        assert!(!dir.path().join("fresh").exists());
        assert!(temp_files(dir.path()).is_empty());
    }
}
