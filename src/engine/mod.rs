//! Whole-tree reconciliation: diff, apply, merge and single-file edits.
//!
//! Every top-level operation stages its writes through one
//! [`Transaction`] and commits only after all of them succeeded.

mod errors;

pub use errors::ReconcileError;

use crate::codec::resolver::{accept_all, default_resolver};
use crate::codec::{CodecError, CodecResolver, ContentCodec, PathFilter, ValueResolver};
use crate::safety::TargetGuard;
use crate::section::{parse_sections, write_sections, Section};
use crate::source::{list_files, ArchiveSource, DirectorySource, MergeSource};
use crate::transaction::Transaction;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// What a tree operation did, per relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub written: Vec<String>,
    pub deleted: Vec<String>,
    pub created_dirs: Vec<String>,
    pub skipped: Vec<String>,
}

impl Report {
    pub fn is_empty(&self) -> bool {
        self.written.is_empty() && self.deleted.is_empty() && self.created_dirs.is_empty()
    }
}

pub struct ReconcilerBuilder {
    target: PathBuf,
    path_filter: Option<PathFilter>,
    codec_resolver: Option<CodecResolver>,
}

impl ReconcilerBuilder {
    /// Only paths the filter accepts take part in `diff` and `merge`.
    pub fn path_filter(mut self, filter: PathFilter) -> Self {
        self.path_filter = Some(filter);
        self
    }

    pub fn codec_resolver(mut self, resolver: CodecResolver) -> Self {
        self.codec_resolver = Some(resolver);
        self
    }

    pub fn build(self) -> Reconciler {
        Reconciler {
            guard: TargetGuard::new(self.target),
            path_filter: self.path_filter.unwrap_or_else(accept_all),
            codec_resolver: self.codec_resolver.unwrap_or_else(default_resolver),
        }
    }
}

/// Reconciles one target directory.
pub struct Reconciler {
    guard: TargetGuard,
    path_filter: PathFilter,
    codec_resolver: CodecResolver,
}

fn open_existing(path: &Path) -> Result<Option<File>, ReconcileError> {
    match File::open(path) {
        Ok(file) => Ok(Some(file)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(ReconcileError::io(path, err)),
    }
}

fn as_reader(file: &mut Option<File>) -> Option<&mut dyn Read> {
    file.as_mut().map(|file| file as &mut dyn Read)
}

/// `path` with symlinks resolved. A file that does not exist yet is
/// resolved through its parent directory.
fn canonical(path: &Path) -> Option<PathBuf> {
    if let Ok(resolved) = path.canonicalize() {
        return Some(resolved);
    }
    let parent = path.parent()?.canonicalize().ok()?;
    Some(parent.join(path.file_name()?))
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

impl Reconciler {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self::builder(target).build()
    }

    pub fn builder(target: impl Into<PathBuf>) -> ReconcilerBuilder {
        ReconcilerBuilder {
            target: target.into(),
            path_filter: None,
            codec_resolver: None,
        }
    }

    pub fn target(&self) -> &Path {
        self.guard.root()
    }

    fn codec_for(&self, path: &str) -> Result<Box<dyn ContentCodec>, ReconcileError> {
        (self.codec_resolver)(path).ok_or_else(|| ReconcileError::NoCodec {
            path: path.to_string(),
        })
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, ReconcileError> {
        self.guard
            .resolve(relative)
            .map_err(|source| ReconcileError::UnsafePath {
                path: relative.to_string(),
                source,
            })
    }

    /// Sections that turn `reference` into this target.
    ///
    /// Paths are the sorted union of both trees' files that pass the path
    /// filter. Unchanged files produce no section.
    pub fn diff(&self, reference: &Path) -> Result<Vec<Section>, ReconcileError> {
        let ours = list_files(self.target())?;
        let theirs = list_files(reference)?;
        let mut sections = Vec::new();

        for path in ours.union(&theirs) {
            if !(self.path_filter)(path) {
                continue;
            }

            if !ours.contains(path) {
                debug!(path = %path, "deleted");
                sections.push(Section::delete(path.as_str()));
                continue;
            }

            let codec = self.codec_for(path)?;
            let source_path = self.target().join(path);
            let mut source =
                File::open(&source_path).map_err(|err| ReconcileError::io(&source_path, err))?;

            let diff = if theirs.contains(path) {
                let reference_path = reference.join(path);
                let mut reference_file = File::open(&reference_path)
                    .map_err(|err| ReconcileError::io(&reference_path, err))?;
                codec.diff(&mut source, Some(&mut reference_file))
            } else {
                codec.diff(&mut source, None)
            }
            .map_err(|err| ReconcileError::codec(path, err))?;

            match diff {
                Some(diff) => {
                    debug!(
                        path = %path,
                        codec = codec.name(),
                        overwrite = diff.overwrite,
                        "changed"
                    );
                    sections.push(Section::new(path.as_str(), diff));
                }
                None => debug!(path = %path, "unchanged"),
            }
        }

        Ok(sections)
    }

    /// Write [`diff`](Self::diff) to `output` in the diff-file grammar.
    pub fn diff_to_file(
        &self,
        reference: &Path,
        output: &Path,
    ) -> Result<Vec<Section>, ReconcileError> {
        let sections = self.diff(reference)?;
        let mut tx = Transaction::new();
        tx.stage_with(output, |out| {
            write_sections(&sections, out).map_err(|err| ReconcileError::io(output, err))
        })?;
        tx.commit()?;
        Ok(sections)
    }

    /// Read a diff file and apply it to the target.
    pub fn apply(&self, diff_file: &Path) -> Result<Report, ReconcileError> {
        let text = fs::read_to_string(diff_file).map_err(|err| ReconcileError::io(diff_file, err))?;
        let sections = parse_sections(&text)?;
        self.apply_sections(&sections)
    }

    /// Apply parsed or caller-built sections in one transaction.
    ///
    /// Two sections whose paths normalize to the same file are rejected
    /// before anything is staged.
    pub fn apply_sections(&self, sections: &[Section]) -> Result<Report, ReconcileError> {
        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(sections.len());
        for section in sections {
            let target = self.resolve(&section.path)?;
            if !seen.insert(target.clone()) {
                return Err(ReconcileError::DuplicatePath {
                    path: section.path.clone(),
                });
            }
            targets.push(target);
        }

        let mut tx = Transaction::new();
        let mut report = Report::default();

        for (section, target) in sections.iter().zip(targets) {
            let Some(diff) = &section.diff else {
                debug!(path = %section.path, "staging delete");
                tx.stage_delete(&target);
                report.deleted.push(section.path.clone());
                continue;
            };
            if diff.lines.is_empty() && !diff.overwrite {
                report.skipped.push(section.path.clone());
                continue;
            }

            let codec = self.codec_for(&section.path)?;
            let mut existing = open_existing(&target)?;
            debug!(
                path = %section.path,
                codec = codec.name(),
                overwrite = diff.overwrite,
                "staging apply"
            );
            tx.stage_with(&target, |out| {
                codec
                    .apply(as_reader(&mut existing), out, diff)
                    .map_err(|err| ReconcileError::codec(&section.path, err))
            })?;
            report.written.push(section.path.clone());
        }

        tx.commit()?;
        Ok(report)
    }

    /// Merge a directory or a zip archive into the target.
    pub fn merge(&self, source: &Path) -> Result<Report, ReconcileError> {
        if source.is_dir() {
            self.merge_from(&mut DirectorySource::new(source))
        } else {
            self.merge_from(&mut ArchiveSource::open(source)?)
        }
    }

    /// Existing files are merged through their codec; new files are copied
    /// and directories created.
    pub fn merge_from(&self, source: &mut dyn MergeSource) -> Result<Report, ReconcileError> {
        let mut tx = Transaction::new();
        let mut report = Report::default();

        for entry in source.entries()? {
            if !(self.path_filter)(&entry.path) {
                report.skipped.push(entry.path);
                continue;
            }
            let target = self.resolve(&entry.path)?;

            if entry.is_dir {
                if !target.is_dir() {
                    report.created_dirs.push(entry.path.clone());
                }
                tx.ensure_directory(&target)?;
                continue;
            }

            let mut existing = open_existing(&target)?;
            let mut content = source.open(&entry.path)?;
            match existing.as_mut() {
                Some(existing) => {
                    let codec = self.codec_for(&entry.path)?;
                    debug!(path = %entry.path, codec = codec.name(), "staging merge");
                    tx.stage_with(&target, |out| {
                        codec
                            .merge(&mut content, Some(existing), out)
                            .map_err(|err| ReconcileError::codec(&entry.path, err))
                    })?;
                }
                None => {
                    debug!(path = %entry.path, "staging copy");
                    tx.stage_with(&target, |out| {
                        io::copy(&mut content, out)
                            .map(drop)
                            .map_err(|err| ReconcileError::io(&target, err))
                    })?;
                }
            }
            report.written.push(entry.path);
        }

        tx.commit()?;
        Ok(report)
    }

    /// Paths for single-file operations may be absolute or relative to the target.
    fn local_path(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.target().join(file)
        }
    }

    /// The name a single-file path resolves codecs by.
    ///
    /// Inside the target this is the normalized relative path, also when
    /// the target is reached through a symlink. Files elsewhere resolve by
    /// their file name.
    fn codec_key(&self, path: &Path) -> String {
        let inside = |relative: &Path| TargetGuard::normalize(&slash_path(relative)).ok();

        path.strip_prefix(self.target())
            .ok()
            .and_then(inside)
            .or_else(|| {
                let root = canonical(self.target())?;
                inside(canonical(path)?.strip_prefix(root).ok()?)
            })
            .unwrap_or_else(|| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default()
            })
    }

    fn rewrite<F>(&self, file: &Path, op: F) -> Result<PathBuf, ReconcileError>
    where
        F: FnOnce(
            &dyn ContentCodec,
            Option<&mut dyn Read>,
            &mut dyn Write,
        ) -> Result<(), CodecError>,
    {
        let path = self.local_path(file);
        let key = self.codec_key(&path);
        let codec = self.codec_for(&key)?;
        let mut existing = open_existing(&path)?;

        let mut tx = Transaction::new();
        tx.stage_with(&path, |out| {
            op(codec.as_ref(), as_reader(&mut existing), out)
                .map_err(|err| ReconcileError::codec(&key, err))
        })?;
        tx.commit()?;
        Ok(path)
    }

    /// Merge `src` into `dest`; a missing `dest` starts out empty.
    pub fn merge_file(&self, dest: &Path, src: &Path) -> Result<PathBuf, ReconcileError> {
        let mut content = File::open(src).map_err(|err| ReconcileError::io(src, err))?;
        self.rewrite(dest, |codec, existing, out| codec.merge(&mut content, existing, out))
    }

    pub fn set_entries(&self, file: &Path, entries: &[String]) -> Result<PathBuf, ReconcileError> {
        self.rewrite(file, |codec, existing, out| codec.set_entries(existing, out, entries))
    }

    pub fn remove_entries(&self, file: &Path, keys: &[String]) -> Result<PathBuf, ReconcileError> {
        self.rewrite(file, |codec, existing, out| codec.remove_entries(existing, out, keys))
    }

    /// Substitute `@{expr}` tokens in entry values.
    pub fn filter(
        &self,
        file: &Path,
        resolver: ValueResolver<'_>,
    ) -> Result<PathBuf, ReconcileError> {
        self.rewrite(file, |codec, existing, out| codec.filter(existing, out, resolver))
    }

    pub fn normalize(&self, file: &Path) -> Result<PathBuf, ReconcileError> {
        self.rewrite(file, |codec, existing, out| codec.normalize(existing, out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::resolver::exclude_filter;
    use crate::codec::CodecKind;
    use crate::section::Diff;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_diff_sections_per_path_kind() {
        let target = TempDir::new().unwrap();
        let reference = TempDir::new().unwrap();
        write(target.path(), "conf/app.properties", "a=1\nb=3\n");
        write(reference.path(), "conf/app.properties", "a=1\nb=2\n");
        write(target.path(), "same.txt", "same\n");
        write(reference.path(), "same.txt", "same\n");
        write(target.path(), "new.txt", "new\n");
        write(reference.path(), "old.txt", "old\n");

        let sections = Reconciler::new(target.path()).diff(reference.path()).unwrap();
        let summary: Vec<(&str, &str)> = sections
            .iter()
            .map(|s| (s.path.as_str(), s.mode().as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("conf/app.properties", "merge"),
                ("new.txt", "overwrite"),
                ("old.txt", "delete"),
            ]
        );
    }

    #[test]
    fn test_empty_merge_section_is_skipped() {
        let target = TempDir::new().unwrap();
        write(target.path(), "a.properties", "# keep\n a = 1\n");

        let sections = parse_sections("[a.properties merge]\n\n").unwrap();
        let report = Reconciler::new(target.path()).apply_sections(&sections).unwrap();
        assert_eq!(report.skipped, vec!["a.properties".to_string()]);
        assert_eq!(
            fs::read_to_string(target.path().join("a.properties")).unwrap(),
            "# keep\n a = 1\n"
        );
    }

    #[test]
    fn test_aliased_sections_are_rejected() {
        let target = TempDir::new().unwrap();
        write(target.path(), "a.properties", "a=1\n");
        let sections = vec![
            Section::new("a.properties", Diff::merge(vec!["b=2".to_string()])),
            Section::new("conf/../a.properties", Diff::merge(vec!["c=3".to_string()])),
        ];

        let err = Reconciler::new(target.path()).apply_sections(&sections).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::DuplicatePath { ref path } if path == "conf/../a.properties"
        ));
        assert_eq!(fs::read_to_string(target.path().join("a.properties")).unwrap(), "a=1\n");
    }

    #[test]
    fn test_no_codec_aborts_before_writing() {
        let target = TempDir::new().unwrap();
        let reconciler = Reconciler::builder(target.path())
            .codec_resolver(Arc::new(|path: &str| {
                (!path.ends_with(".bin")).then(|| CodecKind::Raw.codec())
            }))
            .build();
        let sections = parse_sections("[a.txt]\nhello\n[b.bin]\nxx\n").unwrap();

        let err = reconciler.apply_sections(&sections).unwrap_err();
        assert!(matches!(err, ReconcileError::NoCodec { path } if path == "b.bin"));
        assert!(!target.path().join("a.txt").exists());
    }

    #[test]
    fn test_failed_section_rolls_back_everything() {
        let target = TempDir::new().unwrap();
        write(target.path(), "a.properties", "a=1\n");
        let sections =
            parse_sections("[a.properties merge]\nb=2\n\n[lib/x.jar merge]\nnope\n").unwrap();

        let err = Reconciler::new(target.path()).apply_sections(&sections).unwrap_err();
        assert!(matches!(err, ReconcileError::Codec { .. }));
        assert_eq!(fs::read_to_string(target.path().join("a.properties")).unwrap(), "a=1\n");
        assert!(!target.path().join("lib").exists());
    }

    #[test]
    fn test_merge_respects_path_filter() {
        let target = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        write(source.path(), "META-INF/MANIFEST.MF", "Manifest-Version: 1.0\n");
        write(source.path(), "conf/jvm.conf", "-Xmx1g\n");

        let reconciler = Reconciler::builder(target.path())
            .path_filter(exclude_filter(vec![glob::Pattern::new("META-INF").unwrap()]))
            .build();
        let report = reconciler.merge(source.path()).unwrap();

        assert_eq!(report.written, vec!["conf/jvm.conf".to_string()]);
        assert_eq!(report.created_dirs, vec!["conf".to_string()]);
        assert!(!target.path().join("META-INF").exists());
        assert_eq!(fs::read_to_string(target.path().join("conf/jvm.conf")).unwrap(), "-Xmx1g\n");
    }

    #[test]
    fn test_single_file_edits_resolve_against_target() {
        let target = TempDir::new().unwrap();
        write(target.path(), "conf/app.properties", "host=@{host}\n");
        let reconciler = Reconciler::new(target.path());
        let file = Path::new("conf/app.properties");

        reconciler.set_entries(file, &["port=80".to_string()]).unwrap();
        reconciler
            .filter(file, &|expr: &str| (expr == "host").then(|| "example.org".to_string()))
            .unwrap();
        reconciler.remove_entries(file, &["port".to_string()]).unwrap();

        assert_eq!(
            fs::read_to_string(target.path().join(file)).unwrap(),
            "host=example.org\n"
        );
    }

    #[test]
    fn test_codec_key_for_paths_in_and_out_of_target() {
        let target = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let reconciler = Reconciler::new(target.path());

        assert_eq!(reconciler.codec_key(&target.path().join("conf/a.cfg")), "conf/a.cfg");
        assert_eq!(
            reconciler.codec_key(&target.path().join("conf/../conf/./a.cfg")),
            "conf/a.cfg"
        );
        assert_eq!(reconciler.codec_key(&elsewhere.path().join("conf/a.cfg")), "a.cfg");
        assert_eq!(reconciler.codec_key(&target.path().join("../a.cfg")), "a.cfg");
    }

    #[cfg(unix)]
    #[test]
    fn test_codec_key_through_symlinked_target() {
        let real = TempDir::new().unwrap();
        let links = TempDir::new().unwrap();
        let link = links.path().join("app");
        std::os::unix::fs::symlink(real.path(), &link).unwrap();
        fs::create_dir_all(real.path().join("conf")).unwrap();

        let reconciler = Reconciler::new(&link);
        let canonical_file = real.path().canonicalize().unwrap().join("conf/new.cfg");
        assert_eq!(reconciler.codec_key(&canonical_file), "conf/new.cfg");
    }

    #[test]
    fn test_set_entries_outside_target_uses_file_name_rules() {
        let target = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let reconciler = Reconciler::builder(target.path())
            .codec_resolver(crate::codec::resolver::rule_resolver(vec![
                crate::codec::resolver::CodecRule::new(
                    glob::Pattern::new("[!/]*.cfg").unwrap(),
                    CodecKind::Properties,
                ),
            ]))
            .build();

        let file = elsewhere.path().join("server.cfg");
        write(elsewhere.path(), "server.cfg", "port=80\n");
        reconciler.set_entries(&file, &["port=8443".to_string()]).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "port=8443\n");
    }

    #[test]
    fn test_set_entries_on_raw_file_is_unsupported() {
        let target = TempDir::new().unwrap();
        write(target.path(), "notes.txt", "hello\n");
        let err = Reconciler::new(target.path())
            .set_entries(Path::new("notes.txt"), &["a=1".to_string()])
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Codec { source: CodecError::Unsupported { .. }, .. }
        ));
        assert_eq!(fs::read_to_string(target.path().join("notes.txt")).unwrap(), "hello\n");
    }
}
