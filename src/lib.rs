//! Conftree: reconciliation of installed configuration trees
//!
//! Compares, patches and merges directory trees of configuration files,
//! libraries and data. Changes travel as a plain-text diff file made of
//! path sections; each file is handled by a content codec that understands
//! its format.
//!
//! # Architecture
//!
//! - [`section`] parses and writes the diff-file grammar.
//! - [`kv`] holds an ordered, comment-preserving key/value store with
//!   pluggable line grammars (`.properties`, JVM option files).
//! - [`codec`] maps a relative path to a [`ContentCodec`] that can diff,
//!   apply, merge and edit one file.
//! - [`transaction`] stages every write next to its target and commits
//!   them together.
//! - [`engine`] drives whole-tree diff, apply and merge on top of all that.
//!
//! # Safety
//!
//! - No target file changes until every staged write has succeeded
//! - Section and archive paths cannot escape the target directory
//! - Text that would not survive a line-based round trip is carried as base64
//!
//! # Example
//!
//! ```no_run
//! use conftree::Reconciler;
//! use std::path::Path;
//!
//! let reconciler = Reconciler::new("/opt/app");
//! reconciler.diff_to_file(Path::new("/opt/app.dist"), Path::new("site.diff"))?;
//!
//! let report = Reconciler::new("/opt/app-next").apply(Path::new("site.diff"))?;
//! println!("{} files written", report.written.len());
//! # Ok::<(), conftree::ReconcileError>(())
//! ```

pub mod codec;
pub mod config;
pub mod engine;
pub mod kv;
pub mod safety;
pub mod section;
pub mod source;
pub mod transaction;

// Re-exports
pub use codec::{CodecError, CodecKind, ContentCodec};
pub use config::{load_from_path, load_from_str, ConfigError, ProfileConfig};
pub use engine::{ReconcileError, Reconciler, ReconcilerBuilder, Report};
pub use kv::{JvmGrammar, KvStore, PropertiesGrammar};
pub use safety::{SafetyError, TargetGuard};
pub use section::{parse_sections, Diff, Mode, Section, SectionError};
pub use source::{ArchiveSource, DirectorySource, MergeSource};
pub use transaction::{Transaction, TransactionError};
