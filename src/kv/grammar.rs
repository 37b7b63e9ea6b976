use crate::kv::entry::Entry;
use std::fmt;
use std::hash::Hash;

/// A line grammar for a flat key/value configuration format.
///
/// `parse` and `format` are symmetric: formatting a parsed entry yields a
/// line that parses back to the same key and value. `format_key` renders a
/// key alone (as used by `-remove` instructions) and must parse back to the
/// same key as well.
pub trait Grammar {
    type Key: Clone + Eq + Hash + fmt::Debug;

    /// Parse one trimmed, non-comment line. `None` means the line is not
    /// recognized by this grammar.
    fn parse(&self, line: &str) -> Option<Entry<Self::Key>>;

    fn format(&self, entry: &Entry<Self::Key>) -> String;

    fn format_key(&self, key: &Self::Key) -> String;
}
