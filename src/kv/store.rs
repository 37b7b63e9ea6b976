use crate::kv::entry::Entry;
use crate::kv::grammar::Grammar;
use std::collections::HashMap;

/// Lines starting with this mark (and blank lines) are comments.
pub const COMMENT_MARK: &str = "#";
/// Instruction verb: set the entry that follows.
pub const SET_VERB: &str = "-set";
/// Instruction verb: remove the key that follows.
pub const REMOVE_VERB: &str = "-remove";

/// A line the grammar could not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnparsableLine {
    pub line: String,
}

/// Ordered, comment-preserving key/value store.
///
/// Entries keep their source order; `index` maps every key to its position
/// in `entries` and is rebuilt whenever positions shift.
#[derive(Debug, Clone)]
pub struct KvStore<K> {
    entries: Vec<Entry<K>>,
    index: HashMap<K, usize>,
    trailing: Vec<String>,
}

impl<K> Default for KvStore<K> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            trailing: Vec::new(),
        }
    }
}

fn is_comment(line: &str) -> bool {
    line.is_empty() || line.starts_with(COMMENT_MARK)
}

impl<K> KvStore<K>
where
    K: Clone + Eq + std::hash::Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `text` line by line.
    ///
    /// Blank and `#` lines accumulate into the comment block of the next
    /// entry; comments after the last entry are kept as a trailing block.
    pub fn parse<G>(text: &str, grammar: &G) -> Result<Self, UnparsableLine>
    where
        G: Grammar<Key = K>,
    {
        let mut store = Self::new();
        let mut comments = Vec::new();

        for raw in text.lines() {
            let line = raw.trim();
            if is_comment(line) {
                comments.push(line.to_string());
                continue;
            }

            let entry = grammar.parse(line).ok_or_else(|| UnparsableLine {
                line: line.to_string(),
            })?;
            store.set_entry(entry.with_comments(std::mem::take(&mut comments)));
        }

        store.trailing = comments;
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry<K>] {
        &self.entries
    }

    pub fn get(&self, key: &K) -> Option<&Entry<K>> {
        self.index.get(key).map(|&idx| &self.entries[idx])
    }

    pub fn trailing_comments(&self) -> &[String] {
        &self.trailing
    }

    /// Insert or replace an entry.
    ///
    /// An existing key keeps its position; its comments survive when the
    /// new entry carries none. New keys are appended.
    pub fn set_entry(&mut self, mut entry: Entry<K>) {
        match self.index.get(entry.key()) {
            Some(&idx) => {
                if entry.comments().is_empty() {
                    entry.set_comments(self.entries[idx].take_comments());
                }
                self.entries[idx] = entry;
            }
            None => {
                self.index.insert(entry.key().clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Remove the entry for `key`, if any.
    ///
    /// Its comment block moves to the following entry when that entry has
    /// no comments of its own; otherwise the block is dropped.
    pub fn remove_entry(&mut self, key: &K) -> Option<Entry<K>> {
        let idx = self.index.remove(key)?;
        let mut removed = self.entries.remove(idx);

        if let Some(next) = self.entries.get_mut(idx) {
            if next.comments().is_empty() && !removed.comments().is_empty() {
                next.set_comments(removed.take_comments());
            }
        }

        self.reindex_from(idx);
        Some(removed)
    }

    /// Overlay every entry of `other` onto this store, in `other`'s order.
    pub fn merge_from(&mut self, other: &KvStore<K>) {
        for entry in &other.entries {
            self.set_entry(entry.clone());
        }
    }

    /// Replay `-set` / `-remove` instructions.
    ///
    /// A line whose first word is not a verb is a `-set` of the whole line.
    /// Comment lines become the comment block of the next set entry.
    pub fn apply_instructions<G>(
        &mut self,
        lines: &[String],
        grammar: &G,
    ) -> Result<(), UnparsableLine>
    where
        G: Grammar<Key = K>,
    {
        let mut comments = Vec::new();

        for raw in lines {
            let line = raw.trim();
            if is_comment(line) {
                comments.push(line.to_string());
                continue;
            }

            let (verb, rest) = match line.split_once(' ') {
                Some((word, rest)) => (word, rest),
                None => (line, ""),
            };
            let (remove, text) = match verb {
                SET_VERB => (false, rest),
                REMOVE_VERB => (true, rest),
                _ => (false, line),
            };

            let entry = grammar.parse(text).ok_or_else(|| UnparsableLine {
                line: line.to_string(),
            })?;
            let comments = std::mem::take(&mut comments);
            if remove {
                self.remove_entry(entry.key());
            } else {
                self.set_entry(entry.with_comments(comments));
            }
        }

        Ok(())
    }

    /// Instructions that turn `reference` into this store.
    ///
    /// `-remove` lines for keys missing here come first, sorted by their
    /// formatted key; then every entry that is new or has a different value,
    /// with its comments, in this store's order.
    pub fn diff_against<G>(&self, reference: &KvStore<K>, grammar: &G) -> Vec<String>
    where
        G: Grammar<Key = K>,
    {
        let mut removed: Vec<String> = reference
            .entries
            .iter()
            .filter(|entry| !self.index.contains_key(entry.key()))
            .map(|entry| grammar.format_key(entry.key()))
            .collect();
        removed.sort();

        let mut lines: Vec<String> = removed
            .into_iter()
            .map(|key| format!("{REMOVE_VERB} {key}"))
            .collect();

        for entry in &self.entries {
            let unchanged = reference
                .get(entry.key())
                .is_some_and(|existing| existing.value() == entry.value());
            if unchanged {
                continue;
            }

            lines.extend(entry.comments().iter().cloned());
            let formatted = grammar.format(entry);
            if needs_explicit_set(&formatted) {
                lines.push(format!("{SET_VERB} {formatted}"));
            } else {
                lines.push(formatted);
            }
        }

        lines
    }

    /// Apply `f` to every entry value.
    pub fn try_map_values<F, E>(&mut self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&str) -> Result<String, E>,
    {
        for entry in &mut self.entries {
            let value = f(entry.value())?;
            entry.set_value(value);
        }
        Ok(())
    }

    /// Render the store back to text, one `\n`-terminated line each.
    ///
    /// A blank first line is suppressed so rewritten files do not grow a
    /// leading empty line.
    pub fn serialize<G>(&self, grammar: &G) -> String
    where
        G: Grammar<Key = K>,
    {
        let mut lines: Vec<String> = Vec::new();
        for entry in &self.entries {
            lines.extend(entry.comments().iter().cloned());
            lines.push(grammar.format(entry));
        }
        lines.extend(self.trailing.iter().cloned());

        let skip = usize::from(lines.first().is_some_and(|line| line.is_empty()));
        let mut out = String::new();
        for line in &lines[skip..] {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Keys of this store, in order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(Entry::key)
    }

    fn reindex_from(&mut self, start: usize) {
        for (idx, entry) in self.entries.iter().enumerate().skip(start) {
            self.index.insert(entry.key().clone(), idx);
        }
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let keys: std::collections::HashSet<&K> = self.entries.iter().map(Entry::key).collect();
        assert_eq!(keys.len(), self.entries.len(), "duplicate keys");
        assert_eq!(self.index.len(), self.entries.len(), "index size");
        for (idx, entry) in self.entries.iter().enumerate() {
            assert_eq!(self.index.get(entry.key()), Some(&idx), "index position");
        }
    }
}

/// Whether a formatted entry would be read back as a verb instruction.
fn needs_explicit_set(formatted: &str) -> bool {
    let word = formatted.split(' ').next().unwrap_or_default();
    word == SET_VERB || word == REMOVE_VERB
}
