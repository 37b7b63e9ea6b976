//! `key=value` / `key:value` properties grammar.
//!
//! No escaping or line continuation is interpreted: keys and values are the
//! trimmed text around the first separator.

use crate::kv::entry::Entry;
use crate::kv::grammar::Grammar;

#[derive(Debug, Clone, Copy, Default)]
pub struct PropertiesGrammar;

impl Grammar for PropertiesGrammar {
    type Key = String;

    fn parse(&self, line: &str) -> Option<Entry<String>> {
        let Some(pos) = line.find(|c: char| c == '=' || c == ':') else {
            return Some(Entry::new(line.to_string(), ""));
        };
        let key = line[..pos].trim().to_string();
        let value = line[pos + 1..].trim();
        Some(Entry::new(key, value))
    }

    fn format(&self, entry: &Entry<String>) -> String {
        format!("{}={}", entry.key(), entry.value())
    }

    fn format_key(&self, key: &String) -> String {
        key.clone()
    }
}
