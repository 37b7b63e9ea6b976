//! Which codec handles which path, and which paths take part at all.
//!
//! Paths are relative, `/`-separated strings.

use super::{CodecKind, ContentCodec};
use glob::Pattern;
use std::sync::Arc;

/// `path -> codec`; `None` means no codec can handle the path.
pub type CodecResolver = Arc<dyn Fn(&str) -> Option<Box<dyn ContentCodec>> + Send + Sync>;

/// `path -> included?`
pub type PathFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

pub const JVM_CONFIG_FILE: &str = "jvm.conf";
pub const PROPERTIES_SUFFIX: &str = ".properties";

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// `jvm.conf` is a JVM option file, `*.properties` a properties file, and
/// everything else is raw.
pub fn default_kind(path: &str) -> CodecKind {
    let name = file_name(path);
    if name == JVM_CONFIG_FILE {
        CodecKind::Jvm
    } else if name.ends_with(PROPERTIES_SUFFIX) {
        CodecKind::Properties
    } else {
        CodecKind::Raw
    }
}

pub fn default_resolver() -> CodecResolver {
    Arc::new(|path: &str| Some(default_kind(path).codec()))
}

pub fn accept_all() -> PathFilter {
    Arc::new(|_: &str| true)
}

/// A glob over relative paths mapped to a codec.
#[derive(Debug, Clone)]
pub struct CodecRule {
    pub pattern: Pattern,
    pub kind: CodecKind,
}

impl CodecRule {
    pub fn new(pattern: Pattern, kind: CodecKind) -> Self {
        Self { pattern, kind }
    }
}

/// The first matching rule decides; unmatched paths use [`default_kind`].
pub fn rule_resolver(rules: Vec<CodecRule>) -> CodecResolver {
    Arc::new(move |path: &str| {
        let kind = rules
            .iter()
            .find(|rule| rule.pattern.matches(path))
            .map_or_else(|| default_kind(path), |rule| rule.kind);
        Some(kind.codec())
    })
}

/// Every `/`-terminated prefix of `path`, then `path` itself.
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/')
        .map(move |(idx, _)| &path[..idx])
        .chain(std::iter::once(path))
}

/// Excludes a path when any pattern matches it or one of its ancestors.
pub fn exclude_filter(patterns: Vec<Pattern>) -> PathFilter {
    Arc::new(move |path: &str| {
        !ancestors(path).any(|candidate| patterns.iter().any(|pattern| pattern.matches(candidate)))
    })
}
