use crate::codec::resolver::{exclude_filter, rule_resolver, CodecRule};
use crate::codec::{CodecKind, CodecResolver, PathFilter};
use glob::Pattern;
use serde::Deserialize;
use std::fmt;

/// A reconciliation profile: which paths take part and which codec reads
/// which file.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub codecs: Vec<CodecOverride>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    /// Globs over relative paths; matching a path or any of its ancestors
    /// excludes it.
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct CodecOverride {
    pub pattern: String,
    pub codec: CodecKind,
}

impl ProfileConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        for (idx, pattern) in self.filter.exclude.iter().enumerate() {
            check_pattern(pattern, || format!("filter.exclude[{idx}]"), &mut issues);
        }
        for (idx, rule) in self.codecs.iter().enumerate() {
            check_pattern(&rule.pattern, || format!("codecs[{idx}].pattern"), &mut issues);
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Path filter built from `filter.exclude`. Patterns that fail to
    /// compile are skipped; [`validate`](Self::validate) reports them.
    pub fn path_filter(&self) -> PathFilter {
        exclude_filter(
            self.filter
                .exclude
                .iter()
                .filter_map(|pattern| Pattern::new(pattern).ok())
                .collect(),
        )
    }

    /// Codec resolver trying the `codecs` overrides in order before the
    /// default policy.
    pub fn codec_resolver(&self) -> CodecResolver {
        rule_resolver(
            self.codecs
                .iter()
                .filter_map(|rule| {
                    Pattern::new(&rule.pattern)
                        .ok()
                        .map(|pattern| CodecRule::new(pattern, rule.codec))
                })
                .collect(),
        )
    }
}

fn check_pattern(pattern: &str, field: impl Fn() -> String, issues: &mut Vec<ValidationIssue>) {
    if pattern.trim().is_empty() {
        issues.push(ValidationIssue::EmptyPattern { field: field() });
        return;
    }
    if let Err(err) = Pattern::new(pattern) {
        issues.push(ValidationIssue::InvalidPattern {
            field: field(),
            pattern: pattern.to_string(),
            message: err.msg.to_string(),
        });
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    EmptyPattern {
        field: String,
    },
    InvalidPattern {
        field: String,
        pattern: String,
        message: String,
    },
}

impl ValidationIssue {
    /// Dotted TOML path of the rejected value, e.g. `codecs[1].pattern`.
    pub fn field(&self) -> &str {
        match self {
            ValidationIssue::EmptyPattern { field }
            | ValidationIssue::InvalidPattern { field, .. } => field,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyPattern { field } => write!(f, "{field} is empty"),
            ValidationIssue::InvalidPattern {
                field,
                pattern,
                message,
            } => write!(f, "{field} has invalid glob '{pattern}': {message}"),
        }
    }
}
