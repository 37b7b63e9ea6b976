use crate::config::schema::{ProfileConfig, ValidationError, ValidationIssue};
use std::fmt;
use std::fs;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Where a profile's text came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileOrigin {
    Inline,
    File(PathBuf),
}

impl fmt::Display for ProfileOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileOrigin::Inline => f.write_str("inline profile"),
            ProfileOrigin::File(path) => write!(f, "profile {}", path.display()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read profile {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{origin}{}: {message}", at_line(*line))]
    Toml {
        origin: ProfileOrigin,
        line: Option<usize>,
        message: String,
        #[source]
        source: toml_edit::de::Error,
    },

    #[error("{origin}: {}", summarize(source))]
    Validation {
        origin: ProfileOrigin,
        #[source]
        source: ValidationError,
    },
}

impl ConfigError {
    pub fn origin(&self) -> Option<&ProfileOrigin> {
        match self {
            ConfigError::Io { .. } => None,
            ConfigError::Toml { origin, .. } | ConfigError::Validation { origin, .. } => {
                Some(origin)
            }
        }
    }
}

fn at_line(line: Option<usize>) -> String {
    line.map(|line| format!(", line {line}")).unwrap_or_default()
}

/// One issue reads in full; several are listed by field.
fn summarize(err: &ValidationError) -> String {
    match err.issues.as_slice() {
        [issue] => issue.to_string(),
        issues => {
            let fields: Vec<&str> = issues.iter().map(ValidationIssue::field).collect();
            format!("{} invalid patterns ({})", issues.len(), fields.join(", "))
        }
    }
}

/// 1-based line of the first byte of `span`.
fn line_of(input: &str, span: Range<usize>) -> usize {
    let end = span.start.min(input.len());
    input.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
}

fn parse(input: &str, origin: ProfileOrigin) -> Result<ProfileConfig, ConfigError> {
    let config: ProfileConfig = toml_edit::de::from_str(input).map_err(|source| ConfigError::Toml {
        line: source.span().map(|span| line_of(input, span)),
        message: source.message().trim().to_string(),
        origin: origin.clone(),
        source,
    })?;
    config
        .validate()
        .map_err(|source| ConfigError::Validation { origin, source })?;
    Ok(config)
}

pub fn load_from_str(input: &str) -> Result<ProfileConfig, ConfigError> {
    parse(input, ProfileOrigin::Inline)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<ProfileConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&contents, ProfileOrigin::File(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_profile_is_valid() {
        let config = load_from_str("").unwrap();
        assert!(config.filter.exclude.is_empty());
        assert!(config.codecs.is_empty());
    }

    #[test]
    fn test_full_profile() {
        let config = load_from_str(
            r#"
[filter]
exclude = ["META-INF", "*.bak"]

[[codecs]]
pattern = "conf/*.cfg"
codec = "properties"

[[codecs]]
pattern = "bin/*.conf"
codec = "jvm"
"#,
        )
        .unwrap();

        let filter = config.path_filter();
        assert!(!filter("META-INF/MANIFEST.MF"));
        assert!(!filter("conf/app.properties.bak"));
        assert!(filter("conf/app.properties"));

        let resolver = config.codec_resolver();
        assert_eq!(resolver("conf/server.cfg").unwrap().name(), "properties");
        assert_eq!(resolver("bin/launcher.conf").unwrap().name(), "jvm");
        assert_eq!(resolver("bin/other.txt").unwrap().name(), "raw");
    }

    #[test]
    fn test_unknown_codec_names_its_line() {
        let err = load_from_str("[[codecs]]\npattern = \"*\"\ncodec = \"yaml\"\n").unwrap_err();
        let ConfigError::Toml {
            origin,
            line,
            message,
            ..
        } = &err
        else {
            panic!("expected TOML error, got {err}");
        };
        assert_eq!(origin, &ProfileOrigin::Inline);
        assert_eq!(*line, Some(3));
        assert!(message.contains("yaml"));
        assert!(err.to_string().starts_with("inline profile, line 3: "));
    }

    #[test]
    fn test_several_invalid_patterns_are_listed_by_field() {
        let err = load_from_str(concat!(
            "[filter]\nexclude = [\"\", \"a[\"]\n\n",
            "[[codecs]]\npattern = \"ok/*\"\ncodec = \"raw\"\n",
        ))
        .unwrap_err();
        let ConfigError::Validation { source, .. } = &err else {
            panic!("expected validation error, got {err}");
        };
        assert_eq!(source.issues.len(), 2);
        assert_eq!(source.issues[0].field(), "filter.exclude[0]");
        assert!(matches!(&source.issues[1], ValidationIssue::InvalidPattern { .. }));
        assert_eq!(
            err.to_string(),
            "inline profile: 2 invalid patterns (filter.exclude[0], filter.exclude[1])"
        );
    }

    #[test]
    fn test_single_invalid_pattern_reads_in_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.toml");
        fs::write(&path, "[[codecs]]\npattern = \"  \"\ncodec = \"jvm\"\n").unwrap();

        let err = load_from_path(&path).unwrap_err();
        assert_eq!(err.origin(), Some(&ProfileOrigin::File(path.clone())));
        assert_eq!(
            err.to_string(),
            format!("profile {}: codecs[0].pattern is empty", path.display())
        );
    }

    #[test]
    fn test_load_from_path_reports_file_and_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.toml");
        fs::write(&path, "# site profile\n[filter]\nexclude = 3\n").unwrap();

        let err = load_from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Toml { line: Some(3), .. }));
        assert!(err.to_string().contains("profile.toml, line 3"));

        let missing = load_from_path(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
        assert!(missing.origin().is_none());
    }
}
