//! Diff-file model and its text grammar.
//!
//! A diff file is a sequence of sections, each introduced by a header line:
//!
//! ```text
//! [conf/app.properties merge]
//! -remove old.key
//! new.key=value
//!
//! [lib/plugin.jar overwrite @base64]
//! UEsDBBQAAAAIA...
//!
//! [conf/obsolete.properties delete]
//! ```
//!
//! The mode word may be omitted (meaning `overwrite`) and `apply` is read as
//! `merge`. Blank lines and `#`/`;` comments are allowed between sections.

use crate::safety::{SafetyError, TargetGuard};
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::io::{self, Write};
use std::sync::OnceLock;
use thiserror::Error;

/// Encoding name marking a base64 payload.
pub const BASE64_ENCODING: &str = "base64";

#[derive(Error, Debug)]
pub enum SectionError {
    #[error("line {line}: invalid section header '{text}'")]
    InvalidHeader { line: usize, text: String },

    #[error("line {line}: duplicate section for path '{path}'")]
    DuplicatePath { line: usize, path: String },

    #[error("line {line}: content outside of any section")]
    ContentOutsideSection { line: usize },

    #[error("line {line}: delete section '{path}' must not have content")]
    DeleteWithContent { line: usize, path: String },

    #[error("line {line}: unsafe section path: {source}")]
    UnsafePath {
        line: usize,
        #[source]
        source: SafetyError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Overwrite,
    Merge,
    Delete,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Overwrite => "overwrite",
            Mode::Merge => "merge",
            Mode::Delete => "delete",
        }
    }

    fn from_word(word: &str) -> Option<Self> {
        match word {
            "overwrite" => Some(Mode::Overwrite),
            "merge" | "apply" => Some(Mode::Merge),
            "delete" => Some(Mode::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a section: full replacement content or edit instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff {
    /// `lines` replaces the file wholesale instead of being replayed.
    pub overwrite: bool,
    pub encoding: Option<String>,
    pub lines: Vec<String>,
}

impl Diff {
    pub fn overwrite(lines: Vec<String>) -> Self {
        Self {
            overwrite: true,
            encoding: None,
            lines,
        }
    }

    pub fn merge(lines: Vec<String>) -> Self {
        Self {
            overwrite: false,
            encoding: None,
            lines,
        }
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn is_base64(&self) -> bool {
        self.encoding
            .as_deref()
            .is_some_and(|enc| enc.eq_ignore_ascii_case(BASE64_ENCODING))
    }
}

/// One path-scoped record of a diff file. `diff == None` deletes the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub path: String,
    pub diff: Option<Diff>,
}

impl Section {
    pub fn new(path: impl Into<String>, diff: Diff) -> Self {
        Self {
            path: path.into(),
            diff: Some(diff),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            diff: None,
        }
    }

    pub fn mode(&self) -> Mode {
        match &self.diff {
            None => Mode::Delete,
            Some(diff) if diff.overwrite => Mode::Overwrite,
            Some(_) => Mode::Merge,
        }
    }

    pub fn header(&self) -> String {
        let encoding = self
            .diff
            .as_ref()
            .and_then(|diff| diff.encoding.as_deref())
            .map(|enc| format!(" @{enc}"))
            .unwrap_or_default();
        format!("[{} {}{}]", self.path, self.mode(), encoding)
    }
}

fn header_regex() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| Regex::new(r"^\[(.+)\]( +#.*)?$").expect("section header regex is valid"))
}

/// Whether `line` would be read as a section header.
pub fn is_section_header(line: &str) -> bool {
    header_regex().is_match(line.trim())
}

fn is_ignorable(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.starts_with('#') || line.starts_with(';')
}

struct PendingSection {
    line: usize,
    path: String,
    mode: Mode,
    encoding: Option<String>,
    lines: Vec<String>,
}

impl PendingSection {
    fn finish(mut self) -> Result<Section, SectionError> {
        while self.lines.last().is_some_and(|line| line.trim().is_empty()) {
            self.lines.pop();
        }

        let diff = match self.mode {
            Mode::Delete => {
                if self.lines.iter().any(|line| !is_ignorable(line)) {
                    return Err(SectionError::DeleteWithContent {
                        line: self.line,
                        path: self.path,
                    });
                }
                return Ok(Section::delete(self.path));
            }
            Mode::Overwrite => Diff::overwrite(self.lines),
            Mode::Merge => Diff::merge(self.lines),
        };

        Ok(Section {
            path: self.path,
            diff: Some(Diff {
                encoding: self.encoding,
                ..diff
            }),
        })
    }
}

/// Split `path [mode] [@encoding]` from the right, so paths may hold spaces.
fn parse_header(inner: &str, line: usize, text: &str) -> Result<PendingSection, SectionError> {
    let invalid = || SectionError::InvalidHeader {
        line,
        text: text.to_string(),
    };

    let mut rest = inner.trim();
    let mut encoding = None;
    if let Some((head, last)) = rest.rsplit_once(char::is_whitespace) {
        if let Some(enc) = last.strip_prefix('@') {
            if enc.is_empty() {
                return Err(invalid());
            }
            encoding = Some(enc.to_string());
            rest = head.trim_end();
        }
    }

    let mut mode = Mode::Overwrite;
    if let Some((head, last)) = rest.rsplit_once(char::is_whitespace) {
        if let Some(parsed) = Mode::from_word(last) {
            mode = parsed;
            rest = head.trim_end();
        }
    }

    if rest.is_empty() {
        return Err(invalid());
    }
    // Aliases such as `./a` and `conf/../a` share one normal form.
    let path = TargetGuard::normalize(rest)
        .map_err(|source| SectionError::UnsafePath { line, source })?;

    Ok(PendingSection {
        line,
        path,
        mode,
        encoding,
        lines: Vec::new(),
    })
}

/// Parse diff-file text into sections, in file order.
pub fn parse_sections(text: &str) -> Result<Vec<Section>, SectionError> {
    let mut sections = Vec::new();
    let mut seen = HashSet::new();
    let mut current: Option<PendingSection> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;

        if let Some(captures) = header_regex().captures(raw.trim()) {
            if let Some(pending) = current.take() {
                sections.push(pending.finish()?);
            }
            let pending = parse_header(&captures[1], line, raw)?;
            if !seen.insert(pending.path.clone()) {
                return Err(SectionError::DuplicatePath {
                    line,
                    path: pending.path,
                });
            }
            current = Some(pending);
            continue;
        }

        match current.as_mut() {
            Some(pending) => pending.lines.push(raw.to_string()),
            None if is_ignorable(raw) => {}
            None => return Err(SectionError::ContentOutsideSection { line }),
        }
    }

    if let Some(pending) = current.take() {
        sections.push(pending.finish()?);
    }
    Ok(sections)
}

/// Write sections in the diff-file grammar, each followed by a blank line.
pub fn write_sections<W: Write + ?Sized>(sections: &[Section], out: &mut W) -> io::Result<()> {
    for section in sections {
        writeln!(out, "{}", section.header())?;
        if let Some(diff) = &section.diff {
            for line in &diff.lines {
                writeln!(out, "{line}")?;
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

pub fn sections_to_string(sections: &[Section]) -> String {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_sections(sections, &mut out);
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_all_modes() {
        let text = "\
# generated
[conf/app.properties merge]
-remove old
new=1

[lib/a.bin overwrite @base64]
AAEC

[conf/gone.properties delete]

[notes.txt]
hello
";
        let sections = parse_sections(text).unwrap();
        assert_eq!(
            sections,
            vec![
                Section::new(
                    "conf/app.properties",
                    Diff::merge(lines(&["-remove old", "new=1"])),
                ),
                Section::new(
                    "lib/a.bin",
                    Diff::overwrite(lines(&["AAEC"])).with_encoding("base64"),
                ),
                Section::delete("conf/gone.properties"),
                Section::new("notes.txt", Diff::overwrite(lines(&["hello"]))),
            ]
        );
    }

    #[test]
    fn test_apply_is_alias_for_merge() {
        let sections = parse_sections("[jvm.conf apply]\n-Xmx1g\n").unwrap();
        assert_eq!(sections[0].mode(), Mode::Merge);
    }

    #[test]
    fn test_header_with_trailing_comment_and_spaces_in_path() {
        let sections =
            parse_sections("[my dir/file name.txt overwrite @UTF-8] # note\nx\n").unwrap();
        assert_eq!(sections[0].path, "my dir/file name.txt");
        assert_eq!(sections[0].diff.as_ref().unwrap().encoding.as_deref(), Some("UTF-8"));
    }

    #[test]
    fn test_content_lines_are_not_trimmed() {
        let sections = parse_sections("[a.txt overwrite]\n  indented\n\nlast\n\n\n").unwrap();
        assert_eq!(sections[0].diff.as_ref().unwrap().lines, lines(&["  indented", "", "last"]));
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let err = parse_sections("[a.txt]\nx\n[a.txt merge]\n").unwrap_err();
        assert!(matches!(err, SectionError::DuplicatePath { line: 3, .. }));
    }

    #[test]
    fn test_aliased_duplicate_path_rejected() {
        let err = parse_sections("[a.properties merge]\nb=2\n\n[./a.properties merge]\nc=3\n")
            .unwrap_err();
        assert!(matches!(
            err,
            SectionError::DuplicatePath { line: 4, ref path } if path == "a.properties"
        ));

        let err = parse_sections("[conf/app.properties]\nx\n[conf/sub/../app.properties delete]\n")
            .unwrap_err();
        assert!(matches!(err, SectionError::DuplicatePath { line: 3, .. }));
    }

    #[test]
    fn test_section_path_is_normalized() {
        let sections = parse_sections("[./conf//app.properties merge]\na=1\n").unwrap();
        assert_eq!(sections[0].path, "conf/app.properties");
    }

    #[test]
    fn test_content_outside_section_rejected() {
        let err = parse_sections("; comment\n\nstray\n[a.txt]\n").unwrap_err();
        assert!(matches!(err, SectionError::ContentOutsideSection { line: 3 }));
    }

    #[test]
    fn test_delete_with_content_rejected() {
        assert!(parse_sections("[a.txt delete]\n# fine\n").is_ok());
        let err = parse_sections("[a.txt delete]\nkey=value\n").unwrap_err();
        assert!(matches!(err, SectionError::DeleteWithContent { .. }));
    }

    #[test]
    fn test_unsafe_paths_rejected() {
        for text in ["[../etc/passwd]\n", "[/etc/passwd]\n", "[a/../../b]\n"] {
            let err = parse_sections(text).unwrap_err();
            assert!(matches!(err, SectionError::UnsafePath { .. }), "{text}");
        }
    }

    #[test]
    fn test_invalid_header() {
        let err = parse_sections("[a.txt overwrite @]\n").unwrap_err();
        assert!(matches!(err, SectionError::InvalidHeader { .. }));
    }

    #[test]
    fn test_write_then_parse() {
        let sections = vec![
            Section::new("a.properties", Diff::merge(lines(&["-remove x", "y=2"]))),
            Section::delete("b.txt"),
            Section::new("c.bin", Diff::overwrite(lines(&["AAAA"])).with_encoding(BASE64_ENCODING)),
        ];
        let text = sections_to_string(&sections);
        assert_eq!(
            text,
            concat!(
                "[a.properties merge]\n-remove x\ny=2\n\n",
                "[b.txt delete]\n\n",
                "[c.bin overwrite @base64]\nAAAA\n\n",
            )
        );
        assert_eq!(parse_sections(&text).unwrap(), sections);
    }

    #[test]
    fn test_is_section_header() {
        assert!(is_section_header("[core]"));
        assert!(is_section_header("  [core] # c"));
        assert!(!is_section_header("key=[value]x"));
        assert!(!is_section_header("[]"));
    }
}
