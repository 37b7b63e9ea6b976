//! JVM option grammar for `jvm.conf`-style files: one launcher option per line.
//!
//! Lines are matched against an ordered table of option shapes; the first
//! match wins. Key identity is `(kind, name)`, so `-Xmx512m` and `-Xmx1g`
//! share a key and replace each other in place.

use crate::kv::entry::Entry;
use crate::kv::grammar::Grammar;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JvmOptionKind {
    /// `-D<name>[=<value>]`
    Property,
    /// `-XX:+<name>` / `-XX:-<name>`, value is the sign
    XxFlag,
    /// `-XX:<name>=<value>`
    XxOption,
    /// `--add-exports=<name>=<value>`
    AddExports,
    /// `--add-reads=<name>=<value>`
    AddReads,
    /// `--add-opens=<name>=<value>`
    AddOpens,
    /// `-<name>=<value>`
    Equals,
    /// `-<name>:<value>`
    Colon,
    /// `-<name><suffix>`, e.g. `-Xmx1g`, or a bare `-<name>`
    Suffixed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JvmKey {
    kind: JvmOptionKind,
    name: String,
}

impl JvmKey {
    pub fn new(kind: JvmOptionKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn kind(&self) -> JvmOptionKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for JvmKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.kind, self.name)
    }
}

struct Shape {
    kind: JvmOptionKind,
    pattern: &'static str,
    /// The sign capture comes before the name capture.
    value_first: bool,
}

const SHAPES: [Shape; 10] = [
    Shape {
        kind: JvmOptionKind::Property,
        pattern: r"^-D(.+?)(?:=(.*))?$",
        value_first: false,
    },
    Shape {
        kind: JvmOptionKind::XxFlag,
        pattern: r"^-XX:([+-])(.+)$",
        value_first: true,
    },
    Shape {
        kind: JvmOptionKind::XxOption,
        pattern: r"^-XX:(.+?)=(.*)$",
        value_first: false,
    },
    Shape {
        kind: JvmOptionKind::AddExports,
        pattern: r"^--add-exports=(.+?)=(.*)$",
        value_first: false,
    },
    Shape {
        kind: JvmOptionKind::AddReads,
        pattern: r"^--add-reads=(.+?)=(.*)$",
        value_first: false,
    },
    Shape {
        kind: JvmOptionKind::AddOpens,
        pattern: r"^--add-opens=(.+?)=(.*)$",
        value_first: false,
    },
    Shape {
        kind: JvmOptionKind::Equals,
        pattern: r"^-(.+?)=(.*)$",
        value_first: false,
    },
    Shape {
        kind: JvmOptionKind::Colon,
        pattern: r"^-(.+?):(.*)$",
        value_first: false,
    },
    Shape {
        kind: JvmOptionKind::Suffixed,
        pattern: r"^-(.+?)([0-9].*)$",
        value_first: false,
    },
    Shape {
        kind: JvmOptionKind::Suffixed,
        pattern: r"^-(.+)$",
        value_first: false,
    },
];

fn compiled_shapes() -> &'static [(JvmOptionKind, bool, Regex)] {
    static COMPILED: OnceLock<Vec<(JvmOptionKind, bool, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        SHAPES
            .iter()
            .map(|shape| {
                let regex = Regex::new(shape.pattern).expect("jvm option shape is a valid regex");
                (shape.kind, shape.value_first, regex)
            })
            .collect()
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JvmGrammar;

impl JvmGrammar {
    fn render(kind: JvmOptionKind, name: &str, value: &str) -> String {
        match kind {
            JvmOptionKind::Property if value.is_empty() => format!("-D{name}"),
            JvmOptionKind::Property => format!("-D{name}={value}"),
            JvmOptionKind::XxFlag => format!("-XX:{value}{name}"),
            JvmOptionKind::XxOption => format!("-XX:{name}={value}"),
            JvmOptionKind::AddExports => format!("--add-exports={name}={value}"),
            JvmOptionKind::AddReads => format!("--add-reads={name}={value}"),
            JvmOptionKind::AddOpens => format!("--add-opens={name}={value}"),
            JvmOptionKind::Equals => format!("-{name}={value}"),
            JvmOptionKind::Colon => format!("-{name}:{value}"),
            JvmOptionKind::Suffixed => format!("-{name}{value}"),
        }
    }
}

impl Grammar for JvmGrammar {
    type Key = JvmKey;

    fn parse(&self, line: &str) -> Option<Entry<JvmKey>> {
        compiled_shapes()
            .iter()
            .find_map(|(kind, value_first, regex)| {
                let captures = regex.captures(line)?;
                let (name_idx, value_idx) = if *value_first { (2, 1) } else { (1, 2) };
                let name = captures.get(name_idx)?.as_str();
                let value = captures.get(value_idx).map_or("", |m| m.as_str());
                Some(Entry::new(JvmKey::new(*kind, name), value))
            })
    }

    fn format(&self, entry: &Entry<JvmKey>) -> String {
        let key = entry.key();
        Self::render(key.kind, &key.name, entry.value())
    }

    fn format_key(&self, key: &JvmKey) -> String {
        match key.kind {
            JvmOptionKind::XxFlag => Self::render(key.kind, &key.name, "+"),
            _ => Self::render(key.kind, &key.name, ""),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> (JvmOptionKind, String, String) {
        let entry = JvmGrammar.parse(line).unwrap();
        (
            entry.key().kind(),
            entry.key().name().to_string(),
            entry.value().to_string(),
        )
    }

    #[test]
    fn test_parse_shapes() {
        use JvmOptionKind::*;

        let cases = [
            ("-Dfoo=bar", Property, "foo", "bar"),
            ("-Dfoo", Property, "foo", ""),
            ("-Dfoo=a=b", Property, "foo", "a=b"),
            ("-XX:+UseG1GC", XxFlag, "UseG1GC", "+"),
            ("-XX:-UseG1GC", XxFlag, "UseG1GC", "-"),
            ("-XX:MaxMetaspaceSize=256m", XxOption, "MaxMetaspaceSize", "256m"),
            (
                "--add-exports=java.base/sun.nio.ch=ALL-UNNAMED",
                AddExports,
                "java.base/sun.nio.ch",
                "ALL-UNNAMED",
            ),
            ("--add-reads=a=b", AddReads, "a", "b"),
            (
                "--add-opens=java.base/java.lang=ALL-UNNAMED",
                AddOpens,
                "java.base/java.lang",
                "ALL-UNNAMED",
            ),
            ("-Djava.security.policy==all.policy", Property, "java.security.policy", "=all.policy"),
            ("-splash=img.png", Equals, "splash", "img.png"),
            ("-javaagent:agent.jar", Colon, "javaagent", "agent.jar"),
            ("-Xmx512m", Suffixed, "Xmx", "512m"),
            ("-Xss4m", Suffixed, "Xss", "4m"),
            ("-server", Suffixed, "server", ""),
        ];

        for (line, kind, name, value) in cases {
            assert_eq!(
                parse(line),
                (kind, name.to_string(), value.to_string()),
                "line {line}"
            );
        }
    }

    #[test]
    fn test_memory_flags_share_key() {
        let a = JvmGrammar.parse("-Xmx512m").unwrap();
        let b = JvmGrammar.parse("-Xmx2G").unwrap();
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_unrecognized_line() {
        assert!(JvmGrammar.parse("Xmx512m").is_none());
        assert!(JvmGrammar.parse("-").is_none());
    }

    #[test]
    fn test_format_is_symmetric() {
        for line in [
            "-Dfoo=bar",
            "-Dfoo",
            "-XX:+UseG1GC",
            "-XX:-UseG1GC",
            "-XX:MaxMetaspaceSize=256m",
            "--add-exports=java.base/sun.nio.ch=ALL-UNNAMED",
            "--add-opens=a=b",
            "-splash=img.png",
            "-javaagent:agent.jar",
            "-Xmx512m",
            "-server",
        ] {
            let entry = JvmGrammar.parse(line).unwrap();
            assert_eq!(JvmGrammar.format(&entry), line);
        }
    }

    #[test]
    fn test_formatted_key_parses_back_to_key() {
        for line in [
            "-Dfoo=bar",
            "-XX:-UseG1GC",
            "-XX:MaxMetaspaceSize=256m",
            "--add-exports=a=b",
            "--add-reads=a=b",
            "--add-opens=a=b",
            "-splash=img.png",
            "-javaagent:agent.jar",
            "-XX:Foo",
            "-Xmx512m",
            "-server",
        ] {
            let entry = JvmGrammar.parse(line).unwrap();
            let key_line = JvmGrammar.format_key(entry.key());
            let reparsed = JvmGrammar.parse(&key_line).unwrap();
            assert_eq!(reparsed.key(), entry.key(), "line {line} -> {key_line}");
        }
    }
}
