//! Per-file-type content codecs.
//!
//! Every codec works on byte streams so the engine can feed it files and
//! archive entries alike. Capabilities a codec does not have fail with
//! [`CodecError::Unsupported`].

pub mod kv;
pub mod raw;
pub mod resolver;

use crate::kv::{JvmGrammar, PropertiesGrammar, UnparsableLine};
use crate::section::{is_section_header, Diff, BASE64_ENCODING};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use encoding_rs::{Encoding, UTF_8};
use serde::Deserialize;
use std::fmt;
use std::io::{self, Read, Write};
use thiserror::Error;

pub use self::kv::KvCodec;
pub use self::raw::RawCodec;
pub use self::resolver::{CodecResolver, CodecRule, PathFilter};

/// Width of MIME base64 lines.
const BASE64_LINE_WIDTH: usize = 76;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("cannot parse line '{line}': {message}")]
    Parse { line: String, message: String },

    #[error("the {codec} codec does not support {operation}")]
    Unsupported {
        codec: &'static str,
        operation: &'static str,
    },

    #[error("unresolved expression @{{{expression}}}")]
    UnresolvedReference { expression: String },

    #[error("unknown encoding '{0}'")]
    UnknownEncoding(String),

    #[error("content is not valid {charset}")]
    InvalidEncoding { charset: &'static str },

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<UnparsableLine> for CodecError {
    fn from(err: UnparsableLine) -> Self {
        CodecError::Parse {
            line: err.line,
            message: "unrecognized entry".to_string(),
        }
    }
}

/// Character encodings the codecs read and write text in.
///
/// `Latin1` is true ISO-8859-1. Any other WHATWG label resolves through
/// `encoding_rs`, as long as the encoding writes back in itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Latin1,
    Other(&'static Encoding),
}

impl Charset {
    pub fn for_name(name: &str) -> Result<Self, CodecError> {
        let label = name.trim();
        match label.to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" | "us-ascii" | "ascii" => return Ok(Charset::Utf8),
            // WHATWG maps these labels to windows-1252
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" => return Ok(Charset::Latin1),
            _ => {}
        }

        match Encoding::for_label(label.as_bytes()) {
            Some(encoding) if encoding == UTF_8 => Ok(Charset::Utf8),
            // UTF-16 and the replacement encoding encode as UTF-8
            Some(encoding) if encoding.output_encoding() == encoding => {
                Ok(Charset::Other(encoding))
            }
            _ => Err(CodecError::UnknownEncoding(name.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Latin1 => "ISO-8859-1",
            Charset::Other(encoding) => encoding.name(),
        }
    }

    pub fn decode(self, bytes: &[u8]) -> Result<String, CodecError> {
        let invalid = || CodecError::InvalidEncoding {
            charset: self.name(),
        };
        match self {
            Charset::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|_| invalid()),
            Charset::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            Charset::Other(encoding) => encoding
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|text| text.into_owned())
                .ok_or_else(invalid),
        }
    }

    pub fn encode(self, text: &str) -> Result<Vec<u8>, CodecError> {
        let invalid = || CodecError::InvalidEncoding {
            charset: self.name(),
        };
        match self {
            Charset::Utf8 => Ok(text.as_bytes().to_vec()),
            Charset::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).ok())
                .collect::<Option<Vec<u8>>>()
                .ok_or_else(invalid),
            Charset::Other(encoding) => {
                let (bytes, _, unmappable) = encoding.encode(text);
                if unmappable {
                    return Err(invalid());
                }
                Ok(bytes.into_owned())
            }
        }
    }
}

/// Variable resolver used by `filter`: expression in, replacement out.
pub type ValueResolver<'a> = &'a dyn Fn(&str) -> Option<String>;

/// The capability set every file type is handled through.
///
/// `source` streams are `None` when the file does not exist yet; codecs
/// treat that as empty content.
pub trait ContentCodec {
    fn name(&self) -> &'static str;

    /// Write the result of applying `diff` to `source` into `result`.
    fn apply(
        &self,
        source: Option<&mut dyn Read>,
        result: &mut dyn Write,
        diff: &Diff,
    ) -> Result<(), CodecError>;

    /// Describe how `source` differs from `reference`; `None` means no change.
    fn diff(
        &self,
        source: &mut dyn Read,
        reference: Option<&mut dyn Read>,
    ) -> Result<Option<Diff>, CodecError>;

    /// Overlay `content` onto `source` and write the outcome to `result`.
    fn merge(
        &self,
        content: &mut dyn Read,
        source: Option<&mut dyn Read>,
        result: &mut dyn Write,
    ) -> Result<(), CodecError>;

    fn set_entries(
        &self,
        _source: Option<&mut dyn Read>,
        _result: &mut dyn Write,
        _entries: &[String],
    ) -> Result<(), CodecError> {
        Err(self.unsupported("set_entries"))
    }

    fn remove_entries(
        &self,
        _source: Option<&mut dyn Read>,
        _result: &mut dyn Write,
        _keys: &[String],
    ) -> Result<(), CodecError> {
        Err(self.unsupported("remove_entries"))
    }

    fn filter(
        &self,
        _source: Option<&mut dyn Read>,
        _result: &mut dyn Write,
        _resolver: ValueResolver<'_>,
    ) -> Result<(), CodecError> {
        Err(self.unsupported("filter"))
    }

    /// Parse and re-serialize `source` in canonical form.
    fn normalize(
        &self,
        source: Option<&mut dyn Read>,
        result: &mut dyn Write,
    ) -> Result<(), CodecError>;

    fn unsupported(&self, operation: &'static str) -> CodecError {
        CodecError::Unsupported {
            codec: self.name(),
            operation,
        }
    }
}

/// The built-in codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    Jvm,
    Properties,
    Raw,
}

impl CodecKind {
    pub fn codec(self) -> Box<dyn ContentCodec> {
        match self {
            CodecKind::Jvm => Box::new(KvCodec::new("jvm", JvmGrammar, Charset::Utf8)),
            CodecKind::Properties => {
                Box::new(KvCodec::new("properties", PropertiesGrammar, Charset::Latin1))
            }
            CodecKind::Raw => Box::new(RawCodec),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CodecKind::Jvm => "jvm",
            CodecKind::Properties => "properties",
            CodecKind::Raw => "raw",
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn read_all(source: Option<&mut dyn Read>) -> Result<Vec<u8>, CodecError> {
    let mut bytes = Vec::new();
    if let Some(source) = source {
        source.read_to_end(&mut bytes)?;
    }
    Ok(bytes)
}

/// Byte classes accepted as text: printable ASCII plus `\n \r \t \x0c \x08`.
pub fn is_text(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .all(|&b| (0x20..=0x7f).contains(&b) || matches!(b, b'\n' | b'\r' | b'\t' | 0x0c | 0x08))
}

/// Whether `text` survives being written as section lines and read back.
fn is_line_safe(text: &str) -> bool {
    if text.is_empty() {
        return true;
    }
    if !text.ends_with('\n') || text.contains('\r') {
        return false;
    }
    let body = &text[..text.len() - 1];
    if body.rsplit('\n').next().is_some_and(|last| last.trim().is_empty()) {
        return false;
    }
    !body.split('\n').any(is_section_header)
}

/// Full-replacement diff for `bytes`; `text` is the decoded content when
/// the caller considers it text. Falls back to base64 whenever the text
/// form would not reproduce `bytes` exactly.
pub(crate) fn overwrite_diff(bytes: &[u8], text: Option<String>) -> Diff {
    match text {
        Some(text) if is_line_safe(&text) => {
            Diff::overwrite(text.lines().map(str::to_string).collect())
        }
        _ => Diff::overwrite(encode_base64_lines(bytes)).with_encoding(BASE64_ENCODING),
    }
}

pub(crate) fn encode_base64_lines(bytes: &[u8]) -> Vec<String> {
    let encoded = STANDARD.encode(bytes);
    let mut lines = Vec::with_capacity(encoded.len() / BASE64_LINE_WIDTH + 1);
    let mut rest = encoded.as_str();
    while !rest.is_empty() {
        let (head, tail) = rest.split_at(rest.len().min(BASE64_LINE_WIDTH));
        lines.push(head.to_string());
        rest = tail;
    }
    lines
}

/// Write the literal content of an overwrite diff.
pub(crate) fn write_overwrite(
    diff: &Diff,
    result: &mut dyn Write,
    default: Charset,
) -> Result<(), CodecError> {
    if diff.is_base64() {
        for line in &diff.lines {
            result.write_all(&STANDARD.decode(line.trim())?)?;
        }
        return Ok(());
    }

    let charset = match diff.encoding.as_deref() {
        Some(name) => Charset::for_name(name)?,
        None => default,
    };
    for line in &diff.lines {
        result.write_all(&charset.encode(line)?)?;
        result.write_all(b"\n")?;
    }
    Ok(())
}
