use super::{is_text, overwrite_diff, read_all, write_overwrite, Charset, CodecError, ContentCodec};
use crate::section::Diff;
use std::io::{self, Read, Write};

/// Whole-file codec for anything without a structured grammar.
///
/// Text content travels as plain lines, everything else as base64. Merging
/// always replaces the existing content.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl ContentCodec for RawCodec {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn apply(
        &self,
        _source: Option<&mut dyn Read>,
        result: &mut dyn Write,
        diff: &Diff,
    ) -> Result<(), CodecError> {
        if !diff.overwrite {
            return Err(self.unsupported("merge-mode apply"));
        }
        write_overwrite(diff, result, Charset::Utf8)
    }

    fn diff(
        &self,
        source: &mut dyn Read,
        reference: Option<&mut dyn Read>,
    ) -> Result<Option<Diff>, CodecError> {
        let bytes = read_all(Some(source))?;
        if let Some(reference) = reference {
            if read_all(Some(reference))? == bytes {
                return Ok(None);
            }
        }

        let text = if is_text(&bytes) {
            String::from_utf8(bytes.clone()).ok()
        } else {
            None
        };
        Ok(Some(overwrite_diff(&bytes, text)))
    }

    fn merge(
        &self,
        content: &mut dyn Read,
        _source: Option<&mut dyn Read>,
        result: &mut dyn Write,
    ) -> Result<(), CodecError> {
        io::copy(content, result)?;
        Ok(())
    }

    fn normalize(
        &self,
        source: Option<&mut dyn Read>,
        result: &mut dyn Write,
    ) -> Result<(), CodecError> {
        if let Some(source) = source {
            io::copy(source, result)?;
        }
        Ok(())
    }
}
