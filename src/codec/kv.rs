use super::{
    overwrite_diff, read_all, write_overwrite, Charset, CodecError, ContentCodec, ValueResolver,
};
use crate::kv::{substitute, Grammar, KvStore};
use crate::section::{is_section_header, Diff};
use std::io::{Read, Write};

/// Codec for flat key/value files, generic over the line grammar.
#[derive(Debug, Clone)]
pub struct KvCodec<G> {
    name: &'static str,
    grammar: G,
    charset: Charset,
}

impl<G: Grammar> KvCodec<G> {
    pub fn new(name: &'static str, grammar: G, charset: Charset) -> Self {
        Self { name, grammar, charset }
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    fn read_store(
        &self,
        source: Option<&mut dyn Read>,
        charset: Charset,
    ) -> Result<KvStore<G::Key>, CodecError> {
        let text = charset.decode(&read_all(source)?)?;
        Ok(KvStore::parse(&text, &self.grammar)?)
    }

    fn write_store(
        &self,
        store: &KvStore<G::Key>,
        result: &mut dyn Write,
        charset: Charset,
    ) -> Result<(), CodecError> {
        let text = store.serialize(&self.grammar);
        result.write_all(&charset.encode(&text)?)?;
        Ok(())
    }

    fn parse_line(&self, line: &str) -> Result<crate::kv::Entry<G::Key>, CodecError> {
        self.grammar.parse(line).ok_or_else(|| CodecError::Parse {
            line: line.to_string(),
            message: format!("not a {} entry", self.name),
        })
    }

    /// Arguments to `set_entries`/`remove_entries`, minus blanks and comments.
    fn argument_lines(lines: &[String]) -> impl Iterator<Item = &str> {
        lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
    }
}

impl<G: Grammar> ContentCodec for KvCodec<G> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn apply(
        &self,
        source: Option<&mut dyn Read>,
        result: &mut dyn Write,
        diff: &Diff,
    ) -> Result<(), CodecError> {
        if diff.overwrite {
            return write_overwrite(diff, result, self.charset);
        }

        let charset = match diff.encoding.as_deref() {
            Some(name) => Charset::for_name(name)?,
            None => self.charset,
        };
        let mut store = self.read_store(source, charset)?;
        store.apply_instructions(&diff.lines, &self.grammar)?;
        self.write_store(&store, result, charset)
    }

    fn diff(
        &self,
        source: &mut dyn Read,
        reference: Option<&mut dyn Read>,
    ) -> Result<Option<Diff>, CodecError> {
        let Some(reference) = reference else {
            let bytes = read_all(Some(source))?;
            let text = self.charset.decode(&bytes).ok();
            return Ok(Some(overwrite_diff(&bytes, text)));
        };

        let current = self.read_store(Some(source), self.charset)?;
        let reference = self.read_store(Some(reference), self.charset)?;
        let lines: Vec<String> = current
            .diff_against(&reference, &self.grammar)
            .into_iter()
            .map(|line| {
                // An entry line shaped like `[x]` would end the section.
                if is_section_header(&line) {
                    format!("{} {line}", crate::kv::store::SET_VERB)
                } else {
                    line
                }
            })
            .collect();

        if lines.is_empty() {
            return Ok(None);
        }
        Ok(Some(Diff::merge(lines)))
    }

    fn merge(
        &self,
        content: &mut dyn Read,
        source: Option<&mut dyn Read>,
        result: &mut dyn Write,
    ) -> Result<(), CodecError> {
        let incoming = self.read_store(Some(content), self.charset)?;
        let mut store = self.read_store(source, self.charset)?;
        store.merge_from(&incoming);
        self.write_store(&store, result, self.charset)
    }

    fn set_entries(
        &self,
        source: Option<&mut dyn Read>,
        result: &mut dyn Write,
        entries: &[String],
    ) -> Result<(), CodecError> {
        let mut store = self.read_store(source, self.charset)?;
        for line in Self::argument_lines(entries) {
            store.set_entry(self.parse_line(line)?);
        }
        self.write_store(&store, result, self.charset)
    }

    fn remove_entries(
        &self,
        source: Option<&mut dyn Read>,
        result: &mut dyn Write,
        keys: &[String],
    ) -> Result<(), CodecError> {
        let mut store = self.read_store(source, self.charset)?;
        for line in Self::argument_lines(keys) {
            let entry = self.parse_line(line)?;
            store.remove_entry(entry.key());
        }
        self.write_store(&store, result, self.charset)
    }

    fn filter(
        &self,
        source: Option<&mut dyn Read>,
        result: &mut dyn Write,
        resolver: ValueResolver<'_>,
    ) -> Result<(), CodecError> {
        let mut store = self.read_store(source, self.charset)?;
        store.try_map_values(|value| {
            substitute(value, resolver)
                .map_err(|expression| CodecError::UnresolvedReference { expression })
        })?;
        self.write_store(&store, result, self.charset)
    }

    fn normalize(
        &self,
        source: Option<&mut dyn Read>,
        result: &mut dyn Write,
    ) -> Result<(), CodecError> {
        let store = self.read_store(source, self.charset)?;
        self.write_store(&store, result, self.charset)
    }
}
