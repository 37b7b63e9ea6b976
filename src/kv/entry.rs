/// Opening token of a substitution expression inside an entry value.
pub const EXPRESSION_TOKEN_BEGIN: &str = "@{";
/// Closing token of a substitution expression inside an entry value.
pub const EXPRESSION_TOKEN_END: &str = "}";

/// A single key/value entry of a structured configuration file.
///
/// `comments` holds the comment and blank lines that preceded the entry in
/// its source file; they are written back in front of the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<K> {
    key: K,
    value: String,
    comments: Vec<String>,
}

impl<K> Entry<K> {
    pub fn new(key: K, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
            comments: Vec::new(),
        }
    }

    pub fn with_comments(mut self, comments: Vec<String>) -> Self {
        self.comments = comments;
        self
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    pub(crate) fn set_value(&mut self, value: String) {
        self.value = value;
    }

    pub(crate) fn set_comments(&mut self, comments: Vec<String>) {
        self.comments = comments;
    }

    pub(crate) fn take_comments(&mut self) -> Vec<String> {
        std::mem::take(&mut self.comments)
    }
}

/// Replace every `@{expr}` token of `value` with the resolver's answer.
///
/// Scanning resumes right after each inserted replacement, so substituted
/// text is never rescanned. A resolver may return the token itself to leave
/// it in place. Returns `Err(expr)` for the first expression the resolver
/// cannot answer.
pub fn substitute<F>(value: &str, resolver: F) -> Result<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = value.to_string();
    let mut pos = 0;

    while let Some(found) = result[pos..].find(EXPRESSION_TOKEN_BEGIN) {
        let start = pos + found;
        let expr_start = start + EXPRESSION_TOKEN_BEGIN.len();
        let Some(len) = result[expr_start..].find(EXPRESSION_TOKEN_END) else {
            break;
        };
        let expr_end = expr_start + len;
        let expression = &result[expr_start..expr_end];

        let replacement = resolver(expression).ok_or_else(|| expression.to_string())?;
        result.replace_range(start..expr_end + EXPRESSION_TOKEN_END.len(), &replacement);
        pos = start + replacement.len();
    }

    Ok(result)
}
