use std::fmt;

/// Errors produced when parsing templates and attribute paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    source_text: String,
    message: String,
}

impl ParseError {
    pub(crate) fn new(source_text: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source_text: source_text.into(),
            message: message.into(),
        }
    }

    /// The text that failed to parse.
    #[must_use]
    pub fn source_text(&self) -> &str {
        &self.source_text
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot parse \"{}\": {}", self.source_text, self.message)
    }
}

impl std::error::Error for ParseError {}
