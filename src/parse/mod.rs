mod error;
mod grammar;

pub use error::ParseError;

use crate::types::{PathPart, Template};

/// Parse a string template such as `https://{Bucket}.{url#authority}`.
///
/// # Errors
///
/// Returns [`ParseError`] for unbalanced braces or malformed placeholders.
pub fn parse_template(input: &str) -> Result<Template, ParseError> {
    use winnow::Parser;
    grammar::template
        .parse(input)
        .map(Template::from_parts)
        .map_err(|e| ParseError::new(input, e.to_string()))
}

/// Parse a `getAttr` path such as `authority`, `a.b[1]` or `[-2]`.
///
/// # Errors
///
/// Returns [`ParseError`] if the path is empty or malformed.
pub fn parse_attr_path(input: &str) -> Result<Vec<PathPart>, ParseError> {
    use winnow::Parser;
    grammar::attr_path
        .parse(input)
        .map_err(|e| ParseError::new(input, e.to_string()))
}
