use std::fmt;

use super::expr::{Expr, path_to_string};

/// A piece of a string template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TemplatePart {
    Literal(String),
    /// A `{Name}` or `{Name#path}` placeholder; always a `Ref` or a `GetAttr` over one.
    Dynamic(Expr),
}

/// A string with `{...}` placeholders. `{{` and `}}` escape literal braces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Template {
    parts: Vec<TemplatePart>,
}

impl Template {
    /// Parse template source text.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`](crate::ParseError) for unbalanced braces or
    /// malformed placeholders.
    pub fn parse(source: &str) -> Result<Self, crate::ParseError> {
        crate::parse::parse_template(source)
    }

    /// A template with no placeholders.
    pub fn literal(s: impl Into<String>) -> Self {
        let s = s.into();
        if s.is_empty() {
            Self::default()
        } else {
            Self {
                parts: vec![TemplatePart::Literal(s)],
            }
        }
    }

    pub(crate) fn from_parts(parts: Vec<TemplatePart>) -> Self {
        // Adjacent literals are merged so equal strings have equal parts.
        let mut merged: Vec<TemplatePart> = Vec::with_capacity(parts.len());
        for part in parts {
            if let TemplatePart::Literal(next) = &part {
                if next.is_empty() {
                    continue;
                }
                if let Some(TemplatePart::Literal(prev)) = merged.last_mut() {
                    prev.push_str(next);
                    continue;
                }
            }
            merged.push(part);
        }
        Self { parts: merged }
    }

    #[must_use]
    pub fn parts(&self) -> &[TemplatePart] {
        &self.parts
    }

    /// The text of a template without placeholders.
    #[must_use]
    pub fn as_literal(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [] => Some(""),
            [TemplatePart::Literal(s)] => Some(s),
            _ => None,
        }
    }

    pub(crate) fn dynamic_parts(&self) -> impl Iterator<Item = &Expr> {
        self.parts.iter().filter_map(|p| match p {
            TemplatePart::Dynamic(e) => Some(e),
            TemplatePart::Literal(_) => None,
        })
    }

    pub(crate) fn map_dynamic(&self, mut f: impl FnMut(&Expr) -> Expr) -> Template {
        Template {
            parts: self
                .parts
                .iter()
                .map(|p| match p {
                    TemplatePart::Literal(s) => TemplatePart::Literal(s.clone()),
                    TemplatePart::Dynamic(e) => TemplatePart::Dynamic(f(e)),
                })
                .collect(),
        }
    }
}

/// Writes the template back in source form.
impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            match part {
                TemplatePart::Literal(s) => {
                    for c in s.chars() {
                        match c {
                            '{' => f.write_str("{{")?,
                            '}' => f.write_str("}}")?,
                            c => write!(f, "{c}")?,
                        }
                    }
                }
                TemplatePart::Dynamic(Expr::Ref(name)) => write!(f, "{{{name}}}")?,
                TemplatePart::Dynamic(Expr::GetAttr { target, path }) => {
                    write!(f, "{{{target}#{}}}", path_to_string(path))?;
                }
                TemplatePart::Dynamic(other) => write!(f, "{{{other}}}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::expr::{PathPart, get_attr, reference};

    #[test]
    fn literal_template() {
        let t = Template::literal("abc");
        assert_eq!(t.as_literal(), Some("abc"));
        assert_eq!(Template::literal("").as_literal(), Some(""));
    }

    #[test]
    fn from_parts_merges_literals() {
        let t = Template::from_parts(vec![
            TemplatePart::Literal("a".into()),
            TemplatePart::Literal(String::new()),
            TemplatePart::Literal("b".into()),
        ]);
        assert_eq!(t, Template::literal("ab"));
    }

    #[test]
    fn display_round_trips_source() {
        let t = Template::from_parts(vec![
            TemplatePart::Literal("https://".into()),
            TemplatePart::Dynamic(reference("Region")),
            TemplatePart::Literal(".{x}/".into()),
            TemplatePart::Dynamic(get_attr(reference("url"), [PathPart::key("path")])),
        ]);
        let source = t.to_string();
        assert_eq!(source, "https://{Region}.{{x}}/{url#path}");
        assert_eq!(Template::parse(&source).unwrap(), t);
    }
}
