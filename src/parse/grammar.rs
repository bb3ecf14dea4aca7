use winnow::ascii::dec_int;
use winnow::combinator::{alt, cut_err, delimited, opt, preceded, repeat, separated};
use winnow::error::{ErrMode, ModalResult, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::take_while;

use crate::types::{Expr, PathPart, TemplatePart};

// -- Identifiers ------------------------------------------------------------

fn ident<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1.., |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

// -- Attribute paths --------------------------------------------------------

fn index(input: &mut &str) -> ModalResult<i64> {
    delimited('[', cut_err(dec_int::<_, i64, _>), cut_err(']'))
        .context(StrContext::Expected(StrContextValue::Description(
            "array index",
        )))
        .parse_next(input)
}

fn key<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., |c: char| !matches!(c, '.' | '[' | ']' | '{' | '}')).parse_next(input)
}

/// A key, an index, or a key followed by an index (`name[2]`).
fn path_segment(input: &mut &str) -> ModalResult<Vec<PathPart>> {
    let key = opt(key).parse_next(input)?;
    let idx = opt(index).parse_next(input)?;
    let mut parts = Vec::with_capacity(2);
    if let Some(k) = key {
        parts.push(PathPart::Key(k.to_owned()));
    }
    if let Some(i) = idx {
        parts.push(PathPart::Index(i));
    }
    if parts.is_empty() {
        return Err(ErrMode::from_input(input));
    }
    Ok(parts)
}

pub(crate) fn attr_path(input: &mut &str) -> ModalResult<Vec<PathPart>> {
    let segments: Vec<Vec<PathPart>> = separated(1.., path_segment, '.')
        .context(StrContext::Expected(StrContextValue::Description(
            "attribute path",
        )))
        .parse_next(input)?;
    Ok(segments.into_iter().flatten().collect())
}

// -- Templates --------------------------------------------------------------

fn placeholder(input: &mut &str) -> ModalResult<TemplatePart> {
    '{'.parse_next(input)?;
    let name = cut_err(ident)
        .context(StrContext::Expected(StrContextValue::Description(
            "reference name",
        )))
        .parse_next(input)?;
    let path = opt(preceded('#', cut_err(attr_path))).parse_next(input)?;
    cut_err('}')
        .context(StrContext::Expected(StrContextValue::CharLiteral('}')))
        .parse_next(input)?;

    let target = Expr::Ref(name.to_owned());
    Ok(TemplatePart::Dynamic(match path {
        Some(path) => Expr::GetAttr {
            target: Box::new(target),
            path,
        },
        None => target,
    }))
}

fn template_part(input: &mut &str) -> ModalResult<TemplatePart> {
    alt((
        "{{".value(TemplatePart::Literal("{".to_owned())),
        "}}".value(TemplatePart::Literal("}".to_owned())),
        placeholder,
        take_while(1.., |c: char| c != '{' && c != '}')
            .map(|s: &str| TemplatePart::Literal(s.to_owned())),
    ))
    .parse_next(input)
}

pub(crate) fn template(input: &mut &str) -> ModalResult<Vec<TemplatePart>> {
    repeat(0.., template_part).parse_next(input)
}
