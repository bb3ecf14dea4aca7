use std::collections::BTreeMap;
use std::fmt;

use super::function::Builtin;
use super::template::Template;
use super::value::Value;

/// One step of a `getAttr` path: a record key or an array index.
/// Negative indices count from the end of the array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathPart {
    Key(String),
    Index(i64),
}

impl PathPart {
    pub fn key(name: impl Into<String>) -> Self {
        PathPart::Key(name.into())
    }

    #[must_use]
    pub fn index(i: i64) -> Self {
        PathPart::Index(i)
    }
}

/// Render a path back into its source form, e.g. `a.b[1]` or `[-2]`.
#[must_use]
pub fn path_to_string(path: &[PathPart]) -> String {
    let mut out = String::new();
    for (i, part) in path.iter().enumerate() {
        match part {
            PathPart::Key(k) => {
                if i > 0 {
                    out.push('.');
                }
                out.push_str(k);
            }
            PathPart::Index(idx) => {
                out.push('[');
                out.push_str(&idx.to_string());
                out.push(']');
            }
        }
    }
    out
}

/// Argument and result expressions of the rule language.
///
/// Expressions are plain trees; structural equality and hashing are what
/// condition and result interning key on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// A string, possibly interpolating references.
    Str(Template),
    Int(i64),
    Bool(bool),
    Array(Vec<Expr>),
    Record(BTreeMap<String, Expr>),
    /// A parameter or a binding introduced by an earlier condition.
    Ref(String),
    Call { function: Builtin, args: Vec<Expr> },
    GetAttr { target: Box<Expr>, path: Vec<PathPart> },
}

impl Expr {
    /// Parse a string template such as `https://{Region}.example.com`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`](crate::ParseError) on malformed placeholders.
    pub fn template(source: &str) -> Result<Expr, crate::ParseError> {
        Ok(Expr::Str(Template::parse(source)?))
    }

    /// A string with no interpolation.
    pub fn literal(s: impl Into<String>) -> Expr {
        Expr::Str(Template::literal(s))
    }

    /// Whether the expression is a constant with no references or calls.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        match self {
            Expr::Str(t) => t.as_literal().is_some(),
            Expr::Int(_) | Expr::Bool(_) => true,
            Expr::Array(items) => items.iter().all(Expr::is_literal),
            Expr::Record(map) => map.values().all(Expr::is_literal),
            Expr::Ref(_) | Expr::Call { .. } | Expr::GetAttr { .. } => false,
        }
    }

    /// The constant value of a literal expression.
    #[must_use]
    pub fn literal_value(&self) -> Option<Value> {
        match self {
            Expr::Str(t) => t.as_literal().map(Value::from),
            Expr::Int(i) => Some(Value::Int(*i)),
            Expr::Bool(b) => Some(Value::Bool(*b)),
            Expr::Array(items) => items
                .iter()
                .map(Expr::literal_value)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Expr::Record(map) => map
                .iter()
                .map(|(k, v)| v.literal_value().map(|v| (k.clone(), v)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(Value::Record),
            Expr::Ref(_) | Expr::Call { .. } | Expr::GetAttr { .. } => None,
        }
    }

    /// Whether evaluation always yields a boolean.
    #[must_use]
    pub fn is_boolean(&self) -> bool {
        match self {
            Expr::Bool(_) => true,
            Expr::Call { function, .. } => function.returns_bool(),
            _ => false,
        }
    }

    /// Names referenced anywhere in the expression, in left-to-right order.
    #[must_use]
    pub fn references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    pub(crate) fn collect_references<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Str(t) => {
                for part in t.dynamic_parts() {
                    part.collect_references(out);
                }
            }
            Expr::Int(_) | Expr::Bool(_) => {}
            Expr::Array(items) => items.iter().for_each(|e| e.collect_references(out)),
            Expr::Record(map) => map.values().for_each(|e| e.collect_references(out)),
            Expr::Ref(name) => out.push(name),
            Expr::Call { args, .. } => args.iter().for_each(|e| e.collect_references(out)),
            Expr::GetAttr { target, .. } => target.collect_references(out),
        }
    }

    /// Rebuild the expression with every reference renamed through `rename`.
    #[must_use]
    pub fn rename_references(&self, rename: &impl Fn(&str) -> String) -> Expr {
        match self {
            Expr::Ref(name) => Expr::Ref(rename(name)),
            Expr::Str(t) => Expr::Str(t.map_dynamic(|e| e.rename_references(rename))),
            other => other.map_children(|e| e.rename_references(rename)),
        }
    }

    /// Rebuild the expression with each direct child replaced by `f(child)`.
    /// Template placeholders are left untouched.
    #[must_use]
    pub fn map_children(&self, mut f: impl FnMut(&Expr) -> Expr) -> Expr {
        match self {
            Expr::Str(_) | Expr::Int(_) | Expr::Bool(_) | Expr::Ref(_) => self.clone(),
            Expr::Array(items) => Expr::Array(items.iter().map(&mut f).collect()),
            Expr::Record(map) => {
                Expr::Record(map.iter().map(|(k, v)| (k.clone(), f(v))).collect())
            }
            Expr::Call { function, args } => Expr::Call {
                function: *function,
                args: args.iter().map(&mut f).collect(),
            },
            Expr::GetAttr { target, path } => Expr::GetAttr {
                target: Box::new(f(target)),
                path: path.clone(),
            },
        }
    }
}

impl From<&str> for Expr {
    fn from(v: &str) -> Self {
        Expr::literal(v)
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::Int(v)
    }
}

impl From<bool> for Expr {
    fn from(v: bool) -> Self {
        Expr::Bool(v)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Str(t) => write!(f, "\"{t}\""),
            Expr::Int(v) => write!(f, "{v}"),
            Expr::Bool(v) => write!(f, "{v}"),
            Expr::Array(items) => {
                f.write_str("[")?;
                write_list(f, items)?;
                f.write_str("]")
            }
            Expr::Record(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Expr::Ref(name) => f.write_str(name),
            Expr::Call { function, args } => {
                write!(f, "{}(", function.name())?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::GetAttr { target, path } => write!(f, "{target}#{}", path_to_string(path)),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// Reference a parameter or binding by name.
pub fn reference(name: impl Into<String>) -> Expr {
    Expr::Ref(name.into())
}

/// Call a built-in function.
pub fn call(function: Builtin, args: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::Call {
        function,
        args: args.into_iter().collect(),
    }
}

pub fn is_set(arg: Expr) -> Expr {
    call(Builtin::IsSet, [arg])
}

pub fn not(arg: Expr) -> Expr {
    call(Builtin::Not, [arg])
}

pub fn string_equals(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    call(Builtin::StringEquals, [a.into(), b.into()])
}

pub fn boolean_equals(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    call(Builtin::BooleanEquals, [a.into(), b.into()])
}

/// Extract an attribute, e.g. `get_attr(reference("url"), [PathPart::key("authority")])`.
pub fn get_attr(target: Expr, path: impl IntoIterator<Item = PathPart>) -> Expr {
    Expr::GetAttr {
        target: Box::new(target),
        path: path.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        let e = string_equals(reference("Region"), "aws-global");
        assert_eq!(e.to_string(), "stringEquals(Region, \"aws-global\")");

        let g = get_attr(
            call(Builtin::Split, [reference("Bucket"), "--".into(), 0.into()]),
            [PathPart::index(-2)],
        );
        assert_eq!(g.to_string(), "split(Bucket, \"--\", 0)#[-2]");
    }

    #[test]
    fn path_rendering() {
        let path = vec![PathPart::key("a"), PathPart::key("b"), PathPart::index(1)];
        assert_eq!(path_to_string(&path), "a.b[1]");
        assert_eq!(path_to_string(&[PathPart::index(-2)]), "[-2]");
    }

    #[test]
    fn literals() {
        assert!(Expr::from("x").is_literal());
        assert!(Expr::Array(vec![1.into(), true.into()]).is_literal());
        assert!(!reference("x").is_literal());
        assert!(!Expr::template("{x}").unwrap().is_literal());
        assert_eq!(Expr::from("x").literal_value(), Some(Value::from("x")));
    }

    #[test]
    fn references_include_template_placeholders() {
        let e = call(
            Builtin::Coalesce,
            [
                reference("a"),
                Expr::template("{b}-{c#x}").unwrap(),
                get_attr(reference("d"), [PathPart::key("k")]),
            ],
        );
        assert_eq!(e.references(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn rename_reaches_templates() {
        let e = string_equals(reference("x"), Expr::template("{x}").unwrap());
        let renamed = e.rename_references(&|n: &str| format!("{n}_1"));
        assert_eq!(renamed.references(), vec!["x_1", "x_1"]);
    }

    #[test]
    fn boolean_valued() {
        assert!(is_set(reference("x")).is_boolean());
        assert!(!call(Builtin::Coalesce, [reference("x")]).is_boolean());
    }
}
