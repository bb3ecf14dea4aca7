use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use super::expr::PathPart;
use super::value::Value;

/// The closed set of functions a condition may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Builtin {
    IsSet,
    Not,
    BooleanEquals,
    StringEquals,
    Substring,
    Split,
    ParseUrl,
    UriEncode,
    IsValidHostLabel,
    Coalesce,
    Ite,
}

impl Builtin {
    pub const ALL: [Builtin; 11] = [
        Builtin::IsSet,
        Builtin::Not,
        Builtin::BooleanEquals,
        Builtin::StringEquals,
        Builtin::Substring,
        Builtin::Split,
        Builtin::ParseUrl,
        Builtin::UriEncode,
        Builtin::IsValidHostLabel,
        Builtin::Coalesce,
        Builtin::Ite,
    ];

    /// Identifier used in rule documents.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Builtin::IsSet => "isSet",
            Builtin::Not => "not",
            Builtin::BooleanEquals => "booleanEquals",
            Builtin::StringEquals => "stringEquals",
            Builtin::Substring => "substring",
            Builtin::Split => "split",
            Builtin::ParseUrl => "parseURL",
            Builtin::UriEncode => "uriEncode",
            Builtin::IsValidHostLabel => "isValidHostLabel",
            Builtin::Coalesce => "coalesce",
            Builtin::Ite => "ite",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    /// Accepted argument counts as `(min, max)`; `None` means unbounded.
    #[must_use]
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            Builtin::IsSet | Builtin::Not | Builtin::ParseUrl | Builtin::UriEncode => (1, Some(1)),
            Builtin::BooleanEquals | Builtin::StringEquals | Builtin::IsValidHostLabel => {
                (2, Some(2))
            }
            Builtin::Split | Builtin::Ite => (3, Some(3)),
            Builtin::Substring => (4, Some(4)),
            Builtin::Coalesce => (2, None),
        }
    }

    #[must_use]
    pub fn accepts_arity(self, n: usize) -> bool {
        let (min, max) = self.arity();
        n >= min && max.is_none_or(|max| n <= max)
    }

    #[must_use]
    pub fn returns_bool(self) -> bool {
        matches!(
            self,
            Builtin::IsSet
                | Builtin::Not
                | Builtin::BooleanEquals
                | Builtin::StringEquals
                | Builtin::IsValidHostLabel
        )
    }

    /// Apply the function to already-evaluated arguments. `None` marks an
    /// unset argument. Ill-typed or missing arguments yield `None` (or
    /// `false` for the predicates) rather than an error.
    #[must_use]
    pub fn apply(self, args: &[Option<Value>]) -> Option<Value> {
        if !self.accepts_arity(args.len()) {
            return None;
        }
        match self {
            Builtin::IsSet => Some(Value::Bool(args[0].is_some())),
            Builtin::Not => Some(Value::Bool(!holds(&args[0]))),
            Builtin::BooleanEquals => Some(Value::Bool(matches!(
                (&args[0], &args[1]),
                (Some(Value::Bool(a)), Some(Value::Bool(b))) if a == b
            ))),
            Builtin::StringEquals => Some(Value::Bool(matches!(
                (&args[0], &args[1]),
                (Some(Value::String(a)), Some(Value::String(b))) if a == b
            ))),
            Builtin::Substring => {
                let input = args[0].as_ref()?.as_str()?;
                let start = args[1].as_ref()?.as_int()?;
                let stop = args[2].as_ref()?.as_int()?;
                let reverse = args[3].as_ref()?.as_bool()?;
                substring(input, start, stop, reverse).map(Value::String)
            }
            Builtin::Split => {
                let input = args[0].as_ref()?.as_str()?;
                let delimiter = args[1].as_ref()?.as_str()?;
                let limit = args[2].as_ref()?.as_int()?;
                split(input, delimiter, limit)
                    .map(|parts| Value::Array(parts.into_iter().map(Value::String).collect()))
            }
            Builtin::ParseUrl => parse_url(args[0].as_ref()?.as_str()?),
            Builtin::UriEncode => Some(Value::String(uri_encode(args[0].as_ref()?.as_str()?))),
            Builtin::IsValidHostLabel => {
                let valid = match (&args[0], &args[1]) {
                    (Some(Value::String(label)), Some(Value::Bool(allow_sub))) => {
                        is_valid_host_label(label, *allow_sub)
                    }
                    _ => false,
                };
                Some(Value::Bool(valid))
            }
            Builtin::Coalesce => args.iter().find_map(Clone::clone),
            Builtin::Ite => {
                if holds(&args[0]) {
                    args[1].clone()
                } else {
                    args[2].clone()
                }
            }
        }
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Condition truthiness over an optional value.
pub(crate) fn holds(value: &Option<Value>) -> bool {
    value.as_ref().is_some_and(Value::holds)
}

/// Follow a `getAttr` path through records and arrays.
pub(crate) fn get_attr(value: &Value, path: &[PathPart]) -> Option<Value> {
    let mut current = value;
    for part in path {
        current = match (part, current) {
            (PathPart::Key(k), Value::Record(map)) => map.get(k)?,
            (PathPart::Index(i), Value::Array(items)) => {
                let len = i64::try_from(items.len()).ok()?;
                let idx = if *i < 0 { len + i } else { *i };
                if idx < 0 {
                    return None;
                }
                items.get(usize::try_from(idx).ok()?)?
            }
            _ => return None,
        };
    }
    Some(current.clone())
}

fn substring(input: &str, start: i64, stop: i64, reverse: bool) -> Option<String> {
    if !input.is_ascii() || start < 0 || start >= stop {
        return None;
    }
    let len = i64::try_from(input.len()).ok()?;
    if len < stop {
        return None;
    }
    let (from, to) = if reverse {
        (len - stop, len - start)
    } else {
        (start, stop)
    };
    let from = usize::try_from(from).ok()?;
    let to = usize::try_from(to).ok()?;
    input.get(from..to).map(str::to_owned)
}

fn split(input: &str, delimiter: &str, limit: i64) -> Option<Vec<String>> {
    if delimiter.is_empty() || limit < 0 {
        return None;
    }
    let parts: Vec<String> = if limit == 0 {
        input.split(delimiter).map(str::to_owned).collect()
    } else {
        let limit = usize::try_from(limit).ok()?;
        input.splitn(limit, delimiter).map(str::to_owned).collect()
    };
    Some(parts)
}

fn parse_url(input: &str) -> Option<Value> {
    let (scheme, rest) = input.split_once("://")?;
    if scheme != "http" && scheme != "https" {
        return None;
    }
    if rest.contains('?') || rest.contains('#') {
        return None;
    }
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    if authority.is_empty() {
        return None;
    }

    let mut normalized = String::with_capacity(path.len() + 2);
    if !path.starts_with('/') {
        normalized.push('/');
    }
    normalized.push_str(path);
    if !normalized.ends_with('/') {
        normalized.push('/');
    }

    let mut record = BTreeMap::new();
    record.insert("scheme".to_owned(), Value::from(scheme));
    record.insert("authority".to_owned(), Value::from(authority));
    record.insert("path".to_owned(), Value::from(path));
    record.insert("normalizedPath".to_owned(), Value::String(normalized));
    record.insert("isIp".to_owned(), Value::Bool(is_ip_authority(authority)));
    Some(Value::Record(record))
}

fn is_ip_authority(authority: &str) -> bool {
    if authority.starts_with('[') {
        return true;
    }
    let host = match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    };
    host.parse::<Ipv4Addr>().is_ok()
}

fn uri_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(char::from(byte));
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn is_valid_host_label(input: &str, allow_sub_domains: bool) -> bool {
    if allow_sub_domains {
        input.split('.').all(is_valid_label)
    } else {
        is_valid_label(input)
    }
}

fn is_valid_label(label: &str) -> bool {
    let mut chars = label.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    label.len() <= 63
        && first.is_ascii_alphanumeric()
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Option<Value> {
        Some(Value::from(v))
    }

    fn strings(values: &[&str]) -> Value {
        Value::Array(values.iter().map(|v| Value::from(*v)).collect())
    }

    #[test]
    fn names_round_trip() {
        for builtin in Builtin::ALL {
            assert_eq!(Builtin::from_name(builtin.name()), Some(builtin));
        }
        assert_eq!(Builtin::from_name("aws.partition"), None);
    }

    #[test]
    fn is_set_and_not() {
        assert_eq!(Builtin::IsSet.apply(&[None]), Some(Value::Bool(false)));
        assert_eq!(Builtin::IsSet.apply(&[s("x")]), Some(Value::Bool(true)));
        assert_eq!(Builtin::Not.apply(&[None]), Some(Value::Bool(true)));
        assert_eq!(
            Builtin::Not.apply(&[Some(Value::Bool(true))]),
            Some(Value::Bool(false))
        );
    }

    #[test]
    fn equality_with_unset_is_false() {
        assert_eq!(
            Builtin::StringEquals.apply(&[None, s("a")]),
            Some(Value::Bool(false))
        );
        assert_eq!(
            Builtin::StringEquals.apply(&[s("a"), s("a")]),
            Some(Value::Bool(true))
        );
        assert_eq!(
            Builtin::BooleanEquals.apply(&[Some(Value::Bool(true)), Some(Value::Bool(true))]),
            Some(Value::Bool(true))
        );
    }

    #[test]
    fn substring_forward_and_reverse() {
        assert_eq!(substring("abcd--ef--x-s3", 6, 8, false).as_deref(), Some("ef"));
        assert_eq!(substring("abcdef", 0, 2, true).as_deref(), Some("ef"));
        assert_eq!(substring("abc", 2, 2, false), None);
        assert_eq!(substring("abc", 0, 4, false), None);
        assert_eq!(substring("ab\u{e9}cd", 0, 1, false), None);
    }

    #[test]
    fn split_limits() {
        let cases: &[(&str, &str, i64, &[&str])] = &[
            ("a--b--c", "--", 0, &["a", "b", "c"]),
            ("a--b--c", "--", 2, &["a", "b--c"]),
            ("a--b--c", "--", 1, &["a--b--c"]),
            ("", "--", 0, &[""]),
            ("----", "--", 0, &["", "", ""]),
            ("aaa", "aa", 0, &["", "a"]),
            ("--x-s3--azid--suffix", "--", 3, &["", "x-s3", "azid--suffix"]),
            ("trailing--", "--", 0, &["trailing", ""]),
            ("abc", "abc", 1, &["abc"]),
        ];
        for (input, delim, limit, expected) in cases {
            let got = Builtin::Split.apply(&[s(input), s(delim), Some(Value::Int(*limit))]);
            assert_eq!(got, Some(strings(expected)), "split({input:?}, {delim:?}, {limit})");
        }
        assert_eq!(Builtin::Split.apply(&[s("a"), s(""), Some(Value::Int(0))]), None);
    }

    #[test]
    fn get_attr_paths() {
        let v = strings(&["abcd", "ef", "x-s3"]);
        assert_eq!(get_attr(&v, &[PathPart::Index(-2)]), Some(Value::from("ef")));
        assert_eq!(get_attr(&v, &[PathPart::Index(0)]), Some(Value::from("abcd")));
        assert_eq!(get_attr(&v, &[PathPart::Index(3)]), None);
        assert_eq!(get_attr(&v, &[PathPart::Index(-4)]), None);
        assert_eq!(get_attr(&v, &[PathPart::key("a")]), None);

        let url = parse_url("https://example.com:8443/a/b").unwrap();
        assert_eq!(
            get_attr(&url, &[PathPart::key("authority")]),
            Some(Value::from("example.com:8443"))
        );
    }

    #[test]
    fn parse_url_fields() {
        let url = parse_url("http://127.0.0.1:80").unwrap();
        let record = url.as_record().unwrap();
        assert_eq!(record["isIp"], Value::Bool(true));
        assert_eq!(record["path"], Value::from(""));
        assert_eq!(record["normalizedPath"], Value::from("/"));

        let url = parse_url("https://example.com/foo").unwrap();
        let record = url.as_record().unwrap();
        assert_eq!(record["isIp"], Value::Bool(false));
        assert_eq!(record["normalizedPath"], Value::from("/foo/"));

        assert_eq!(parse_url("ftp://example.com"), None);
        assert_eq!(parse_url("https://example.com/?x=1"), None);
        assert_eq!(parse_url("example.com"), None);
    }

    #[test]
    fn uri_encoding() {
        assert_eq!(uri_encode("a b/c~d"), "a%20b%2Fc~d");
        assert_eq!(uri_encode("\u{e9}"), "%C3%A9");
    }

    #[test]
    fn host_labels() {
        assert!(is_valid_host_label("us-east-1", false));
        assert!(!is_valid_host_label("-bad", false));
        assert!(!is_valid_host_label("a.b", false));
        assert!(is_valid_host_label("a.b", true));
        assert!(!is_valid_host_label("a..b", true));
        assert!(!is_valid_host_label(&"a".repeat(64), false));
    }

    #[test]
    fn coalesce_and_ite() {
        assert_eq!(Builtin::Coalesce.apply(&[None, s("b"), s("c")]), s("b"));
        assert_eq!(Builtin::Coalesce.apply(&[None, None]), None);
        assert_eq!(
            Builtin::Ite.apply(&[Some(Value::Bool(true)), s("a"), s("b")]),
            s("a")
        );
        assert_eq!(Builtin::Ite.apply(&[None, s("a"), s("b")]), s("b"));
    }

    #[test]
    fn wrong_arity_yields_none() {
        assert_eq!(Builtin::IsSet.apply(&[]), None);
        assert!(!Builtin::Coalesce.accepts_arity(1));
        assert!(Builtin::Coalesce.accepts_arity(5));
    }
}
