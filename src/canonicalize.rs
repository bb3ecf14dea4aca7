use std::fmt;

use crate::{Builtin, Condition, Expr, PathPart, Rule, RuleBody, RuleSet};

/// A semantics-preserving rewrite of one expression node.
///
/// Implementations inspect only the node they are given; the
/// [`Canonicalizer`] takes care of traversal and of reaching a fixpoint.
/// A rule must not undo another rule's output, or canonicalization will not
/// terminate.
pub trait RewriteRule: Send + Sync {
    fn name(&self) -> &str;

    /// The rewritten node, or `None` if the rule does not apply.
    fn rewrite(&self, expr: &Expr) -> Option<Expr>;
}

/// Moves a literal in the first argument of `stringEquals` or
/// `booleanEquals` to the second.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommutativeEquality;

impl RewriteRule for CommutativeEquality {
    fn name(&self) -> &str {
        "commutativeEquality"
    }

    fn rewrite(&self, expr: &Expr) -> Option<Expr> {
        let Expr::Call {
            function: function @ (Builtin::StringEquals | Builtin::BooleanEquals),
            args,
        } = expr
        else {
            return None;
        };
        match args.as_slice() {
            [a, b] if a.is_literal() && !b.is_literal() => Some(Expr::Call {
                function: *function,
                args: vec![b.clone(), a.clone()],
            }),
            _ => None,
        }
    }
}

/// `not(not(e))` is `e` when `e` is a boolean-valued call.
#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleNegation;

impl RewriteRule for DoubleNegation {
    fn name(&self) -> &str {
        "doubleNegation"
    }

    fn rewrite(&self, expr: &Expr) -> Option<Expr> {
        let Expr::Call {
            function: Builtin::Not,
            args,
        } = expr
        else {
            return None;
        };
        let [
            Expr::Call {
                function: Builtin::Not,
                args: inner,
            },
        ] = args.as_slice()
        else {
            return None;
        };
        match inner.as_slice() {
            [e @ Expr::Call { .. }] if e.is_boolean() => Some(e.clone()),
            _ => None,
        }
    }
}

/// Replaces a fixed-offset `substring` of a parameter with the equivalent
/// element of `split(parameter, delimiter, 0)`.
///
/// The equivalence is a property of the parameter's format, so the rule is
/// only sound where the format guarantees it; it is never installed by
/// default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstringToSplit {
    pub parameter: String,
    pub start: i64,
    pub stop: i64,
    pub reverse: bool,
    pub delimiter: String,
    pub index: i64,
}

impl RewriteRule for SubstringToSplit {
    fn name(&self) -> &str {
        "substringToSplit"
    }

    fn rewrite(&self, expr: &Expr) -> Option<Expr> {
        let Expr::Call {
            function: Builtin::Substring,
            args,
        } = expr
        else {
            return None;
        };
        let [
            Expr::Ref(name),
            Expr::Int(start),
            Expr::Int(stop),
            Expr::Bool(reverse),
        ] = args.as_slice()
        else {
            return None;
        };
        if *name != self.parameter
            || *start != self.start
            || *stop != self.stop
            || *reverse != self.reverse
        {
            return None;
        }
        Some(Expr::GetAttr {
            target: Box::new(Expr::Call {
                function: Builtin::Split,
                args: vec![
                    Expr::Ref(name.clone()),
                    Expr::literal(self.delimiter.as_str()),
                    Expr::Int(0),
                ],
            }),
            path: vec![PathPart::Index(self.index)],
        })
    }
}

/// A canonicalized rule set and the number of rewrites it took.
#[derive(Debug, Clone)]
pub struct Canonicalized {
    pub ruleset: RuleSet,
    pub rewrites: usize,
}

/// Rewrites conditions into a canonical form so that equivalent conditions
/// intern to the same entry.
///
/// Rules run bottom-up over every sub-expression of every condition and are
/// re-applied until nothing changes, so canonicalizing twice is the same as
/// canonicalizing once. Results are left as written.
pub struct Canonicalizer {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::empty()
            .with_rule(CommutativeEquality)
            .with_rule(DoubleNegation)
    }
}

impl fmt::Debug for Canonicalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| r.name()))
            .finish()
    }
}

impl Canonicalizer {
    /// The built-in rules: commutative equality and double negation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A canonicalizer with no rules.
    #[must_use]
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    #[must_use]
    pub fn with_rule(mut self, rule: impl RewriteRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    #[must_use]
    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    #[must_use]
    pub fn canonicalize(&self, ruleset: &RuleSet) -> Canonicalized {
        let mut rewrites = 0;
        let rules = ruleset
            .rules()
            .iter()
            .map(|r| self.rewrite_rule(r, &mut rewrites))
            .collect();
        log::debug!("canonicalizer applied {rewrites} rewrites");
        Canonicalized {
            ruleset: ruleset.with_rules(rules),
            rewrites,
        }
    }

    fn rewrite_rule(&self, rule: &Rule, count: &mut usize) -> Rule {
        let conditions = rule
            .conditions
            .iter()
            .map(|c| Condition {
                expr: self.rewrite_expr(&c.expr, count),
                assign: c.assign.clone(),
            })
            .collect();
        let body = match &rule.body {
            RuleBody::Tree(children) => RuleBody::Tree(
                children
                    .iter()
                    .map(|child| self.rewrite_rule(child, count))
                    .collect(),
            ),
            other => other.clone(),
        };
        Rule {
            conditions,
            body,
            documentation: rule.documentation.clone(),
        }
    }

    fn rewrite_expr(&self, expr: &Expr, count: &mut usize) -> Expr {
        let expr = expr.map_children(|child| self.rewrite_expr(child, count));
        for rule in &self.rules {
            if let Some(rewritten) = rule.rewrite(&expr) {
                *count += 1;
                log::trace!("{}: {expr} => {rewritten}", rule.name());
                return self.rewrite_expr(&rewritten, count);
            }
        }
        expr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Context, Parameter, RuleSetBuilder, boolean_equals, call, is_set, not, reference,
        string_equals,
    };

    fn canonical(expr: Expr) -> (Expr, usize) {
        let mut count = 0;
        let out = Canonicalizer::new().rewrite_expr(&expr, &mut count);
        (out, count)
    }

    #[test]
    fn literal_moves_to_second_argument() {
        let (out, n) = canonical(string_equals("aws-global", reference("Region")));
        assert_eq!(out, string_equals(reference("Region"), "aws-global"));
        assert_eq!(n, 1);

        let (out, n) = canonical(boolean_equals(true, reference("UseFips")));
        assert_eq!(out, boolean_equals(reference("UseFips"), true));
        assert_eq!(n, 1);
    }

    #[test]
    fn two_literals_are_left_alone() {
        let (out, n) = canonical(string_equals("a", "b"));
        assert_eq!(out, string_equals("a", "b"));
        assert_eq!(n, 0);
    }

    #[test]
    fn double_negation_of_boolean_call() {
        let (out, n) = canonical(not(not(is_set(reference("x")))));
        assert_eq!(out, is_set(reference("x")));
        assert_eq!(n, 1);
    }

    #[test]
    fn double_negation_keeps_non_boolean_operand() {
        let e = not(not(reference("x")));
        let (out, n) = canonical(e.clone());
        assert_eq!(out, e);
        assert_eq!(n, 0);
    }

    #[test]
    fn rewrites_nested_and_repeated() {
        // not(not(not(not(stringEquals("a", x))))) needs three rewrites.
        let e = not(not(not(not(string_equals("a", reference("x"))))));
        let (out, n) = canonical(e);
        assert_eq!(out, string_equals(reference("x"), "a"));
        assert_eq!(n, 3);
    }

    #[test]
    fn canonicalizing_twice_changes_nothing() {
        let ruleset = RuleSetBuilder::new()
            .parameter(Parameter::string("Region"))
            .rule(|r| {
                r.when(not(not(string_equals("x", reference("Region")))))
                    .endpoint("https://x")
            })
            .build()
            .unwrap();
        let canonicalizer = Canonicalizer::new();
        let once = canonicalizer.canonicalize(&ruleset);
        assert_eq!(once.rewrites, 2);
        let twice = canonicalizer.canonicalize(&once.ruleset);
        assert_eq!(twice.rewrites, 0);
        assert_eq!(twice.ruleset, once.ruleset);
    }

    #[test]
    fn substring_becomes_split() {
        let canonicalizer = Canonicalizer::empty().with_rule(SubstringToSplit {
            parameter: "Bucket".into(),
            start: 6,
            stop: 8,
            reverse: false,
            delimiter: "--".into(),
            index: -2,
        });
        let ruleset = RuleSetBuilder::new()
            .parameter(Parameter::string("Bucket"))
            .rule(|r| {
                r.bind(
                    "zone",
                    call(
                        Builtin::Substring,
                        [reference("Bucket"), 6.into(), 8.into(), false.into()],
                    ),
                )
                .endpoint("https://{zone}.example.com")
            })
            .build()
            .unwrap();
        let out = canonicalizer.canonicalize(&ruleset);
        assert_eq!(out.rewrites, 1);
        assert_eq!(
            out.ruleset.rules()[0].conditions[0].expr.to_string(),
            "split(Bucket, \"--\", 0)#[-2]"
        );
        let ctx = Context::new().set("Bucket", "abcd--ef--x-s3");
        assert_eq!(ruleset.evaluate(&ctx), out.ruleset.evaluate(&ctx));
    }

    #[test]
    fn other_offsets_untouched() {
        let rule = SubstringToSplit {
            parameter: "Bucket".into(),
            start: 6,
            stop: 8,
            reverse: false,
            delimiter: "--".into(),
            index: -2,
        };
        let e = call(
            Builtin::Substring,
            [reference("Bucket"), 0.into(), 8.into(), false.into()],
        );
        assert_eq!(rule.rewrite(&e), None);
    }

    #[test]
    fn debug_lists_rule_names() {
        assert_eq!(
            format!("{:?}", Canonicalizer::new()),
            "[\"commutativeEquality\", \"doubleNegation\"]"
        );
    }
}
