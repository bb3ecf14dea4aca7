use endpoint_bdd::{
    Builtin, Condition, Context, Expr, Parameter, PathPart, RuleBuilder, RuleListBuilder, RuleSet,
    RuleSetBuilder, boolean_equals, call, get_attr, is_set, not, reference, string_equals,
};
use proptest::prelude::*;

// --- Fixed parameter schema ---
// Region       : string, one of REGIONS or unset
// Endpoint     : string, one of ENDPOINTS or unset
// Bucket       : string, one of BUCKETS or unset
// UseFips      : boolean, default false
// UseDualStack : boolean, default false

const REGIONS: &[&str] = &["us-east-1", "eu-west-1", "cn-north-1"];
const ENDPOINTS: &[&str] = &["https://example.com", "http://localhost:8080", "not a url"];
const BUCKETS: &[&str] = &["abcd--ef--x-s3", "my-bucket", "a.b"];
const URLS: &[&str] = &[
    "https://{Region}.example.com",
    "https://fips.{Region}.example.com",
    "https://s3.amazonaws.com",
    "{Endpoint}",
];
const MESSAGES: &[&str] = &["Region must be set", "invalid configuration", "no match for {Region}"];

#[must_use]
pub fn parameters() -> Vec<Parameter> {
    vec![
        Parameter::string("Region"),
        Parameter::string("Endpoint"),
        Parameter::string("Bucket"),
        Parameter::boolean("UseFips").with_default(false),
        Parameter::boolean("UseDualStack").with_default(false),
    ]
}

fn optional(values: &'static [&'static str]) -> impl Strategy<Value = Option<&'static str>> {
    prop::option::of(prop::sample::select(values))
}

/// Generate a context that aligns with the fixed parameter schema.
pub fn arb_context() -> impl Strategy<Value = Context> {
    (
        optional(REGIONS),
        optional(ENDPOINTS),
        optional(BUCKETS),
        prop::option::of(any::<bool>()),
        prop::option::of(any::<bool>()),
    )
        .prop_map(|(region, endpoint, bucket, fips, dual_stack)| {
            let mut ctx = Context::new();
            if let Some(region) = region {
                ctx = ctx.set("Region", region);
            }
            if let Some(endpoint) = endpoint {
                ctx = ctx.set("Endpoint", endpoint);
            }
            if let Some(bucket) = bucket {
                ctx = ctx.set("Bucket", bucket);
            }
            if let Some(fips) = fips {
                ctx = ctx.set("UseFips", fips);
            }
            if let Some(dual_stack) = dual_stack {
                ctx = ctx.set("UseDualStack", dual_stack);
            }
            ctx
        })
}

/// Generate a non-binding condition over the schema.
fn arb_condition() -> impl Strategy<Value = Expr> {
    prop_oneof![
        prop::sample::select(&["Region", "Endpoint", "Bucket"][..])
            .prop_map(|name| is_set(reference(name))),
        prop::sample::select(&["Region", "Endpoint", "Bucket"][..])
            .prop_map(|name| not(is_set(reference(name)))),
        (prop::sample::select(&["UseFips", "UseDualStack"][..]), any::<bool>())
            .prop_map(|(name, value)| boolean_equals(reference(name), value)),
        // Either argument order, so canonicalization has work to do.
        (prop::sample::select(REGIONS), any::<bool>()).prop_map(|(region, flipped)| {
            if flipped {
                string_equals(Expr::literal(region), reference("Region"))
            } else {
                string_equals(reference("Region"), region)
            }
        }),
        Just(call(
            Builtin::IsValidHostLabel,
            [reference("Bucket"), false.into()]
        )),
        Just(string_equals(
            get_attr(
                call(Builtin::Split, [reference("Bucket"), "--".into(), 0.into()]),
                [PathPart::index(-2)],
            ),
            "ef",
        )),
    ]
}

/// A generated rule: conditions, an optional URL binding, and a body.
#[derive(Debug, Clone)]
pub struct GenRule {
    pub conditions: Vec<Expr>,
    /// Bind `url_<depth> = parseURL(Endpoint)` and test its scheme.
    pub binds_url: bool,
    pub body: GenBody,
}

#[derive(Debug, Clone)]
pub enum GenBody {
    Tree(Vec<GenRule>),
    Endpoint(&'static str),
    Error(&'static str),
}

fn arb_leaf_body() -> impl Strategy<Value = GenBody> {
    prop_oneof![
        3 => prop::sample::select(URLS).prop_map(GenBody::Endpoint),
        1 => prop::sample::select(MESSAGES).prop_map(GenBody::Error),
    ]
}

fn arb_rule_with(body: BoxedStrategy<GenBody>) -> impl Strategy<Value = GenRule> {
    (
        prop::collection::vec(arb_condition(), 0..=3),
        prop::bool::weighted(0.2),
        body,
    )
        .prop_map(|(conditions, binds_url, body)| GenRule {
            conditions,
            binds_url,
            body,
        })
}

/// Generate a rule list, nesting trees up to `depth` levels.
fn arb_rules(depth: u32) -> BoxedStrategy<Vec<GenRule>> {
    let body = if depth == 0 {
        arb_leaf_body().boxed()
    } else {
        prop_oneof![
            3 => arb_leaf_body(),
            1 => arb_rules(depth - 1).prop_map(GenBody::Tree),
        ]
        .boxed()
    };
    prop::collection::vec(arb_rule_with(body), 1..=4).boxed()
}

/// A complete generated rule set over the fixed schema.
#[derive(Debug, Clone)]
pub struct GenRuleSet {
    pub rules: Vec<GenRule>,
}

impl GenRuleSet {
    /// Build into an actual `RuleSet`.
    ///
    /// # Panics
    ///
    /// Panics if the generated rule set fails validation (should not happen
    /// with valid generators).
    #[must_use]
    pub fn build(&self) -> RuleSet {
        let mut builder = RuleSetBuilder::new();
        for parameter in parameters() {
            builder = builder.parameter(parameter);
        }
        for rule in &self.rules {
            builder = builder.rule(|r| build_rule(r, rule, 0));
        }
        builder.build().expect("generated rule set should validate")
    }
}

fn build_rule(mut r: RuleBuilder, rule: &GenRule, depth: usize) -> RuleBuilder {
    for condition in &rule.conditions {
        r = r.when(Condition::new(condition.clone()));
    }
    if rule.binds_url {
        let name = format!("url_{depth}");
        r = r
            .bind(&name, call(Builtin::ParseUrl, [reference("Endpoint")]))
            .when(string_equals(
                get_attr(reference(name.as_str()), [PathPart::key("scheme")]),
                "https",
            ));
    }
    match &rule.body {
        GenBody::Endpoint(url) => r.endpoint(url),
        GenBody::Error(message) => r.error(message),
        GenBody::Tree(children) => r.tree(|t| build_list(t, children, depth + 1)),
    }
}

fn build_list(mut t: RuleListBuilder, rules: &[GenRule], depth: usize) -> RuleListBuilder {
    for rule in rules {
        t = t.rule(|r| build_rule(r, rule, depth));
    }
    t
}

/// Generate a rule set with up to two levels of nesting.
pub fn arb_ruleset() -> impl Strategy<Value = GenRuleSet> {
    arb_rules(2).prop_map(|rules| GenRuleSet { rules })
}

/// Generate a rule set together with a handful of contexts to test it on.
pub fn arb_ruleset_and_contexts() -> impl Strategy<Value = (GenRuleSet, Vec<Context>)> {
    (arb_ruleset(), prop::collection::vec(arb_context(), 1..=12))
}
