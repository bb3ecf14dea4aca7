use std::collections::BTreeMap;

use endpoint_bdd::{
    BranchRef, Builtin, Canonicalizer, CompileError, CompileOptions, Compiler, Context,
    EndpointError, Expectation, Expr, FunctionCost, Outcome, Parameter, PathPart, ResolvedEndpoint,
    RuleSet, RuleSetBuilder, Stage, SubstringToSplit, TestSuite, UniformEstimator, Value,
    VerifyError, call, get_attr, is_set, reference, string_equals,
};

const REGION_DOCUMENT: &str = r#"{
    "version": "1.0",
    "parameters": [{ "name": "Region", "type": "String", "required": true }],
    "rules": [
        {
            "conditions": [{ "fn": "isSet", "argv": [{ "ref": "Region" }] }],
            "type": "endpoint",
            "endpoint": { "url": "https://{Region}.example.com" }
        },
        { "conditions": [], "type": "error", "error": "Region must be set" }
    ]
}"#;

const REGION_TESTS: &str = r#"{
    "testCases": [
        {
            "params": { "Region": "us-east-1" },
            "expect": { "endpoint": { "url": "https://us-east-1.example.com" } }
        },
        {
            "documentation": "a required parameter may still be left out",
            "params": {},
            "expect": { "error": "Region must be set" }
        }
    ]
}"#;

#[test_log::test]
fn region_scenario_passes_every_stage() {
    let ruleset = RuleSet::from_json(REGION_DOCUMENT).unwrap();
    let suite = TestSuite::from_json(REGION_TESTS).unwrap();
    assert_eq!(suite.len(), 2);

    let compilation = Compiler::new().compile(&ruleset, &suite).unwrap();
    let compiled = &compilation.compiled;
    assert_eq!(compiled.version(), Some("1.0"));
    assert_eq!(compiled.node_count(), 1);
    assert_eq!(compilation.stats.rewrites, 0);
    assert_eq!(compilation.stats.sifted_nodes, Some(1));

    assert_eq!(
        compiled.evaluate(&Context::new().set("Region", "us-east-1")),
        Ok(Outcome::endpoint("https://us-east-1.example.com"))
    );
    assert_eq!(
        compiled.evaluate(&Context::new()),
        Ok(Outcome::error("Region must be set"))
    );
}

#[test]
fn expectation_mismatch_names_the_tree_stage() {
    let ruleset = RuleSet::from_json(REGION_DOCUMENT).unwrap();
    let suite = TestSuite::from_json(
        r#"{"testCases": [{"params": {"Region": "us-east-1"}, "expect": "noMatch"}]}"#,
    )
    .unwrap();
    let err = Compiler::new().compile(&ruleset, &suite).unwrap_err();
    assert!(
        matches!(
            err,
            EndpointError::Verify(VerifyError::Mismatch {
                stage: Stage::RuleTree,
                case: 0,
                ref expected,
                ..
            }) if *expected == Expectation::NoMatch
        ),
        "unexpected error: {err}"
    );
}

#[test]
fn mistyped_test_parameter_is_inconsistent() {
    let ruleset = RuleSet::from_json(REGION_DOCUMENT).unwrap();
    let suite = TestSuite::from_json(
        r#"{"testCases": [{"params": {"Region": true}, "expect": "noMatch"}]}"#,
    )
    .unwrap();
    assert!(matches!(
        Compiler::new().compile(&ruleset, &suite),
        Err(EndpointError::Verify(VerifyError::InconsistentTestCase { case: 0, .. }))
    ));
}

// --- Canonical equivalence ---

fn bucket_rules() -> RuleSet {
    RuleSetBuilder::new()
        .parameter(Parameter::string("Bucket"))
        .rule(|r| {
            r.bind(
                "zone",
                call(
                    Builtin::Substring,
                    [reference("Bucket"), 6.into(), 8.into(), false.into()],
                ),
            )
            .when(string_equals(reference("zone"), "ef"))
            .endpoint("https://{zone}.primary.example.com")
        })
        .rule(|r| {
            r.bind(
                "zone",
                get_attr(
                    call(Builtin::Split, [reference("Bucket"), "--".into(), 0.into()]),
                    [PathPart::index(-2)],
                ),
            )
            .endpoint("https://{zone}.secondary.example.com")
        })
        .build()
        .unwrap()
}

fn bucket_canonicalizer() -> Canonicalizer {
    Canonicalizer::new().with_rule(SubstringToSplit {
        parameter: "Bucket".into(),
        start: 6,
        stop: 8,
        reverse: false,
        delimiter: "--".into(),
        index: -2,
    })
}

#[test]
fn equivalent_extractions_share_one_condition() {
    let ruleset = bucket_rules();
    let contexts = ["abcd--ef--x-s3", "abcd--gh--x-s3"]
        .map(|bucket| Context::new().set("Bucket", bucket));
    let suite = TestSuite::record(&ruleset, contexts.clone()).unwrap();

    let compilation = Compiler::new()
        .with_canonicalizer(bucket_canonicalizer())
        .compile(&ruleset, &suite)
        .unwrap();
    assert_eq!(compilation.stats.rewrites, 1);

    let compiled = &compilation.compiled;
    let zone_bindings = compiled
        .conditions()
        .iter()
        .filter(|c| c.binding() == Some("zone"))
        .count();
    assert_eq!(zone_bindings, 1);
    assert_eq!(compiled.conditions().len(), 2);

    assert_eq!(
        compiled.evaluate(&contexts[0]).unwrap().url(),
        Some("https://ef.primary.example.com")
    );
    assert_eq!(
        compiled.evaluate(&contexts[1]).unwrap().url(),
        Some("https://gh.secondary.example.com")
    );
}

#[test]
fn without_the_rewrite_the_forms_stay_apart() {
    let compilation = Compiler::new()
        .compile(&bucket_rules(), &TestSuite::default())
        .unwrap();
    assert_eq!(compilation.stats.rewrites, 0);
    assert_eq!(compilation.compiled.conditions().len(), 3);
}

// --- Cost ---

#[test]
fn parse_cost_is_weighted_by_its_guard() {
    let ruleset = RuleSetBuilder::new()
        .parameter(Parameter::string("Endpoint"))
        .rule(|r| {
            r.when(is_set(reference("Endpoint")))
                .bind("url", call(Builtin::ParseUrl, [reference("Endpoint")]))
                .endpoint("{url#scheme}://{url#authority}")
        })
        .build()
        .unwrap();
    let model = FunctionCost::new(1.0)
        .with(Builtin::IsSet, 8.0)
        .with(Builtin::ParseUrl, 200.0);
    let compilation = Compiler::new()
        .with_cost_model(model.clone())
        .compile(&ruleset, &TestSuite::default())
        .unwrap();

    let cost = compilation
        .compiled
        .expected_cost(&UniformEstimator, &model);
    assert!((cost - 108.0).abs() < 1e-9, "cost was {cost}");
    assert!((compilation.stats.cost_after - 108.0).abs() < 1e-9);
}

// --- Degenerate rule sets ---

#[test]
fn empty_ruleset_never_matches() {
    let ruleset = RuleSetBuilder::new().build().unwrap();
    let compiled = Compiler::new()
        .compile(&ruleset, &TestSuite::default())
        .unwrap()
        .compiled;
    assert_eq!(compiled.node_count(), 0);
    assert_eq!(compiled.root(), BranchRef::Result(0));
    assert_eq!(compiled.evaluate(&Context::new()), Ok(Outcome::NoMatch));
}

#[test]
fn rules_after_a_catch_all_are_unreachable() {
    let ruleset = RuleSetBuilder::new()
        .parameter(Parameter::string("Region"))
        .rule(|r| r.endpoint("https://global.example.com"))
        .rule(|r| {
            r.when(is_set(reference("Region")))
                .endpoint("https://{Region}.example.com")
        })
        .build()
        .unwrap();
    let compiled = Compiler::new()
        .compile(&ruleset, &TestSuite::default())
        .unwrap()
        .compiled;
    assert_eq!(compiled.node_count(), 0);
    assert_eq!(
        compiled.evaluate(&Context::new().set("Region", "us-east-1")),
        Ok(Outcome::endpoint("https://global.example.com"))
    );
}

#[test]
fn out_of_scope_reference_fails_compilation() {
    let ruleset = RuleSetBuilder::new()
        .parameter(Parameter::string("Region"))
        .rule(|r| r.when(is_set(reference("Bucket"))).endpoint("https://x"))
        .build()
        .unwrap();
    let err = Compiler::new()
        .compile(&ruleset, &TestSuite::default())
        .unwrap_err();
    assert!(
        matches!(
            err,
            EndpointError::Compile(CompileError::OutOfScope { ref name, .. }) if name == "Bucket"
        ),
        "unexpected error: {err}"
    );
}

#[test]
fn headers_and_properties_are_rendered() {
    let ruleset = RuleSetBuilder::new()
        .parameter(Parameter::string("Region"))
        .rule(|r| {
            r.when(is_set(reference("Region")))
                .endpoint("https://{Region}.example.com")
                .header("x-region", "{Region}")
                .header("x-region", "fallback")
                .property("signingRegion", Expr::template("{Region}").unwrap())
        })
        .build()
        .unwrap();
    let compiled = Compiler::new()
        .compile(&ruleset, &TestSuite::default())
        .unwrap()
        .compiled;

    let expected = ResolvedEndpoint {
        url: "https://eu-west-1.example.com".into(),
        headers: BTreeMap::from([(
            "x-region".to_owned(),
            vec!["eu-west-1".to_owned(), "fallback".to_owned()],
        )]),
        properties: BTreeMap::from([("signingRegion".to_owned(), Value::from("eu-west-1"))]),
    };
    assert_eq!(
        compiled.evaluate(&Context::new().set("Region", "eu-west-1")),
        Ok(Outcome::Endpoint(expected))
    );
    assert_eq!(compiled.evaluate(&Context::new()), Ok(Outcome::NoMatch));
}

#[test]
fn defaulted_booleans_share_a_condition() {
    let ruleset = RuleSetBuilder::new()
        .parameter(Parameter::boolean("UseFips").with_default(false))
        .rule(|r| {
            r.when(endpoint_bdd::boolean_equals(reference("UseFips"), true))
                .endpoint("https://fips.example.com")
        })
        .rule(|r| {
            r.when(endpoint_bdd::boolean_equals(reference("UseFips"), false))
                .endpoint("https://example.com")
        })
        .build()
        .unwrap();
    let compiled = Compiler::new()
        .with_options(CompileOptions::default())
        .compile(&ruleset, &TestSuite::default())
        .unwrap()
        .compiled;
    assert_eq!(compiled.conditions().len(), 1);
    assert_eq!(compiled.node_count(), 1);
    assert_eq!(
        compiled.evaluate(&Context::new()).unwrap().url(),
        Some("https://example.com")
    );
    assert_eq!(
        compiled
            .evaluate(&Context::new().set("UseFips", true))
            .unwrap()
            .url(),
        Some("https://fips.example.com")
    );
}

#[test]
fn unreachable_binding_rule_still_compiles() {
    let ruleset = RuleSetBuilder::new()
        .parameter(Parameter::string("Region"))
        .parameter(Parameter::string("Endpoint"))
        .rule(|r| {
            r.when(is_set(reference("Region")))
                .endpoint("https://{Region}.example.com")
        })
        .rule(|r| r.error("Region must be set"))
        .rule(|r| {
            r.bind("url", call(Builtin::ParseUrl, [reference("Endpoint")]))
                .when(string_equals(
                    get_attr(reference("url"), [PathPart::key("scheme")]),
                    "https",
                ))
                .endpoint("{Endpoint}")
        })
        .build()
        .unwrap();
    let contexts = [
        Context::new().set("Region", "us-east-1"),
        Context::new().set("Endpoint", "https://custom.example.net"),
    ];
    let suite = TestSuite::record(&ruleset, contexts.clone()).unwrap();

    let compiled = Compiler::new().compile(&ruleset, &suite).unwrap().compiled;
    assert_eq!(compiled.node_count(), 1);
    assert_eq!(
        compiled.evaluate(&contexts[1]),
        Ok(Outcome::error("Region must be set"))
    );
}
