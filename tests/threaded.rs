use std::sync::Arc;
use std::thread;

use endpoint_bdd::{
    Builtin, CompiledRuleSet, Compiler, Context, EndpointError, Outcome, Parameter, PathPart,
    RuleSet, RuleSetBuilder, TestSuite, boolean_equals, call, compile_many, get_attr, is_set,
    reference, string_equals,
};

fn regional(suffix: &str) -> RuleSet {
    let fips = format!("https://fips.{{Region}}.{suffix}");
    let plain = format!("https://{{Region}}.{suffix}");
    RuleSetBuilder::new()
        .parameter(Parameter::string("Region"))
        .parameter(Parameter::string("Endpoint"))
        .parameter(Parameter::boolean("UseFips").with_default(false))
        .rule(|r| {
            r.when(is_set(reference("Endpoint")))
                .bind("url", call(Builtin::ParseUrl, [reference("Endpoint")]))
                .when(string_equals(
                    get_attr(reference("url"), [PathPart::key("scheme")]),
                    "https",
                ))
                .endpoint("{Endpoint}")
        })
        .rule(|r| {
            r.when(is_set(reference("Region"))).tree(|t| {
                t.rule(|r| {
                    r.when(boolean_equals(reference("UseFips"), true))
                        .endpoint(&fips)
                })
                .rule(|r| r.endpoint(&plain))
            })
        })
        .rule(|r| r.error("Region must be set"))
        .build()
        .unwrap()
}

#[test]
fn evaluate_across_threads() {
    let compiled: Arc<CompiledRuleSet> = Arc::new(
        Compiler::new()
            .compile(&regional("example.com"), &TestSuite::default())
            .unwrap()
            .compiled,
    );

    let contexts = vec![
        // explicit endpoint wins
        Context::new()
            .set("Endpoint", "https://custom.example.net")
            .set("Region", "us-east-1"),
        // FIPS variant
        Context::new().set("Region", "us-west-2").set("UseFips", true),
        // plain regional
        Context::new().set("Region", "eu-west-1"),
        // nothing set
        Context::new(),
    ];

    let handles: Vec<_> = contexts
        .into_iter()
        .map(|ctx| {
            let compiled = Arc::clone(&compiled);
            thread::spawn(move || compiled.evaluate(&ctx))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results[0], Ok(Outcome::endpoint("https://custom.example.net")));
    assert_eq!(
        results[1],
        Ok(Outcome::endpoint("https://fips.us-west-2.example.com"))
    );
    assert_eq!(results[2], Ok(Outcome::endpoint("https://eu-west-1.example.com")));
    assert_eq!(results[3], Ok(Outcome::error("Region must be set")));
}

#[test]
fn compile_many_matches_one_at_a_time() {
    let compiler = Compiler::new();
    let jobs: Vec<(RuleSet, TestSuite)> = ["a.example", "b.example", "c.example", "d.example"]
        .iter()
        .map(|suffix| (regional(suffix), TestSuite::default()))
        .collect();

    let batch = compile_many(&compiler, &jobs);
    assert_eq!(batch.len(), jobs.len());
    for ((ruleset, suite), result) in jobs.iter().zip(&batch) {
        let single = compiler.compile(ruleset, suite).unwrap();
        let compilation = result.as_ref().unwrap();
        assert_eq!(compilation.compiled, single.compiled);
    }

    let ctx = Context::new().set("Region", "ap-south-1");
    assert_eq!(
        batch[2].as_ref().unwrap().compiled.evaluate(&ctx),
        Ok(Outcome::endpoint("https://ap-south-1.c.example"))
    );
}

#[test]
fn compile_many_isolates_failures() {
    let broken = RuleSetBuilder::new()
        .rule(|r| r.when(is_set(reference("Missing"))).endpoint("https://x"))
        .build()
        .unwrap();
    let jobs = vec![
        (regional("a.example"), TestSuite::default()),
        (broken, TestSuite::default()),
        (regional("c.example"), TestSuite::default()),
    ];

    let batch = compile_many(&Compiler::new(), &jobs);
    assert!(batch[0].is_ok());
    assert!(matches!(batch[1], Err(EndpointError::Compile(_))));
    assert!(batch[2].is_ok());
}
