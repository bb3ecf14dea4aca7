use std::sync::Arc;
use std::thread;

use endpoint_bdd::{
    Compiler, Context, Parameter, RuleSetBuilder, TestSuite, boolean_equals, is_set, reference,
};

fn main() {
    let ruleset = RuleSetBuilder::new()
        .parameter(Parameter::string("Region"))
        .parameter(Parameter::boolean("UseFips").with_default(false))
        .rule(|r| {
            r.when(is_set(reference("Region"))).tree(|t| {
                t.rule(|r| {
                    r.when(boolean_equals(reference("UseFips"), true))
                        .endpoint("https://fips.{Region}.example.com")
                })
                .rule(|r| r.endpoint("https://{Region}.example.com"))
            })
        })
        .rule(|r| r.error("Region must be set"))
        .build()
        .expect("failed to build ruleset");

    let compiled = Arc::new(
        Compiler::new()
            .compile(&ruleset, &TestSuite::default())
            .expect("failed to compile ruleset")
            .compiled,
    );

    let handles: Vec<_> = ["us-east-1", "us-west-2", "eu-west-1", "ap-south-1"]
        .into_iter()
        .enumerate()
        .map(|(i, region)| {
            let compiled = Arc::clone(&compiled);
            thread::spawn(move || {
                let ctx = Context::new()
                    .set("Region", region)
                    .set("UseFips", i % 2 == 0);
                let result = compiled.evaluate(&ctx);
                println!("Thread {i}: {result:?}");
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}
