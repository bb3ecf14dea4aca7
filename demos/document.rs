use std::path::Path;

use endpoint_bdd::{Compiler, Context, RuleSet, TestSuite};

fn main() {
    let data = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/data");
    let ruleset = RuleSet::from_file(data.join("rules.json")).expect("failed to load rules");
    let suite = TestSuite::from_file(data.join("tests.json")).expect("failed to load tests");
    println!("{ruleset}, {} test cases", suite.len());

    // Every stage is checked against the corpus before anything is emitted.
    let compilation = Compiler::new()
        .compile(&ruleset, &suite)
        .expect("compilation failed");
    println!("{}", compilation.stats);

    let json = compilation.compiled.to_json().expect("failed to encode");
    println!("{json}");

    let ctx = Context::new().set("Region", "eu-central-1").set("UseFips", true);
    match compilation.compiled.evaluate(&ctx) {
        Ok(outcome) => println!("Result: {outcome}"),
        Err(err) => println!("Evaluation failed: {err}"),
    }
}
