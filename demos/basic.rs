use endpoint_bdd::{Compiler, Context, Parameter, RuleSetBuilder, TestSuite, is_set, reference};

fn main() {
    // Define rules
    let ruleset = RuleSetBuilder::new()
        .version("1.0")
        .parameter(Parameter::string("Region").required())
        .rule(|r| {
            r.when(is_set(reference("Region")))
                .endpoint("https://{Region}.example.com")
        })
        .rule(|r| r.error("Region must be set"))
        .build()
        .expect("failed to build ruleset");

    println!("{ruleset}");

    let compilation = Compiler::new()
        .compile(&ruleset, &TestSuite::default())
        .expect("failed to compile ruleset");
    println!("{}", compilation.compiled);
    println!("{}", compilation.stats);

    // Resolve against a few contexts
    for ctx in [Context::new().set("Region", "us-east-1"), Context::new()] {
        match compilation.compiled.evaluate(&ctx) {
            Ok(outcome) => println!("Result: {outcome}"),
            Err(err) => println!("Evaluation failed: {err}"),
        }
    }
}
