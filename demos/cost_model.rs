use endpoint_bdd::{
    Builtin, Compiler, Condition, FunctionCost, Parameter, RuleSetBuilder, TestSuite, call,
    is_set, reference,
};

fn main() {
    let ruleset = RuleSetBuilder::new()
        .parameter(Parameter::string("Endpoint"))
        .parameter(Parameter::string("Region"))
        .rule(|r| {
            r.when(is_set(reference("Endpoint")))
                .bind("url", call(Builtin::ParseUrl, [reference("Endpoint")]))
                .endpoint("{url#scheme}://{url#authority}")
        })
        .rule(|r| {
            r.when(is_set(reference("Region")))
                .bind("label", call(Builtin::IsValidHostLabel, [reference("Region"), false.into()]))
                .endpoint("https://{Region}.example.com")
        })
        .build()
        .expect("failed to build ruleset");

    // Parsing is expensive; endpoints are rarely overridden.
    let model = FunctionCost::new(1.0)
        .with(Builtin::ParseUrl, 200.0)
        .with(Builtin::IsValidHostLabel, 20.0);
    let estimator = |c: &Condition| {
        if c.references() == ["Endpoint"] { 0.05 } else { 0.5 }
    };

    let compilation = Compiler::new()
        .with_cost_model(model)
        .with_estimator(estimator)
        .compile(&ruleset, &TestSuite::default())
        .expect("failed to compile ruleset");

    println!("{}", compilation.stats);
    for (level, condition) in compilation.compiled.conditions().iter().enumerate() {
        println!("  {level}: {condition}");
    }
}
