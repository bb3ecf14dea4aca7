#![cfg(feature = "binary-cache")]

use endpoint_bdd::{
    Builtin, CompiledRuleSet, Compiler, Context, DeserializeError, Outcome, Parameter, PathPart,
    RuleSetBuilder, TestSuite, call, get_attr, is_set, reference, string_equals,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn compiled() -> CompiledRuleSet {
    let ruleset = RuleSetBuilder::new()
        .version("1.0")
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
                .endpoint("{url#scheme}://{url#authority}{url#path}")
        })
        .rule(|r| {
            r.when(is_set(reference("Region"))).tree(|t| {
                t.rule(|r| {
                    r.when(endpoint_bdd::boolean_equals(reference("UseFips"), true))
                        .endpoint("https://fips.{Region}.example.com")
                        .header("x-fips", "on")
                })
                .rule(|r| {
                    r.endpoint("https://{Region}.example.com")
                        .property("signingRegion", "{Region}")
                })
            })
        })
        .rule(|r| r.error("Region must be set"))
        .build()
        .unwrap();
    Compiler::new()
        .compile(&ruleset, &TestSuite::default())
        .unwrap()
        .compiled
}

fn contexts() -> Vec<Context> {
    vec![
        Context::new(),
        Context::new().set("Region", "us-east-1"),
        Context::new().set("Region", "us-east-1").set("UseFips", true),
        Context::new().set("Endpoint", "https://example.com/base"),
        Context::new().set("Endpoint", "http://example.com"),
    ]
}

// ---------------------------------------------------------------------------
// Round-trips
// ---------------------------------------------------------------------------

#[test]
fn round_trip_preserves_tables_and_behavior() {
    let original = compiled();
    let restored = CompiledRuleSet::from_bytes(&original.to_bytes().unwrap()).unwrap();
    assert_eq!(restored, original);
    assert_eq!(restored.version(), Some("1.0"));
    for ctx in contexts() {
        assert_eq!(restored.evaluate(&ctx), original.evaluate(&ctx));
    }
    assert_eq!(
        restored.evaluate(&Context::new()),
        Ok(Outcome::error("Region must be set"))
    );
}

#[test]
fn encoding_determinism() {
    let a = compiled().to_bytes().unwrap();
    let b = compiled().to_bytes().unwrap();
    assert_eq!(a, b);
}

#[test]
fn file_round_trip() {
    let dir = std::env::temp_dir().join("endpoint_bdd_test_binary_cache");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("rules.ebdd");

    let original = compiled();
    original.to_binary_file(&path).unwrap();
    let restored = CompiledRuleSet::from_binary_file(&path).unwrap();
    assert_eq!(restored, original);

    let _ = std::fs::remove_dir_all(&dir);
}

// ---------------------------------------------------------------------------
// Corruption
// ---------------------------------------------------------------------------

#[test]
fn corruption_byte_flip() {
    let mut corrupted = compiled().to_bytes().unwrap();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0xFF;

    let err = CompiledRuleSet::from_bytes(&corrupted).unwrap_err();
    assert!(
        matches!(err, DeserializeError::ChecksumMismatch),
        "expected ChecksumMismatch, got: {err}"
    );
}

#[test]
fn corruption_truncation() {
    let bytes = compiled().to_bytes().unwrap();
    let err = CompiledRuleSet::from_bytes(&bytes[..33]).unwrap_err();
    assert!(
        matches!(err, DeserializeError::LengthMismatch { .. }),
        "expected LengthMismatch, got: {err}"
    );
}

#[test]
fn bad_magic() {
    let mut bad = compiled().to_bytes().unwrap();
    bad[0..4].copy_from_slice(b"BAAD");
    let err = CompiledRuleSet::from_bytes(&bad).unwrap_err();
    assert!(
        matches!(err, DeserializeError::BadMagic),
        "expected BadMagic, got: {err}"
    );
}

#[test]
fn version_mismatch() {
    let mut bad = compiled().to_bytes().unwrap();
    bad[4] = 99;
    bad[5] = 0;
    let err = CompiledRuleSet::from_bytes(&bad).unwrap_err();
    assert!(
        matches!(
            err,
            DeserializeError::IncompatibleVersion {
                blob: 99,
                supported: 1
            }
        ),
        "expected IncompatibleVersion, got: {err}"
    );
}

#[test]
fn empty_input_rejected() {
    assert!(matches!(
        CompiledRuleSet::from_bytes(&[]),
        Err(DeserializeError::LengthMismatch {
            expected: 32,
            actual: 0
        })
    ));
}

#[test]
fn missing_file_is_io_error() {
    let path = std::env::temp_dir().join("endpoint_bdd_no_such_file.ebdd");
    assert!(matches!(
        CompiledRuleSet::from_binary_file(&path),
        Err(DeserializeError::Io(_))
    ));
}
