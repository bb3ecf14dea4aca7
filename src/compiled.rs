use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bdd::{self, Bdd, BddNode, BranchRef};
use crate::cfg::Cfg;
use crate::evaluate::Env;
use crate::reorder::{CostModel, ProbabilityEstimator, level_contributions};
use crate::{
    CompileError, Condition, Context, EndpointError, EvalError, Outcome, Parameter, RuleResult,
};

/// The output of compilation: a reduced, ordered decision diagram with its
/// condition and result tables.
///
/// Node `condition_index` values index `conditions`, which is listed in
/// the diagram's variable order, and terminal refs index `results`, whose
/// entry 0 is always [`RuleResult::NoMatch`]. `parameters` passes the input
/// parameter list through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledRuleSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) version: Option<String>,
    pub(crate) parameters: Vec<Parameter>,
    pub(crate) conditions: Vec<Condition>,
    pub(crate) results: Vec<RuleResult>,
    pub(crate) nodes: Vec<BddNode>,
    pub(crate) root: BranchRef,
}

impl CompiledRuleSet {
    pub(crate) fn assemble(cfg: &Cfg, diagram: &Bdd, version: Option<String>) -> Self {
        Self {
            version,
            parameters: cfg.parameters().to_vec(),
            conditions: diagram
                .order()
                .iter()
                .map(|&c| cfg.conditions()[c as usize].clone())
                .collect(),
            results: diagram
                .results()
                .iter()
                .map(|&r| cfg.results()[r as usize].clone())
                .collect(),
            nodes: diagram.nodes().to_vec(),
            root: diagram.root(),
        }
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    #[must_use]
    pub fn results(&self) -> &[RuleResult] {
        &self.results
    }

    #[must_use]
    pub fn nodes(&self) -> &[BddNode] {
        &self.nodes
    }

    #[must_use]
    pub fn root(&self) -> BranchRef {
        self.root
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Resolve an endpoint by walking the diagram from the root.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] when the selected result cannot be rendered, or
    /// [`EvalError::Malformed`] when the tables reference missing entries.
    pub fn evaluate(&self, ctx: &Context) -> Result<Outcome, EvalError> {
        let mut env = Env::new(&self.parameters, ctx);
        let mut current = self.root;
        // Conditions strictly increase along a path, so a valid walk tests
        // at most one node per condition.
        for _ in 0..=self.conditions.len() {
            match current {
                BranchRef::Result(i) => {
                    let result = self.results.get(i as usize).ok_or_else(|| {
                        EvalError::Malformed(format!("result {i} is out of range"))
                    })?;
                    return env.resolve(result);
                }
                BranchRef::Node(i) => {
                    let node = self.nodes.get(i as usize).ok_or_else(|| {
                        EvalError::Malformed(format!("node {i} is out of range"))
                    })?;
                    let condition = self
                        .conditions
                        .get(node.condition_index as usize)
                        .ok_or_else(|| {
                            EvalError::Malformed(format!(
                                "condition {} is out of range",
                                node.condition_index
                            ))
                        })?;
                    current = if env.test(condition) {
                        node.high_ref
                    } else {
                        node.low_ref
                    };
                }
            }
        }
        Err(EvalError::Malformed(
            "walk tested more nodes than there are conditions".to_owned(),
        ))
    }

    /// # Errors
    ///
    /// Returns the first structural defect: a duplicate or redundant node,
    /// an edge that does not move to a later condition, a dangling
    /// reference, or a result table that does not start with no-match.
    pub fn check_invariants(&self) -> Result<(), CompileError> {
        if self.results.first() != Some(&RuleResult::NoMatch) {
            return Err(CompileError::MalformedRule {
                path: "results[0]".to_owned(),
                reason: "the first result must be no-match".to_owned(),
            });
        }
        bdd::check_invariants(
            &self.nodes,
            self.root,
            self.conditions.len(),
            self.results.len(),
        )
    }

    /// Expected cost of one lookup: each node's cost weighted by the
    /// probability of reaching it.
    pub fn expected_cost(
        &self,
        estimator: &impl ProbabilityEstimator,
        model: &impl CostModel,
    ) -> f64 {
        let probability: Vec<f64> = self
            .conditions
            .iter()
            .map(|c| estimator.probability(c).clamp(0.0, 1.0))
            .collect();
        let cost: Vec<f64> = self
            .conditions
            .iter()
            .map(|c| model.cost(c).max(0.0))
            .collect();
        level_contributions(&self.nodes, self.root, &probability, &cost)
            .iter()
            .sum()
    }

    /// Serialize as a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Json`] if encoding fails.
    pub fn to_json(&self) -> Result<String, EndpointError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a compiled document and check its structure.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Json`] for malformed JSON and
    /// [`EndpointError::Compile`] when the tables violate the diagram
    /// invariants.
    pub fn from_json(input: &str) -> Result<Self, EndpointError> {
        let compiled: CompiledRuleSet = serde_json::from_str(input)?;
        compiled.check_invariants()?;
        Ok(compiled)
    }

    /// Serialize to the framed binary format.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError`](crate::SerializeError) if encoding fails.
    #[cfg(feature = "binary-cache")]
    pub fn to_bytes(&self) -> Result<Vec<u8>, crate::SerializeError> {
        crate::serial::encode(self)
    }

    /// Load a compiled rule set from the framed binary format.
    ///
    /// # Errors
    ///
    /// Returns [`DeserializeError`](crate::DeserializeError) when the header,
    /// checksum, payload or table structure is invalid.
    #[cfg(feature = "binary-cache")]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, crate::DeserializeError> {
        crate::serial::decode(bytes)
    }

    /// # Errors
    ///
    /// Returns [`SerializeError`](crate::SerializeError) on encoding or I/O
    /// failure.
    #[cfg(feature = "binary-cache")]
    pub fn to_binary_file(
        &self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<(), crate::SerializeError> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`DeserializeError`](crate::DeserializeError) on I/O failure
    /// or an invalid file.
    #[cfg(feature = "binary-cache")]
    pub fn from_binary_file(
        path: impl AsRef<std::path::Path>,
    ) -> Result<Self, crate::DeserializeError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for CompiledRuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "compiled rule set ({} conditions, {} results, {} nodes)",
            self.conditions.len(),
            self.results.len(),
            self.nodes.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Parameter, RuleSet, RuleSetBuilder, UniformEstimator, UnitCost, is_set, reference};

    fn region_rules() -> RuleSet {
        RuleSetBuilder::new()
            .version("1.0")
            .parameter(Parameter::string("Region").required())
            .rule(|r| {
                r.when(is_set(reference("Region")))
                    .endpoint("https://{Region}.example.com")
            })
            .rule(|r| r.error("Region must be set"))
            .build()
            .unwrap()
    }

    fn compiled() -> CompiledRuleSet {
        let ruleset = region_rules();
        let cfg = Cfg::build(&ruleset).unwrap();
        CompiledRuleSet::assemble(&cfg, &Bdd::build(&cfg), Some("1.0".into()))
    }

    #[test]
    fn evaluates_both_branches() {
        let compiled = compiled();
        compiled.check_invariants().unwrap();
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
    fn json_shape_matches_the_document_format() {
        let compiled = compiled();
        let json: serde_json::Value = serde_json::from_str(&compiled.to_json().unwrap()).unwrap();
        assert_eq!(json["version"], "1.0");
        assert_eq!(json["parameters"][0]["name"], "Region");
        assert_eq!(
            json["conditions"][0],
            serde_json::json!({"fn": "isSet", "argv": [{"ref": "Region"}]})
        );
        assert_eq!(json["results"][0], serde_json::json!({"type": "noMatch"}));
        assert_eq!(
            json["nodes"][0],
            serde_json::json!({"conditionIndex": 0, "highRef": {"result": 1}, "lowRef": {"result": 2}})
        );
        assert_eq!(json["root"], serde_json::json!({"node": 0}));
    }

    #[test]
    fn json_round_trip_preserves_tables() {
        let compiled = compiled();
        let back = CompiledRuleSet::from_json(&compiled.to_json().unwrap()).unwrap();
        assert_eq!(back, compiled);
    }

    #[test]
    fn from_json_rejects_broken_tables() {
        let mut compiled = compiled();
        compiled.nodes[0].low_ref = compiled.nodes[0].high_ref;
        let err = CompiledRuleSet::from_json(&compiled.to_json().unwrap()).unwrap_err();
        assert!(matches!(
            err,
            EndpointError::Compile(CompileError::RedundantNode { index: 0 })
        ));
    }

    #[test]
    fn dangling_refs_fail_at_runtime() {
        let mut compiled = compiled();
        compiled.nodes[0].high_ref = BranchRef::Result(9);
        assert!(matches!(
            compiled.evaluate(&Context::new().set("Region", "x")),
            Err(EvalError::Malformed(_))
        ));
    }

    #[test]
    fn cycles_are_cut_off() {
        let mut compiled = compiled();
        compiled.nodes[0].high_ref = BranchRef::Node(0);
        assert!(matches!(
            compiled.evaluate(&Context::new().set("Region", "x")),
            Err(EvalError::Malformed(_))
        ));
    }

    #[test]
    fn single_node_costs_one() {
        let cost = compiled().expected_cost(&UniformEstimator, &UnitCost);
        assert!((cost - 1.0).abs() < 1e-12);
    }
}
