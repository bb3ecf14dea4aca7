//! The rule tree flattened into a hash-consed decision graph.

mod scope;

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::evaluate::Env;
use crate::{
    Builtin, CompileError, Condition, Context, EvalError, Expr, Outcome, Parameter,
    ParameterType, Rule, RuleBody, RuleResult, RuleSet,
};

/// A reference to an interned condition, possibly negated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CondRef {
    pub index: u32,
    pub negated: bool,
}

/// An edge target in the CFG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CfgRef {
    Node(u32),
    /// Index into the result table; [`RuleResult::NoMatch`] is 0.
    Result(u32),
}

/// Test a condition: go to `proceed` when it holds (or, if negated, when
/// it does not), otherwise to `next`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CfgNode {
    pub condition: CondRef,
    pub proceed: CfgRef,
    pub next: CfgRef,
}

/// Control-flow graph of a rule set.
///
/// Conditions and results are interned, so equal conditions written in
/// different rules share an entry, and nodes are hash-consed, so identical
/// decision chains share nodes. The graph is executable and is the input to
/// BDD compilation.
#[derive(Debug, Clone)]
pub struct Cfg {
    parameters: Vec<Parameter>,
    conditions: Vec<Condition>,
    results: Vec<RuleResult>,
    nodes: Vec<CfgNode>,
    root: CfgRef,
}

impl Cfg {
    /// Build the CFG: scope check, binding renaming, then flattening.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::OutOfScope`], [`CompileError::ResultOutOfScope`]
    /// or [`CompileError::Shadowed`] when the tree misuses names.
    pub fn build(ruleset: &RuleSet) -> Result<Cfg, CompileError> {
        scope::check(ruleset.parameters(), ruleset.rules())?;
        let rules = scope::rename_bindings(ruleset.parameters(), ruleset.rules());

        let mut builder = CfgBuilder {
            parameters: ruleset.parameters(),
            conditions: Vec::new(),
            condition_ids: HashMap::new(),
            results: vec![RuleResult::NoMatch],
            result_ids: HashMap::from([(RuleResult::NoMatch, 0)]),
            nodes: Vec::new(),
            node_ids: HashMap::new(),
        };
        let root = builder.rules(&rules, CfgRef::Result(0));
        let cfg = Cfg {
            parameters: ruleset.parameters().to_vec(),
            conditions: builder.conditions,
            results: builder.results,
            nodes: builder.nodes,
            root,
        };
        log::debug!("built {cfg}");
        Ok(cfg)
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
    pub fn nodes(&self) -> &[CfgNode] {
        &self.nodes
    }

    #[must_use]
    pub fn root(&self) -> CfgRef {
        self.root
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Walk the graph for one set of parameter values.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] when the selected result cannot be rendered.
    pub fn evaluate(&self, ctx: &Context) -> Result<Outcome, EvalError> {
        let mut env = Env::new(&self.parameters, ctx);
        let mut current = self.root;
        loop {
            match current {
                CfgRef::Node(i) => {
                    let node = &self.nodes[i as usize];
                    let condition = &self.conditions[node.condition.index as usize];
                    let holds = env.test(condition);
                    current = if holds != node.condition.negated {
                        node.proceed
                    } else {
                        node.next
                    };
                }
                CfgRef::Result(i) => return env.resolve(&self.results[i as usize]),
            }
        }
    }

    /// Depth-first walk from the root, proceed edge first, visiting each
    /// node once. Returns condition indices and result indices in order of
    /// first appearance.
    pub(crate) fn first_appearance(&self) -> (Vec<u32>, Vec<u32>) {
        let mut conditions = Vec::new();
        let mut seen_conditions = HashSet::new();
        let mut results = Vec::new();
        let mut seen_results = HashSet::new();
        let mut visited = HashSet::new();
        let mut stack = vec![self.root];
        while let Some(current) = stack.pop() {
            match current {
                CfgRef::Result(r) => {
                    if seen_results.insert(r) {
                        results.push(r);
                    }
                }
                CfgRef::Node(n) => {
                    if !visited.insert(n) {
                        continue;
                    }
                    let node = &self.nodes[n as usize];
                    if seen_conditions.insert(node.condition.index) {
                        conditions.push(node.condition.index);
                    }
                    stack.push(node.next);
                    stack.push(node.proceed);
                }
            }
        }
        (conditions, results)
    }
}

impl fmt::Display for Cfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CFG({} nodes, {} conditions, {} results)",
            self.nodes.len(),
            self.conditions.len(),
            self.results.len()
        )
    }
}

struct CfgBuilder<'a> {
    parameters: &'a [Parameter],
    conditions: Vec<Condition>,
    condition_ids: HashMap<Condition, u32>,
    results: Vec<RuleResult>,
    result_ids: HashMap<RuleResult, u32>,
    nodes: Vec<CfgNode>,
    node_ids: HashMap<CfgNode, u32>,
}

impl CfgBuilder<'_> {
    /// Rules are chained back to front so each rule's failure edge points
    /// at the rule after it; the last one falls through to `fallthrough`.
    fn rules(&mut self, rules: &[Rule], fallthrough: CfgRef) -> CfgRef {
        rules
            .iter()
            .rev()
            .fold(fallthrough, |next, rule| self.rule(rule, next))
    }

    fn rule(&mut self, rule: &Rule, next: CfgRef) -> CfgRef {
        let target = match &rule.body {
            RuleBody::Tree(children) => self.rules(children, next),
            RuleBody::Endpoint(e) => self.result(RuleResult::Endpoint(e.clone())),
            RuleBody::Error(message) => self.result(RuleResult::Error(message.clone())),
        };
        rule.conditions.iter().rev().fold(target, |proceed, c| {
            let condition = self.condition(c);
            self.node(CfgNode {
                condition,
                proceed,
                next,
            })
        })
    }

    fn node(&mut self, node: CfgNode) -> CfgRef {
        if let Some(&id) = self.node_ids.get(&node) {
            return CfgRef::Node(id);
        }
        let id = index_u32(self.nodes.len());
        self.nodes.push(node);
        self.node_ids.insert(node, id);
        CfgRef::Node(id)
    }

    fn result(&mut self, result: RuleResult) -> CfgRef {
        if let Some(&id) = self.result_ids.get(&result) {
            return CfgRef::Result(id);
        }
        let id = index_u32(self.results.len());
        self.results.push(result.clone());
        self.result_ids.insert(result, id);
        CfgRef::Result(id)
    }

    /// Intern a condition, folding negations into the reference.
    fn condition(&mut self, condition: &Condition) -> CondRef {
        if condition.assign.is_none() {
            if let Expr::Call {
                function: Builtin::Not,
                args,
            } = &condition.expr
                && let [inner @ Expr::Call { .. }] = args.as_slice()
            {
                let inner = self.condition(&Condition::new(inner.clone()));
                return CondRef {
                    index: inner.index,
                    negated: !inner.negated,
                };
            }
            if let Some(positive) = self.positive_boolean_equals(&condition.expr) {
                return CondRef {
                    index: self.intern(Condition::new(positive)),
                    negated: true,
                };
            }
        }
        CondRef {
            index: self.intern(condition.clone()),
            negated: false,
        }
    }

    /// `booleanEquals(P, false)` on a defaulted boolean parameter is the
    /// negation of `booleanEquals(P, true)`, since `P` is always set.
    fn positive_boolean_equals(&self, expr: &Expr) -> Option<Expr> {
        let Expr::Call {
            function: Builtin::BooleanEquals,
            args,
        } = expr
        else {
            return None;
        };
        let [Expr::Ref(name), Expr::Bool(false)] = args.as_slice() else {
            return None;
        };
        self.parameters
            .iter()
            .find(|p| &p.name == name)
            .filter(|p| p.kind == ParameterType::Boolean && p.default.is_some())?;
        Some(Expr::Call {
            function: Builtin::BooleanEquals,
            args: vec![Expr::Ref(name.clone()), Expr::Bool(true)],
        })
    }

    fn intern(&mut self, condition: Condition) -> u32 {
        if let Some(&id) = self.condition_ids.get(&condition) {
            return id;
        }
        let id = index_u32(self.conditions.len());
        self.conditions.push(condition.clone());
        self.condition_ids.insert(condition, id);
        id
    }
}

/// Table sizes are bounded by the input rule set, far below `u32::MAX`.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn index_u32(len: usize) -> u32 {
    len as u32
}
