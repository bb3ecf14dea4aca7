use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Constraints, move_var, run_trials};
use crate::bdd::{Bdd, BddNode, BranchRef};
use crate::cfg::Cfg;
use crate::{Builtin, Condition, Expr};

/// Estimates how likely a condition is to hold for a typical lookup.
///
/// Estimates only need to rank conditions sensibly; they are clamped to
/// `[0, 1]`.
pub trait ProbabilityEstimator: Send + Sync {
    fn probability(&self, condition: &Condition) -> f64;
}

impl<F> ProbabilityEstimator for F
where
    F: Fn(&Condition) -> f64 + Send + Sync,
{
    fn probability(&self, condition: &Condition) -> f64 {
        self(condition)
    }
}

/// Every condition is a coin flip.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformEstimator;

impl ProbabilityEstimator for UniformEstimator {
    fn probability(&self, _condition: &Condition) -> f64 {
        0.5
    }
}

/// The price of evaluating one condition.
pub trait CostModel: Send + Sync {
    fn cost(&self, condition: &Condition) -> f64;
}

impl<F> CostModel for F
where
    F: Fn(&Condition) -> f64 + Send + Sync,
{
    fn cost(&self, condition: &Condition) -> f64 {
        self(condition)
    }
}

/// Every condition costs the same.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitCost;

impl CostModel for UnitCost {
    fn cost(&self, _condition: &Condition) -> f64 {
        1.0
    }
}

/// Costs by function: a condition costs the sum of the functions it calls,
/// nested calls included. Functions without an entry cost `default`, as
/// does a condition that calls nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCost {
    default: f64,
    costs: BTreeMap<Builtin, f64>,
}

impl FunctionCost {
    #[must_use]
    pub fn new(default: f64) -> Self {
        Self {
            default,
            costs: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, function: Builtin, cost: f64) -> Self {
        self.costs.insert(function, cost);
        self
    }

    fn expr_cost(&self, expr: &Expr) -> Option<f64> {
        let children: f64 = match expr {
            Expr::Call { args, .. } | Expr::Array(args) => {
                args.iter().filter_map(|a| self.expr_cost(a)).sum()
            }
            Expr::Record(fields) => fields.values().filter_map(|e| self.expr_cost(e)).sum(),
            Expr::GetAttr { target, .. } => return self.expr_cost(target),
            Expr::Str(_) | Expr::Int(_) | Expr::Bool(_) | Expr::Ref(_) => return None,
        };
        match expr {
            Expr::Call { function, .. } => {
                Some(self.costs.get(function).copied().unwrap_or(self.default) + children)
            }
            _ if children > 0.0 => Some(children),
            _ => None,
        }
    }
}

impl Default for FunctionCost {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl CostModel for FunctionCost {
    fn cost(&self, condition: &Condition) -> f64 {
        self.expr_cost(&condition.expr).unwrap_or(self.default)
    }
}

/// Search budget for expected-cost reordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CostOptions {
    /// Rounds of moves before giving up on convergence.
    pub max_rounds: usize,
    /// Levels considered per round, by descending cost contribution.
    pub top_k: usize,
    /// Largest accepted node count, as a fraction above the starting size.
    pub max_allowed_growth: f64,
    /// Try move targets on worker threads.
    pub parallel: bool,
}

impl Default for CostOptions {
    fn default() -> Self {
        Self {
            max_rounds: 30,
            top_k: 50,
            max_allowed_growth: 0.1,
            parallel: true,
        }
    }
}

/// Improvements smaller than this are rounding noise.
const EPSILON: f64 = 1e-9;

/// Targets tried for a variable at `pos`, relative to its position.
const BACKWARD_STEPS: [usize; 6] = [1, 2, 4, 8, 16, 32];
const FORWARD_STEPS: [usize; 3] = [1, 2, 4];

/// Probability and cost of each CFG condition, computed once.
#[derive(Debug, Clone)]
pub(crate) struct CostTables {
    probability: Vec<f64>,
    cost: Vec<f64>,
}

impl CostTables {
    pub(crate) fn new(
        conditions: &[Condition],
        estimator: &dyn ProbabilityEstimator,
        model: &dyn CostModel,
    ) -> Self {
        Self {
            probability: conditions
                .iter()
                .map(|c| estimator.probability(c).clamp(0.0, 1.0))
                .collect(),
            cost: conditions.iter().map(|c| model.cost(c).max(0.0)).collect(),
        }
    }

    /// Expected evaluation cost of one lookup through `bdd`.
    pub(crate) fn expected_cost(&self, bdd: &Bdd) -> f64 {
        self.level_contributions(bdd).iter().sum()
    }

    /// Expected cost spent at each level of `bdd`.
    fn level_contributions(&self, bdd: &Bdd) -> Vec<f64> {
        let order = bdd.order();
        let probability: Vec<f64> = order.iter().map(|&c| self.probability[c as usize]).collect();
        let cost: Vec<f64> = order.iter().map(|&c| self.cost[c as usize]).collect();
        level_contributions(bdd.nodes(), bdd.root(), &probability, &cost)
    }
}

/// Expected cost per level of a diagram whose level `l` holds with
/// probability `probability[l]` and costs `cost[l]` to test.
///
/// Reach probabilities flow from the root down, high edges weighted by
/// `p` and low edges by `1 - p`. Children always sit on deeper levels, so
/// processing nodes by level visits every parent before its children.
pub(crate) fn level_contributions(
    nodes: &[BddNode],
    root: BranchRef,
    probability: &[f64],
    cost: &[f64],
) -> Vec<f64> {
    let mut contributions = vec![0.0; probability.len()];
    let BranchRef::Node(root) = root else {
        return contributions;
    };
    let mut reach = vec![0.0; nodes.len()];
    reach[root as usize] = 1.0;

    let mut by_level: Vec<usize> = (0..nodes.len()).collect();
    by_level.sort_by_key(|&i| nodes[i].condition_index);
    for i in by_level {
        let node = nodes[i];
        let level = node.condition_index as usize;
        let p = probability[level];
        contributions[level] += reach[i] * cost[level];
        if let BranchRef::Node(h) = node.high_ref {
            reach[h as usize] += reach[i] * p;
        }
        if let BranchRef::Node(l) = node.low_ref {
            reach[l as usize] += reach[i] * (1.0 - p);
        }
    }
    contributions
}

/// Move targets for the variable at `pos` inside the inclusive window
/// `lo..=hi`, without duplicates and excluding `pos` itself. An empty
/// window yields no targets.
fn targets(pos: usize, lo: usize, hi: usize) -> Vec<usize> {
    if lo > hi {
        return Vec::new();
    }
    let mut out = vec![lo, 0];
    out.extend(BACKWARD_STEPS.iter().map(|&s| pos.saturating_sub(s)));
    out.push(hi);
    out.extend(FORWARD_STEPS.iter().map(|&s| pos + s));
    let mut seen = Vec::with_capacity(out.len());
    for t in out {
        let t = t.clamp(lo, hi);
        if t != pos && !seen.contains(&t) {
            seen.push(t);
        }
    }
    seen
}

/// Reorder variables to lower the expected evaluation cost, keeping the
/// node count within the growth budget.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn optimize(
    cfg: &Cfg,
    bdd: Bdd,
    constraints: &Constraints,
    tables: &CostTables,
    options: &CostOptions,
) -> Bdd {
    let size_limit = bdd.node_count() as f64 * (1.0 + options.max_allowed_growth.max(0.0));
    let fits = |b: &Bdd| b.node_count() as f64 <= size_limit;

    let mut current = bdd;
    let mut current_cost = tables.expected_cost(&current);
    let start_cost = current_cost;

    for round in 0..options.max_rounds {
        let mut improved = false;
        let contributions = tables.level_contributions(&current);
        let mut levels: Vec<usize> = (0..contributions.len()).collect();
        levels.sort_by(|&a, &b| contributions[b].total_cmp(&contributions[a]).then(a.cmp(&b)));
        let vars: Vec<u32> = levels
            .iter()
            .take(options.top_k)
            .map(|&l| current.order()[l])
            .collect();

        for var in vars {
            let Some(pos) = current.order().iter().position(|&v| v == var) else {
                continue;
            };
            let (lo, hi) = constraints.window(current.order(), pos);
            let candidates = targets(pos, lo, hi);
            if candidates.is_empty() {
                continue;
            }
            let order = current.order().to_vec();
            let trials = run_trials(&candidates, options.parallel, |to| {
                let mut order = order.clone();
                move_var(&mut order, pos, to);
                let trial = Bdd::compile(cfg, &order);
                let cost = tables.expected_cost(&trial);
                (trial, cost)
            });
            let best = trials
                .into_iter()
                .filter(|(trial, _)| fits(trial))
                .min_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((trial, cost)) = best
                && cost < current_cost - EPSILON
            {
                log::trace!("moved condition {var}: expected cost {current_cost:.4} -> {cost:.4}");
                current = trial;
                current_cost = cost;
                improved = true;
            }
        }

        log::debug!("cost round {}: expected cost {current_cost:.4}", round + 1);
        if !improved {
            break;
        }
    }

    for _ in 0..2 {
        for pos in 0..current.order().len().saturating_sub(1) {
            let (_, hi) = constraints.window(current.order(), pos);
            if hi <= pos {
                continue;
            }
            let mut order = current.order().to_vec();
            order.swap(pos, pos + 1);
            let trial = Bdd::compile(cfg, &order);
            let cost = tables.expected_cost(&trial);
            if fits(&trial) && cost < current_cost - EPSILON {
                current = trial;
                current_cost = cost;
            }
        }
    }

    log::debug!(
        "cost optimization: expected cost {start_cost:.4} -> {current_cost:.4}, {} nodes",
        current.node_count()
    );
    debug_assert!(constraints.is_satisfied(current.order()));
    current
}
