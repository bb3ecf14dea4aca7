use serde::{Deserialize, Serialize};

use super::{Constraints, move_var, run_trials};
use crate::bdd::Bdd;
use crate::cfg::Cfg;

/// Budget and execution settings for node-count sifting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SiftingOptions {
    /// Passes over all variables before giving up on convergence.
    pub max_passes: usize,
    /// Try candidate positions on worker threads.
    pub parallel: bool,
}

impl Default for SiftingOptions {
    fn default() -> Self {
        Self {
            max_passes: 6,
            parallel: true,
        }
    }
}

/// Sift each variable through its legal window, keeping the position with
/// the fewest nodes. Returns a diagram no larger than `bdd`.
///
/// This is a local search: the result is a local minimum under single
/// variable moves, not necessarily the smallest diagram.
pub(crate) fn sift(
    cfg: &Cfg,
    bdd: Bdd,
    constraints: &Constraints,
    options: &SiftingOptions,
) -> Bdd {
    let mut current = bdd;
    for pass in 0..options.max_passes {
        let start = current.node_count();
        let mut improved = false;

        let counts = current.level_counts();
        let mut levels: Vec<usize> = (0..counts.len()).collect();
        levels.sort_by(|&a, &b| counts[b].cmp(&counts[a]).then(a.cmp(&b)));
        let vars: Vec<u32> = levels.iter().map(|&l| current.order()[l]).collect();

        for var in vars {
            let Some(pos) = current.order().iter().position(|&v| v == var) else {
                continue;
            };
            let (lo, hi) = constraints.window(current.order(), pos);
            let candidates: Vec<usize> = (lo..=hi).filter(|&to| to != pos).collect();
            if candidates.is_empty() {
                continue;
            }
            let order = current.order().to_vec();
            let trials = run_trials(&candidates, options.parallel, |to| {
                let mut order = order.clone();
                move_var(&mut order, pos, to);
                Bdd::compile(cfg, &order)
            });
            let best = trials
                .into_iter()
                .min_by_key(Bdd::node_count)
                .filter(|b| b.node_count() < current.node_count());
            if let Some(best) = best {
                log::trace!(
                    "sifting moved condition {var}: {} -> {} nodes",
                    current.node_count(),
                    best.node_count()
                );
                current = best;
                improved = true;
            }
        }

        log::debug!(
            "sifting pass {}: {start} -> {} nodes",
            pass + 1,
            current.node_count()
        );
        if !improved {
            break;
        }
    }
    debug_assert!(constraints.is_satisfied(current.order()));
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Parameter, RuleSet, RuleSetBuilder, is_set, reference};

    fn two_flag_rules() -> RuleSet {
        RuleSetBuilder::new()
            .parameter(Parameter::string("A"))
            .parameter(Parameter::string("B"))
            .rule(|r| {
                r.when(is_set(reference("A")))
                    .when(is_set(reference("B")))
                    .endpoint("https://both")
            })
            .rule(|r| r.when(is_set(reference("B"))).endpoint("https://b"))
            .build()
            .unwrap()
    }

    #[test]
    fn sifting_finds_the_smaller_order() {
        let cfg = Cfg::build(&two_flag_rules()).unwrap();
        let initial = Bdd::build(&cfg);
        assert_eq!(initial.node_count(), 3);
        let constraints = Constraints::new(&cfg, initial.order());
        let sifted = sift(&cfg, initial.clone(), &constraints, &SiftingOptions::default());
        assert_eq!(sifted.node_count(), 2);
        sifted.check_invariants().unwrap();
        assert_eq!(sifted.results(), initial.results());
    }

    #[test]
    fn zero_passes_leave_the_diagram_alone() {
        let cfg = Cfg::build(&two_flag_rules()).unwrap();
        let initial = Bdd::build(&cfg);
        let constraints = Constraints::new(&cfg, initial.order());
        let options = SiftingOptions {
            max_passes: 0,
            parallel: false,
        };
        assert_eq!(sift(&cfg, initial.clone(), &constraints, &options), initial);
    }

    #[test]
    fn options_default_missing_fields() {
        let options: SiftingOptions = serde_json::from_str(r#"{"parallel": false}"#).unwrap();
        assert_eq!(options.max_passes, 6);
        assert!(!options.parallel);
    }
}
