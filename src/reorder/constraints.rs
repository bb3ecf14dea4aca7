use std::collections::BTreeSet;

use crate::cfg::Cfg;
use crate::{Builtin, Expr};

/// Precedence between conditions that every variable order must respect.
///
/// A condition that binds a name precedes every condition reading it, and an
/// `isSet(P)` guard that the initial order places before another use of `P`
/// stays before it.
#[derive(Debug, Clone)]
pub(crate) struct Constraints {
    preds: Vec<Vec<u32>>,
    succs: Vec<Vec<u32>>,
}

impl Constraints {
    pub(crate) fn new(cfg: &Cfg, initial_order: &[u32]) -> Self {
        let n = cfg.conditions().len();
        let mut position = vec![0; n];
        for (pos, &c) in initial_order.iter().enumerate() {
            position[c as usize] = pos;
        }

        let mut edges = BTreeSet::new();
        for (producer, condition) in cfg.conditions().iter().enumerate() {
            let guard = guarded_name(&condition.expr);
            for (consumer, other) in cfg.conditions().iter().enumerate() {
                if producer == consumer {
                    continue;
                }
                let refs = other.references();
                let binds = condition
                    .binding()
                    .is_some_and(|name| refs.contains(&name));
                let guards = guard.is_some_and(|name| refs.contains(&name))
                    && position[producer] < position[consumer];
                if binds || guards {
                    edges.insert((producer, consumer));
                }
            }
        }

        let mut preds = vec![Vec::new(); n];
        let mut succs = vec![Vec::new(); n];
        for (from, to) in edges {
            succs[from].push(crate::cfg::index_u32(to));
            preds[to].push(crate::cfg::index_u32(from));
        }
        Self { preds, succs }
    }

    /// Positions the variable at `pos` may move to without passing a
    /// predecessor or a successor, as an inclusive range.
    pub(crate) fn window(&self, order: &[u32], pos: usize) -> (usize, usize) {
        let position_of = positions(order);
        let var = order[pos] as usize;
        let lo = self.preds[var]
            .iter()
            .map(|&p| position_of[p as usize] + 1)
            .max()
            .unwrap_or(0);
        let hi = self.succs[var]
            .iter()
            .map(|&s| position_of[s as usize].saturating_sub(1))
            .min()
            .unwrap_or(order.len().saturating_sub(1));
        (lo, hi)
    }

    /// Whether `order` places every predecessor before its successors.
    pub(crate) fn is_satisfied(&self, order: &[u32]) -> bool {
        let position_of = positions(order);
        self.succs.iter().enumerate().all(|(from, succs)| {
            succs
                .iter()
                .all(|&to| position_of[from] < position_of[to as usize])
        })
    }
}

fn positions(order: &[u32]) -> Vec<usize> {
    let mut position_of = vec![0; order.len()];
    for (pos, &c) in order.iter().enumerate() {
        position_of[c as usize] = pos;
    }
    position_of
}

/// `P` for a condition of the form `isSet(P)`.
fn guarded_name(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Call {
            function: Builtin::IsSet,
            args,
        } => match args.as_slice() {
            [Expr::Ref(name)] => Some(name),
            _ => None,
        },
        _ => None,
    }
}

/// Move the variable at `from` to `to`, shifting the ones in between.
pub(crate) fn move_var(order: &mut Vec<u32>, from: usize, to: usize) {
    let var = order.remove(from);
    order.insert(to, var);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bdd::Bdd;
    use crate::{
        Builtin, Parameter, PathPart, RuleSetBuilder, call, get_attr, is_set, reference,
        string_equals,
    };

    fn url_cfg() -> Cfg {
        let ruleset = RuleSetBuilder::new()
            .parameter(Parameter::string("Endpoint"))
            .parameter(Parameter::string("Region"))
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
                r.when(is_set(reference("Region")))
                    .endpoint("https://{Region}")
            })
            .build()
            .unwrap();
        Cfg::build(&ruleset).unwrap()
    }

    #[test]
    fn producer_precedes_consumer() {
        let cfg = url_cfg();
        let order = Bdd::initial_order(&cfg);
        let constraints = Constraints::new(&cfg, &order);
        assert!(constraints.is_satisfied(&order));

        // isSet(Endpoint), url = parseURL(Endpoint), stringEquals(url#scheme), isSet(Region)
        assert_eq!(constraints.window(&order, 0), (0, 0));
        assert_eq!(constraints.window(&order, 1), (1, 1));
        assert_eq!(constraints.window(&order, 2), (2, 3));
        assert_eq!(constraints.window(&order, 3), (0, 3));
    }

    #[test]
    fn unreachable_binding_is_placed_above_its_reader() {
        let ruleset = RuleSetBuilder::new()
            .parameter(Parameter::string("Region"))
            .parameter(Parameter::string("Endpoint"))
            .rule(|r| {
                r.when(is_set(reference("Region")))
                    .endpoint("https://{Region}")
            })
            .rule(|r| r.error("Region must be set"))
            .rule(|r| {
                r.bind("url", call(Builtin::ParseUrl, [reference("Endpoint")]))
                    .when(string_equals(
                        get_attr(reference("url"), [PathPart::key("scheme")]),
                        "https",
                    ))
                    .endpoint("{Endpoint}")
            })
            .build()
            .unwrap();
        let cfg = Cfg::build(&ruleset).unwrap();
        assert_eq!(cfg.conditions().len(), 3);

        let order = Bdd::initial_order(&cfg);
        assert_eq!(order.len(), 3);
        let constraints = Constraints::new(&cfg, &order);
        assert!(constraints.is_satisfied(&order));
        for pos in 0..order.len() {
            let (lo, hi) = constraints.window(&order, pos);
            assert!(lo <= pos && pos <= hi, "window ({lo}, {hi}) excludes {pos}");
        }
    }

    #[test]
    fn moving_within_the_window_stays_legal() {
        let cfg = url_cfg();
        let mut order = Bdd::initial_order(&cfg);
        let constraints = Constraints::new(&cfg, &order);
        let region = order[3];
        let (lo, _) = constraints.window(&order, 3);
        move_var(&mut order, 3, lo);
        assert!(constraints.is_satisfied(&order));
        assert_eq!(order[0], region);

        let mut bad = order.clone();
        bad.swap(1, 2);
        assert!(!constraints.is_satisfied(&bad));
    }
}
