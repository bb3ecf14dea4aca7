use std::collections::{HashMap, HashSet};

use super::{Bdd, BddNode, BranchRef};
use crate::cfg::{Cfg, CfgRef, index_u32};

/// Level assigned to terminals: below every variable.
const TERMINAL_LEVEL: u32 = u32::MAX;

pub(super) fn compile(cfg: &Cfg, order: &[u32]) -> Bdd {
    let mut level_of = vec![0; cfg.conditions().len()];
    for (level, &condition) in order.iter().enumerate() {
        level_of[condition as usize] = index_u32(level);
    }
    let mut builder = Builder {
        cfg,
        level_of,
        nodes: Vec::new(),
        unique: HashMap::new(),
        ite_memo: HashMap::new(),
        cfg_memo: HashMap::new(),
    };
    let root = builder.convert(cfg.root());
    let (_, result_order) = cfg.first_appearance();
    let (nodes, root, results) = compact(&builder.nodes, root, &result_order);
    log::trace!(
        "compiled {} nodes ({} before compaction)",
        nodes.len(),
        builder.nodes.len()
    );
    Bdd {
        order: order.to_vec(),
        nodes,
        root,
        results,
    }
}

/// Builds the diagram bottom-up from the CFG. Terminals are CFG result
/// indices until compaction renumbers them.
struct Builder<'a> {
    cfg: &'a Cfg,
    level_of: Vec<u32>,
    nodes: Vec<BddNode>,
    unique: HashMap<BddNode, u32>,
    ite_memo: HashMap<(u32, BranchRef, BranchRef), BranchRef>,
    cfg_memo: HashMap<u32, BranchRef>,
}

impl Builder<'_> {
    fn convert(&mut self, r: CfgRef) -> BranchRef {
        let n = match r {
            CfgRef::Result(i) => return BranchRef::Result(i),
            CfgRef::Node(n) => n,
        };
        if let Some(&done) = self.cfg_memo.get(&n) {
            return done;
        }
        let node = self.cfg.nodes()[n as usize];
        let proceed = self.convert(node.proceed);
        let next = self.convert(node.next);
        let (high, low) = if node.condition.negated {
            (next, proceed)
        } else {
            (proceed, next)
        };
        let level = self.level_of[node.condition.index as usize];
        let out = self.ite_var(level, high, low);
        self.cfg_memo.insert(n, out);
        out
    }

    fn level(&self, r: BranchRef) -> u32 {
        match r {
            BranchRef::Node(i) => self.nodes[i as usize].condition_index,
            BranchRef::Result(_) => TERMINAL_LEVEL,
        }
    }

    /// `r` restricted to `level = value`. Only the top node can test
    /// `level`, since every caller passes the smallest level in play.
    fn cofactor(&self, r: BranchRef, level: u32, value: bool) -> BranchRef {
        match r {
            BranchRef::Node(i) if self.nodes[i as usize].condition_index == level => {
                let node = self.nodes[i as usize];
                if value { node.high_ref } else { node.low_ref }
            }
            _ => r,
        }
    }

    /// If-then-else on a single variable: `level ? high : low`, where `high`
    /// and `low` may test variables on either side of `level`.
    fn ite_var(&mut self, level: u32, high: BranchRef, low: BranchRef) -> BranchRef {
        if high == low {
            return high;
        }
        let key = (level, high, low);
        if let Some(&done) = self.ite_memo.get(&key) {
            return done;
        }
        let top = level.min(self.level(high)).min(self.level(low));
        let out = if top == level {
            let h = self.cofactor(high, level, true);
            let l = self.cofactor(low, level, false);
            self.mk(level, h, l)
        } else {
            let (high1, low1) = (self.cofactor(high, top, true), self.cofactor(low, top, true));
            let (high0, low0) = (
                self.cofactor(high, top, false),
                self.cofactor(low, top, false),
            );
            let h = self.ite_var(level, high1, low1);
            let l = self.ite_var(level, high0, low0);
            self.mk(top, h, l)
        };
        self.ite_memo.insert(key, out);
        out
    }

    fn mk(&mut self, level: u32, high: BranchRef, low: BranchRef) -> BranchRef {
        if high == low {
            return high;
        }
        let node = BddNode {
            condition_index: level,
            high_ref: high,
            low_ref: low,
        };
        if let Some(&i) = self.unique.get(&node) {
            return BranchRef::Node(i);
        }
        let i = index_u32(self.nodes.len());
        self.nodes.push(node);
        self.unique.insert(node, i);
        BranchRef::Node(i)
    }
}

/// Drop unreachable nodes and renumber. Nodes are numbered in depth-first
/// pre-order from the root, high branch first. Results become the no-match
/// result followed by every reachable result in `result_order`.
fn compact(
    raw: &[BddNode],
    root: BranchRef,
    result_order: &[u32],
) -> (Vec<BddNode>, BranchRef, Vec<u32>) {
    let mut new_index: HashMap<u32, u32> = HashMap::new();
    let mut preorder = Vec::new();
    let mut reachable_results = HashSet::from([0]);
    let mut stack = vec![root];
    while let Some(r) = stack.pop() {
        match r {
            BranchRef::Result(i) => {
                reachable_results.insert(i);
            }
            BranchRef::Node(i) => {
                if new_index.contains_key(&i) {
                    continue;
                }
                new_index.insert(i, index_u32(preorder.len()));
                preorder.push(i);
                let node = raw[i as usize];
                stack.push(node.low_ref);
                stack.push(node.high_ref);
            }
        }
    }

    let mut results = vec![0];
    results.extend(
        result_order
            .iter()
            .copied()
            .filter(|r| *r != 0 && reachable_results.contains(r)),
    );
    let result_index: HashMap<u32, u32> = results
        .iter()
        .enumerate()
        .map(|(i, &r)| (r, index_u32(i)))
        .collect();

    let remap = |r: BranchRef| match r {
        BranchRef::Node(i) => BranchRef::Node(new_index[&i]),
        BranchRef::Result(i) => BranchRef::Result(result_index[&i]),
    };
    let nodes = preorder
        .iter()
        .map(|&i| {
            let node = raw[i as usize];
            BddNode {
                condition_index: node.condition_index,
                high_ref: remap(node.high_ref),
                low_ref: remap(node.low_ref),
            }
        })
        .collect();
    (nodes, remap(root), results)
}
