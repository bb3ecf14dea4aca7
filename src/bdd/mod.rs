//! Reduced, ordered binary decision diagrams over interned conditions.

mod builder;
mod equivalence;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::CompileError;
use crate::cfg::{Cfg, index_u32};

pub use equivalence::{EquivalenceOptions, verify_equivalence};

/// A branch target: another node or an entry of the result table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BranchRef {
    Node(u32),
    Result(u32),
}

/// Test `condition_index`; continue at `high_ref` when it holds, otherwise
/// at `low_ref`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BddNode {
    pub condition_index: u32,
    pub high_ref: BranchRef,
    pub low_ref: BranchRef,
}

/// A diagram compiled from a [`Cfg`] under one variable order.
///
/// Condition indices in the nodes are levels: `order[level]` is the CFG
/// condition tested at that level. Result indices point into `results`,
/// which maps them back to CFG result indices; `results[0]` is always the
/// CFG's no-match result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bdd {
    order: Vec<u32>,
    nodes: Vec<BddNode>,
    root: BranchRef,
    results: Vec<u32>,
}

impl Bdd {
    /// Compile `cfg` under its initial variable order.
    #[must_use]
    pub fn build(cfg: &Cfg) -> Bdd {
        Self::compile(cfg, &Self::initial_order(cfg))
    }

    /// Compile `cfg` with the variables ordered as `order`, a permutation of
    /// the CFG's condition indices.
    pub(crate) fn compile(cfg: &Cfg, order: &[u32]) -> Bdd {
        builder::compile(cfg, order)
    }

    /// The initial variable order: conditions in order of first appearance
    /// in a depth-first walk of the CFG.
    pub(crate) fn initial_order(cfg: &Cfg) -> Vec<u32> {
        let (mut order, _) = cfg.first_appearance();
        let mut placed = vec![false; cfg.conditions().len()];
        for &c in &order {
            placed[c as usize] = true;
        }
        // Conditions unreachable from the root still need a level, and a
        // binding must land above every condition that reads it.
        let conditions = cfg.conditions();
        let mut pending: Vec<usize> = (0..conditions.len()).filter(|&c| !placed[c]).collect();
        while !pending.is_empty() {
            let feeds = |p: usize, c: usize| {
                conditions[p]
                    .binding()
                    .is_some_and(|name| conditions[c].references().contains(&name))
            };
            let ready = pending
                .iter()
                .position(|&c| !pending.iter().any(|&p| p != c && feeds(p, c)))
                .unwrap_or(0);
            order.push(index_u32(pending.remove(ready)));
        }
        order
    }

    #[must_use]
    pub fn order(&self) -> &[u32] {
        &self.order
    }

    #[must_use]
    pub fn nodes(&self) -> &[BddNode] {
        &self.nodes
    }

    #[must_use]
    pub fn root(&self) -> BranchRef {
        self.root
    }

    /// Maps each diagram result index to its CFG result index.
    #[must_use]
    pub fn results(&self) -> &[u32] {
        &self.results
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of nodes testing each level.
    #[must_use]
    pub fn level_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.order.len()];
        for node in &self.nodes {
            counts[node.condition_index as usize] += 1;
        }
        counts
    }

    /// # Errors
    ///
    /// Returns the first structural defect found; see [`check_invariants`].
    pub fn check_invariants(&self) -> Result<(), CompileError> {
        check_invariants(&self.nodes, self.root, self.order.len(), self.results.len())
    }

    /// The same structure with every node's branches exchanged: still a
    /// valid diagram, but of a different function.
    #[cfg(test)]
    pub(crate) fn with_branches_swapped(mut self) -> Self {
        for node in &mut self.nodes {
            std::mem::swap(&mut node.high_ref, &mut node.low_ref);
        }
        self
    }
}

impl fmt::Display for Bdd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BDD({} nodes, {} levels, {} results)",
            self.nodes.len(),
            self.order.len(),
            self.results.len()
        )
    }
}

/// Check that a node table is a reduced, ordered diagram: no two nodes
/// share a `(condition, high, low)` triple, no node has `high == low`,
/// every edge goes to a strictly higher condition index, and every
/// reference is in bounds.
pub(crate) fn check_invariants(
    nodes: &[BddNode],
    root: BranchRef,
    condition_count: usize,
    result_count: usize,
) -> Result<(), CompileError> {
    let in_bounds = |r: BranchRef| match r {
        BranchRef::Node(i) => (i as usize) < nodes.len(),
        BranchRef::Result(i) => (i as usize) < result_count,
    };
    if !in_bounds(root) {
        return Err(CompileError::DanglingReference {
            index: 0,
            target: format!("root {}", describe(root)),
        });
    }

    let mut seen: HashMap<&BddNode, usize> = HashMap::with_capacity(nodes.len());
    for (index, node) in nodes.iter().enumerate() {
        if node.condition_index as usize >= condition_count {
            return Err(CompileError::DanglingReference {
                index,
                target: format!("condition {}", node.condition_index),
            });
        }
        for child in [node.high_ref, node.low_ref] {
            if !in_bounds(child) {
                return Err(CompileError::DanglingReference {
                    index,
                    target: describe(child),
                });
            }
            if let BranchRef::Node(c) = child {
                let child_condition = nodes[c as usize].condition_index;
                if child_condition <= node.condition_index {
                    return Err(CompileError::OrderViolation {
                        parent: index,
                        parent_condition: node.condition_index,
                        child: c as usize,
                        child_condition,
                    });
                }
            }
        }
        if node.high_ref == node.low_ref {
            return Err(CompileError::RedundantNode { index });
        }
        if let Some(&duplicate_of) = seen.get(node) {
            return Err(CompileError::DuplicateNode {
                index,
                duplicate_of,
            });
        }
        seen.insert(node, index);
    }
    Ok(())
}

fn describe(r: BranchRef) -> String {
    match r {
        BranchRef::Node(i) => format!("node {i}"),
        BranchRef::Result(i) => format!("result {i}"),
    }
}
