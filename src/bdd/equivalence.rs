//! Check a diagram against the CFG it was compiled from by treating every
//! condition as a free boolean and comparing where both graphs land.

use std::hash::{DefaultHasher, Hasher};

use serde::{Deserialize, Serialize};

use super::{Bdd, BranchRef};
use crate::cfg::{Cfg, CfgRef};
use crate::{Stage, VerifyError};

/// Budgets for [`verify_equivalence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EquivalenceOptions {
    /// Up to this many conditions, every assignment is checked.
    pub exhaustive_limit: usize,
    /// Above the limit, the boundary assignments plus this many sampled ones.
    pub max_samples: usize,
}

impl Default for EquivalenceOptions {
    fn default() -> Self {
        Self {
            exhaustive_limit: 16,
            max_samples: 20_000,
        }
    }
}

/// Check that `bdd` reaches the same CFG result as `cfg` for every
/// assignment of truth values to the conditions, or for a deterministic
/// sample of them when there are too many conditions to enumerate.
///
/// Returns the number of assignments checked.
///
/// # Errors
///
/// Returns [`VerifyError::Inequivalent`] for the first assignment on which
/// the two graphs disagree.
pub fn verify_equivalence(
    stage: Stage,
    cfg: &Cfg,
    bdd: &Bdd,
    options: &EquivalenceOptions,
) -> Result<usize, VerifyError> {
    let n = cfg.conditions().len();
    let mut checker = Checker {
        stage,
        cfg,
        bdd,
        assignment: vec![false; n],
        checked: 0,
    };

    if n <= options.exhaustive_limit && n < usize::BITS as usize {
        for mask in 0..1usize << n {
            for (i, value) in checker.assignment.iter_mut().enumerate() {
                *value = (mask >> i) & 1 == 1;
            }
            checker.check()?;
        }
    } else {
        checker.boundary_cases()?;
        for sample in 0..options.max_samples {
            checker.fill_sample(sample);
            checker.check()?;
        }
    }
    log::debug!(
        "{stage} diagram matches the CFG on {} assignments of {n} conditions",
        checker.checked
    );
    Ok(checker.checked)
}

struct Checker<'a> {
    stage: Stage,
    cfg: &'a Cfg,
    bdd: &'a Bdd,
    assignment: Vec<bool>,
    checked: usize,
}

impl Checker<'_> {
    /// All false, all true, each condition alone flipped, and the two
    /// alternating patterns.
    fn boundary_cases(&mut self) -> Result<(), VerifyError> {
        for value in [false, true] {
            self.assignment.fill(value);
            self.check()?;
        }
        for value in [true, false] {
            for i in 0..self.assignment.len() {
                self.assignment.fill(!value);
                self.assignment[i] = value;
                self.check()?;
            }
        }
        for parity in [0, 1] {
            for (i, v) in self.assignment.iter_mut().enumerate() {
                *v = i % 2 == parity;
            }
            self.check()?;
        }
        Ok(())
    }

    fn fill_sample(&mut self, sample: usize) {
        for (word, chunk) in self.assignment.chunks_mut(64).enumerate() {
            let mut hasher = DefaultHasher::new();
            hasher.write_usize(sample);
            hasher.write_usize(word);
            let bits = hasher.finish();
            for (i, v) in chunk.iter_mut().enumerate() {
                *v = (bits >> i) & 1 == 1;
            }
        }
    }

    fn check(&mut self) -> Result<(), VerifyError> {
        self.checked += 1;
        let expected = self.cfg_result();
        let actual = self.bdd_result();
        if expected == actual {
            return Ok(());
        }
        let assignment = self
            .assignment
            .iter()
            .map(|&v| if v { '1' } else { '0' })
            .collect();
        Err(VerifyError::Inequivalent {
            stage: self.stage,
            assignment,
            expected,
            actual,
        })
    }

    fn cfg_result(&self) -> u32 {
        let mut current = self.cfg.root();
        loop {
            match current {
                CfgRef::Result(r) => return r,
                CfgRef::Node(i) => {
                    let node = &self.cfg.nodes()[i as usize];
                    let holds = self.assignment[node.condition.index as usize];
                    current = if holds != node.condition.negated {
                        node.proceed
                    } else {
                        node.next
                    };
                }
            }
        }
    }

    fn bdd_result(&self) -> u32 {
        let mut current = self.bdd.root();
        loop {
            match current {
                BranchRef::Result(r) => return self.bdd.results()[r as usize],
                BranchRef::Node(i) => {
                    let node = &self.bdd.nodes()[i as usize];
                    let condition = self.bdd.order()[node.condition_index as usize];
                    current = if self.assignment[condition as usize] {
                        node.high_ref
                    } else {
                        node.low_ref
                    };
                }
            }
        }
    }
}
