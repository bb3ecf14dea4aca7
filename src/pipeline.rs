//! The staged compiler: canonicalize, flatten, compile, optimize, checking
//! the test corpus after every stage.

use std::borrow::Cow;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use serde::{Deserialize, Serialize};

use crate::bdd::{Bdd, EquivalenceOptions, verify_equivalence};
use crate::cfg::Cfg;
use crate::reorder::{
    Constraints, CostModel, CostOptions, CostTables, ProbabilityEstimator, SiftingOptions,
    UniformEstimator, UnitCost, optimize, sift,
};
use crate::{
    Canonicalizer, CompiledRuleSet, EndpointError, RuleSet, Stage, TestSuite, VerifyError,
};

/// Which passes run and with what budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileOptions {
    pub canonicalize: bool,
    pub sift: bool,
    pub sifting: SiftingOptions,
    pub optimize_cost: bool,
    pub cost: CostOptions,
    pub check_equivalence: bool,
    pub equivalence: EquivalenceOptions,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            canonicalize: true,
            sift: true,
            sifting: SiftingOptions::default(),
            optimize_cost: true,
            cost: CostOptions::default(),
            check_equivalence: true,
            equivalence: EquivalenceOptions::default(),
        }
    }
}

impl CompileOptions {
    /// Parse options from JSON; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Json`] on malformed input.
    pub fn from_json(input: &str) -> Result<Self, EndpointError> {
        Ok(serde_json::from_str(input)?)
    }
}

/// Sizes and costs observed while compiling one rule set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileStats {
    pub rewrites: usize,
    pub cfg_nodes: usize,
    pub conditions: usize,
    pub results: usize,
    pub bdd_nodes: usize,
    /// `None` when sifting is disabled.
    pub sifted_nodes: Option<usize>,
    pub final_nodes: usize,
    pub cost_before: f64,
    pub cost_after: f64,
    /// Condition assignments on which each diagram was checked against the
    /// CFG, summed over stages.
    pub equivalence_checks: usize,
}

impl fmt::Display for CompileStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} conditions, {} results, {} CFG nodes, {} -> {} BDD nodes, \
             expected cost {:.3} -> {:.3}",
            self.conditions,
            self.results,
            self.cfg_nodes,
            self.bdd_nodes,
            self.final_nodes,
            self.cost_before,
            self.cost_after
        )
    }
}

/// A compiled rule set together with its statistics.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub compiled: CompiledRuleSet,
    pub stats: CompileStats,
}

/// Compiles rule sets, verifying every stage against a test corpus.
///
/// A compiler holds no per-compilation state, so one instance can compile
/// many rule sets, including from several threads at once.
pub struct Compiler {
    options: CompileOptions,
    canonicalizer: Canonicalizer,
    estimator: Box<dyn ProbabilityEstimator>,
    cost_model: Box<dyn CostModel>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self {
            options: CompileOptions::default(),
            canonicalizer: Canonicalizer::default(),
            estimator: Box::new(UniformEstimator),
            cost_model: Box::new(UnitCost),
        }
    }
}

impl fmt::Debug for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compiler")
            .field("options", &self.options)
            .field("canonicalizer", &self.canonicalizer)
            .finish_non_exhaustive()
    }
}

impl Compiler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_canonicalizer(mut self, canonicalizer: Canonicalizer) -> Self {
        self.canonicalizer = canonicalizer;
        self
    }

    #[must_use]
    pub fn with_estimator(mut self, estimator: impl ProbabilityEstimator + 'static) -> Self {
        self.estimator = Box::new(estimator);
        self
    }

    #[must_use]
    pub fn with_cost_model(mut self, model: impl CostModel + 'static) -> Self {
        self.cost_model = Box::new(model);
        self
    }

    #[must_use]
    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compile `ruleset`, checking `suite` against every intermediate form.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Verify`] when the corpus is inconsistent or
    /// a stage before optimization disagrees with it,
    /// [`EndpointError::Compile`] on scope errors or broken diagram
    /// invariants, and [`EndpointError::OptimizationRegression`] when
    /// sifting or cost optimization changes an outcome or stops being
    /// equivalent to the CFG. No artifact is produced on error.
    pub fn compile(
        &self,
        ruleset: &RuleSet,
        suite: &TestSuite,
    ) -> Result<Compilation, EndpointError> {
        suite.validate(ruleset.parameters())?;
        suite.verify(Stage::RuleTree, ruleset)?;

        let (ruleset, rewrites) = if self.options.canonicalize {
            let canonical = self.canonicalizer.canonicalize(ruleset);
            suite.verify(Stage::Canonicalized, &canonical.ruleset)?;
            (Cow::Owned(canonical.ruleset), canonical.rewrites)
        } else {
            (Cow::Borrowed(ruleset), 0)
        };

        let cfg = Cfg::build(&ruleset)?;
        suite.verify(Stage::Cfg, &cfg)?;

        let version = ruleset.version().map(str::to_owned);
        let initial = Bdd::build(&cfg);
        initial.check_invariants()?;
        let mut equivalence_checks = self.equivalent(Stage::Bdd, &cfg, &initial)?;
        suite.verify(
            Stage::Bdd,
            &CompiledRuleSet::assemble(&cfg, &initial, version.clone()),
        )?;

        let constraints = Constraints::new(&cfg, initial.order());
        let tables = CostTables::new(
            cfg.conditions(),
            self.estimator.as_ref(),
            self.cost_model.as_ref(),
        );
        let bdd_nodes = initial.node_count();
        let cost_before = tables.expected_cost(&initial);

        let mut current = initial;
        let mut sifted_nodes = None;
        if self.options.sift {
            let sifted = sift(&cfg, current, &constraints, &self.options.sifting);
            equivalence_checks += self.check_pass(Stage::Sifted, &cfg, &sifted, suite)?;
            sifted_nodes = Some(sifted.node_count());
            current = sifted;
        }
        if self.options.optimize_cost {
            let optimized = optimize(&cfg, current, &constraints, &tables, &self.options.cost);
            equivalence_checks +=
                self.check_pass(Stage::CostOptimized, &cfg, &optimized, suite)?;
            current = optimized;
        }

        let compiled = CompiledRuleSet::assemble(&cfg, &current, version);
        let stats = CompileStats {
            rewrites,
            cfg_nodes: cfg.node_count(),
            conditions: compiled.conditions().len(),
            results: compiled.results().len(),
            bdd_nodes,
            sifted_nodes,
            final_nodes: compiled.node_count(),
            cost_before,
            cost_after: tables.expected_cost(&current),
            equivalence_checks,
        };
        log::info!("compiled rule set: {stats}");
        Ok(Compilation { compiled, stats })
    }

    /// Check an optimized diagram's structure, its equivalence to the CFG
    /// and its agreement with the corpus. Disagreement is a regression of
    /// the pass, not of the input. Returns the assignments checked.
    fn check_pass(
        &self,
        stage: Stage,
        cfg: &Cfg,
        diagram: &Bdd,
        suite: &TestSuite,
    ) -> Result<usize, EndpointError> {
        let regression =
            |source: VerifyError| EndpointError::OptimizationRegression { stage, source };
        diagram.check_invariants()?;
        let checked = self.equivalent(stage, cfg, diagram).map_err(regression)?;
        let candidate = CompiledRuleSet::assemble(cfg, diagram, None);
        suite.verify(stage, &candidate).map_err(regression)?;
        Ok(checked)
    }

    fn equivalent(&self, stage: Stage, cfg: &Cfg, diagram: &Bdd) -> Result<usize, VerifyError> {
        if !self.options.check_equivalence {
            return Ok(0);
        }
        verify_equivalence(stage, cfg, diagram, &self.options.equivalence)
    }
}

/// Compile independent rule sets on a pool of scoped worker threads.
///
/// Results come back in input order; one rule set failing does not stop
/// the others.
pub fn compile_many(
    compiler: &Compiler,
    jobs: &[(RuleSet, TestSuite)],
) -> Vec<Result<Compilation, EndpointError>> {
    let workers = thread::available_parallelism()
        .map_or(1, std::num::NonZeroUsize::get)
        .min(jobs.len())
        .max(1);
    log::debug!("compiling {} rule sets on {workers} workers", jobs.len());

    let next = AtomicUsize::new(0);
    let slots: Mutex<Vec<Option<Result<Compilation, EndpointError>>>> =
        Mutex::new((0..jobs.len()).map(|_| None).collect());
    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some((ruleset, suite)) = jobs.get(i) else {
                        break;
                    };
                    let result = compiler.compile(ruleset, suite);
                    if let Err(err) = &result {
                        log::debug!("rule set {i} failed: {err}");
                    }
                    match slots.lock() {
                        Ok(mut slots) => slots[i] = Some(result),
                        Err(poisoned) => poisoned.into_inner()[i] = Some(result),
                    }
                }
            });
        }
    });

    slots
        .into_inner()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .into_iter()
        .flatten()
        .collect()
}
