//! Iteration controller of the coloring-parallelized modularity optimizer.
//!
//! One run goes through
//!
//! ```text
//! Init → Coloring → PerColorPass → Commit → ConvergenceCheck → (PerColorPass | Done)
//! ```
//!
//! Colors are processed in ascending order. After each color the nodes of that
//! color adopt their `next` community and the staged weight moves become live,
//! so later colors of the same iteration already see them. Once every color is
//! done the global modularity is recomputed; the run stops on the first
//! iteration after the first that does not improve modularity by more than
//! `tolerance`, or after `max_iterations`.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::coloring::{ColorPartition, ColoringConfig, K1Coloring};
use crate::community::{CommunityState, LocalMovePass, Seed, SeedMapping, modularity};
use crate::debug_invariants::DebugInvariants;
use crate::graph::{NodeId, WeightedGraph};
use crate::modularity_error::ModularityError;
use crate::parallel::build_pool;
use crate::progress::{NoopProgress, ProgressSink, TerminationFlag};

/// Configuration of a modularity optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModularityConfig {
    /// Hard iteration cap; must be at least 1.
    pub max_iterations: usize,
    /// Minimum modularity improvement that counts as progress.
    pub tolerance: f64,
    /// Size of the rayon pool the run executes on.
    pub concurrency: usize,
    /// Minimum nodes per parallel partition.
    pub min_batch_size: usize,
    /// Round budget of the coloring engine.
    pub coloring_max_rounds: usize,
    /// Seed for coloring conflict priorities.
    pub rng_seed: u64,
    /// Nodes with a smaller degree reuse their worker's influence map.
    pub low_degree_threshold: usize,
}

impl Default for ModularityConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            tolerance: 1e-4,
            concurrency: 4,
            min_batch_size: 10_000,
            coloring_max_rounds: 5,
            rng_seed: 42,
            low_degree_threshold: 1024,
        }
    }
}

impl ModularityConfig {
    /// Rejects settings no run can be started with.
    pub fn validate(&self) -> Result<(), ModularityError> {
        if self.max_iterations < 1 {
            return Err(ModularityError::InvalidMaxIterations(self.max_iterations));
        }
        if self.concurrency < 1 {
            return Err(ModularityError::InvalidConcurrency(self.concurrency));
        }
        if self.min_batch_size < 1 {
            return Err(ModularityError::InvalidBatchSize(self.min_batch_size));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(ModularityError::InvalidTolerance(self.tolerance));
        }
        Ok(())
    }

    /// Settings handed to the coloring engine.
    pub fn coloring_config(&self) -> ColoringConfig {
        ColoringConfig {
            max_rounds: self.coloring_max_rounds,
            concurrency: self.concurrency,
            min_batch_size: self.min_batch_size,
            rng_seed: self.rng_seed,
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModularityResult {
    community_ids: Vec<u64>,
    modularity: f64,
    ran_iterations: usize,
    did_converge: bool,
    terminated: bool,
    colors_used: usize,
}

impl ModularityResult {
    /// Final community of `node`, in seed space when the run was seeded.
    #[inline]
    pub fn community_id(&self, node: NodeId) -> u64 {
        self.community_ids[node]
    }

    pub fn community_ids(&self) -> &[u64] {
        &self.community_ids
    }

    /// Number of distinct final communities.
    pub fn community_count(&self) -> usize {
        self.community_ids.iter().unique().count()
    }

    /// Modularity of the last completed iteration.
    pub fn modularity(&self) -> f64 {
        self.modularity
    }

    /// Iterations run, including the one that detected convergence.
    pub fn ran_iterations(&self) -> usize {
        self.ran_iterations
    }

    pub fn did_converge(&self) -> bool {
        self.did_converge
    }

    /// Whether the run stopped because its termination flag was raised.
    pub fn terminated(&self) -> bool {
        self.terminated
    }

    /// Distinct colors of the coloring the passes ran over.
    pub fn colors_used(&self) -> usize {
        self.colors_used
    }
}

/// Parallel modularity optimizer over a [`WeightedGraph`].
///
/// ```
/// use colored_modularity::prelude::*;
///
/// let graph = CsrGraph::from_weighted_edges(4, &[(0, 1, 5.0), (2, 3, 5.0)])?;
/// let result = ModularityOptimizer::new(&graph, ModularityConfig::default())?.compute()?;
/// assert_eq!(result.community_count(), 2);
/// assert!((result.modularity() - 0.5).abs() < 1e-9);
/// # Ok::<(), ModularityError>(())
/// ```
pub struct ModularityOptimizer<'g, G: WeightedGraph> {
    graph: &'g G,
    config: ModularityConfig,
    seeding: Option<(SeedMapping, Vec<NodeId>)>,
    termination: TerminationFlag,
}

impl<'g, G: WeightedGraph> ModularityOptimizer<'g, G> {
    /// # Errors
    /// Any configuration error of [`ModularityConfig::validate`].
    pub fn new(graph: &'g G, config: ModularityConfig) -> Result<Self, ModularityError> {
        config.validate()?;
        Ok(Self {
            graph,
            config,
            seeding: None,
            termination: TerminationFlag::new(),
        })
    }

    /// Starts from the communities given by `seeds` instead of singletons.
    ///
    /// # Errors
    /// Seeds are checked here, before any work starts: one per node, none
    /// negative.
    pub fn with_seeds(mut self, seeds: &[Seed]) -> Result<Self, ModularityError> {
        self.seeding = Some(SeedMapping::from_seeds(self.graph, seeds)?);
        Ok(self)
    }

    /// Polls `flag` between colors and iterations.
    pub fn with_termination(mut self, flag: TerminationFlag) -> Self {
        self.termination = flag;
        self
    }

    pub fn config(&self) -> &ModularityConfig {
        &self.config
    }

    /// Runs without progress reporting.
    pub fn compute(&self) -> Result<ModularityResult, ModularityError> {
        self.compute_with_progress(&NoopProgress)
    }

    /// Runs on a dedicated pool of `concurrency` threads.
    pub fn compute_with_progress(
        &self,
        progress: &dyn ProgressSink,
    ) -> Result<ModularityResult, ModularityError> {
        let pool = build_pool(self.config.concurrency)?;
        pool.install(|| sub_task(progress, "ModularityOptimization", || self.run(progress)))
    }

    fn run(&self, progress: &dyn ProgressSink) -> Result<ModularityResult, ModularityError> {
        let cfg = &self.config;
        let (partition, state, colors_used) = sub_task(progress, "initialization", || {
            let coloring = sub_task(progress, "K1Coloring", || {
                K1Coloring::new(self.graph, cfg.coloring_config())
                    .with_termination(self.termination.clone())
                    .compute_with_progress(progress)
            });
            let partition = ColorPartition::from_coloring(&coloring);
            partition.debug_assert_invariants();
            let state = sub_task(progress, "seeding", || {
                CommunityState::init(
                    self.graph,
                    self.seeding.clone(),
                    cfg.concurrency,
                    cfg.min_batch_size,
                )
            })?;
            state.debug_assert_invariants();
            Ok::<_, ModularityError>((partition, state, coloring.used_colors()))
        })?;

        if state.total_weight() == 0.0 {
            log::debug!("Graph has no relationship weight, nothing to optimize");
            return Ok(ModularityResult {
                community_ids: state.reported_communities(),
                modularity: 0.0,
                ran_iterations: 0,
                did_converge: true,
                terminated: false,
                colors_used,
            });
        }

        sub_task(progress, "compute modularity", || -> Result<ModularityResult, ModularityError> {
            let mut current = modularity(self.graph, &state, cfg.concurrency, cfg.min_batch_size)?;
            if log::log_enabled!(log::Level::Debug) {
                log::debug!(
                    "Starting from {} communities with modularity {current:.6}",
                    state.current_communities().into_iter().unique().count()
                );
            }
            let mut ran_iterations = 0;
            let mut did_converge = false;
            let mut terminated = false;

            for iteration in 0..cfg.max_iterations {
                if !self.termination.is_running() {
                    terminated = true;
                    break;
                }
                let name = format!("iteration {}", iteration + 1);
                let completed = sub_task(progress, &name, || {
                    self.sweep_colors(&partition, &state, progress)
                })?;
                if !completed {
                    terminated = true;
                    break;
                }
                let next = modularity(self.graph, &state, cfg.concurrency, cfg.min_batch_size)?;
                ran_iterations += 1;
                let improved =
                    iteration == 0 || (next > current && (next - current).abs() > cfg.tolerance);
                log::debug!(
                    "Iteration {ran_iterations}: modularity {current:.6} -> {next:.6}"
                );
                current = next;
                if !improved {
                    did_converge = true;
                    break;
                }
            }

            if terminated {
                log::warn!("Modularity optimization terminated after {ran_iterations} iterations");
            } else if !did_converge {
                log::debug!("Reached the iteration cap of {} without converging", cfg.max_iterations);
            }
            Ok(ModularityResult {
                community_ids: state.reported_communities(),
                modularity: current,
                ran_iterations,
                did_converge,
                terminated,
                colors_used,
            })
        })
    }

    /// Runs one local-move pass per color, committing after each.
    ///
    /// Returns `false` when the termination flag was raised between colors.
    fn sweep_colors(
        &self,
        partition: &ColorPartition,
        state: &CommunityState,
        progress: &dyn ProgressSink,
    ) -> Result<bool, ModularityError> {
        let cfg = &self.config;
        let pass = LocalMovePass::new(
            self.graph,
            state,
            partition,
            cfg.concurrency,
            cfg.min_batch_size,
            cfg.low_degree_threshold,
        );
        for color in 0..partition.color_count() {
            if !self.termination.is_running() {
                return Ok(false);
            }
            let moved = pass.run(color, progress)?;
            state.commit_nodes(partition.nodes_of_color(color));
            state.apply_staged_weights();
            state.debug_assert_invariants();
            log::trace!("Color {color}: {moved} nodes moved");
        }
        Ok(true)
    }
}

/// Brackets `f` with `begin_sub_task` / `end_sub_task`.
fn sub_task<T>(progress: &dyn ProgressSink, name: &str, f: impl FnOnce() -> T) -> T {
    progress.begin_sub_task(name);
    let out = f();
    progress.end_sub_task(name);
    out
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CsrGraph;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<String>>,
    }

    impl ProgressSink for RecordingProgress {
        fn begin_sub_task(&self, name: &str) {
            self.events.lock().push(format!("+{name}"));
        }
        fn end_sub_task(&self, name: &str) {
            self.events.lock().push(format!("-{name}"));
        }
        fn log_progress(&self, _units: usize) {}
    }

    fn two_edges() -> CsrGraph {
        CsrGraph::from_weighted_edges(4, &[(0, 1, 5.0), (2, 3, 5.0)]).unwrap()
    }

    fn config() -> ModularityConfig {
        ModularityConfig {
            concurrency: 2,
            min_batch_size: 1,
            ..ModularityConfig::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(ModularityConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_invalid_config() {
        let bad = |cfg: ModularityConfig| cfg.validate().unwrap_err();
        assert_eq!(
            bad(ModularityConfig { max_iterations: 0, ..config() }),
            ModularityError::InvalidMaxIterations(0)
        );
        assert_eq!(
            bad(ModularityConfig { concurrency: 0, ..config() }),
            ModularityError::InvalidConcurrency(0)
        );
        assert_eq!(
            bad(ModularityConfig { min_batch_size: 0, ..config() }),
            ModularityError::InvalidBatchSize(0)
        );
        assert!(matches!(
            bad(ModularityConfig { tolerance: f64::NAN, ..config() }),
            ModularityError::InvalidTolerance(_)
        ));
    }

    #[test]
    fn coloring_config_carries_shared_knobs() {
        let cfg = ModularityConfig {
            coloring_max_rounds: 9,
            rng_seed: 7,
            ..config()
        };
        let c = cfg.coloring_config();
        assert_eq!((c.max_rounds, c.rng_seed, c.concurrency, c.min_batch_size), (9, 7, 2, 1));
    }

    #[test]
    fn single_iteration_pairs_disjoint_edges() {
        let g = two_edges();
        let cfg = ModularityConfig { max_iterations: 1, ..config() };
        let r = ModularityOptimizer::new(&g, cfg).unwrap().compute().unwrap();
        assert_eq!(r.ran_iterations(), 1);
        assert_eq!(r.colors_used(), 2);
        assert!(!r.did_converge());
        assert!((r.modularity() - 0.5).abs() < 1e-12);
        assert_eq!(r.community_id(0), r.community_id(1));
        assert_eq!(r.community_id(2), r.community_id(3));
        assert_ne!(r.community_id(0), r.community_id(2));
    }

    #[test]
    fn progress_tree_is_balanced() {
        let g = two_edges();
        let progress = RecordingProgress::default();
        let r = ModularityOptimizer::new(&g, config())
            .unwrap()
            .compute_with_progress(&progress)
            .unwrap();
        assert!(r.did_converge());
        let events = progress.events.into_inner();
        assert_eq!(
            events,
            vec![
                "+ModularityOptimization",
                "+initialization",
                "+K1Coloring",
                "-K1Coloring",
                "+seeding",
                "-seeding",
                "-initialization",
                "+compute modularity",
                "+iteration 1",
                "-iteration 1",
                "+iteration 2",
                "-iteration 2",
                "-compute modularity",
                "-ModularityOptimization",
            ]
        );
    }

    #[test]
    fn raised_flag_returns_partial_result() {
        let g = two_edges();
        let flag = TerminationFlag::new();
        flag.terminate();
        let r = ModularityOptimizer::new(&g, config())
            .unwrap()
            .with_termination(flag)
            .compute()
            .unwrap();
        assert!(r.terminated());
        assert!(!r.did_converge());
        assert_eq!(r.ran_iterations(), 0);
        assert_eq!(r.community_ids(), &[0, 1, 2, 3]);
        assert!((r.modularity() + 0.25).abs() < 1e-12);
    }

    #[test]
    fn seeds_are_checked_before_running() {
        let g = two_edges();
        let err = ModularityOptimizer::new(&g, config())
            .unwrap()
            .with_seeds(&[Some(1), Some(1), Some(-1), None])
            .err()
            .unwrap();
        assert_eq!(err, ModularityError::NegativeSeed { node: 2, value: -1 });
    }

    #[test]
    fn result_serializes() {
        let g = two_edges();
        let r = ModularityOptimizer::new(&g, config()).unwrap().compute().unwrap();
        let json = serde_json::to_string(&r).unwrap();
        let back: ModularityResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: ModularityConfig = serde_json::from_str(r#"{"max_iterations": 3}"#).unwrap();
        assert_eq!(cfg.max_iterations, 3);
        assert_eq!(cfg.low_degree_threshold, 1024);
        assert_eq!(cfg.tolerance, 1e-4);
    }
}
