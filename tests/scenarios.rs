use std::sync::atomic::{AtomicBool, Ordering};

use colored_modularity::prelude::*;

fn two_disjoint_edges() -> CsrGraph {
    CsrGraph::from_weighted_edges(4, &[(0, 1, 5.0), (2, 3, 5.0)]).unwrap()
}

fn two_triangles() -> CsrGraph {
    CsrGraph::from_edges(6, &[(0, 1), (1, 2), (0, 2), (3, 4), (4, 5), (3, 5), (2, 3)]).unwrap()
}

/// Four 8-cliques joined in a ring by single bridges.
fn clique_ring() -> CsrGraph {
    let mut b = CsrGraphBuilder::new(32);
    for c in 0..4 {
        let base = c * 8;
        for u in 0..8 {
            for v in (u + 1)..8 {
                b.add_relationship(base + u, base + v).unwrap();
            }
        }
        b.add_relationship(base + 7, (base + 8) % 32).unwrap();
    }
    b.build()
}

fn config(concurrency: usize) -> ModularityConfig {
    ModularityConfig {
        concurrency,
        min_batch_size: 1,
        ..ModularityConfig::default()
    }
}

fn run<G: WeightedGraph>(g: &G, cfg: ModularityConfig) -> ModularityResult {
    ModularityOptimizer::new(g, cfg).unwrap().compute().unwrap()
}

#[test]
fn disjoint_edges_pair_up_after_one_iteration() {
    let g = two_disjoint_edges();
    let r = run(&g, ModularityConfig { max_iterations: 1, ..config(1) });
    assert_eq!(r.ran_iterations(), 1);
    assert!((r.modularity() - 0.5).abs() < 1e-12);
    assert_eq!(r.community_count(), 2);
    assert_eq!(r.community_id(0), r.community_id(1));
    assert_eq!(r.community_id(2), r.community_id(3));
    assert_ne!(r.community_id(1), r.community_id(2));
}

#[test]
fn disjoint_edges_converge_on_the_second_iteration() {
    let g = two_disjoint_edges();
    let r = run(&g, config(4));
    assert!(r.did_converge());
    assert!(!r.terminated());
    assert_eq!(r.ran_iterations(), 2);
    assert!((r.modularity() - 0.5).abs() < 1e-12);
    assert_eq!(r.community_count(), 2);
}

#[test]
fn isolated_nodes_stay_singletons() {
    let g = CsrGraph::from_edges(5, &[]).unwrap();
    let r = run(&g, config(2));
    assert!(r.did_converge());
    assert_eq!(r.ran_iterations(), 0);
    assert_eq!(r.modularity(), 0.0);
    assert_eq!(r.community_ids(), &[0, 1, 2, 3, 4]);
}

#[test]
fn empty_graph_converges_immediately() {
    let g = CsrGraph::from_edges(0, &[]).unwrap();
    let r = run(&g, config(1));
    assert!(r.did_converge());
    assert_eq!(r.community_count(), 0);
}

#[test]
fn bridged_triangles_split_at_the_bridge() {
    let g = two_triangles();
    let r = run(&g, config(1));
    assert!(r.did_converge());
    assert_eq!(r.community_count(), 2);
    assert!(r.community_ids()[..3].iter().all(|&c| c == r.community_id(0)));
    assert!(r.community_ids()[3..].iter().all(|&c| c == r.community_id(3)));
    let expected = 12.0 / 14.0 - 2.0 * 0.25;
    assert!((r.modularity() - expected).abs() < 1e-12);
}

#[test]
fn clique_ring_finds_dense_groups_in_parallel() {
    let g = clique_ring();
    let r = run(&g, config(4));
    assert!(r.did_converge() || r.ran_iterations() == 10);
    assert!(r.modularity() > 0.4, "modularity {}", r.modularity());
    let counters = ModularityCounters::compute(&g, r.community_ids());
    assert!((counters.modularity() - r.modularity()).abs() < 1e-9);
}

#[test]
fn seeded_values_are_reported_back() {
    let triangle = CsrGraph::from_edges(3, &[(0, 1), (1, 2), (0, 2)]).unwrap();
    let r = ModularityOptimizer::new(&triangle, config(2))
        .unwrap()
        .with_seeds(&[Some(10), Some(10), Some(20)])
        .unwrap()
        .compute()
        .unwrap();
    assert!(r.community_ids().iter().all(|c| [10, 20].contains(c)));
}

#[test]
fn missing_seeds_use_original_ids() {
    let g = CsrGraph::from_edges(3, &[])
        .unwrap()
        .with_original_ids(vec![100, 200, 300])
        .unwrap();
    let r = ModularityOptimizer::new(&g, config(1))
        .unwrap()
        .with_seeds(&[Some(4), None, Some(4)])
        .unwrap()
        .compute()
        .unwrap();
    assert_eq!(r.community_ids(), &[4, 205, 4]);
    assert_eq!(g.to_mapped_node_id(200), Some(1));
    assert_eq!(g.to_mapped_node_id(7), None);
}

#[test]
fn negative_seed_is_rejected() {
    let g = two_disjoint_edges();
    let err = ModularityOptimizer::new(&g, config(1))
        .unwrap()
        .with_seeds(&[Some(0), Some(-3), None, None])
        .err()
        .unwrap();
    assert_eq!(err, ModularityError::NegativeSeed { node: 1, value: -3 });
}

#[test]
fn zero_iterations_is_rejected() {
    let g = two_disjoint_edges();
    let err = ModularityOptimizer::new(&g, ModularityConfig { max_iterations: 0, ..config(1) })
        .err()
        .unwrap();
    assert_eq!(err, ModularityError::InvalidMaxIterations(0));
    assert!(err.to_string().contains("at least one iteration"));
}

#[test]
fn another_iteration_after_convergence_changes_nothing() {
    for g in [two_disjoint_edges(), two_triangles()] {
        let first = run(&g, config(1));
        assert!(first.did_converge());
        let seeds: Vec<Seed> = first.community_ids().iter().map(|&c| Some(c as i64)).collect();
        let again = ModularityOptimizer::new(&g, ModularityConfig { max_iterations: 1, ..config(1) })
            .unwrap()
            .with_seeds(&seeds)
            .unwrap()
            .compute()
            .unwrap();
        assert_eq!(again.community_ids(), first.community_ids());
        assert!((again.modularity() - first.modularity()).abs() < 1e-12);
    }
}

#[test]
fn single_threaded_runs_are_reproducible() {
    let g = clique_ring();
    let a = run(&g, config(1));
    let b = run(&g, config(1));
    assert_eq!(a, b);
}

#[test]
fn termination_before_start_keeps_initial_state() {
    let g = two_triangles();
    let flag = TerminationFlag::new();
    flag.terminate();
    let r = ModularityOptimizer::new(&g, config(2))
        .unwrap()
        .with_termination(flag)
        .compute()
        .unwrap();
    assert!(r.terminated());
    assert!(!r.did_converge());
    assert_eq!(r.ran_iterations(), 0);
    assert_eq!(r.community_count(), 6);
}

/// Raises `flag` on the first progress report made inside the sub task `during`.
struct TerminateDuring {
    during: &'static str,
    flag: TerminationFlag,
    active: AtomicBool,
}

impl TerminateDuring {
    fn new(during: &'static str, flag: TerminationFlag) -> Self {
        Self {
            during,
            flag,
            active: AtomicBool::new(false),
        }
    }
}

impl ProgressSink for TerminateDuring {
    fn begin_sub_task(&self, name: &str) {
        if name == self.during {
            self.active.store(true, Ordering::SeqCst);
        }
    }

    fn end_sub_task(&self, name: &str) {
        if name == self.during {
            self.active.store(false, Ordering::SeqCst);
        }
    }

    fn log_progress(&self, _units: usize) {
        if self.active.load(Ordering::SeqCst) {
            self.flag.terminate();
        }
    }
}

#[test]
fn termination_during_coloring_skips_every_iteration() {
    let g = two_triangles();
    let flag = TerminationFlag::new();
    let progress = TerminateDuring::new("K1Coloring", flag.clone());
    let r = ModularityOptimizer::new(&g, config(1))
        .unwrap()
        .with_termination(flag.clone())
        .compute_with_progress(&progress)
        .unwrap();
    assert!(!flag.is_running());
    assert!(r.terminated());
    assert!(!r.did_converge());
    assert_eq!(r.ran_iterations(), 0);
    assert_eq!(r.community_count(), 6);
    assert!(r.colors_used() >= 3);
}

#[test]
fn termination_during_an_iteration_stops_between_colors() {
    let g = two_triangles();
    let after_one = run(&g, ModularityConfig { max_iterations: 1, ..config(1) });

    let flag = TerminationFlag::new();
    let progress = TerminateDuring::new("iteration 2", flag.clone());
    let r = ModularityOptimizer::new(&g, config(1))
        .unwrap()
        .with_termination(flag.clone())
        .compute_with_progress(&progress)
        .unwrap();
    assert!(!flag.is_running());
    assert!(r.terminated());
    assert!(!r.did_converge());
    // the interrupted iteration is not counted and its modularity never computed
    assert_eq!(r.ran_iterations(), 1);
    assert_eq!(r.modularity(), after_one.modularity());
}

#[test]
fn log_progress_counts_relationships() {
    let g = two_triangles();
    let progress = LogProgress::new();
    let r = ModularityOptimizer::new(&g, config(1))
        .unwrap()
        .compute_with_progress(&progress)
        .unwrap();
    // one coloring round plus one sweep per iteration, each touching every relationship entry once
    assert_eq!(
        progress.units(),
        g.relationship_count() * (1 + r.ran_iterations())
    );
}

#[test]
fn heavy_edge_next_to_light_edges_keeps_weights_consistent() {
    let g = CsrGraph::from_weighted_edges(4, &[(0, 2, 1e14), (1, 3, 1e-3)]).unwrap();
    let r = ModularityOptimizer::new(&g, config(1))
        .unwrap()
        .with_seeds(&[Some(10), Some(10), Some(20), Some(10)])
        .unwrap()
        .compute()
        .unwrap();
    assert_eq!(r.community_id(0), r.community_id(2));
    assert!(r.modularity().is_finite());
    let counters = ModularityCounters::compute(&g, r.community_ids());
    assert!((counters.modularity() - r.modularity()).abs() < 1e-9);
}
