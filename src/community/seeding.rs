//! Seed community remapping.
//!
//! External seed values are arbitrary non-negative integers. [`SeedMapping`]
//! assigns them dense internal community ids in order of first appearance and
//! keeps the reverse table used to report final communities in the seed space.

use hashbrown::HashMap;

use crate::graph::{NodeId, WeightedGraph};
use crate::modularity_error::ModularityError;

/// Per-node seed value; `None` marks a missing seed.
pub type Seed = Option<i64>;

/// Bijection between external seed values and dense internal community ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedMapping {
    /// `reverse[internal]` = external seed value.
    reverse: Vec<u64>,
}

impl SeedMapping {
    /// Remaps `seeds` into dense internal ids.
    ///
    /// Returns the mapping and the initial internal community of every node.
    /// A node with a missing seed gets a fresh community whose external value
    /// is `max_seed + 1 + graph.to_original_node_id(node)`, which can never
    /// collide with a present seed.
    ///
    /// # Errors
    /// [`ModularityError::SeedLengthMismatch`] when `seeds` is not sized to the
    /// graph, [`ModularityError::NegativeSeed`] for a present negative value,
    /// [`ModularityError::MissingSeedOverflow`] when a fresh external id does
    /// not fit in `u64`.
    pub fn from_seeds<G>(graph: &G, seeds: &[Seed]) -> Result<(Self, Vec<NodeId>), ModularityError>
    where
        G: WeightedGraph,
    {
        let n = graph.node_count();
        if seeds.len() != n {
            return Err(ModularityError::SeedLengthMismatch {
                expected: n,
                got: seeds.len(),
            });
        }
        if let Some((node, value)) = seeds
            .iter()
            .enumerate()
            .find_map(|(node, s)| s.filter(|&v| v < 0).map(|v| (node, v)))
        {
            return Err(ModularityError::NegativeSeed { node, value });
        }

        let max_seed = seeds.iter().flatten().copied().max().unwrap_or(0) as u64;
        let mut internal_of: HashMap<u64, NodeId> = HashMap::with_capacity(n);
        let mut reverse = Vec::new();
        let mut initial = Vec::with_capacity(n);
        for (node, seed) in seeds.iter().enumerate() {
            let external = match seed {
                Some(v) => *v as u64,
                None => {
                    let original_id = graph.to_original_node_id(node);
                    (max_seed + 1).checked_add(original_id).ok_or(
                        ModularityError::MissingSeedOverflow {
                            node,
                            original_id,
                            max_seed,
                        },
                    )?
                }
            };
            let internal = *internal_of.entry(external).or_insert_with(|| {
                reverse.push(external);
                reverse.len() - 1
            });
            initial.push(internal);
        }
        log::debug!(
            "Seeding mapped {n} nodes onto {} initial communities",
            reverse.len()
        );
        Ok((Self { reverse }, initial))
    }

    /// External seed value of internal community `internal`.
    #[inline]
    pub fn to_seed(&self, internal: NodeId) -> u64 {
        self.reverse[internal]
    }

    /// Number of distinct initial communities.
    pub fn community_count(&self) -> usize {
        self.reverse.len()
    }
}
