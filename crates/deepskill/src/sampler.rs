//! Causal temporal neighbor sampling.
//!
//! Every neighbor returned for a root queried at time `t` comes from an
//! interaction with timestamp strictly less than `t`.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::config::{SamplingConfig, SamplingStrategy};
use crate::graph::TemporalGraph;
use crate::types::{EdgeId, EngineError, EngineResult, EntityCode, Timestamp};

/// An entity queried at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootQuery {
    pub code: EntityCode,
    pub ts: Timestamp,
}

/// A sampled neighbor interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    pub code: EntityCode,
    pub edge: EdgeId,
    pub ts: Timestamp,
}

/// Neighbor sets for one hop, one entry per root in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledHop {
    pub roots: Vec<RootQuery>,
    pub neighbors: Vec<Vec<Neighbor>>,
}

impl SampledHop {
    /// Total neighbors across all roots.
    pub fn fan_out(&self) -> usize {
        self.neighbors.iter().map(Vec::len).sum()
    }
}

/// The k-hop neighborhood sampled for one query. Consumed once by the encoder.
///
/// Level 0 holds the query roots; level `j + 1` holds the neighbors of level
/// `j` flattened in root order. `hops[j]` links level `j` to level `j + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubgraphBlock {
    pub hops: Vec<SampledHop>,
    leaves: Vec<RootQuery>,
}

impl SubgraphBlock {
    /// A block with no structure: the roots only.
    pub fn roots_only(roots: Vec<RootQuery>) -> Self {
        Self {
            hops: Vec::new(),
            leaves: roots,
        }
    }

    pub fn depth(&self) -> usize {
        self.hops.len()
    }

    pub fn roots(&self) -> &[RootQuery] {
        self.level(0)
    }

    /// Nodes at `level`, each with the time its own history is read at.
    pub fn level(&self, level: usize) -> &[RootQuery] {
        if level < self.hops.len() {
            &self.hops[level].roots
        } else {
            &self.leaves
        }
    }

    /// Every node of every level, level by level.
    pub fn all_nodes(&self) -> impl Iterator<Item = &RootQuery> + '_ {
        (0..=self.depth()).flat_map(move |l| self.level(l).iter())
    }

    pub fn node_count(&self) -> usize {
        (0..=self.depth()).map(|l| self.level(l).len()).sum()
    }
}

/// Samples bounded, causally valid neighborhoods from a temporal graph.
pub struct TemporalSampler {
    graph: Arc<TemporalGraph>,
    config: SamplingConfig,
    pool: Option<rayon::ThreadPool>,
}

impl TemporalSampler {
    pub fn new(graph: Arc<TemporalGraph>, config: SamplingConfig) -> EngineResult<Self> {
        let pool = if config.threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.threads)
                .thread_name(|i| format!("deepskill-sampler-{i}"))
                .build()
                .map_err(|e| EngineError::Config(format!("Failed to build sampler pool: {e}")))?;
            Some(pool)
        } else {
            None
        };

        Ok(Self {
            graph,
            config,
            pool,
        })
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// Sample every configured hop.
    pub fn sample(&self, roots: Vec<RootQuery>) -> SubgraphBlock {
        self.sample_depth(roots, self.config.layers)
    }

    /// Sample the first `depth` hops. Blocks until every root is resolved.
    pub fn sample_depth(&self, roots: Vec<RootQuery>, depth: usize) -> SubgraphBlock {
        let depth = depth.min(self.config.layers);
        let mut hops = Vec::with_capacity(depth);
        let mut frontier = roots;

        for hop in 0..depth {
            let fanout = self.config.neighbors[hop];
            let neighbors = self.resolve_all(&frontier, hop, fanout);

            let next: Vec<RootQuery> = frontier
                .iter()
                .zip(&neighbors)
                .flat_map(|(root, nbrs)| {
                    let prop_time = self.config.prop_time;
                    nbrs.iter().map(move |n| RootQuery {
                        code: n.code,
                        ts: if prop_time { root.ts } else { n.ts },
                    })
                })
                .collect();

            hops.push(SampledHop {
                roots: frontier,
                neighbors,
            });
            frontier = next;
        }

        SubgraphBlock {
            hops,
            leaves: frontier,
        }
    }

    fn resolve_all(&self, roots: &[RootQuery], hop: usize, fanout: usize) -> Vec<Vec<Neighbor>> {
        let run = || {
            roots
                .par_iter()
                .map(|root| self.resolve_one(root, hop, fanout))
                .collect::<Vec<_>>()
        };
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }

    /// Neighbors of one root, highest timestamp first.
    fn resolve_one(&self, root: &RootQuery, hop: usize, fanout: usize) -> Vec<Neighbor> {
        let lower = (self.config.duration > 0).then(|| root.ts.saturating_sub(self.config.duration));
        let (start, end) = self.graph.history_range(root.code, lower, root.ts);
        let available = end - start;
        if available == 0 {
            return Vec::new();
        }

        let slots: Vec<usize> = match self.config.strategy {
            SamplingStrategy::Recent => (start..end).rev().take(fanout).collect(),
            SamplingStrategy::Uniform => {
                if available <= fanout {
                    (start..end).rev().collect()
                } else {
                    let mut rng = StdRng::seed_from_u64(mix_seed(
                        self.config.seed,
                        hop as u64,
                        root.code as u64,
                        root.ts as u64,
                    ));
                    let mut picked: Vec<usize> =
                        rand::seq::index::sample(&mut rng, available, fanout)
                            .into_iter()
                            .map(|i| start + i)
                            .collect();
                    picked.sort_unstable_by(|a, b| b.cmp(a));
                    picked
                }
            }
        };

        slots
            .into_iter()
            .map(|slot| {
                let adj = self.graph.adjacent(slot);
                Neighbor {
                    code: adj.neighbor,
                    edge: adj.edge,
                    ts: adj.ts,
                }
            })
            .collect()
    }
}

/// Derive a per-root seed so results do not depend on batch composition.
fn mix_seed(seed: u64, hop: u64, code: u64, ts: u64) -> u64 {
    let mut x = seed ^ 0x9E37_79B9_7F4A_7C15;
    for v in [hop, code, ts] {
        x = x.wrapping_add(v).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        x ^= x >> 31;
    }
    x
}
