//! The immutable interaction stream and its CSR adjacency.

use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::storage::{self, ArtifactKind};
use crate::types::{
    EdgeId, EngineError, EngineResult, EntityCode, Interaction, Timestamp, EDGE_FEATURE_DIM,
};

/// Time-sorted interaction table plus an undirected CSR adjacency.
///
/// Each entity's adjacency slice `indptr[v]..indptr[v + 1]` is sorted by
/// `(timestamp, edge id)`, so the causal prefix for a query time is found by
/// binary search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalGraph {
    entity_count: usize,
    interactions: Vec<Interaction>,
    indptr: Vec<usize>,
    indices: Vec<EntityCode>,
    eid: Vec<EdgeId>,
    ts: Vec<Timestamp>,
}

/// One adjacency entry: the other endpoint, the edge and its timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjacentEdge {
    pub neighbor: EntityCode,
    pub edge: EdgeId,
    pub ts: Timestamp,
}

impl TemporalGraph {
    /// Build the adjacency from a time-sorted interaction table.
    pub fn from_interactions(
        entity_count: usize,
        interactions: Vec<Interaction>,
    ) -> EngineResult<Self> {
        validate_interactions(entity_count, &interactions)?;
        if interactions.len() > EdgeId::MAX as usize {
            return Err(EngineError::CorruptArtifact(format!(
                "{} interactions exceed the edge id range",
                interactions.len()
            )));
        }

        let mut degree = vec![0usize; entity_count];
        for edge in &interactions {
            degree[edge.src as usize] += 1;
            degree[edge.dst as usize] += 1;
        }

        let mut indptr = Vec::with_capacity(entity_count + 1);
        indptr.push(0);
        for d in &degree {
            let last = indptr[indptr.len() - 1];
            indptr.push(last + d);
        }

        let total = indptr[entity_count];
        let mut indices = vec![0; total];
        let mut eid = vec![0; total];
        let mut ts = vec![0; total];
        let mut fill = indptr[..entity_count].to_vec();

        // Interactions are already time-sorted, so appending in order keeps
        // every slice sorted by (timestamp, edge id).
        for (id, edge) in interactions.iter().enumerate() {
            for (from, to) in [(edge.src, edge.dst), (edge.dst, edge.src)] {
                let slot = fill[from as usize];
                indices[slot] = to;
                eid[slot] = id as EdgeId;
                ts[slot] = edge.ts;
                fill[from as usize] += 1;
            }
        }

        Ok(Self {
            entity_count,
            interactions,
            indptr,
            indices,
            eid,
            ts,
        })
    }

    /// Load a graph artifact and check its internal consistency.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let graph: TemporalGraph = storage::read_artifact_file(ArtifactKind::Graph, path)?;
        graph.validate()?;
        tracing::info!(
            "Loaded interaction graph: {} entities, {} interactions",
            graph.entity_count,
            graph.interactions.len()
        );
        Ok(graph)
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        storage::write_artifact_file(
            ArtifactKind::Graph,
            self.interactions.len() as u64,
            self,
            path,
        )
    }

    /// Verify that the adjacency agrees with the interaction table.
    pub fn validate(&self) -> EngineResult<()> {
        let corrupt = |msg: String| Err(EngineError::CorruptArtifact(format!("graph: {msg}")));

        validate_interactions(self.entity_count, &self.interactions)?;

        if self.indptr.len() != self.entity_count + 1 || self.indptr.first() != Some(&0) {
            return corrupt(format!(
                "indptr has {} entries for {} entities",
                self.indptr.len(),
                self.entity_count
            ));
        }
        if self.indptr.windows(2).any(|w| w[0] > w[1]) {
            return corrupt("indptr is not monotone".to_string());
        }
        let total = self.indptr[self.entity_count];
        if total != 2 * self.interactions.len()
            || self.indices.len() != total
            || self.eid.len() != total
            || self.ts.len() != total
        {
            return corrupt(format!(
                "adjacency arrays hold {total} entries, expected {}",
                2 * self.interactions.len()
            ));
        }

        for v in 0..self.entity_count {
            let range = self.indptr[v]..self.indptr[v + 1];
            let mut prev: Option<(Timestamp, EdgeId)> = None;
            for slot in range {
                let id = self.eid[slot];
                let Some(edge) = self.interactions.get(id as usize) else {
                    return corrupt(format!("edge id {id} out of range"));
                };
                let other = self.indices[slot];
                let endpoints_match = (edge.src as usize == v && edge.dst == other)
                    || (edge.dst as usize == v && edge.src == other);
                if !endpoints_match || edge.ts != self.ts[slot] {
                    return corrupt(format!("adjacency entry {slot} disagrees with edge {id}"));
                }
                let key = (self.ts[slot], id);
                if prev.is_some_and(|p| p > key) {
                    return corrupt(format!("adjacency of entity {v} is not time-sorted"));
                }
                prev = Some(key);
            }
        }

        Ok(())
    }

    pub fn entity_count(&self) -> usize {
        self.entity_count
    }

    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    pub fn interaction(&self, edge: EdgeId) -> Option<&Interaction> {
        self.interactions.get(edge as usize)
    }

    /// Timestamp of the interaction at table index `index`.
    pub fn ts_at(&self, index: usize) -> Option<Timestamp> {
        self.interactions.get(index).map(|e| e.ts)
    }

    /// First table index at or after `from` whose timestamp is `>= t`.
    pub fn first_at_or_after(&self, from: usize, t: Timestamp) -> usize {
        let from = from.min(self.interactions.len());
        from + self.interactions[from..].partition_point(|e| e.ts < t)
    }

    /// Query time that lies beyond every interaction in the stream.
    pub fn horizon(&self) -> Timestamp {
        self.interactions
            .last()
            .map(|e| e.ts.saturating_add(1))
            .unwrap_or(0)
    }

    /// Feature rows for a list of edges.
    pub fn edge_features(&self, edges: &[EdgeId]) -> Array2<f32> {
        let mut out = Array2::zeros((edges.len(), EDGE_FEATURE_DIM));
        for (row, id) in edges.iter().enumerate() {
            if let Some(edge) = self.interaction(*id) {
                for (k, v) in edge.features().into_iter().enumerate() {
                    out[[row, k]] = v;
                }
            }
        }
        out
    }

    /// Adjacency of `node` restricted to `lower <= ts < upper`, oldest first.
    pub fn history(&self, node: EntityCode, lower: Option<Timestamp>, upper: Timestamp) -> &[Timestamp] {
        let (start, end) = self.history_range(node, lower, upper);
        &self.ts[start..end]
    }

    /// Slot range of the causal history of `node` before `upper`.
    pub(crate) fn history_range(
        &self,
        node: EntityCode,
        lower: Option<Timestamp>,
        upper: Timestamp,
    ) -> (usize, usize) {
        let v = node as usize;
        if v >= self.entity_count {
            return (0, 0);
        }
        let (lo, hi) = (self.indptr[v], self.indptr[v + 1]);
        let slice = &self.ts[lo..hi];
        let end = lo + slice.partition_point(|t| *t < upper);
        let start = match lower {
            Some(l) => lo + slice.partition_point(|t| *t < l),
            None => lo,
        };
        (start.min(end), end)
    }

    pub(crate) fn adjacent(&self, slot: usize) -> AdjacentEdge {
        AdjacentEdge {
            neighbor: self.indices[slot],
            edge: self.eid[slot],
            ts: self.ts[slot],
        }
    }
}

fn validate_interactions(entity_count: usize, interactions: &[Interaction]) -> EngineResult<()> {
    for (i, edge) in interactions.iter().enumerate() {
        if edge.src as usize >= entity_count || edge.dst as usize >= entity_count {
            return Err(EngineError::CorruptArtifact(format!(
                "interaction {i} references entity outside 0..{entity_count}"
            )));
        }
        if edge.ts < 0 || edge.ts == Timestamp::MAX {
            return Err(EngineError::CorruptArtifact(format!(
                "interaction {i} has timestamp {} outside 0..{}",
                edge.ts,
                Timestamp::MAX
            )));
        }
        if i > 0 && interactions[i - 1].ts > edge.ts {
            return Err(EngineError::CorruptArtifact(format!(
                "interaction {i} is out of time order"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Outcome, TimeControl};

    fn edge(src: EntityCode, dst: EntityCode, ts: Timestamp) -> Interaction {
        Interaction {
            src,
            dst,
            ts,
            outcome: Outcome::FirstParty,
            time_control: Some(TimeControl::new(5, 0)),
        }
    }

    fn sample_graph() -> TemporalGraph {
        TemporalGraph::from_interactions(
            4,
            vec![edge(0, 1, 1), edge(1, 2, 2), edge(2, 0, 3), edge(0, 1, 3)],
        )
        .unwrap()
    }

    #[test]
    fn test_csr_is_undirected() {
        let g = sample_graph();
        assert_eq!(g.len(), 4);
        assert_eq!(g.history(0, None, 100), &[1, 3, 3]);
        assert_eq!(g.history(1, None, 100), &[1, 2, 3]);
        assert!(g.history(3, None, 100).is_empty());
        g.validate().unwrap();
    }

    #[test]
    fn test_history_is_strictly_before() {
        let g = sample_graph();
        assert_eq!(g.history(0, None, 3), &[1]);
        assert_eq!(g.history(0, None, 1), &[] as &[Timestamp]);
        assert_eq!(g.history(1, Some(2), 4), &[2, 3]);
    }

    #[test]
    fn test_first_at_or_after() {
        let g = sample_graph();
        assert_eq!(g.first_at_or_after(0, 3), 2);
        assert_eq!(g.first_at_or_after(3, 3), 3);
        assert_eq!(g.first_at_or_after(0, 10), 4);
        assert_eq!(g.horizon(), 4);
    }

    #[test]
    fn test_rejects_unsorted_stream() {
        let result = TemporalGraph::from_interactions(3, vec![edge(0, 1, 5), edge(1, 2, 4)]);
        assert!(matches!(result, Err(EngineError::CorruptArtifact(_))));
    }

    #[test]
    fn test_rejects_timestamps_outside_stream_range() {
        let negative = TemporalGraph::from_interactions(2, vec![edge(0, 1, -10), edge(0, 1, -5)]);
        assert!(matches!(negative, Err(EngineError::CorruptArtifact(_))));

        let overflowing = TemporalGraph::from_interactions(2, vec![edge(0, 1, Timestamp::MAX)]);
        assert!(matches!(overflowing, Err(EngineError::CorruptArtifact(_))));

        let g = TemporalGraph::from_interactions(2, vec![edge(0, 1, 0), edge(0, 1, Timestamp::MAX - 1)])
            .unwrap();
        assert_eq!(g.horizon(), Timestamp::MAX);
    }

    #[test]
    fn test_rejects_unknown_entity() {
        let result = TemporalGraph::from_interactions(2, vec![edge(0, 2, 1)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_detects_corrupt_adjacency() {
        let mut g = sample_graph();
        g.ts[0] = 99;
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_edge_features() {
        let g = sample_graph();
        let f = g.edge_features(&[0, 2]);
        assert_eq!(f.shape(), &[2, EDGE_FEATURE_DIM]);
        assert_eq!(f[[0, 0]], 1.0);
        assert!((f[[1, 3]] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.dskg");
        let g = sample_graph();
        g.save(&path).unwrap();
        assert_eq!(TemporalGraph::load(&path).unwrap(), g);
    }
}
