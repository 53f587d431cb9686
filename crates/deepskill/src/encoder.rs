//! Embeds query roots from their sampled temporal neighborhood.

use ndarray::{s, Array1, Array2, ArrayView2};

use crate::config::EncoderArch;
use crate::graph::TemporalGraph;
use crate::memory::MemorySnapshot;
use crate::nn::{hstack, leaky_relu, relu};
use crate::params::{AttentionLayerParams, ModelParams};
use crate::sampler::{SampledHop, SubgraphBlock};
use crate::types::{EdgeId, EngineError, EngineResult, EntityCode};

/// Slope of the leaky ReLU applied to attention scores.
const SCORE_SLOPE: f32 = 0.2;

/// Stateless encoder over a sampled block. Reads memory, never writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphEncoder {
    arch: EncoderArch,
}

impl GraphEncoder {
    pub fn new(arch: EncoderArch) -> Self {
        Self { arch }
    }

    pub fn arch(&self) -> EncoderArch {
        self.arch
    }

    /// Hops the block must carry for this encoder.
    pub fn required_depth(&self, params: &ModelParams) -> usize {
        match self.arch {
            EncoderArch::Attention => params.layers.len(),
            EncoderArch::Identity => 0,
        }
    }

    /// One embedding row per root, in root order.
    pub fn encode(
        &self,
        params: &ModelParams,
        graph: &TemporalGraph,
        block: &SubgraphBlock,
        memory: &MemorySnapshot,
    ) -> EngineResult<Array2<f32>> {
        let roots = codes(block, 0);
        match self.arch {
            EncoderArch::Identity => memory.rows(&roots),
            EncoderArch::Attention => {
                let depth = params.layers.len();
                if block.depth() < depth {
                    return Err(EngineError::Config(format!(
                        "attention over {depth} layers needs {depth} sampled hops, block has {}",
                        block.depth()
                    )));
                }

                // h[j] holds the current representation of every node at level j.
                let mut h: Vec<Array2<f32>> = (0..=depth)
                    .map(|level| memory.rows(&codes(block, level)))
                    .collect::<EngineResult<_>>()?;

                for layer in &params.layers {
                    let levels = h.len() - 1;
                    let mut next = Vec::with_capacity(levels);
                    for j in 0..levels {
                        next.push(attend(
                            layer,
                            params.dims.heads,
                            graph,
                            &block.hops[j],
                            h[j].view(),
                            h[j + 1].view(),
                        ));
                    }
                    h = next;
                }

                h.into_iter()
                    .next()
                    .ok_or_else(|| EngineError::Config("encoder produced no output".to_string()))
            }
        }
    }
}

fn codes(block: &SubgraphBlock, level: usize) -> Vec<EntityCode> {
    block.level(level).iter().map(|q| q.code).collect()
}

/// One attention layer from `hop`'s neighbors onto its roots.
///
/// `h_dst` has one row per root; `h_nbr` one row per neighbor, flattened in
/// root order. Roots without neighbors aggregate to zero.
fn attend(
    layer: &AttentionLayerParams,
    heads: usize,
    graph: &TemporalGraph,
    hop: &SampledHop,
    h_dst: ArrayView2<f32>,
    h_nbr: ArrayView2<f32>,
) -> Array2<f32> {
    let n_dst = h_dst.nrows();
    let dim = layer.w_q.output_dim();
    let head_dim = dim / heads.max(1);

    let zero_dt = layer.time_encoder.encode(&vec![0.0; n_dst]);
    let q = layer.w_q.forward(hstack(&[h_dst, zero_dt.view()]).view());

    let mut edges: Vec<EdgeId> = Vec::with_capacity(h_nbr.nrows());
    let mut deltas: Vec<f32> = Vec::with_capacity(h_nbr.nrows());
    for (root, nbrs) in hop.roots.iter().zip(&hop.neighbors) {
        for n in nbrs {
            edges.push(n.edge);
            deltas.push((root.ts - n.ts) as f32);
        }
    }
    let features = graph.edge_features(&edges);
    let time = layer.time_encoder.encode(&deltas);
    let kv_input = hstack(&[h_nbr, features.view(), time.view()]);
    let k = layer.w_k.forward(kv_input.view());
    let v = layer.w_v.forward(kv_input.view());

    let mut aggregated = Array2::<f32>::zeros((n_dst, dim));
    let mut offset = 0;
    for (i, nbrs) in hop.neighbors.iter().enumerate() {
        let count = nbrs.len();
        if count == 0 {
            continue;
        }
        let k_i = k.slice(s![offset..offset + count, ..]);
        let v_i = v.slice(s![offset..offset + count, ..]);
        for head in 0..heads {
            let cols = head * head_dim..(head + 1) * head_dim;
            let q_h = q.slice(s![i, cols.clone()]);
            let k_h = k_i.slice(s![.., cols.clone()]);
            let v_h = v_i.slice(s![.., cols.clone()]);

            let mut scores: Array1<f32> = k_h.dot(&q_h).mapv(|x| leaky_relu(x, SCORE_SLOPE));
            let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            scores.mapv_inplace(|x| (x - max).exp());
            let total = scores.sum().max(1e-12);
            scores.mapv_inplace(|x| x / total);

            let weighted = v_h.t().dot(&scores);
            aggregated.slice_mut(s![i, cols]).assign(&weighted);
        }
        offset += count;
    }

    let combined = layer.w_out.forward(hstack(&[aggregated.view(), h_dst]).view());
    layer.norm.forward(combined.mapv(relu).view())
}
