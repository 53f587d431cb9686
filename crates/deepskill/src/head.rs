//! Pairwise outcome head.

use ndarray::{Array2, ArrayView2};

use crate::nn::{relu, softmax_rows};
use crate::params::HeadParams;
use crate::types::{OutcomeDistribution, TimeControl, CONTEXT_DIM, OUTCOME_CLASSES};

impl HeadParams {
    /// `softmax(W_out relu(W_src a + W_dst b + W_ctx c))`, one row per pair.
    pub fn forward(
        &self,
        src: ArrayView2<f32>,
        dst: ArrayView2<f32>,
        context: ArrayView2<f32>,
    ) -> Array2<f32> {
        let hidden = self.src.forward(src) + self.dst.forward(dst) + self.context.forward(context);
        let mut logits = self.out.forward(hidden.mapv(relu).view());
        softmax_rows(&mut logits);
        logits
    }
}

/// Context rows for a list of time controls.
pub fn context_rows(controls: &[Option<TimeControl>]) -> Array2<f32> {
    let mut out = Array2::zeros((controls.len(), CONTEXT_DIM));
    for (r, tc) in controls.iter().enumerate() {
        for (c, v) in TimeControl::features(tc.as_ref()).into_iter().enumerate() {
            out[[r, c]] = v;
        }
    }
    out
}

/// Split head output into distributions.
pub fn distributions(probs: &Array2<f32>) -> Vec<OutcomeDistribution> {
    probs
        .rows()
        .into_iter()
        .map(|row| {
            let mut p = [0.0; OUTCOME_CLASSES];
            for (slot, v) in p.iter_mut().zip(row.iter()) {
                *slot = *v;
            }
            OutcomeDistribution::from_probs(p)
        })
        .collect()
}
