//! Per-entity memory and mailbox.
//!
//! Mail written for an interaction is only folded into memory the next time
//! the entity is touched, so memory never reflects an interaction before the
//! encoder has read the state that preceded it.

use std::collections::HashMap;

use ndarray::{s, Array1, Array2, ArrayView1};
use serde::Serialize;

use crate::config::DeliverTo;
use crate::nn::{gather_rows, hstack};
use crate::params::{ModelDims, ModelParams};
use crate::sampler::SampledHop;
use crate::types::{EngineError, EngineResult, EntityCode, Interaction, Timestamp};

/// Mutable memory state of every entity, plus one pending mail slot each.
#[derive(Debug, Clone)]
pub struct MemoryMailbox {
    memory: Array2<f32>,
    memory_ts: Vec<Timestamp>,
    mail: Array2<f32>,
    mail_ts: Vec<Timestamp>,
    /// Generation of the pending mail, `None` when the slot is empty.
    pending: Vec<Option<u64>>,
    next_generation: u64,
    deliver_to: DeliverTo,
}

/// Memory rows for a set of entities with their pending mail applied.
///
/// Reading a snapshot has no effect on the store. Committing it is a
/// separate step, see [`MemoryMailbox::update_memory`].
#[derive(Debug, Clone)]
pub struct MemorySnapshot {
    index: HashMap<EntityCode, usize>,
    codes: Vec<EntityCode>,
    states: Array2<f32>,
    ts: Vec<Timestamp>,
    consumed: Vec<Option<u64>>,
}

impl MemorySnapshot {
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn codes(&self) -> &[EntityCode] {
        &self.codes
    }

    pub fn state(&self, code: EntityCode) -> Option<ArrayView1<'_, f32>> {
        self.index.get(&code).map(|&i| self.states.row(i))
    }

    /// Gather one row per requested code, duplicates allowed.
    pub fn rows(&self, codes: &[EntityCode]) -> EngineResult<Array2<f32>> {
        let mut out = Array2::zeros((codes.len(), self.states.ncols()));
        for (r, code) in codes.iter().enumerate() {
            let i = *self
                .index
                .get(code)
                .ok_or(EngineError::UnknownEntity(*code))?;
            out.row_mut(r).assign(&self.states.row(i));
        }
        Ok(out)
    }

    /// Number of entities whose pending mail was applied.
    pub fn updated_count(&self) -> usize {
        self.consumed.iter().filter(|g| g.is_some()).count()
    }

    fn consumed_generation(&self, code: EntityCode) -> Option<u64> {
        self.index.get(&code).and_then(|&i| self.consumed[i])
    }
}

/// Committed memory of one entity, for inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryState {
    pub values: Vec<f32>,
    pub last_update: Timestamp,
    pub has_pending_mail: bool,
}

impl MemoryMailbox {
    pub fn new(entity_count: usize, dims: &ModelDims, deliver_to: DeliverTo) -> Self {
        Self {
            memory: Array2::zeros((entity_count, dims.memory_dim)),
            memory_ts: vec![0; entity_count],
            mail: Array2::zeros((entity_count, dims.mail_dim())),
            mail_ts: vec![0; entity_count],
            pending: vec![None; entity_count],
            next_generation: 0,
            deliver_to,
        }
    }

    pub fn entity_count(&self) -> usize {
        self.memory.nrows()
    }

    pub fn memory_dim(&self) -> usize {
        self.memory.ncols()
    }

    pub fn deliver_to(&self) -> DeliverTo {
        self.deliver_to
    }

    fn check(&self, code: EntityCode) -> EngineResult<usize> {
        let v = code as usize;
        if v < self.entity_count() {
            Ok(v)
        } else {
            Err(EngineError::UnknownEntity(code))
        }
    }

    /// Memory for `codes` with pending mail folded in through the updater.
    ///
    /// Entities without pending mail keep their stored state untouched.
    pub fn prepare(&self, params: &ModelParams, codes: &[EntityCode]) -> EngineResult<MemorySnapshot> {
        let mut index = HashMap::with_capacity(codes.len());
        let mut unique = Vec::with_capacity(codes.len());
        for &code in codes {
            self.check(code)?;
            if !index.contains_key(&code) {
                index.insert(code, unique.len());
                unique.push(code);
            }
        }

        let mut states = Array2::zeros((unique.len(), self.memory_dim()));
        let mut ts = Vec::with_capacity(unique.len());
        let mut consumed = Vec::with_capacity(unique.len());
        let mut with_mail = Vec::new();

        for (i, &code) in unique.iter().enumerate() {
            let v = code as usize;
            states.row_mut(i).assign(&self.memory.row(v));
            match self.pending[v] {
                Some(generation) => {
                    ts.push(self.mail_ts[v]);
                    consumed.push(Some(generation));
                    with_mail.push(i);
                }
                None => {
                    ts.push(self.memory_ts[v]);
                    consumed.push(None);
                }
            }
        }

        if !with_mail.is_empty() {
            let rows: Vec<usize> = with_mail.iter().map(|&i| unique[i] as usize).collect();
            let mail = gather_rows(self.mail.view(), &rows);
            let hidden = gather_rows(self.memory.view(), &rows);
            let deltas: Vec<f32> = rows
                .iter()
                .map(|&v| (self.mail_ts[v] - self.memory_ts[v]) as f32)
                .collect();
            let time = params.memory_time_encoder.encode(&deltas);
            let input = hstack(&[mail.view(), time.view()]);
            let updated = params.memory_updater.forward(input.view(), hidden.view());
            for (k, &i) in with_mail.iter().enumerate() {
                states.row_mut(i).assign(&updated.row(k));
            }
        }

        Ok(MemorySnapshot {
            index,
            codes: unique,
            states,
            ts,
            consumed,
        })
    }

    /// Write mail for every participant of `batch`, built from the memory in
    /// `snapshot`.
    ///
    /// With neighbor delivery, `hop` must hold the one-hop neighbors of the
    /// roots `[src_0..src_n, dst_0..dst_n]`. A target still holding mail that
    /// `snapshot` did not consume gets the mean of that mail and the new
    /// messages.
    pub fn update_mailbox(
        &mut self,
        batch: &[Interaction],
        snapshot: &MemorySnapshot,
        hop: Option<&SampledHop>,
    ) -> EngineResult<()> {
        let generation = self.next_generation;
        self.next_generation += 1;

        let n = batch.len();
        let mut outgoing = Vec::with_capacity(2 * n);
        for edge in batch {
            let features = Array1::from(edge.features().to_vec());
            let src = snapshot
                .state(edge.src)
                .ok_or(EngineError::UnknownEntity(edge.src))?;
            let dst = snapshot
                .state(edge.dst)
                .ok_or(EngineError::UnknownEntity(edge.dst))?;
            outgoing.push((edge.src, compose_mail(src, dst, features.view()), edge.ts));
            outgoing.push((edge.dst, compose_mail(dst, src, features.view()), edge.ts));
        }

        match (self.deliver_to, hop) {
            (DeliverTo::SelfOnly, _) => {
                // Later interactions overwrite earlier ones.
                for (code, mail, ts) in outgoing {
                    self.write_mail(code, mail.view(), ts, generation)?;
                }
            }
            (DeliverTo::Neighbors, Some(hop)) => {
                let mut combined: HashMap<EntityCode, (Array1<f32>, usize, Timestamp)> =
                    HashMap::new();
                let mut order = Vec::new();
                for (k, (code, mail, ts)) in outgoing.iter().enumerate() {
                    // outgoing interleaves src_i, dst_i; roots list srcs then dsts.
                    let root = if k % 2 == 0 { k / 2 } else { n + k / 2 };
                    let targets = std::iter::once(*code)
                        .chain(hop.neighbors.get(root).into_iter().flatten().map(|nb| nb.code));
                    for target in targets {
                        let entry = combined.entry(target).or_insert_with(|| {
                            order.push(target);
                            (Array1::zeros(mail.len()), 0, *ts)
                        });
                        entry.0 += mail;
                        entry.1 += 1;
                        entry.2 = entry.2.max(*ts);
                    }
                }
                for target in order {
                    if let Some((mut sum, mut count, mut ts)) = combined.remove(&target) {
                        let v = self.check(target)?;
                        if let Some(held) = self.pending[v] {
                            if snapshot.consumed_generation(target) != Some(held) {
                                sum += &self.mail.row(v);
                                count += 1;
                                ts = ts.max(self.mail_ts[v]);
                            }
                        }
                        let mean = sum / count as f32;
                        self.write_mail(target, mean.view(), ts, generation)?;
                    }
                }
            }
            (DeliverTo::Neighbors, None) => {
                return Err(EngineError::Config(
                    "neighbor mail delivery requires a sampled hop".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn write_mail(
        &mut self,
        code: EntityCode,
        mail: ArrayView1<f32>,
        ts: Timestamp,
        generation: u64,
    ) -> EngineResult<()> {
        let v = self.check(code)?;
        self.mail.row_mut(v).assign(&mail);
        self.mail_ts[v] = ts;
        self.pending[v] = Some(generation);
        Ok(())
    }

    /// Commit the states in `snapshot`.
    ///
    /// Entities whose stored memory is already newer than the snapshot are
    /// left alone. Mail is cleared only if it is the mail the snapshot
    /// consumed, so committing twice has the same effect as committing once.
    pub fn update_memory(&mut self, snapshot: &MemorySnapshot) -> EngineResult<usize> {
        let mut written = 0;
        for (i, &code) in snapshot.codes.iter().enumerate() {
            let Some(generation) = snapshot.consumed[i] else {
                continue;
            };
            let v = self.check(code)?;
            if self.memory_ts[v] > snapshot.ts[i] {
                continue;
            }
            self.memory.row_mut(v).assign(&snapshot.states.row(i));
            self.memory_ts[v] = snapshot.ts[i];
            if self.pending[v] == Some(generation) {
                self.pending[v] = None;
            }
            written += 1;
        }
        Ok(written)
    }

    /// Zero every memory row and drop every pending mail.
    pub fn reset(&mut self) {
        self.memory.fill(0.0);
        self.memory_ts.fill(0);
        self.mail.fill(0.0);
        self.mail_ts.fill(0);
        self.pending.fill(None);
        self.next_generation = 0;
    }

    pub fn memory_state(&self, code: EntityCode) -> EngineResult<MemoryState> {
        let v = self.check(code)?;
        Ok(MemoryState {
            values: self.memory.row(v).to_vec(),
            last_update: self.memory_ts[v],
            has_pending_mail: self.pending[v].is_some(),
        })
    }

    /// Entities holding mail that has not been folded into memory yet.
    pub fn pending_count(&self) -> usize {
        self.pending.iter().filter(|p| p.is_some()).count()
    }
}

fn compose_mail(own: ArrayView1<f32>, other: ArrayView1<f32>, features: ArrayView1<f32>) -> Array1<f32> {
    let m = own.len();
    let mut mail = Array1::zeros(2 * m + features.len());
    mail.slice_mut(s![..m]).assign(&own);
    mail.slice_mut(s![m..2 * m]).assign(&other);
    mail.slice_mut(s![2 * m..]).assign(&features);
    mail
}
