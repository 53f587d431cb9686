//! Lazy, single-direction catch-up over the interaction stream.

use std::ops::Range;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::{OrderingPolicy, ReplayConfig};
use crate::graph::TemporalGraph;
use crate::types::{EngineError, EngineResult, Interaction, Timestamp};

/// Observable replay position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReplayState {
    /// Every interaction before `cursor` is folded in; more remain.
    CaughtUp { cursor: usize },
    /// The whole stream is folded in. Further catch-up calls are no-ops.
    Exhausted { cursor: usize },
}

/// What one catch-up call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CatchUp {
    pub from: usize,
    pub to: usize,
    pub batches: usize,
    /// Time the caller's query is evaluated at.
    pub query_ts: Timestamp,
}

/// Owns the cursor. The cursor never moves backwards except through `reset`.
#[derive(Debug, Clone)]
pub struct ReplayController {
    cursor: usize,
    batch_size: usize,
    ordering: OrderingPolicy,
    deadline: Option<Duration>,
}

impl ReplayController {
    pub fn new(config: &ReplayConfig) -> Self {
        Self {
            cursor: 0,
            batch_size: config.batch_size.max(1),
            ordering: config.ordering,
            deadline: config.deadline_ms.map(Duration::from_millis),
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn state(&self, graph: &TemporalGraph) -> ReplayState {
        if self.cursor >= graph.len() {
            ReplayState::Exhausted {
                cursor: self.cursor,
            }
        } else {
            ReplayState::CaughtUp {
                cursor: self.cursor,
            }
        }
    }

    /// Timestamp of the last interaction folded in.
    pub fn replayed_until(&self, graph: &TemporalGraph) -> Option<Timestamp> {
        self.cursor.checked_sub(1).and_then(|i| graph.ts_at(i))
    }

    /// Time a query for `requested` is evaluated at, under the ordering policy.
    pub fn query_time(&self, graph: &TemporalGraph, requested: Timestamp) -> EngineResult<Timestamp> {
        match self.replayed_until(graph) {
            Some(until) if until >= requested => match self.ordering {
                OrderingPolicy::Reject => Err(EngineError::ReplayOrderingViolation {
                    requested,
                    replayed_until: until,
                }),
                OrderingPolicy::ServeFromCursor => {
                    tracing::warn!(
                        "Query at {} is behind replayed history (until {}); serving from cursor",
                        requested,
                        until
                    );
                    Ok(until + 1)
                }
            },
            _ => Ok(requested),
        }
    }

    /// The next batch on the way to `target`, or `None` when caught up.
    ///
    /// A batch never reaches an interaction at or after `target`, and all
    /// interactions sharing its last timestamp land in the same batch.
    pub fn next_batch(&self, graph: &TemporalGraph, target: Timestamp) -> Option<Range<usize>> {
        let stop = graph.first_at_or_after(self.cursor, target);
        if stop <= self.cursor {
            return None;
        }
        let mut end = (self.cursor + self.batch_size).min(stop);
        while end < stop && graph.ts_at(end) == graph.ts_at(end - 1) {
            end += 1;
        }
        Some(self.cursor..end)
    }

    /// Fold every interaction before `requested` in through `apply`.
    ///
    /// `apply` must process a batch completely or fail; the cursor only moves
    /// past batches that succeeded.
    pub fn catch_up<F>(
        &mut self,
        graph: &TemporalGraph,
        requested: Timestamp,
        mut apply: F,
    ) -> EngineResult<CatchUp>
    where
        F: FnMut(&[Interaction]) -> EngineResult<()>,
    {
        let query_ts = self.query_time(graph, requested)?;
        let from = self.cursor;
        let started = Instant::now();
        let mut batches = 0;

        while let Some(range) = self.next_batch(graph, query_ts) {
            if let Some(deadline) = self.deadline {
                if started.elapsed() >= deadline {
                    tracing::warn!(
                        "Replay deadline of {:?} reached at cursor {}",
                        deadline,
                        self.cursor
                    );
                    return Err(EngineError::DeadlineExceeded {
                        cursor: self.cursor,
                    });
                }
            }

            apply(&graph.interactions()[range.clone()])?;
            tracing::debug!(
                "Replayed batch {}..{} ({} interactions)",
                range.start,
                range.end,
                range.len()
            );
            self.cursor = range.end;
            batches += 1;
        }

        if batches > 0 {
            tracing::info!(
                "Caught up to {}: cursor {} -> {} in {} batches ({:?})",
                query_ts,
                from,
                self.cursor,
                batches,
                started.elapsed()
            );
        }

        Ok(CatchUp {
            from,
            to: self.cursor,
            batches,
            query_ts,
        })
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityCode, Outcome};

    fn game(src: EntityCode, dst: EntityCode, ts: Timestamp) -> Interaction {
        Interaction {
            src,
            dst,
            ts,
            outcome: Outcome::Draw,
            time_control: None,
        }
    }

    /// Timestamps 1, 2, 2, 2, 3, 5.
    fn graph() -> TemporalGraph {
        TemporalGraph::from_interactions(
            3,
            vec![
                game(0, 1, 1),
                game(1, 2, 2),
                game(0, 2, 2),
                game(0, 1, 2),
                game(2, 1, 3),
                game(0, 1, 5),
            ],
        )
        .unwrap()
    }

    fn controller(batch_size: usize, ordering: OrderingPolicy) -> ReplayController {
        ReplayController::new(&ReplayConfig {
            batch_size,
            ordering,
            deadline_ms: None,
        })
    }

    fn collect(ctl: &mut ReplayController, g: &TemporalGraph, t: Timestamp) -> Vec<Vec<Timestamp>> {
        let mut seen = Vec::new();
        ctl.catch_up(g, t, |batch| {
            seen.push(batch.iter().map(|e| e.ts).collect());
            Ok(())
        })
        .unwrap();
        seen
    }

    #[test]
    fn test_ties_stay_in_one_batch() {
        let g = graph();
        let mut ctl = controller(2, OrderingPolicy::Reject);
        let batches = collect(&mut ctl, &g, 10);
        assert_eq!(batches, vec![vec![1, 2, 2, 2], vec![3, 5]]);
        assert_eq!(ctl.state(&g), ReplayState::Exhausted { cursor: 6 });
    }

    #[test]
    fn test_never_crosses_target() {
        let g = graph();
        let mut ctl = controller(100, OrderingPolicy::Reject);
        assert_eq!(collect(&mut ctl, &g, 2), vec![vec![1]]);
        assert_eq!(ctl.cursor(), 1);
        assert_eq!(collect(&mut ctl, &g, 4), vec![vec![2, 2, 2, 3]]);
        assert_eq!(ctl.state(&g), ReplayState::CaughtUp { cursor: 5 });
    }

    #[test]
    fn test_exhausted_is_noop() {
        let g = graph();
        let mut ctl = controller(3, OrderingPolicy::Reject);
        collect(&mut ctl, &g, 100);
        assert!(collect(&mut ctl, &g, 200).is_empty());
        assert_eq!(ctl.cursor(), 6);
    }

    #[test]
    fn test_rejects_query_behind_cursor() {
        let g = graph();
        let mut ctl = controller(3, OrderingPolicy::Reject);
        collect(&mut ctl, &g, 3);
        assert_eq!(ctl.cursor(), 4);
        let err = ctl.catch_up(&g, 2, |_| Ok(())).unwrap_err();
        assert!(matches!(
            err,
            EngineError::ReplayOrderingViolation {
                requested: 2,
                replayed_until: 2
            }
        ));
        assert_eq!(ctl.cursor(), 4);
        // Repeating the same time is fine.
        assert!(collect(&mut ctl, &g, 3).is_empty());
    }

    #[test]
    fn test_serve_from_cursor() {
        let g = graph();
        let mut ctl = controller(3, OrderingPolicy::ServeFromCursor);
        collect(&mut ctl, &g, 4);
        let summary = ctl.catch_up(&g, 1, |_| Ok(())).unwrap();
        assert_eq!(summary.query_ts, 4);
        assert_eq!(summary.batches, 0);
        assert_eq!(ctl.cursor(), 5);
    }

    #[test]
    fn test_failed_batch_keeps_cursor() {
        let g = graph();
        let mut ctl = controller(1, OrderingPolicy::Reject);
        let mut calls = 0;
        let result = ctl.catch_up(&g, 10, |_| {
            calls += 1;
            if calls == 2 {
                Err(EngineError::Config("boom".to_string()))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
        assert_eq!(ctl.cursor(), 1);
    }

    #[test]
    fn test_deadline() {
        let g = graph();
        let mut ctl = ReplayController::new(&ReplayConfig {
            batch_size: 1,
            ordering: OrderingPolicy::Reject,
            deadline_ms: Some(0),
        });
        let err = ctl.catch_up(&g, 10, |_| Ok(())).unwrap_err();
        assert!(matches!(err, EngineError::DeadlineExceeded { cursor: 0 }));
        // Nothing to replay means nothing to time out.
        assert!(ctl.catch_up(&g, 0, |_| Ok(())).is_ok());
    }

    #[test]
    fn test_deadline_after_progress_resumes_at_cursor() {
        let g = graph();
        let mut ctl = ReplayController::new(&ReplayConfig {
            batch_size: 1,
            ordering: OrderingPolicy::Reject,
            deadline_ms: Some(20),
        });
        let mut seen: Vec<Vec<Timestamp>> = Vec::new();
        let err = ctl
            .catch_up(&g, 10, |batch| {
                seen.push(batch.iter().map(|e| e.ts).collect());
                if seen.len() == 2 {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::DeadlineExceeded { cursor: 4 }));
        assert_eq!(ctl.cursor(), 4);
        assert_eq!(ctl.state(&g), ReplayState::CaughtUp { cursor: 4 });

        // The next call starts a fresh budget and picks up where the last one stopped.
        let summary = ctl
            .catch_up(&g, 10, |batch| {
                seen.push(batch.iter().map(|e| e.ts).collect());
                Ok(())
            })
            .unwrap();
        assert_eq!(summary.from, 4);
        assert_eq!(summary.to, 6);
        assert_eq!(ctl.state(&g), ReplayState::Exhausted { cursor: 6 });
        assert_eq!(seen, vec![vec![1], vec![2, 2, 2], vec![3], vec![5]]);
    }

    #[test]
    fn test_reset() {
        let g = graph();
        let mut ctl = controller(2, OrderingPolicy::Reject);
        collect(&mut ctl, &g, 10);
        ctl.reset();
        assert_eq!(ctl.cursor(), 0);
        assert_eq!(ctl.replayed_until(&g), None);
        assert_eq!(collect(&mut ctl, &g, 2), vec![vec![1]]);
    }
}
