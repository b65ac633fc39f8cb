//! The reordering buffer: wraps the async (unordered) consumer to restore
//! strict `jobid` order for the sync map mode.

use std::collections::BTreeMap;

use crate::error::ProtonError;
use crate::job::{JobId, WorkerOutput};

/// A real output or a synthetic placeholder for a `jobid` that never
/// produced one (because a non-fatal error consumed it).
#[derive(Debug, Clone)]
pub enum OrderedItem<Ans> {
    Output(WorkerOutput<Ans>),
    /// Zero-duration, absent-answer placeholder for a skipped `jobid`.
    Missing(JobId),
}

impl<Ans> OrderedItem<Ans> {
    pub fn jobid(&self) -> JobId {
        match self {
            OrderedItem::Output(output) => output.jobid,
            OrderedItem::Missing(jobid) => *jobid,
        }
    }
}

/// Consumer-side reassembly buffer. `bound` caps how far ahead of `expected`
/// the pending set may grow before the run fails with
/// [`ProtonError::WaitingQueueFull`] — out-of-order skew beyond that is
/// treated as unrecoverable, per spec.md §4.7.
pub(crate) struct ReorderBuffer<Ans> {
    expected: JobId,
    pending: BTreeMap<JobId, WorkerOutput<Ans>>,
    bound: usize,
}

impl<Ans> ReorderBuffer<Ans> {
    pub(crate) fn new(bound: usize) -> Self {
        Self {
            expected: 0,
            pending: BTreeMap::new(),
            bound,
        }
    }

    /// Call once per `WorkerOutput` drained from the underlying consumer, in
    /// whatever order it arrives. Returns items that are now safe to deliver
    /// to the user, in strictly increasing `jobid` order — zero, one, or
    /// more than one if the arrival unblocked a run of buffered items.
    pub(crate) fn accept<K, E>(
        &mut self,
        output: WorkerOutput<Ans>,
    ) -> Result<Vec<OrderedItem<Ans>>, ProtonError<K, E>>
    where
        K: std::fmt::Debug,
        E: std::error::Error,
    {
        if output.jobid < self.expected {
            return Err(crate::error::FatalReason::Protocol(
                "reorder buffer received a jobid below `expected`",
            )
            .into());
        }

        if output.jobid == self.expected {
            let mut ready = vec![OrderedItem::Output(output)];
            self.expected += 1;
            self.drain_ready_pending(&mut ready);
            return Ok(ready);
        }

        if self.pending.len() >= self.bound {
            return Err(ProtonError::WaitingQueueFull);
        }
        self.pending.insert(output.jobid, output);
        Ok(Vec::new())
    }

    /// Called once the underlying consumer is exhausted. Synthesizes
    /// `Missing` placeholders for every `jobid` still pending skew, and for
    /// every `jobid` between `expected` and the lowest buffered one.
    pub(crate) fn drain_on_exhaustion(&mut self) -> Vec<OrderedItem<Ans>> {
        let mut drained = Vec::new();
        while let Some((&lowest, _)) = self.pending.iter().next() {
            if lowest == self.expected {
                let output = self.pending.remove(&lowest).unwrap();
                drained.push(OrderedItem::Output(output));
                self.expected += 1;
            } else {
                drained.push(OrderedItem::Missing(self.expected));
                self.expected += 1;
            }
        }
        drained
    }

    fn drain_ready_pending(&mut self, ready: &mut Vec<OrderedItem<Ans>>) {
        while let Some(output) = self.pending.remove(&self.expected) {
            ready.push(OrderedItem::Output(output));
            self.expected += 1;
        }
    }
}
