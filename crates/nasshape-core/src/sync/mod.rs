// ── Reconciliation planners ──
//
// Pure functions from (desired, previous) policy to an ordered list of
// device ops. The engine resolves devices and hands the plan to the
// dispatcher.

pub mod cdn;
pub mod pcq;

use serde::Serialize;

use crate::dispatch::PlannedOp;

/// What a reconciliation queued.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    /// Every op the plan produced, removals first.
    pub ops: Vec<PlannedOp>,
    /// How many of them the dispatcher accepted.
    pub enqueued: usize,
}

impl ReconcileOutcome {
    pub fn removals(&self) -> impl Iterator<Item = &PlannedOp> {
        self.ops.iter().filter(|p| p.op.is_removal())
    }

    pub fn dropped(&self) -> usize {
        self.ops.len().saturating_sub(self.enqueued)
    }
}
