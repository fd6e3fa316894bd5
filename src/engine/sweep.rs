//! Sweep bookkeeping and the per-worker state machine.
//!
//! A sweep is one ordered pass over `new` requests starting at the minimum
//! cursor. Skipped rows push the cursor past them; claims leave it alone.
//! Any sweep that claimed something is followed by another from the
//! minimum, because our claim may have made a concurrent worker skip rows.
//! A worker goes idle only after a sweep that claimed nothing.

use crate::model::RequestId;

/// Where a worker's control loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Waiting on the wake listener.
    Idle,
    /// Looking for the next `new` row above the cursor.
    Scanning,
    /// Validating and claiming a scanned row.
    Claiming,
    /// The executor is running on a claimed group.
    Executing,
    /// Committing the group's terminal status.
    Settling,
}

impl WorkerState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, to),
            (Idle, Scanning)
                | (Scanning, Claiming)
                | (Scanning, Idle)      // sweep claimed nothing
                | (Claiming, Scanning)  // skipped, cursor advanced
                | (Claiming, Executing)
                | (Executing, Settling)
                | (Settling, Scanning)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Scanning => "scanning",
            WorkerState::Claiming => "claiming",
            WorkerState::Executing => "executing",
            WorkerState::Settling => "settling",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do once a sweep reaches the end of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepVerdict {
    /// Something was claimed; sweep again from the minimum cursor.
    Resweep,
    /// Nothing was claimed; go idle.
    Idle,
}

/// Cursor and counters for one sweep.
#[derive(Debug, Clone)]
pub struct Sweep {
    cursor: RequestId,
    scanned: u64,
    claimed: u64,
    skipped: u64,
}

impl Default for Sweep {
    fn default() -> Self {
        Self::new()
    }
}

impl Sweep {
    pub fn new() -> Self {
        Self {
            cursor: RequestId::MIN,
            scanned: 0,
            claimed: 0,
            skipped: 0,
        }
    }

    /// Scans resume strictly above this id.
    pub fn cursor(&self) -> RequestId {
        self.cursor
    }

    /// A scanned row could not be claimed right now; never rescan it this sweep.
    pub fn record_skip(&mut self, past: RequestId) {
        self.scanned += 1;
        self.skipped += 1;
        self.cursor = self.cursor.max(past);
    }

    /// A group was claimed and settled. The settled rows are no longer `new`,
    /// so the cursor stays put.
    pub fn record_claim(&mut self) {
        self.scanned += 1;
        self.claimed += 1;
    }

    pub fn scanned(&self) -> u64 {
        self.scanned
    }

    pub fn claimed(&self) -> u64 {
        self.claimed
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn finish(&self) -> SweepVerdict {
        if self.claimed > 0 {
            SweepVerdict::Resweep
        } else {
            SweepVerdict::Idle
        }
    }
}

/// Totals across every sweep run between two idle periods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sweeps: u64,
    /// Claimed groups.
    pub claimed: u64,
    pub skipped: u64,
    /// Individual requests settled across all groups.
    pub settled: u64,
}

impl SweepReport {
    pub(crate) fn absorb(&mut self, sweep: &Sweep) {
        self.sweeps += 1;
        self.claimed += sweep.claimed;
        self.skipped += sweep.skipped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_starts_at_minimum_cursor() {
        let sweep = Sweep::new();
        assert_eq!(sweep.cursor(), RequestId::MIN);
        assert_eq!(sweep.finish(), SweepVerdict::Idle);
    }

    #[test]
    fn skips_advance_cursor_past_the_row() {
        let mut sweep = Sweep::new();
        sweep.record_skip(RequestId(4));
        assert_eq!(sweep.cursor(), RequestId(4));
        sweep.record_skip(RequestId(9));
        assert_eq!(sweep.cursor(), RequestId(9));
        assert_eq!(sweep.skipped(), 2);
        assert_eq!(sweep.finish(), SweepVerdict::Idle);
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let mut sweep = Sweep::new();
        sweep.record_skip(RequestId(9));
        sweep.record_skip(RequestId(3));
        assert_eq!(sweep.cursor(), RequestId(9));
    }

    #[test]
    fn claims_leave_cursor_and_force_resweep() {
        let mut sweep = Sweep::new();
        sweep.record_skip(RequestId(2));
        sweep.record_claim();
        assert_eq!(sweep.cursor(), RequestId(2));
        assert_eq!(sweep.scanned(), 2);
        assert_eq!(sweep.finish(), SweepVerdict::Resweep);
    }

    #[test]
    fn report_accumulates_sweeps() {
        let mut report = SweepReport::default();
        let mut first = Sweep::new();
        first.record_claim();
        first.record_skip(RequestId(5));
        report.absorb(&first);
        report.absorb(&Sweep::new());
        assert_eq!(report.sweeps, 2);
        assert_eq!(report.claimed, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn state_machine_cycle() {
        use WorkerState::*;
        let path = [Idle, Scanning, Claiming, Executing, Settling, Scanning, Idle];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn idle_only_follows_scanning() {
        use WorkerState::*;
        for from in [Claiming, Executing, Settling, Idle] {
            assert!(!from.can_transition_to(Idle), "{from} -> idle");
        }
        assert!(!Executing.can_transition_to(Scanning));
        assert!(!Idle.can_transition_to(Claiming));
        // Settling is reached only through Executing.
        assert!(!Claiming.can_transition_to(Settling));
    }
}
