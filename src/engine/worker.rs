//! Worker: waits for wakeups, sweeps the ledger until a fixed point.

use crate::db::Db;
use crate::db::claim::{Claim, ClaimAttempt, PrimaryErrorPolicy};
use crate::error::Result;
use crate::executor::{ExecOutcome, WorkExecutor};
use crate::model::Status;
use crate::telemetry::claim::{
    record_group_size, record_outcome, record_state_transition, start_claim_span,
};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{Instrument, Span, debug, error, info, warn};

use super::sweep::{Sweep, SweepReport, SweepVerdict, WorkerState};
use super::wake::{Wake, WakeListener};

/// First pause after a failed sweep. Doubles up to [`SWEEP_RETRY_MAX`].
const SWEEP_RETRY_MIN: Duration = Duration::from_millis(250);
const SWEEP_RETRY_MAX: Duration = Duration::from_secs(30);

/// Configuration for a worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Label used in logs. Not stored in the ledger.
    pub name: String,
    /// Sweep this often even without a NOTIFY. `None` waits on NOTIFY only.
    pub poll_interval: Option<Duration>,
    /// Fate of dependents whose primary settled `error`.
    pub primary_error_policy: PrimaryErrorPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            poll_interval: None,
            primary_error_policy: PrimaryErrorPolicy::default(),
        }
    }
}

/// One independent worker. Its control flow is sequential; concurrency
/// comes from running many workers against the same ledger.
#[derive(Clone)]
pub struct Worker {
    db: Arc<Db>,
    executor: Arc<dyn WorkExecutor>,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
    stopping: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(db: Arc<Db>, executor: Arc<dyn WorkExecutor>, config: WorkerConfig) -> Self {
        Self {
            db,
            executor,
            config,
            shutdown: Arc::new(Notify::new()),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signal the worker to stop. An in-flight group finishes settling first.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::Relaxed);
        self.shutdown.notify_one();
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Relaxed)
    }

    /// Run until shutdown: subscribe, prime, then sweep on every wakeup.
    pub async fn run(&self) -> Result<()> {
        let mut listener = WakeListener::subscribe(&self.db, self.config.poll_interval).await?;
        // Backlog may have built up while nobody was listening.
        listener.prime().await?;

        info!(
            worker = %self.config.name,
            channel = self.db.wake_channel(),
            "worker started, listening for wakeups"
        );

        loop {
            let wake = tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(worker = %self.config.name, "worker shutting down");
                    return Ok(());
                }
                wake = listener.wait() => wake,
            };

            let cause = match wake {
                Wake::Notified => "notified",
                Wake::Poll => "poll",
                Wake::Reconnected => "reconnected",
            };
            metrics::wakeups().add(1, &[KeyValue::new("cause", cause)]);

            if !self.drain_backlog().await {
                info!(worker = %self.config.name, "worker shutting down");
                return Ok(());
            }
        }
    }

    /// Sweep until idle, retrying failed sweeps with backoff.
    ///
    /// A failed sweep rolls its claim back to `new` and no NOTIFY will
    /// announce those rows again, so the worker must not go idle on an
    /// error. Returns `false` if shutdown arrived while backing off.
    async fn drain_backlog(&self) -> bool {
        let mut backoff = SWEEP_RETRY_MIN;
        loop {
            match self.sweep_until_idle().await {
                Ok(report) => {
                    if report.claimed > 0 {
                        info!(
                            worker = %self.config.name,
                            sweeps = report.sweeps,
                            claimed = report.claimed,
                            settled = report.settled,
                            skipped = report.skipped,
                            "backlog drained"
                        );
                    }
                    return true;
                }
                Err(e) => {
                    error!(
                        worker = %self.config.name,
                        retry_in_ms = backoff.as_millis() as u64,
                        "sweep error: {e}"
                    );
                    tokio::select! {
                        _ = self.shutdown.notified() => return false,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(SWEEP_RETRY_MAX);
                }
            }
        }
    }

    /// Sweep from the minimum cursor until a sweep claims nothing.
    pub async fn sweep_until_idle(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut state = WorkerState::Idle;
        self.transition(&mut state, WorkerState::Scanning);

        loop {
            let mut sweep = Sweep::new();

            while !self.is_stopping() {
                match self
                    .db
                    .try_claim(sweep.cursor(), self.config.primary_error_policy)
                    .await?
                {
                    ClaimAttempt::Exhausted => break,
                    ClaimAttempt::Skipped { past, reason } => {
                        self.transition(&mut state, WorkerState::Claiming);
                        debug!(worker = %self.config.name, %past, %reason, "cursor advanced");
                        sweep.record_skip(past);
                        self.transition(&mut state, WorkerState::Scanning);
                    }
                    ClaimAttempt::Claimed(claim) => {
                        self.transition(&mut state, WorkerState::Claiming);
                        report.settled += self.execute_and_settle(claim, &mut state).await? as u64;
                        sweep.record_claim();
                    }
                }
            }

            report.absorb(&sweep);
            let verdict = if self.is_stopping() {
                SweepVerdict::Idle
            } else {
                sweep.finish()
            };

            match verdict {
                SweepVerdict::Resweep => {
                    metrics::sweeps().add(1, &[KeyValue::new("verdict", "resweep")]);
                    debug!(
                        worker = %self.config.name,
                        claimed = sweep.claimed(),
                        "sweep claimed work, resweeping from start"
                    );
                }
                SweepVerdict::Idle => {
                    metrics::sweeps().add(1, &[KeyValue::new("verdict", "idle")]);
                    self.transition(&mut state, WorkerState::Idle);
                    return Ok(report);
                }
            }
        }
    }

    /// Execute a claimed group and settle it. Returns the number of
    /// requests settled.
    async fn execute_and_settle(&self, claim: Claim, state: &mut WorkerState) -> Result<usize> {
        let span = start_claim_span(claim.owner(), claim.scanned(), claim.target_id(), claim.kind());
        record_group_size(&span, claim.requests().len());
        metrics::group_size().record(claim.requests().len() as u64, &[]);

        async {
            let start = Instant::now();

            // A failed primary decides the outcome without running the executor.
            self.transition(state, WorkerState::Executing);
            let outcome = match claim.failed_primary() {
                Some(primary) => {
                    warn!(
                        target_id = claim.target_id(),
                        %primary,
                        "primary settled error, failing dependents"
                    );
                    ExecOutcome::failed(format!("primary request {primary} settled error"))
                }
                None => {
                    self.executor
                        .execute(claim.target_id(), claim.kind(), claim.requests())
                        .await
                }
            };
            let duration_ms = start.elapsed().as_millis() as u64;

            self.transition(state, WorkerState::Settling);
            let (status, error) = match &outcome {
                ExecOutcome::Succeeded => (Status::Complete, None),
                ExecOutcome::Failed { error } => (Status::Error, Some(error.as_str())),
            };
            let target_id = claim.target_id().to_string();
            let settled = claim.settle(status, error).await?;

            record_outcome(&Span::current(), status.as_str());
            metrics::operation_duration_ms()
                .record(duration_ms as f64, &[KeyValue::new("operation", "claim.execute")]);
            info!(
                %target_id,
                status = status.as_str(),
                settled = settled.len(),
                duration_ms,
                "group settled"
            );

            self.transition(state, WorkerState::Scanning);
            Ok(settled.len())
        }
        .instrument(span)
        .await
    }

    fn transition(&self, state: &mut WorkerState, to: WorkerState) {
        debug_assert!(state.can_transition_to(to), "{state} -> {to}");
        record_state_transition(&Span::current(), state.as_str(), to.as_str());
        *state = to;
    }
}
