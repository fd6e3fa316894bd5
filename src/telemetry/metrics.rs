//! Metric instrument factories for claimsweep.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"claimsweep"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for claimsweep instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("claimsweep")
}

/// Counter: requests enqueued.
/// Labels: `kind`, `result` ("ok" | "duplicate").
pub fn requests_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("claimsweep.requests.enqueued")
        .with_description("Number of requests enqueued")
        .build()
}

/// Counter: claim attempts.
/// Labels: `result` ("claimed" | "exhausted" | "primary_pending" |
/// "primary_locked" | "primary_failed" | "group_locked").
pub fn claim_attempts() -> Counter<u64> {
    meter()
        .u64_counter("claimsweep.claim.attempts")
        .with_description("Number of claim attempts by result")
        .build()
}

/// Counter: requests settled.
/// Labels: `status` ("complete" | "error").
pub fn requests_settled() -> Counter<u64> {
    meter()
        .u64_counter("claimsweep.requests.settled")
        .with_description("Number of requests settled to a terminal status")
        .build()
}

/// Counter: completed sweeps.
/// Labels: `verdict` ("resweep" | "idle").
pub fn sweeps() -> Counter<u64> {
    meter()
        .u64_counter("claimsweep.sweeps")
        .with_description("Number of full sweeps over the ledger")
        .build()
}

/// Counter: worker wakeups.
/// Labels: `cause` ("notified" | "poll" | "reconnected").
pub fn wakeups() -> Counter<u64> {
    meter()
        .u64_counter("claimsweep.wakeups")
        .with_description("Number of times an idle worker woke up")
        .build()
}

/// Histogram: group size per successful claim.
pub fn group_size() -> Histogram<u64> {
    meter()
        .u64_histogram("claimsweep.claim.group_size")
        .with_description("Requests claimed together as one group")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("claimsweep.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
