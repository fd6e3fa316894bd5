//! Claim span helpers.
//!
//! One span covers a claimed group from claim through settlement; the
//! worker state machine records its transitions on it.

use tracing::Span;

use crate::model::{Kind, RequestId, WorkerId};

/// Start a span for a claimed group.
///
/// The `claim.outcome` field is declared empty and filled at settlement via
/// [`record_outcome`].
pub fn start_claim_span(owner: WorkerId, scanned: RequestId, target_id: &str, kind: Kind) -> Span {
    tracing::info_span!(
        "claim.execute",
        "claim.owner" = %owner.0,
        "claim.scanned_id" = scanned.0,
        "claim.target_id" = target_id,
        "claim.kind" = kind.as_str(),
        "claim.group_size" = tracing::field::Empty,
        "claim.outcome" = tracing::field::Empty,
    )
}

/// Record the number of requests claimed together.
pub fn record_group_size(span: &Span, size: usize) {
    span.record("claim.group_size", size as u64);
}

/// Record the terminal status the group settled into.
pub fn record_outcome(span: &Span, status: &str) {
    span.record("claim.outcome", status);
}

/// Record a worker state transition event on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::debug!(from = from, to = to, "state_transition");
    });
}
