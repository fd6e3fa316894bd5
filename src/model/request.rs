//! Request data model.
//!
//! A request is a unit of work against a target entity. It has a kind
//! (primary or dependent), a lifecycle status, and while claimed, an owner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A unit of work recorded in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Ledger-assigned, strictly increasing. This is the FIFO key.
    pub id: RequestId,

    pub status: Status,

    pub kind: Kind,

    /// The logical entity this request concerns. Requests sharing a target
    /// are related and may be claimed as a group.
    pub target_id: String,

    /// Set when the request is claimed. Only meaningful while `InProgress`.
    pub claim_owner: Option<WorkerId>,

    /// Opaque parameters for the work executor.
    pub payload: serde_json::Value,

    /// Failure message recorded at settlement.
    pub outcome_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Newtype for ledger request IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub i64);

impl RequestId {
    /// Lower bound for scan cursors. Ledger ids start at 1.
    pub const MIN: RequestId = RequestId(0);
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one claim attempt, stored as `claim_owner`.
///
/// A fresh one is generated for every attempt and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Waiting to be claimed.
    New,
    /// Claimed by a worker whose transaction is still open.
    InProgress,
    /// Executed successfully. Terminal.
    Complete,
    /// Execution failed. Terminal.
    Error,
}

impl Status {
    /// Can transition from self to `to`?
    ///
    /// `InProgress -> New` is an abort: the claim transaction rolls back
    /// and the row was never observably anything but `New`.
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (New, InProgress) | (InProgress, Complete) | (InProgress, Error) | (InProgress, New)
        )
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Complete | Status::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::New => "new",
            Status::InProgress => "in_progress",
            Status::Complete => "complete",
            Status::Error => "error",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(Status::New),
            "in_progress" => Ok(Status::InProgress),
            "complete" => Ok(Status::Complete),
            "error" => Ok(Status::Error),
            other => Err(Error::Other(format!("unknown request status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Kind
// ---------------------------------------------------------------------------

/// What a request does to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// Establishes the target entity.
    Primary,
    /// Modifies an existing target. Runs only after the target's primary
    /// has completed.
    Dependent,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Primary => "primary",
            Kind::Dependent => "dependent",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "primary" => Ok(Kind::Primary),
            "dependent" => Ok(Kind::Dependent),
            other => Err(Error::Other(format!("unknown request kind: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for enqueueing requests.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub(crate) kind: Kind,
    pub(crate) target_id: String,
    pub(crate) payload: serde_json::Value,
}

impl NewRequest {
    pub fn new(kind: Kind, target_id: impl Into<String>) -> Self {
        Self {
            kind,
            target_id: target_id.into(),
            payload: serde_json::json!({}),
        }
    }

    pub fn primary(target_id: impl Into<String>) -> Self {
        Self::new(Kind::Primary, target_id)
    }

    pub fn dependent(target_id: impl Into<String>) -> Self {
        Self::new(Kind::Dependent, target_id)
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Filters for listing requests.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub status: Option<Status>,
    pub kind: Option<Kind>,
    pub target_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_transitions() {
        assert!(Status::New.can_transition_to(Status::InProgress));
        assert!(Status::InProgress.can_transition_to(Status::Complete));
        assert!(Status::InProgress.can_transition_to(Status::Error));
        assert!(Status::InProgress.can_transition_to(Status::New));
    }

    #[test]
    fn terminal_statuses_never_move() {
        for from in [Status::Complete, Status::Error] {
            for to in [Status::New, Status::InProgress, Status::Complete, Status::Error] {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn new_cannot_skip_claiming() {
        assert!(!Status::New.can_transition_to(Status::Complete));
        assert!(!Status::New.can_transition_to(Status::Error));
    }

    #[test]
    fn status_and_kind_parse_what_they_print() {
        for s in [Status::New, Status::InProgress, Status::Complete, Status::Error] {
            assert_eq!(s.to_string().parse::<Status>().unwrap(), s);
        }
        for k in [Kind::Primary, Kind::Dependent] {
            assert_eq!(k.to_string().parse::<Kind>().unwrap(), k);
        }
        assert!("done".parse::<Status>().is_err());
        assert!("secondary".parse::<Kind>().is_err());
    }

    #[test]
    fn worker_ids_are_fresh() {
        assert_ne!(WorkerId::new(), WorkerId::new());
    }

    #[test]
    fn cursor_minimum_precedes_every_ledger_id() {
        assert!(RequestId::MIN < RequestId(1));
    }
}
