//! Work executor: the domain action run on a claimed group.
//!
//! The ledger treats the executor as opaque. Its side effects are not part
//! of the claim transaction and are not rolled back if settlement fails.

pub mod hook;

use crate::model::{Kind, Request};
use async_trait::async_trait;

pub use hook::{HookConfig, HookExecutor};

/// What the executor reports for a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Succeeded,
    Failed { error: String },
}

impl ExecOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }
}

/// Performs the domain action for one claimed group.
///
/// `requests` is non-empty, ordered by id, all `in_progress`, all sharing
/// `target_id` and `kind`.
#[async_trait]
pub trait WorkExecutor: Send + Sync {
    async fn execute(&self, target_id: &str, kind: Kind, requests: &[Request]) -> ExecOutcome;
}
