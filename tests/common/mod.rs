//! Shared helpers for ledger-backed tests.

#![allow(dead_code)]

use async_trait::async_trait;
use claimsweep::executor::{ExecOutcome, WorkExecutor};
use claimsweep::model::{Kind, Request, RequestId};
use std::collections::HashSet;
use std::sync::Mutex;

/// One executor invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub target_id: String,
    pub kind: Kind,
    pub ids: Vec<RequestId>,
}

/// Records every group it is handed. Fails targets listed in `failing`.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<Call>>,
    failing: HashSet<String>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(targets: &[&str]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: targets.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Every request id executed, in call order.
    pub fn executed_ids(&self) -> Vec<RequestId> {
        self.calls().into_iter().flat_map(|c| c.ids).collect()
    }
}

#[async_trait]
impl WorkExecutor for RecordingExecutor {
    async fn execute(&self, target_id: &str, kind: Kind, requests: &[Request]) -> ExecOutcome {
        self.calls.lock().unwrap().push(Call {
            target_id: target_id.to_string(),
            kind,
            ids: requests.iter().map(|r| r.id).collect(),
        });
        // Give concurrent workers a chance to interleave.
        tokio::task::yield_now().await;
        if self.failing.contains(target_id) {
            ExecOutcome::failed(format!("{target_id} rejected"))
        } else {
            ExecOutcome::Succeeded
        }
    }
}
