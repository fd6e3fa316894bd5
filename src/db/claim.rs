//! Claim transactions: scan, dependency probe, group claim, settlement.
//!
//! Every step runs inside one open transaction. Row locks are taken without
//! waiting: the scanner uses `SKIP LOCKED` so rows held by other workers are
//! invisible, and the dependency probe and group claim use `NOWAIT` so a
//! conflict fails the attempt immediately instead of blocking. Nothing is
//! visible to other sessions until [`Claim::settle`] commits; dropping a
//! claim (or the process dying) rolls everything back.

use crate::db::ledger::{REQUEST_COLUMNS, RequestRow};
use crate::error::{Error, Result, is_lock_conflict};
use crate::model::*;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};
use tracing::debug;

/// What to do with dependents whose target's latest primary settled `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryErrorPolicy {
    /// Claim the dependent group and settle it `error` without executing.
    #[default]
    FailDependents,
    /// Leave the dependents `new` until a later primary completes.
    Hold,
}

impl std::str::FromStr for PrimaryErrorPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fail_dependents" | "fail" => Ok(Self::FailDependents),
            "hold" => Ok(Self::Hold),
            other => Err(Error::Config(format!(
                "unknown primary error policy: {other} (expected fail_dependents or hold)"
            ))),
        }
    }
}

/// Result of probing a dependent's primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    /// No open primary for the target; its latest primary (if any) completed.
    Ready,
    /// An open primary exists and nobody is working on it yet.
    PrimaryPending(RequestId),
    /// An open primary is locked by another in-flight claim.
    PrimaryLocked,
    /// No open primary, and the latest one settled `error`.
    PrimaryFailed(RequestId),
}

/// Why a scanned row was passed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    PrimaryPending,
    PrimaryLocked,
    PrimaryFailed,
    GroupLocked,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::PrimaryPending => "primary_pending",
            SkipReason::PrimaryLocked => "primary_locked",
            SkipReason::PrimaryFailed => "primary_failed",
            SkipReason::GroupLocked => "group_locked",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one claim attempt from a cursor.
#[derive(Debug)]
pub enum ClaimAttempt {
    /// No `new` row above the cursor is available.
    Exhausted,
    /// The row at `past` could not be claimed right now. The transaction was
    /// rolled back; the caller should advance its cursor to `past`.
    Skipped { past: RequestId, reason: SkipReason },
    /// A group was claimed and is held until settled or dropped.
    Claimed(Claim),
}

/// Validate a status transition, returning an error if disallowed.
fn validate_transition(from: Status, to: Status) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// An open claim transaction owned by one fresh [`WorkerId`].
pub struct ClaimTx {
    tx: Transaction<'static, Postgres>,
    owner: WorkerId,
}

impl std::fmt::Debug for ClaimTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimTx").field("owner", &self.owner).finish()
    }
}

impl ClaimTx {
    /// The claim owner recorded on rows this transaction claims.
    pub fn owner(&self) -> WorkerId {
        self.owner
    }

    /// Find and lock the first `new` request with id above `cursor`,
    /// skipping rows locked by other transactions.
    pub async fn scan_next(&mut self, cursor: RequestId) -> Result<Option<Request>> {
        let row: Option<RequestRow> = sqlx::query_as(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests
             WHERE status = 'new' AND id > $1
             ORDER BY id
             LIMIT 1
             FOR UPDATE SKIP LOCKED"
        ))
        .bind(cursor.0)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(RequestRow::try_into_request).transpose()
    }

    /// Probe the open primary of a dependent's target without waiting.
    ///
    /// A lock conflict leaves the transaction unusable; the caller must
    /// abort after anything other than `Ready` or `PrimaryFailed`.
    pub async fn check_dependency(&mut self, request: &Request) -> Result<Dependency> {
        let probe: std::result::Result<Option<(i64,)>, sqlx::Error> = sqlx::query_as(
            "SELECT id FROM requests
             WHERE target_id = $1 AND kind = 'primary' AND status IN ('new', 'in_progress')
             FOR UPDATE NOWAIT",
        )
        .bind(&request.target_id)
        .fetch_optional(&mut *self.tx)
        .await;

        match probe {
            Err(e) if is_lock_conflict(&e) => return Ok(Dependency::PrimaryLocked),
            Err(e) => return Err(e.into()),
            Ok(Some((id,))) => return Ok(Dependency::PrimaryPending(RequestId(id))),
            Ok(None) => {}
        }

        let latest: Option<(i64, String)> = sqlx::query_as(
            "SELECT id, status FROM requests
             WHERE target_id = $1 AND kind = 'primary'
             ORDER BY id DESC
             LIMIT 1",
        )
        .bind(&request.target_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        match latest {
            Some((id, status)) if status.parse::<Status>()? == Status::Error => {
                Ok(Dependency::PrimaryFailed(RequestId(id)))
            }
            _ => Ok(Dependency::Ready),
        }
    }

    /// Move the scanned request's group to `in_progress` under this owner.
    ///
    /// A primary claims only itself. A dependent claims every open dependent
    /// on its target, all or nothing: if any is locked elsewhere this returns
    /// `None` and the caller must abort.
    pub async fn claim_group(&mut self, scanned: &Request) -> Result<Option<Vec<Request>>> {
        validate_transition(scanned.status, Status::InProgress)?;

        let ids: Vec<i64> = match scanned.kind {
            Kind::Primary => vec![scanned.id.0],
            Kind::Dependent => {
                let locked: std::result::Result<Vec<(i64,)>, sqlx::Error> = sqlx::query_as(
                    "SELECT id FROM requests
                     WHERE target_id = $1 AND kind = 'dependent' AND status IN ('new', 'in_progress')
                     ORDER BY id
                     FOR UPDATE NOWAIT",
                )
                .bind(&scanned.target_id)
                .fetch_all(&mut *self.tx)
                .await;

                match locked {
                    Ok(rows) => rows.into_iter().map(|(id,)| id).collect(),
                    Err(e) if is_lock_conflict(&e) => return Ok(None),
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let rows: Vec<RequestRow> = sqlx::query_as(&format!(
            "UPDATE requests
             SET status = 'in_progress', claim_owner = $1, updated_at = now()
             WHERE id = ANY($2) AND status = 'new'
             RETURNING {REQUEST_COLUMNS}"
        ))
        .bind(self.owner.0)
        .bind(&ids)
        .fetch_all(&mut *self.tx)
        .await?;

        let mut group = rows
            .into_iter()
            .map(RequestRow::try_into_request)
            .collect::<Result<Vec<_>>>()?;
        group.sort_by_key(|r| r.id);

        debug!(
            owner = %self.owner,
            target_id = %scanned.target_id,
            size = group.len(),
            "group claimed"
        );
        Ok(Some(group))
    }

    /// Finalize every row this owner holds and commit.
    ///
    /// Returns the ids that were settled.
    pub async fn settle(mut self, to: Status, error: Option<&str>) -> Result<Vec<RequestId>> {
        // Reverting to `new` is an abort, not a settlement.
        if !to.is_terminal() {
            return Err(Error::InvalidTransition {
                from: Status::InProgress.to_string(),
                to: to.to_string(),
            });
        }
        validate_transition(Status::InProgress, to)?;

        let settled: Vec<(i64,)> = sqlx::query_as(
            "UPDATE requests
             SET status = $1, outcome_error = $2, settled_at = now(), updated_at = now()
             WHERE claim_owner = $3 AND status = 'in_progress'
             RETURNING id",
        )
        .bind(to.as_str())
        .bind(error)
        .bind(self.owner.0)
        .fetch_all(&mut *self.tx)
        .await?;

        self.tx.commit().await?;

        metrics::requests_settled().add(
            settled.len() as u64,
            &[KeyValue::new("status", to.as_str())],
        );

        let mut ids: Vec<RequestId> = settled.into_iter().map(|(id,)| RequestId(id)).collect();
        ids.sort();
        Ok(ids)
    }

    /// Roll back. Claimed rows revert to `new`, all locks release.
    pub async fn abort(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// A claimed group, held by an open transaction.
#[derive(Debug)]
pub struct Claim {
    tx: ClaimTx,
    scanned: RequestId,
    requests: Vec<Request>,
    failed_primary: Option<RequestId>,
}

impl Claim {
    pub fn owner(&self) -> WorkerId {
        self.tx.owner()
    }

    /// The row the scanner found; the group was claimed on its behalf.
    pub fn scanned(&self) -> RequestId {
        self.scanned
    }

    /// Claimed requests in ascending id order. All share a target and kind.
    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn target_id(&self) -> &str {
        &self.requests[0].target_id
    }

    pub fn kind(&self) -> Kind {
        self.requests[0].kind
    }

    /// Set when the group is dependents of a primary that settled `error`
    /// under [`PrimaryErrorPolicy::FailDependents`]. Such a group must be
    /// settled as failed without executing.
    pub fn failed_primary(&self) -> Option<RequestId> {
        self.failed_primary
    }

    pub async fn settle(self, to: Status, error: Option<&str>) -> Result<Vec<RequestId>> {
        self.tx.settle(to, error).await
    }

    pub async fn abort(self) -> Result<()> {
        self.tx.abort().await
    }
}

impl super::Db {
    /// Open a claim transaction with a fresh owner id.
    pub async fn begin_claim(&self) -> Result<ClaimTx> {
        let tx = self.pool().begin().await?;
        Ok(ClaimTx {
            tx,
            owner: WorkerId::new(),
        })
    }

    /// One claim attempt: scan from `cursor`, validate, claim the group.
    ///
    /// Lock conflicts are never surfaced as errors; they come back as
    /// [`ClaimAttempt::Skipped`] with the transaction already rolled back.
    pub async fn try_claim(
        &self,
        cursor: RequestId,
        policy: PrimaryErrorPolicy,
    ) -> Result<ClaimAttempt> {
        let mut tx = self.begin_claim().await?;

        let Some(scanned) = tx.scan_next(cursor).await? else {
            tx.abort().await?;
            record_attempt("exhausted");
            return Ok(ClaimAttempt::Exhausted);
        };

        let mut failed_primary = None;
        if scanned.kind == Kind::Dependent {
            let skip = match tx.check_dependency(&scanned).await? {
                Dependency::Ready => None,
                Dependency::PrimaryFailed(primary) => match policy {
                    PrimaryErrorPolicy::FailDependents => {
                        failed_primary = Some(primary);
                        None
                    }
                    PrimaryErrorPolicy::Hold => Some(SkipReason::PrimaryFailed),
                },
                Dependency::PrimaryPending(_) => Some(SkipReason::PrimaryPending),
                Dependency::PrimaryLocked => Some(SkipReason::PrimaryLocked),
            };
            if let Some(reason) = skip {
                tx.abort().await?;
                record_attempt(reason.as_str());
                debug!(id = %scanned.id, %reason, "dependent skipped");
                return Ok(ClaimAttempt::Skipped {
                    past: scanned.id,
                    reason,
                });
            }
        }

        let Some(requests) = tx.claim_group(&scanned).await? else {
            tx.abort().await?;
            record_attempt(SkipReason::GroupLocked.as_str());
            debug!(id = %scanned.id, "dependent group locked elsewhere");
            return Ok(ClaimAttempt::Skipped {
                past: scanned.id,
                reason: SkipReason::GroupLocked,
            });
        };

        if requests.is_empty() {
            // The scanned row is `new` and locked by us, so it must match.
            tx.abort().await?;
            return Err(Error::Other(format!(
                "claim of request {} matched no rows",
                scanned.id
            )));
        }

        record_attempt("claimed");
        Ok(ClaimAttempt::Claimed(Claim {
            tx,
            scanned: scanned.id,
            requests,
            failed_primary,
        }))
    }
}

fn record_attempt(result: &'static str) {
    metrics::claim_attempts().add(1, &[KeyValue::new("result", result)]);
}
