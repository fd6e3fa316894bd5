//! Ledger access: enqueue with primary-uniqueness, reads, listing.

use crate::engine::wake;
use crate::error::{Error, Result};
use crate::model::*;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use uuid::Uuid;

/// Column list shared by every query that materializes a [`Request`].
pub(crate) const REQUEST_COLUMNS: &str = "id, status, kind, target_id, claim_owner, payload, outcome_error, created_at, updated_at, settled_at";

impl super::Db {
    /// Insert a new request and publish a wakeup.
    ///
    /// A second open primary for the same target is rejected with
    /// [`Error::DuplicatePrimary`]; the partial unique index makes this safe
    /// under concurrent enqueues.
    pub async fn enqueue(&self, new: NewRequest) -> Result<RequestId> {
        let mut tx = self.pool().begin().await?;

        let inserted: Option<(i64,)> = sqlx::query_as(
            "INSERT INTO requests (status, kind, target_id, payload)
             VALUES ('new', $1, $2, $3)
             ON CONFLICT (target_id) WHERE kind = 'primary' AND status IN ('new', 'in_progress')
             DO NOTHING
             RETURNING id",
        )
        .bind(new.kind.as_str())
        .bind(&new.target_id)
        .bind(&new.payload)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((id,)) = inserted else {
            tx.rollback().await?;
            metrics::requests_enqueued().add(
                1,
                &[
                    KeyValue::new("kind", new.kind.as_str()),
                    KeyValue::new("result", "duplicate"),
                ],
            );
            return Err(Error::DuplicatePrimary {
                target_id: new.target_id,
            });
        };

        // NOTIFY is transactional, only fires on commit
        wake::publish(&mut *tx, self.wake_channel()).await?;
        tx.commit().await?;

        metrics::requests_enqueued().add(
            1,
            &[
                KeyValue::new("kind", new.kind.as_str()),
                KeyValue::new("result", "ok"),
            ],
        );
        tracing::debug!(id, kind = %new.kind, target_id = %new.target_id, "request enqueued");

        Ok(RequestId(id))
    }

    /// Get a request by ID.
    pub async fn get_request(&self, id: RequestId) -> Result<Request> {
        let row: Option<RequestRow> = sqlx::query_as(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("request {id}")))?
            .try_into_request()
    }

    /// List requests in ascending id order.
    pub async fn list_requests(&self, filter: &RequestFilter, limit: i64) -> Result<Vec<Request>> {
        let rows: Vec<RequestRow> = sqlx::query_as(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests
             WHERE ($1::text IS NULL OR status = $1)
             AND ($2::text IS NULL OR kind = $2)
             AND ($3::text IS NULL OR target_id = $3)
             ORDER BY id
             LIMIT $4"
        ))
        .bind(filter.status.map(Status::as_str))
        .bind(filter.kind.map(Kind::as_str))
        .bind(filter.target_id.as_deref())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(RequestRow::try_into_request).collect()
    }

    /// Count requests per status, for operator summaries.
    pub async fn count_by_status(&self) -> Result<Vec<(Status, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, count(*) FROM requests GROUP BY status ORDER BY status")
                .fetch_all(self.pool())
                .await?;

        rows.into_iter()
            .map(|(status, n)| Ok((status.parse()?, n)))
            .collect()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
pub(crate) struct RequestRow {
    id: i64,
    status: String,
    kind: String,
    target_id: String,
    claim_owner: Option<Uuid>,
    payload: serde_json::Value,
    outcome_error: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    settled_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl RequestRow {
    pub(crate) fn try_into_request(self) -> Result<Request> {
        Ok(Request {
            id: RequestId(self.id),
            status: self.status.parse()?,
            kind: self.kind.parse()?,
            target_id: self.target_id,
            claim_owner: self.claim_owner.map(WorkerId),
            payload: self.payload,
            outcome_error: self.outcome_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
            settled_at: self.settled_at,
        })
    }
}
