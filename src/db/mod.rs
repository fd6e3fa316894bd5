//! Database connection pool, migrations, and health check.
//!
//! The Postgres ledger is the only shared mutable state. Every worker
//! coordinates through row locks taken inside transactions on this pool.

pub mod claim;
pub mod ledger;

use crate::error::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Channel used when none is configured.
pub const DEFAULT_WAKE_CHANNEL: &str = "claimsweep_wakeup";

/// Smallest pool that can run `workers` workers sharing one [`Db`].
///
/// A worker's wake listener holds a connection for the worker's whole life,
/// and an open claim holds a second one until it settles. One more is left
/// for priming and enqueues.
pub const fn required_connections(workers: u32) -> u32 {
    workers.saturating_mul(2).saturating_add(1)
}

/// Database handle. Owns the connection pool shared across all modules.
#[derive(Debug, Clone)]
pub struct Db {
    pool: PgPool,
    wake_channel: String,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(url, 10).await
    }

    /// Connect with an explicit pool size.
    ///
    /// See [`required_connections`] for sizing against a worker count.
    pub async fn connect_with(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool (tests hand one in via `sqlx::test`).
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            wake_channel: DEFAULT_WAKE_CHANNEL.to_string(),
        }
    }

    /// Use a different wakeup channel for enqueue notifications.
    pub fn with_wake_channel(mut self, channel: impl Into<String>) -> Self {
        self.wake_channel = channel.into();
        self
    }

    /// Name of the channel enqueue publishes to and workers listen on.
    pub fn wake_channel(&self) -> &str {
        &self.wake_channel
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
