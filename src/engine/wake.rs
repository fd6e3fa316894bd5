//! Wake listener: LISTEN on the shared wakeup channel.
//!
//! The channel is advisory and lossy. Nothing is replayed to a process that
//! was not listening when a NOTIFY fired, so a worker primes itself with one
//! publish right after subscribing and always sweeps on startup.

use crate::db::Db;
use crate::error::Result;
use sqlx::postgres::PgListener;
use std::time::Duration;
use tracing::{debug, warn};

/// Pause after a listener error so a dead connection does not spin.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Why the listener returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// A NOTIFY arrived (possibly several, coalesced).
    Notified,
    /// The fallback poll interval elapsed with no NOTIFY.
    Poll,
    /// The listener connection dropped or failed. Notifications may have
    /// been lost while it was down, so this counts as a wake. The next
    /// [`WakeListener::wait`] reconnects and listens again.
    Reconnected,
}

/// Publish one wakeup on `channel`.
///
/// Inside a transaction the NOTIFY is delivered only on commit.
pub async fn publish<'e, E>(executor: E, channel: &str) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query("SELECT pg_notify($1, '')")
        .bind(channel)
        .execute(executor)
        .await?;
    Ok(())
}

/// Subscription handle on the wakeup channel.
pub struct WakeListener {
    listener: PgListener,
    db: Db,
    poll_interval: Option<Duration>,
}

impl WakeListener {
    /// Open a dedicated connection and LISTEN on the db's wake channel.
    pub async fn subscribe(db: &Db, poll_interval: Option<Duration>) -> Result<Self> {
        let mut listener = PgListener::connect_with(db.pool()).await?;
        listener.listen(db.wake_channel()).await?;
        debug!(channel = db.wake_channel(), "subscribed to wakeup channel");
        Ok(Self {
            listener,
            db: db.clone(),
            poll_interval,
        })
    }

    /// Publish one wakeup to ourselves (and anyone else listening).
    ///
    /// Must be called after [`subscribe`](Self::subscribe): a NOTIFY sent
    /// before LISTEN is never delivered.
    pub async fn prime(&self) -> Result<()> {
        publish(self.db.pool(), self.db.wake_channel()).await
    }

    /// Block until the next wakeup.
    pub async fn wait(&mut self) -> Wake {
        let received = match self.poll_interval {
            Some(interval) => match tokio::time::timeout(interval, self.listener.try_recv()).await
            {
                Ok(received) => received,
                Err(_) => return Wake::Poll,
            },
            None => self.listener.try_recv().await,
        };

        match received {
            Ok(None) => {
                warn!(
                    channel = self.db.wake_channel(),
                    "wake listener connection lost, treating as wakeup"
                );
                Wake::Reconnected
            }
            Ok(Some(notification)) => {
                let coalesced = self.drain();
                debug!(
                    channel = notification.channel(),
                    coalesced, "wakeup received"
                );
                Wake::Notified
            }
            Err(e) => {
                warn!("wake listener error: {e}, treating as wakeup");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                Wake::Reconnected
            }
        }
    }

    /// Discard notifications already buffered. One sweep covers them all.
    fn drain(&mut self) -> usize {
        let mut n = 0;
        while self.listener.next_buffered().is_some() {
            n += 1;
        }
        n
    }
}
