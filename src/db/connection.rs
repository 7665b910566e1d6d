//! Session acquisition with bounded retries and per-session setup.

use tracing::{info, warn};

use super::{Connector, Session};
use crate::config::{RetryPolicy, SessionSettings};
use crate::errors::{ConnectionError, DbError};

/// Hands out configured sessions from a `Connector`.
///
/// Every new session gets `SET statement_timeout` and (optionally) the TCP
/// keepalive settings before it is returned. Only transient failures are
/// retried; the delay between attempts is fixed.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    settings: SessionSettings,
    retry: RetryPolicy,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, settings: SessionSettings, retry: RetryPolicy) -> Self {
        Self {
            connector,
            settings,
            retry,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Loggable description of the database this manager connects to.
    pub fn target(&self) -> String {
        self.connector.describe()
    }

    /// Acquire a session, retrying transient failures.
    pub async fn acquire(&self) -> Result<C::Session, ConnectionError> {
        self.acquire_observed(|_| {}).await
    }

    /// Like `acquire`, calling `on_retry(attempt)` before each retry so the
    /// caller can record the `Retrying` transition.
    pub async fn acquire_observed<F>(&self, mut on_retry: F) -> Result<C::Session, ConnectionError>
    where
        F: FnMut(u32),
    {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.open_configured().await {
                Ok(session) => {
                    info!(
                        target_db = %self.connector.describe(),
                        attempt,
                        "connected"
                    );
                    return Ok(session);
                }
                Err(OpenError::Setup(e)) => return Err(e),
                Err(OpenError::Connect(e)) if !e.is_transient() => {
                    warn!(error = %e, "connection failed with a non-retryable error");
                    return Err(ConnectionError::Fatal(e));
                }
                Err(OpenError::Connect(e)) => {
                    if attempt >= attempts {
                        warn!(attempts, error = %e, "giving up on connection");
                        return Err(ConnectionError::RetriesExhausted { attempts, last: e });
                    }
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        delay_s = self.retry.delay.as_secs_f64(),
                        error = %e,
                        "connection attempt failed, retrying"
                    );
                    on_retry(attempt);
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Replace a dead session. Same retry policy as `acquire`.
    pub async fn reconnect(&self) -> Result<C::Session, ConnectionError> {
        info!(target_db = %self.connector.describe(), "reconnecting");
        self.acquire().await
    }

    pub fn is_closed(session: &C::Session) -> bool {
        session.is_closed()
    }

    async fn open_configured(&self) -> Result<C::Session, OpenError> {
        let mut session = self.connector.connect().await.map_err(OpenError::Connect)?;
        for stmt in self.settings.setup_statements() {
            if let Err(e) = session.execute(&stmt).await {
                // A session that dies during setup is just another failed attempt
                if e.is_transient() {
                    return Err(OpenError::Connect(e));
                }
                return Err(OpenError::Setup(ConnectionError::SessionSetup {
                    setting: stmt,
                    source: e,
                }));
            }
        }
        Ok(session)
    }
}

enum OpenError {
    Connect(DbError),
    Setup(ConnectionError),
}
