//! `tokio-postgres` implementation of `Session` and `Connector`.

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, Config as PgConfig, NoTls, SimpleQueryMessage};
use tracing::{debug, warn};

use super::{Connector, Row, Session};
use crate::config::{DbConfig, SessionSettings};
use crate::errors::DbError;

impl From<tokio_postgres::Error> for DbError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db) = err.as_db_error() {
            return DbError::Database {
                code: db.code().code().to_string(),
                message: db.message().to_string(),
            };
        }
        if err.is_closed() {
            return DbError::Connection("connection closed".to_string());
        }
        let io_source = std::error::Error::source(&err)
            .and_then(|s| s.downcast_ref::<std::io::Error>())
            .is_some();
        let text = err.to_string();
        if io_source || text.contains("connect") || text.contains("timed out") {
            DbError::Connection(text)
        } else {
            DbError::Other(text)
        }
    }
}

/// Opens plain-TCP sessions to the configured database.
pub struct PgConnector {
    db: DbConfig,
    settings: SessionSettings,
}

impl PgConnector {
    pub fn new(db: DbConfig, settings: SessionSettings) -> Self {
        Self { db, settings }
    }

    fn pg_config(&self) -> PgConfig {
        let mut pg = PgConfig::new();
        pg.host(&self.db.host);
        pg.port(self.db.port);
        pg.user(&self.db.user);
        if !self.db.password.is_empty() {
            pg.password(&self.db.password);
        }
        pg.dbname(&self.db.dbname);
        pg.application_name(&self.settings.application_name);
        pg.connect_timeout(self.settings.connect_timeout);
        match &self.settings.keepalive {
            Some(ka) => {
                pg.keepalives(true);
                pg.keepalives_idle(ka.idle);
                pg.keepalives_interval(ka.interval);
                pg.keepalives_retries(ka.count);
            }
            None => {
                pg.keepalives(false);
            }
        }
        pg
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Session = PgSession;

    async fn connect(&self) -> Result<PgSession, DbError> {
        let (client, connection) = self.pg_config().connect(NoTls).await?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "PostgreSQL connection terminated");
            }
        });

        debug!(target_db = %self.describe(), "session opened");
        Ok(PgSession { client, driver })
    }

    fn describe(&self) -> String {
        self.db.display_target()
    }
}

/// A single `tokio-postgres` client plus the task driving its socket.
pub struct PgSession {
    client: Client,
    driver: JoinHandle<()>,
}

impl Drop for PgSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl Session for PgSession {
    fn is_closed(&self) -> bool {
        self.client.is_closed() || self.driver.is_finished()
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        let messages = self.client.simple_query(sql).await?;
        Ok(messages
            .iter()
            .filter_map(|m| match m {
                SimpleQueryMessage::CommandComplete(n) => Some(*n),
                _ => None,
            })
            .sum())
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, DbError> {
        let messages = self.client.simple_query(sql).await?;
        Ok(messages
            .into_iter()
            .filter_map(|m| match m {
                SimpleQueryMessage::Row(row) => {
                    Some((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect())
                }
                _ => None,
            })
            .collect())
    }
}
