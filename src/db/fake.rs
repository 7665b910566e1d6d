//! In-memory `Session`/`Connector` used by unit tests.
//!
//! `FakeDb` is shared by every session it hands out, so a reconnect sees the
//! same views and the same statement log. Materialized views are tracked
//! from executed `CREATE`/`DROP MATERIALIZED VIEW` statements.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{Connector, Row, Session};
use crate::errors::DbError;
use crate::sql::{extract_view_name, introspect::leading_keyword};

#[derive(Default)]
struct FakeState {
    views: BTreeSet<String>,
    log: Vec<String>,
    failures: Vec<(String, DbError)>,
    drop_on: Vec<String>,
    connect_script: VecDeque<Option<DbError>>,
    connects: u32,
    select_rows: Vec<Row>,
}

#[derive(Clone, Default)]
pub struct FakeDb {
    inner: Arc<Mutex<FakeState>>,
}

impl FakeDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_views(views: &[&str]) -> Self {
        let db = Self::new();
        db.state().views = views.iter().map(|v| v.to_string()).collect();
        db
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.inner.lock().unwrap()
    }

    /// Statements containing `pattern` fail with `err`.
    pub fn fail_on(&self, pattern: &str, err: DbError) {
        self.state().failures.push((pattern.to_string(), err));
    }

    /// Statements containing `pattern` kill the session that runs them.
    pub fn drop_connection_on(&self, pattern: &str) {
        self.state().drop_on.push(pattern.to_string());
    }

    /// Outcomes for successive `connect` calls; `None` succeeds. Calls past
    /// the end of the script succeed.
    pub fn script_connects(&self, script: Vec<Option<DbError>>) {
        self.state().connect_script = script.into();
    }

    pub fn set_select_rows(&self, rows: Vec<Row>) {
        self.state().select_rows = rows;
    }

    pub fn session(&self) -> FakeSession {
        FakeSession {
            db: self.clone(),
            closed: false,
        }
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector { db: self.clone() }
    }

    /// Every statement sent to any session, in order.
    pub fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    /// Statements from plan steps only: no transaction control, session
    /// setup or catalog lookups.
    pub fn executed(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|s| {
                !matches!(s.as_str(), "BEGIN" | "COMMIT" | "ROLLBACK")
                    && !s.starts_with("SET ")
                    && !s.contains("pg_matviews")
            })
            .collect()
    }

    pub fn views(&self) -> Vec<String> {
        self.state().views.iter().cloned().collect()
    }

    pub fn connects(&self) -> u32 {
        self.state().connects
    }
}

pub struct FakeSession {
    db: FakeDb,
    closed: bool,
}

impl FakeSession {
    pub fn close(&mut self) {
        self.closed = true;
    }

    fn run(&mut self, sql: &str) -> Result<Vec<Row>, DbError> {
        if self.closed {
            return Err(DbError::Connection("connection closed".to_string()));
        }
        let mut state = self.db.state();
        state.log.push(sql.to_string());

        if state.drop_on.iter().any(|p| sql.contains(p.as_str())) {
            self.closed = true;
            return Err(DbError::Connection(
                "server closed the connection unexpectedly".to_string(),
            ));
        }
        if let Some((_, err)) = state.failures.iter().find(|(p, _)| sql.contains(p.as_str())) {
            return Err(err.clone());
        }

        if sql.contains("pg_matviews") {
            return Ok(catalog_rows(&state, sql));
        }

        if let Some(view) = extract_view_name(sql) {
            let if_not_exists = sql.to_uppercase().contains("IF NOT EXISTS");
            if !state.views.insert(view.name.clone()) && !if_not_exists {
                return Err(DbError::Database {
                    code: "42P07".to_string(),
                    message: format!("relation \"{}\" already exists", view.name),
                });
            }
        } else if let Some(name) = dropped_view(sql) {
            state.views.remove(&name);
        }

        match leading_keyword(sql).as_deref() {
            Some("SELECT") | Some("WITH") if state.select_rows.is_empty() => {
                Ok(vec![vec![Some("1".to_string())]])
            }
            Some("SELECT") | Some("WITH") => Ok(state.select_rows.clone()),
            _ => Ok(Vec::new()),
        }
    }
}

fn catalog_rows(state: &FakeState, sql: &str) -> Vec<Row> {
    const MARKER: &str = "matviewname = '";
    if let Some(start) = sql.find(MARKER) {
        let rest = &sql[start + MARKER.len()..];
        let name = rest.split('\'').next().unwrap_or_default();
        return if state.views.contains(name) {
            vec![vec![Some("1".to_string())]]
        } else {
            Vec::new()
        };
    }
    state
        .views
        .iter()
        .map(|v| {
            vec![
                Some(v.clone()),
                Some("16 kB".to_string()),
                Some("t".to_string()),
            ]
        })
        .collect()
}

fn dropped_view(sql: &str) -> Option<String> {
    let toks: Vec<String> = sql.split_whitespace().map(|t| t.to_lowercase()).collect();
    if toks.len() < 4 || toks[..3] != ["drop", "materialized", "view"] {
        return None;
    }
    let name = if toks.len() >= 6 && toks[3] == "if" && toks[4] == "exists" {
        &toks[5]
    } else {
        &toks[3]
    };
    Some(name.trim_end_matches(';').to_string())
}

#[async_trait]
impl Session for FakeSession {
    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        self.run(sql).map(|rows| rows.len() as u64)
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, DbError> {
        self.run(sql)
    }
}

pub struct FakeConnector {
    db: FakeDb,
}

#[async_trait]
impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn connect(&self) -> Result<FakeSession, DbError> {
        let outcome = {
            let mut state = self.db.state();
            state.connects += 1;
            state.connect_script.pop_front().flatten()
        };
        match outcome {
            Some(err) => Err(err),
            None => Ok(self.db.session()),
        }
    }

    fn describe(&self) -> String {
        "fake".to_string()
    }
}
