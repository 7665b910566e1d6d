//! Runs a single plan step against a session.
//!
//! The executor never returns an error for database failures. Every outcome,
//! including a dead session, is folded into an `ExecutionResult` that the
//! orchestrator consumes.

use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::db::{Row, Session, view_exists};
use crate::errors::{DbError, ErrorKind};
use crate::plan::Step;
use crate::sql::{
    ViewName, extract_view_name, is_create_materialized_view, is_select_only, requires_autocommit,
    split_statements,
};

/// Characters of a failing statement included in logs.
const STATEMENT_PREVIEW_CHARS: usize = 100;

/// Outcome of one step invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub step_name: String,
    pub success: bool,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Rows of a single read-only statement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    pub statements_run: usize,
    pub statements_failed: usize,
    /// The step's view already existed, nothing was executed.
    pub skipped_existing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    fn new(step: &Step) -> Self {
        Self {
            step_name: step.name.clone(),
            success: false,
            duration_seconds: 0.0,
            error_kind: None,
            rows: None,
            statements_run: 0,
            statements_failed: 0,
            skipped_existing: false,
            error: None,
        }
    }

    fn record_failure(&mut self, kind: ErrorKind, message: String) {
        self.statements_failed += 1;
        // The first failure determines the step's classification
        if self.error_kind.is_none() {
            self.error_kind = Some(kind);
            self.error = Some(message);
        }
    }
}

/// Executes steps statement by statement, one transaction per statement.
#[derive(Debug, Clone)]
pub struct StepExecutor {
    schema: String,
}

impl StepExecutor {
    /// `schema` is where unqualified view names are looked up.
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }

    pub async fn execute<S>(
        &self,
        session: &mut S,
        step: &Step,
        continue_on_error: bool,
    ) -> ExecutionResult
    where
        S: Session + ?Sized,
    {
        let started = Instant::now();
        let mut result = ExecutionResult::new(step);

        if session.is_closed() {
            warn!(step = %step.name, "session is closed, step not executed");
            result.error_kind = Some(ErrorKind::ConnectionClosed);
            result.error = Some("session is closed".to_string());
            result.duration_seconds = started.elapsed().as_secs_f64();
            return result;
        }

        let statements = split_statements(&step.sql_body);

        if self.view_already_built(session, step, &statements).await {
            result.success = true;
            result.skipped_existing = true;
            result.duration_seconds = started.elapsed().as_secs_f64();
            return result;
        }

        match statements.as_slice() {
            [] => {
                debug!(step = %step.name, "step has no statements");
                result.success = true;
            }
            [single] if is_select_only(single) => {
                result.statements_run = 1;
                match session.query(single).await {
                    Ok(rows) => {
                        result.success = true;
                        result.rows = Some(rows);
                    }
                    Err(e) => {
                        self.fail_statement(session, &mut result, single, &e).await;
                    }
                }
            }
            _ => {
                for stmt in &statements {
                    result.statements_run += 1;
                    if let Err(e) = run_statement(session, stmt).await {
                        self.fail_statement(session, &mut result, stmt, &e).await;
                        if !continue_on_error || session.is_closed() {
                            break;
                        }
                    }
                }
                result.success = result.statements_failed == 0;
            }
        }

        result.duration_seconds = started.elapsed().as_secs_f64();
        if result.success {
            info!(
                step = %step.name,
                statements = result.statements_run,
                duration_s = result.duration_seconds,
                "step succeeded"
            );
        }
        result
    }

    /// Check the catalog when the step opens with `CREATE MATERIALIZED VIEW`.
    /// The step counts as built only when every view it creates exists; a
    /// failed lookup counts as "not built".
    async fn view_already_built<S>(
        &self,
        session: &mut S,
        step: &Step,
        statements: &[String],
    ) -> bool
    where
        S: Session + ?Sized,
    {
        if !statements.first().is_some_and(|s| is_create_materialized_view(s)) {
            return false;
        }
        let views: Vec<ViewName> = statements
            .iter()
            .filter_map(|s| extract_view_name(s))
            .collect();
        if views.is_empty() {
            return false;
        }

        for view in &views {
            match view_exists(session, &self.schema, view).await {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => {
                    warn!(
                        step = %step.name,
                        view = %view,
                        error = %e,
                        "existence check failed, executing step"
                    );
                    return false;
                }
            }
        }
        info!(step = %step.name, views = views.len(), "materialized views already exist, skipping");
        true
    }

    async fn fail_statement<S>(
        &self,
        session: &mut S,
        result: &mut ExecutionResult,
        stmt: &str,
        err: &DbError,
    ) where
        S: Session + ?Sized,
    {
        let kind = ErrorKind::classify(err);
        warn!(
            step = %result.step_name,
            error_kind = %kind,
            sqlstate = err.sqlstate().unwrap_or("-"),
            error = %err,
            statement = %preview(stmt),
            "statement failed"
        );
        rollback_quietly(session).await;
        result.record_failure(kind, err.to_string());
    }
}

/// Run one statement in its own transaction, or in autocommit when
/// PostgreSQL refuses it inside a transaction block.
async fn run_statement<S>(session: &mut S, stmt: &str) -> Result<u64, DbError>
where
    S: Session + ?Sized,
{
    if requires_autocommit(stmt) {
        return session.execute(stmt).await;
    }
    session.begin().await?;
    let affected = session.execute(stmt).await?;
    session.commit().await?;
    Ok(affected)
}

async fn rollback_quietly<S>(session: &mut S)
where
    S: Session + ?Sized,
{
    if session.is_closed() {
        return;
    }
    if let Err(e) = session.rollback().await {
        warn!(error = %e, "rollback failed");
    }
}

fn preview(stmt: &str) -> String {
    let flat = stmt.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > STATEMENT_PREVIEW_CHARS {
        let cut: String = flat.chars().take(STATEMENT_PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        flat
    }
}
