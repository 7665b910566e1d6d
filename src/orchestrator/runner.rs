use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use super::report::{RunReport, StepRecord};
use super::state::{RunState, StepOutcome};
use crate::config::PipelineConfig;
use crate::db::{ConnectionManager, Connector, MatviewInfo, Session, list_materialized_views};
use crate::errors::RunError;
use crate::executor::{ExecutionResult, StepExecutor};
use crate::plan::{Plan, Selection, Step};
use crate::sql::{
    contains_view_creation, extract_view_name, references_identifier, split_statements,
};
use crate::ui::PipelineUI;

/// Drives the selected steps of a plan through one session.
///
/// Only an invalid selection or the initial connection can fail a run.
/// Everything after that is recorded in the `RunReport`: failing steps never
/// stop the steps after them.
pub struct Orchestrator<C: Connector> {
    manager: ConnectionManager<C>,
    executor: StepExecutor,
    config: PipelineConfig,
    ui: Option<Arc<PipelineUI>>,
}

impl<C: Connector> Orchestrator<C> {
    pub fn new(manager: ConnectionManager<C>, config: PipelineConfig) -> Self {
        let executor = StepExecutor::new(config.schema.clone());
        Self {
            manager,
            executor,
            config,
            ui: None,
        }
    }

    pub fn with_ui(mut self, ui: Arc<PipelineUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    pub async fn run(&self, plan: &Plan, selection: &Selection) -> Result<RunReport, RunError> {
        // Selection errors surface before any connection attempt
        let steps = selection.resolve(plan)?;

        let started = Instant::now();
        let target = self.manager.target();
        let mut report = RunReport::new(target.clone());

        report.transition(RunState::Connecting);
        if let Some(ref ui) = self.ui {
            ui.connecting(&target);
        }
        let max_attempts = self.manager.retry_policy().attempts.max(1);
        let acquired = self
            .manager
            .acquire_observed(|attempt| {
                report.transition(RunState::Retrying { attempt });
                report.transition(RunState::Connecting);
                if let Some(ref ui) = self.ui {
                    ui.connection_retry(attempt, max_attempts);
                }
            })
            .await;
        let mut session = match acquired {
            Ok(session) => session,
            Err(e) => {
                error!(target_db = %target, error = %e, "could not connect to the database");
                return Err(e.into());
            }
        };
        if let Some(ref ui) = self.ui {
            ui.connected();
        }

        report.transition(RunState::Planning);
        let existing = if self.config.skip_existing {
            self.existing_view_names(&mut session).await
        } else {
            Vec::new()
        };
        info!(
            selected = steps.len(),
            plan_steps = plan.len(),
            skip_existing = self.config.skip_existing,
            statement_timeout_s = self.manager.settings().statement_timeout.as_secs(),
            "starting pipeline"
        );

        for step in steps {
            let record = self
                .run_step(&mut session, step, plan.len(), &existing, &mut report)
                .await;
            report.record(record);
        }

        report.transition(RunState::Reporting);
        report.views = self.final_listing(&mut session).await;
        report.duration_seconds = started.elapsed().as_secs_f64();

        info!(
            success = report.success_count,
            total = report.total_steps_run,
            duration_s = report.duration_seconds,
            "{}",
            report.summary_line()
        );
        if !report.all_succeeded() {
            warn!("some steps did not succeed; inspect the log output above");
        }

        report.transition(RunState::Done);
        Ok(report)
    }

    async fn run_step(
        &self,
        session: &mut C::Session,
        step: &Step,
        plan_len: usize,
        existing: &[String],
        report: &mut RunReport,
    ) -> StepRecord {
        let ordinal = step.ordinal;

        if let Some(view) = existing_reference(step, existing) {
            info!(step = %step.name, ordinal, view = %view, "view already exists, skipping step");
            report.transition(RunState::Skipped { ordinal });
            if let Some(ref ui) = self.ui {
                ui.step_skipped(ordinal, &step.name, "already exists");
            }
            return record(step, StepOutcome::SkippedExisting, None);
        }

        if contains_view_creation(&step.sql_body) && session.is_closed() {
            report.transition(RunState::Reconnecting { ordinal });
            if let Some(ref ui) = self.ui {
                ui.reconnecting(ordinal);
            }
            match self.manager.reconnect().await {
                Ok(fresh) => *session = fresh,
                Err(e) => {
                    warn!(step = %step.name, ordinal, error = %e, "reconnect failed, skipping step");
                    report.transition(RunState::Skipped { ordinal });
                    if let Some(ref ui) = self.ui {
                        ui.step_skipped(ordinal, &step.name, "reconnect failed");
                    }
                    return record(step, StepOutcome::SkippedReconnectFailed, None);
                }
            }
        }

        report.transition(RunState::Executing { ordinal });
        info!(ordinal, "Step {}/{}: {}", ordinal, plan_len, step.name);
        if let Some(ref ui) = self.ui {
            ui.start_step(ordinal, plan_len, &step.name);
        }

        let result = self
            .executor
            .execute(
                session,
                step,
                self.config.statement_policy.continue_on_error(),
            )
            .await;

        let outcome = if result.skipped_existing {
            StepOutcome::SkippedExisting
        } else if result.success {
            StepOutcome::Succeeded
        } else {
            StepOutcome::Failed
        };

        match outcome {
            StepOutcome::Failed => {
                error!(
                    step = %step.name,
                    ordinal,
                    error_kind = ?result.error_kind,
                    duration_s = result.duration_seconds,
                    "step failed"
                );
                if let Some(ref ui) = self.ui {
                    ui.step_failed(
                        ordinal,
                        &step.name,
                        result.error_kind,
                        result.error.as_deref().unwrap_or_default(),
                    );
                }
            }
            StepOutcome::SkippedExisting => {
                if let Some(ref ui) = self.ui {
                    ui.step_skipped(ordinal, &step.name, "already exists");
                }
            }
            _ => {
                if let Some(ref ui) = self.ui {
                    ui.step_succeeded(ordinal, &step.name, result.duration_seconds);
                }
            }
        }

        record(step, outcome, Some(result))
    }

    /// Names of the materialized views already in the target schema. A
    /// failing catalog query disables skipping for this run.
    async fn existing_view_names(&self, session: &mut C::Session) -> Vec<String> {
        match list_materialized_views(session, &self.config.schema).await {
            Ok(views) => {
                info!(count = views.len(), "found existing materialized views");
                views.into_iter().map(|v| v.name).collect()
            }
            Err(e) => {
                warn!(error = %e, "could not list existing views, nothing will be skipped");
                Vec::new()
            }
        }
    }

    async fn final_listing(&self, session: &mut C::Session) -> Vec<MatviewInfo> {
        if session.is_closed() {
            match self.manager.reconnect().await {
                Ok(fresh) => *session = fresh,
                Err(e) => {
                    warn!(error = %e, "could not reconnect to list materialized views");
                    return Vec::new();
                }
            }
        }
        match list_materialized_views(session, &self.config.schema).await {
            Ok(views) => views,
            Err(e) => {
                warn!(error = %e, "could not list materialized views");
                Vec::new()
            }
        }
    }
}

/// Why `step` can be skipped, if it can. Drop steps always run.
///
/// A step that creates views is done only when every view it creates is
/// already present. A step that creates none is done when it mentions an
/// existing view.
fn existing_reference(step: &Step, existing: &[String]) -> Option<String> {
    if step.is_drop() {
        return None;
    }
    let created: Vec<String> = split_statements(&step.sql_body)
        .iter()
        .filter_map(|stmt| extract_view_name(stmt))
        .map(|view| view.name)
        .collect();

    if created.is_empty() {
        return existing
            .iter()
            .find(|view| references_identifier(&step.sql_body, view))
            .cloned();
    }
    created
        .iter()
        .all(|view| existing.contains(view))
        .then(|| created.join(", "))
}

fn record(step: &Step, outcome: StepOutcome, result: Option<ExecutionResult>) -> StepRecord {
    StepRecord {
        ordinal: step.ordinal,
        name: step.name.clone(),
        outcome,
        result,
    }
}
