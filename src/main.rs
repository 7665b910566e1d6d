use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use viewforge::config::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY_SECS,
    DEFAULT_STATEMENT_TIMEOUT_SECS, DbConfig, Keepalive, PipelineConfig, RetryPolicy,
    SessionSettings, StatementPolicy,
};
use viewforge::db::{ConnectionManager, PgConnector};
use viewforge::logging;
use viewforge::orchestrator::Orchestrator;
use viewforge::plan::{Plan, Selection};
use viewforge::ui::{PipelineUI, print_dry_run, print_plan};

#[derive(Parser)]
#[command(name = "viewforge")]
#[command(
    version,
    about = "Build analytic materialized views in ordered, resumable steps"
)]
pub struct Cli {
    /// 1-indexed step to begin from
    #[arg(long, default_value_t = 1, value_name = "N")]
    pub start_step: u32,

    /// Run exactly this step (overrides --start-step)
    #[arg(long, value_name = "N")]
    pub only_step: Option<u32>,

    /// Run these steps by name or ordinal, in plan order (comma-separated)
    #[arg(long, value_delimiter = ',', value_name = "STEPS")]
    pub steps: Option<Vec<String>>,

    /// Skip steps that reference materialized views that already exist
    #[arg(long)]
    pub skip_exists: bool,

    /// Statement timeout in seconds
    #[arg(long, default_value_t = DEFAULT_STATEMENT_TIMEOUT_SECS, value_name = "SECS")]
    pub timeout: u64,

    /// Connection attempts before giving up
    #[arg(long, default_value_t = DEFAULT_RETRY_COUNT, value_name = "N")]
    pub retries: u32,

    /// Delay between connection attempts in seconds
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY_SECS, value_name = "SECS")]
    pub retry_delay: u64,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS, value_name = "SECS")]
    pub connect_timeout: u64,

    /// Disable TCP keepalives
    #[arg(long)]
    pub no_keepalives: bool,

    /// Keep running a step's remaining statements after one fails
    #[arg(long)]
    pub continue_statements: bool,

    /// Load the plan from a TOML or JSON file instead of the built-in plan
    #[arg(long, value_name = "PATH")]
    pub plan: Option<PathBuf>,

    /// Print the plan and exit
    #[arg(long)]
    pub list: bool,

    /// Print the selected steps and their statements without connecting
    #[arg(long)]
    pub dry_run: bool,

    /// Write a JSON run report to this path
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    fn selection(&self) -> Selection {
        Selection::from_flags(self.start_step, self.only_step, self.steps.clone())
    }

    fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            statement_timeout: Duration::from_secs(self.timeout),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            keepalive: (!self.no_keepalives).then(Keepalive::default),
            ..SessionSettings::default()
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retries,
            delay: Duration::from_secs(self.retry_delay),
        }
    }

    fn statement_policy(&self) -> StatementPolicy {
        if self.continue_statements {
            StatementPolicy::ContinueStep
        } else {
            StatementPolicy::AbortStep
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_json);

    let plan = Plan::load_or_builtin(cli.plan.as_deref()).context("Failed to load execution plan")?;
    let selection = cli.selection();
    let selected = selection
        .resolve(&plan)
        .context("Invalid step selection")?;

    if cli.list {
        print_plan(&plan, &selected);
        return Ok(());
    }
    if cli.dry_run {
        print_dry_run(&selected);
        return Ok(());
    }

    let db = DbConfig::from_env();
    let schema = db.schema.clone();
    let settings = cli.session_settings();
    let manager = ConnectionManager::new(
        PgConnector::new(db, settings.clone()),
        settings,
        cli.retry_policy(),
    );
    let pipeline = PipelineConfig {
        skip_existing: cli.skip_exists,
        statement_policy: cli.statement_policy(),
        schema: schema.clone(),
    };

    let ui = Arc::new(PipelineUI::new(selected.len() as u64, cli.verbose));
    let orchestrator = Orchestrator::new(manager, pipeline).with_ui(Arc::clone(&ui));

    let outcome = orchestrator.run(&plan, &selection).await;
    ui.finish();
    let report = outcome.context("Pipeline aborted")?;

    ui.print_summary(&report);
    ui.print_views(&schema, &report.views);

    if let Some(path) = &cli.report {
        report.write_json(path)?;
    }

    Ok(())
}
