use std::time::Duration;

/// Default server-side statement timeout (30 minutes); view builds over the
/// raw transaction table routinely take tens of minutes.
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

/// Database coordinates.
///
/// Built once at process start from the environment (or any other key/value
/// source) and handed to the connection manager. Nothing else reads the
/// environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    /// Schema holding the materialized views.
    pub schema: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            dbname: "postgres".to_string(),
            schema: "public".to_string(),
        }
    }
}

impl DbConfig {
    /// Build from a key lookup. Each setting reads its `DB_*` key first,
    /// then the `POSTGRES_*` spelling, then falls back to the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| lookup(*k).filter(|v| !v.trim().is_empty()))
        };

        let port = get(&["DB_PORT", "POSTGRES_PORT"])
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(defaults.port);

        Self {
            host: get(&["DB_HOST", "POSTGRES_HOST"]).unwrap_or(defaults.host),
            port,
            user: get(&["DB_USER", "POSTGRES_USER"]).unwrap_or(defaults.user),
            password: get(&["DB_PASSWORD", "POSTGRES_PASSWORD"]).unwrap_or(defaults.password),
            dbname: get(&["DB_NAME", "POSTGRES_DB"]).unwrap_or(defaults.dbname),
            schema: get(&["DB_SCHEMA"]).unwrap_or(defaults.schema),
        }
    }

    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `user@host:port/dbname`, safe to log.
    pub fn display_target(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.dbname)
    }
}

/// TCP keepalive settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    pub idle: Duration,
    pub interval: Duration,
    pub count: u32,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(30),
            interval: Duration::from_secs(10),
            count: 5,
        }
    }
}

/// Per-session settings applied right after connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub statement_timeout: Duration,
    pub connect_timeout: Duration,
    /// `None` disables TCP keepalives.
    pub keepalive: Option<Keepalive>,
    pub application_name: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            statement_timeout: Duration::from_secs(DEFAULT_STATEMENT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            keepalive: Some(Keepalive::default()),
            application_name: "viewforge".to_string(),
        }
    }
}

impl SessionSettings {
    /// `SET` statements issued on every new session, in order.
    pub fn setup_statements(&self) -> Vec<String> {
        let mut stmts = vec![format!(
            "SET statement_timeout = {}",
            self.statement_timeout.as_millis()
        )];
        if let Some(ka) = &self.keepalive {
            stmts.push(format!("SET tcp_keepalives_idle = {}", ka.idle.as_secs()));
            stmts.push(format!(
                "SET tcp_keepalives_interval = {}",
                ka.interval.as_secs()
            ));
            stmts.push(format!("SET tcp_keepalives_count = {}", ka.count));
        }
        stmts
    }
}

/// Bounded, fixed-delay retry for connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_COUNT,
            delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        }
    }
}

/// How a failing statement affects the rest of its step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatementPolicy {
    /// Stop at the first failing statement; the step fails.
    #[default]
    AbortStep,
    /// Keep running the step's remaining statements; the step still fails.
    ContinueStep,
}

impl StatementPolicy {
    pub fn continue_on_error(self) -> bool {
        matches!(self, StatementPolicy::ContinueStep)
    }
}

/// Run-level options for the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub skip_existing: bool,
    pub statement_policy: StatementPolicy,
    /// Schema the existence checks and the final listing look at.
    pub schema: String,
}
