use serde::Serialize;

/// Orchestrator state. Every transition is appended to the run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Connecting,
    /// A transient connection failure; `attempt` is the attempt that failed.
    Retrying { attempt: u32 },
    Planning,
    Executing { ordinal: u32 },
    Reconnecting { ordinal: u32 },
    Skipped { ordinal: u32 },
    Reporting,
    Done,
}

/// How a selected step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed,
    /// Its view was already present, nothing was executed.
    SkippedExisting,
    /// The session was dead and could not be replaced.
    SkippedReconnectFailed,
}

impl StepOutcome {
    /// Whether the step counts toward the success tally.
    pub fn is_success(self) -> bool {
        matches!(self, StepOutcome::Succeeded | StepOutcome::SkippedExisting)
    }

    pub fn label(self) -> &'static str {
        match self {
            StepOutcome::Succeeded => "succeeded",
            StepOutcome::Failed => "failed",
            StepOutcome::SkippedExisting => "skipped (exists)",
            StepOutcome::SkippedReconnectFailed => "skipped (reconnect failed)",
        }
    }
}
