//! Shared deterministic types for the analysis loop.
//!
//! These types define stable contracts between components. They hold no
//! references to external state and must remain deterministic across runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Lifecycle of a single plan step. Transitions are forward-only:
/// `Pending -> InProgress -> (Completed | Failed)`. A failed step is never
/// resumed; it can only be superseded by a fresh plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }
}

/// One step of an execution plan.
///
/// `step_id` is positive, unique within a plan, and execution order is
/// ascending id. `code` and `result` are filled in once the step succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: u32,
    pub task: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl PlanStep {
    /// Create a fresh step awaiting execution.
    pub fn pending(step_id: u32, task: impl Into<String>) -> Self {
        Self {
            step_id,
            task: task.into(),
            status: StepStatus::Pending,
            code: None,
            result: None,
        }
    }
}

/// An ordered sequence of plan steps.
pub type Plan = Vec<PlanStep>;

/// One entry of the append-only executed-code ledger.
///
/// Entries are never removed or reordered; they are replayed verbatim into
/// prompts as "already executed, do not repeat" context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub code: String,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<u32>,
}

/// Introspected metadata for one tabular variable in the sandbox.
///
/// Matches the JSON payload the introspection script emits: either a full
/// profile or an error string when profiling that variable failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableSummary {
    Profile {
        /// Row and column count.
        shape: (u64, u64),
        #[serde(rename = "columns_and_dtypes")]
        columns: BTreeMap<String, String>,
        head_sample: String,
    },
    Failed { error: String },
}

/// Summaries for every tabular variable currently held by the sandbox,
/// keyed by variable name. Replaced wholesale after each code execution.
pub type TableSummaries = BTreeMap<String, TableSummary>;

/// Verdict on whether the accumulated results answer the user's request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationResult {
    Complete { summary: String },
    Incomplete { reason: String },
}

/// One full user request cycle: the query, the (latest) plan produced for
/// it, and the validation verdict once one exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub query: String,
    pub plan: Plan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
}

/// Terminal outcome of driving one plan step to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The step succeeded; `code` is the exact code that satisfied it and
    /// `result` the captured output.
    Success { code: String, result: String },
    /// Local retries were exhausted; the failure escalates to re-planning.
    Failed { error: String, task: String },
}
