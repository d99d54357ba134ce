//! Context assembly: structured, bounded prompt inputs built from state.
//!
//! Every function here is a pure view over [`AnalysisState`] plus the
//! workspace file list; no I/O happens in this module. Each section
//! degrades to an explicit sentinel instead of an empty string so the
//! model never sees an ambiguous blank. Template scaffolding lives in
//! `io::prompt`; this module only produces the content records.

use serde::Serialize;

use crate::core::state::AnalysisState;
use crate::core::types::{LedgerEntry, PlanStep, TableSummary, ValidationResult};

pub const NO_FILES: &str = "(no files in the workspace)";
pub const NO_TABLES: &str = "No tables are loaded yet.";
pub const NO_CODE: &str = "No code has been executed yet.";
pub const NO_HISTORY: &str = "None.";

/// Inputs for planner and re-planner prompts.
#[derive(Debug, Clone, Serialize)]
pub struct PlannerContext {
    pub history: String,
    pub query: String,
    pub files: String,
    pub tables: String,
}

/// Inputs for a worker prompt: one step of the current plan plus everything
/// the worker needs to write code for it.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerContext {
    pub goal: String,
    pub step_id: u32,
    pub task: String,
    pub plan: String,
    pub ledger: String,
    pub files: String,
    pub tables: String,
}

/// Inputs for the validation prompt.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatorContext {
    pub query: String,
    pub step_results: String,
    pub script: String,
}

/// Failure description fed into a re-planning prompt. Either a failed step
/// (task + execution error) or the validator's incompleteness reason.
#[derive(Debug, Clone, Serialize)]
pub struct FailureContext {
    pub failed_task: String,
    pub error: String,
}

/// Assemble the planner context: prior-interaction history, the current
/// query, workspace files, and table summaries.
pub fn planner_context(state: &AnalysisState, workspace_files: &[String]) -> PlannerContext {
    PlannerContext {
        history: history(state),
        query: state.current_query().unwrap_or_default().to_string(),
        files: render_files(workspace_files),
        tables: render_tables(state),
    }
}

/// Assemble the worker context for `step`: the overall goal, the full plan
/// with the active step marked, the complete code ledger, workspace files,
/// and table summaries.
pub fn worker_context(
    state: &AnalysisState,
    workspace_files: &[String],
    step: &PlanStep,
) -> WorkerContext {
    WorkerContext {
        goal: state.current_query().unwrap_or_default().to_string(),
        step_id: step.step_id,
        task: step.task.clone(),
        plan: render_plan(state.plan(), step.step_id),
        ledger: render_ledger(state.ledger()),
        files: render_files(workspace_files),
        tables: render_tables(state),
    }
}

/// Assemble the validation context: the query, per-step results of the
/// current plan, and the concatenated executed-code script.
pub fn validator_context(state: &AnalysisState) -> ValidatorContext {
    ValidatorContext {
        query: state.current_query().unwrap_or_default().to_string(),
        step_results: render_step_results(state.plan()),
        script: render_script(state.ledger()),
    }
}

/// Render every past interaction (the current one is excluded): its query,
/// plan, and validation outcome.
pub fn history(state: &AnalysisState) -> String {
    let past = state.past_interactions();
    if past.is_empty() {
        return NO_HISTORY.to_string();
    }
    let mut sections = Vec::with_capacity(past.len());
    for (turn, interaction) in past.iter().enumerate() {
        let mut lines = vec![
            format!("--- Turn {} ---", turn + 1),
            format!("Query: {}", interaction.query),
        ];
        for step in &interaction.plan {
            lines.push(format!(
                "  Step {} ({}): {}",
                step.step_id,
                step.status.as_str(),
                step.task
            ));
        }
        match &interaction.validation {
            Some(ValidationResult::Complete { summary }) => {
                lines.push(format!("Outcome: complete - {}", summary));
            }
            Some(ValidationResult::Incomplete { reason }) => {
                lines.push(format!("Outcome: incomplete - {}", reason));
            }
            None => lines.push("Outcome: not validated".to_string()),
        }
        sections.push(lines.join("\n"));
    }
    sections.join("\n")
}

fn render_files(files: &[String]) -> String {
    if files.is_empty() {
        return NO_FILES.to_string();
    }
    files
        .iter()
        .map(|name| format!("`{}`", name))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_tables(state: &AnalysisState) -> String {
    if state.summaries().is_empty() {
        return NO_TABLES.to_string();
    }
    let mut sections = Vec::new();
    for (name, summary) in state.summaries() {
        sections.push(format!("- `{}`:\n{}", name, render_table(summary)));
    }
    sections.join("\n")
}

fn render_table(summary: &TableSummary) -> String {
    match summary {
        TableSummary::Profile {
            shape,
            columns,
            head_sample,
        } => {
            let columns = columns
                .iter()
                .map(|(name, dtype)| format!("{} ({})", name, dtype))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "  - Shape: {} rows x {} columns\n  - Columns: [{}]\n  - Head sample:\n```csv\n{}```",
                shape.0, shape.1, columns, head_sample
            )
        }
        TableSummary::Failed { error } => format!("  - Error fetching summary: {}", error),
    }
}

fn render_plan(plan: &[PlanStep], active_id: u32) -> String {
    plan.iter()
        .map(|step| {
            let marker = if step.step_id == active_id {
                "==>"
            } else {
                "   "
            };
            format!(
                "{} Step {} ({}): {}",
                marker,
                step.step_id,
                step.status.as_str(),
                step.task
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_ledger(ledger: &[LedgerEntry]) -> String {
    if ledger.is_empty() {
        return NO_CODE.to_string();
    }
    ledger
        .iter()
        .map(|entry| format!("```python\n{}\n```", entry.code))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_step_results(plan: &[PlanStep]) -> String {
    if plan.is_empty() {
        return "No steps were executed.".to_string();
    }
    plan.iter()
        .map(|step| {
            let result = step.result.as_deref().unwrap_or("(no output)");
            format!(
                "Step {} ({}): {}\nResult:\n{}",
                step.step_id,
                step.status.as_str(),
                step.task,
                result
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_script(ledger: &[LedgerEntry]) -> String {
    if ledger.is_empty() {
        return NO_CODE.to_string();
    }
    ledger
        .iter()
        .map(|entry| entry.code.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{StepStatus, TableSummaries};

    fn state_with_plan() -> AnalysisState {
        let mut state = AnalysisState::new();
        state.begin_interaction("trend of sales over time");
        state
            .set_plan(vec![
                PlanStep::pending(1, "load data"),
                PlanStep::pending(2, "summarize"),
            ])
            .expect("plan");
        state
    }

    #[test]
    fn empty_sections_render_explicit_sentinels() {
        let state = AnalysisState::new();
        let mut probe = AnalysisState::new();
        probe.begin_interaction("q");

        let ctx = planner_context(&probe, &[]);
        assert_eq!(ctx.history, NO_HISTORY);
        assert_eq!(ctx.files, NO_FILES);
        assert_eq!(ctx.tables, NO_TABLES);
        assert_eq!(history(&state), NO_HISTORY);
    }

    #[test]
    fn worker_context_marks_exactly_the_active_step() {
        let state = state_with_plan();
        let step = state.plan()[1].clone();
        let ctx = worker_context(&state, &[], &step);

        assert_eq!(ctx.plan.matches("==>").count(), 1);
        assert!(ctx.plan.contains("==> Step 2 (pending): summarize"));
        assert!(ctx.plan.contains("    Step 1 (pending): load data"));
        assert_eq!(ctx.ledger, NO_CODE);
    }

    #[test]
    fn worker_context_replays_the_ledger_as_fenced_blocks() {
        let mut state = state_with_plan();
        state.append_ledger("import pandas as pd", "");
        state.mark_step(1, StepStatus::InProgress).expect("mark");
        state
            .record_step_success(1, "df = pd.read_csv('sales.csv')", "")
            .expect("record");

        let step = state.plan()[1].clone();
        let ctx = worker_context(&state, &["sales.csv".to_string()], &step);
        assert!(ctx.ledger.contains("```python\nimport pandas as pd\n```"));
        assert!(
            ctx.ledger
                .contains("```python\ndf = pd.read_csv('sales.csv')\n```")
        );
        assert!(ctx.files.contains("`sales.csv`"));
    }

    #[test]
    fn history_excludes_the_current_interaction() {
        let mut state = AnalysisState::new();
        state.begin_interaction("first question");
        state
            .set_plan(vec![PlanStep::pending(1, "inspect")])
            .expect("plan");
        state
            .set_validation(ValidationResult::Complete {
                summary: "answered".to_string(),
            })
            .expect("validation");
        state.begin_interaction("second question");

        let rendered = history(&state);
        assert!(rendered.contains("first question"));
        assert!(rendered.contains("complete - answered"));
        assert!(!rendered.contains("second question"));
    }

    #[test]
    fn table_summaries_render_profile_and_error_variants() {
        let mut state = AnalysisState::new();
        state.begin_interaction("q");
        let mut summaries = TableSummaries::new();
        summaries.insert(
            "sales".to_string(),
            TableSummary::Profile {
                shape: (100, 3),
                columns: [
                    ("amount".to_string(), "float64".to_string()),
                    ("region".to_string(), "object".to_string()),
                ]
                .into_iter()
                .collect(),
                head_sample: "amount,region\n1.5,east\n".to_string(),
            },
        );
        summaries.insert(
            "broken".to_string(),
            TableSummary::Failed {
                error: "introspection failed".to_string(),
            },
        );
        state.replace_summaries(summaries);

        let ctx = planner_context(&state, &[]);
        assert!(ctx.tables.contains("100 rows x 3 columns"));
        assert!(ctx.tables.contains("amount (float64), region (object)"));
        assert!(ctx.tables.contains("Error fetching summary: introspection failed"));
    }

    #[test]
    fn validator_context_collects_results_and_script() {
        let mut state = state_with_plan();
        state.mark_step(1, StepStatus::InProgress).expect("mark");
        state
            .record_step_success(1, "print(df.shape)", "(100, 3)")
            .expect("record");
        state.mark_step(1, StepStatus::Completed).expect("mark");

        let ctx = validator_context(&state);
        assert_eq!(ctx.query, "trend of sales over time");
        assert!(ctx.step_results.contains("Step 1 (completed): load data"));
        assert!(ctx.step_results.contains("(100, 3)"));
        assert!(ctx.step_results.contains("Step 2 (pending): summarize"));
        assert_eq!(ctx.script, "print(df.shape)");
    }
}
