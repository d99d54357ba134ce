//! Step execution with a bounded local retry loop.
//!
//! The worker drives one plan step to a terminal outcome. Local failures
//! (unusable tool call, unknown tool, bad arguments, execution error) are
//! absorbed by retrying with a diagnostic note appended to a context copy
//! local to the call; nothing global changes until the outcome is final.
//! Exhausting the retry budget promotes the failure to plan level.

use std::sync::LazyLock;
use std::time::Duration;

use jsonschema::{Draft, Validator};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::context::WorkerContext;
use crate::core::state::AnalysisState;
use crate::core::types::{TableSummaries, TaskOutcome};
use crate::io::llm::{CompletionClient, CompletionRequest, ResponseShape};
use crate::io::prompt::PromptEngine;
use crate::io::prompt_log::PromptLog;
use crate::io::sandbox::Sandbox;

const WORKER_OUTPUT_SCHEMA: &str = include_str!("../schemas/worker_output.schema.json");

/// The one registered tool: execute code in the stateful sandbox.
pub const TOOL_RUN_PYTHON: &str = "run_python";

static TOOL_CALL_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(WORKER_OUTPUT_SCHEMA).expect("embedded worker schema should parse");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("embedded worker schema should compile")
});

/// Parameters for executing one plan step.
#[derive(Debug, Clone)]
pub struct StepRequest<'a> {
    pub context: &'a WorkerContext,
    /// Code prefix that moves the sandbox into the workspace first.
    pub chdir_prelude: &'a str,
    pub max_retries: u32,
    pub timeout: Duration,
}

/// Drive one plan step to completion or terminal failure.
///
/// Table summaries are re-derived and replaced in `state` after every tool
/// execution, successful or not, so observed state stays synchronized with
/// the sandbox even when code partially succeeds.
#[instrument(skip_all, fields(step_id = request.context.step_id, max_retries = request.max_retries))]
pub fn execute_step<C: CompletionClient, S: Sandbox>(
    client: &C,
    sandbox: &mut S,
    engine: &PromptEngine,
    prompt_log: &PromptLog,
    state: &mut AnalysisState,
    request: &StepRequest<'_>,
) -> TaskOutcome {
    let mut notes: Vec<String> = Vec::new();

    for attempt in 1..=request.max_retries {
        let prompt = match engine.render_worker(request.context, &notes.join("\n\n")) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %err, "worker prompt rendering failed");
                notes.push(attempt_note(attempt, &format!("prompt rendering failed: {err:#}")));
                continue;
            }
        };
        prompt_log.record("worker", &prompt);

        let response = match client.complete(&CompletionRequest {
            prompt,
            shape: ResponseShape::Json,
            timeout: request.timeout,
        }) {
            Ok(value) => value,
            Err(err) => {
                warn!(attempt, err = %err, "no usable tool call from model");
                notes.push(attempt_note(
                    attempt,
                    &format!("failed to get a valid tool call from the model: {err:#}"),
                ));
                continue;
            }
        };

        let (tool_name, arguments) = match decode_tool_call(&response) {
            Ok(call) => call,
            Err(msg) => {
                warn!(attempt, msg = %msg, "malformed tool call");
                notes.push(attempt_note(attempt, &msg));
                continue;
            }
        };

        if tool_name != TOOL_RUN_PYTHON {
            warn!(attempt, tool_name, "unregistered tool requested");
            notes.push(attempt_note(
                attempt,
                &format!("tool '{}' is not registered", tool_name),
            ));
            continue;
        }

        let code = match arguments.get("code").and_then(Value::as_str) {
            Some(code) => code.to_string(),
            None => {
                warn!(attempt, "tool call argument error");
                notes.push(attempt_note(
                    attempt,
                    "tool call argument error: 'code' must be a string",
                ));
                continue;
            }
        };

        debug!(attempt, code_bytes = code.len(), "dispatching tool call");
        let prefixed = format!("{}{}", request.chdir_prelude, code);
        let output = match sandbox.run_code(&prefixed) {
            Ok(output) => output,
            Err(err) => {
                warn!(attempt, err = %err, "sandbox call failed");
                notes.push(attempt_note(attempt, &format!("sandbox call failed: {err:#}")));
                continue;
            }
        };

        // Observed state must track the sandbox even on partial failure.
        refresh_summaries(sandbox, state);

        if output.stderr.is_empty() {
            info!(attempt, "step succeeded");
            return TaskOutcome::Success {
                code,
                result: output.stdout,
            };
        }

        warn!(attempt, "execution error, retrying");
        notes.push(execution_note(attempt, &code, &output.stderr));
    }

    info!("retries exhausted, escalating to re-planning");
    TaskOutcome::Failed {
        error: format!(
            "worker failed to execute the task after {} attempts",
            request.max_retries
        ),
        task: request.context.task.clone(),
    }
}

/// Validate the response against the tool-call schema and pull out the
/// call. Returns a diagnostic message usable as an attempt note on failure.
fn decode_tool_call(response: &Value) -> Result<(&str, &Value), String> {
    let violations: Vec<String> = TOOL_CALL_VALIDATOR
        .iter_errors(response)
        .map(|err| err.to_string())
        .collect();
    if !violations.is_empty() {
        return Err(format!(
            "response is not a valid tool call: {}",
            violations.join("; ")
        ));
    }
    let call = &response["tool_call"];
    let tool_name = call["tool_name"]
        .as_str()
        .ok_or_else(|| "tool_name is not a string".to_string())?;
    Ok((tool_name, &call["arguments"]))
}

fn refresh_summaries<S: Sandbox>(sandbox: &mut S, state: &mut AnalysisState) {
    let summaries = sandbox.table_summaries().unwrap_or_else(|err| {
        warn!(err = %err, "table introspection failed");
        TableSummaries::new()
    });
    state.replace_summaries(summaries);
}

fn attempt_note(attempt: u32, message: &str) -> String {
    format!("**Attempt {} error:**\n{}", attempt, message)
}

fn execution_note(attempt: u32, code: &str, error: &str) -> String {
    format!(
        "**Attempt {} failed.** This code was executed:\n```python\n{}\n```\nIt failed with:\n```\n{}\n```\nAnalyze the error, review the current table summaries, and provide corrected, idempotent code.",
        attempt, code, error
    )
}
