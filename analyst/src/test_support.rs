//! Test-only scripted collaborators and fixtures.

use std::cell::RefCell;
use std::collections::VecDeque;

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::core::types::{TableSummaries, ValidationResult};
use crate::io::llm::{CompletionClient, CompletionRequest};
use crate::io::sandbox::{ExecOutput, Sandbox};

/// One scripted completion result.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Json(Value),
    Error(String),
}

/// Completion client that replays a fixed script and records every prompt.
pub struct ScriptedClient {
    queue: RefCell<VecDeque<ScriptedResponse>>,
    repeat: Option<ScriptedResponse>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedClient {
    /// Answer requests from a queue; an exhausted queue is an error.
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            queue: RefCell::new(responses.into()),
            repeat: None,
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// Answer every request with the same response, forever.
    pub fn always(response: ScriptedResponse) -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
            repeat: Some(response),
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// Every prompt seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }
}

impl CompletionClient for ScriptedClient {
    fn complete(&self, request: &CompletionRequest) -> Result<Value> {
        self.prompts.borrow_mut().push(request.prompt.clone());
        let next = self
            .queue
            .borrow_mut()
            .pop_front()
            .or_else(|| self.repeat.clone());
        match next {
            Some(ScriptedResponse::Json(value)) => Ok(value),
            Some(ScriptedResponse::Error(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted client exhausted")),
        }
    }
}

/// Sandbox that replays scripted execution outputs and records the code it
/// was asked to run.
#[derive(Debug, Default)]
pub struct ScriptedSandbox {
    outputs: VecDeque<ExecOutput>,
    repeat: Option<ExecOutput>,
    /// Summaries returned by every `table_summaries` call.
    pub summaries: TableSummaries,
    /// Every code cell received, in call order.
    pub executed: Vec<String>,
    pub summary_calls: u32,
    pub shutdowns: u32,
}

impl ScriptedSandbox {
    pub fn with_outputs(outputs: Vec<ExecOutput>) -> Self {
        Self {
            outputs: outputs.into(),
            ..Self::default()
        }
    }

    pub fn always(output: ExecOutput) -> Self {
        Self {
            repeat: Some(output),
            ..Self::default()
        }
    }
}

impl Sandbox for ScriptedSandbox {
    fn run_code(&mut self, code: &str) -> Result<ExecOutput> {
        self.executed.push(code.to_string());
        Ok(self
            .outputs
            .pop_front()
            .or_else(|| self.repeat.clone())
            .unwrap_or_default())
    }

    fn table_summaries(&mut self) -> Result<TableSummaries> {
        self.summary_calls += 1;
        Ok(self.summaries.clone())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.shutdowns += 1;
        Ok(())
    }
}

/// A worker tool-call response for `code`.
pub fn tool_call(code: &str) -> Value {
    json!({
        "thought": "run the code for this step",
        "tool_call": {
            "tool_name": "run_python",
            "arguments": {"code": code}
        }
    })
}

/// A plan response in the flat-list shape.
pub fn plan_response(tasks: &[&str]) -> Value {
    let steps: Vec<Value> = tasks
        .iter()
        .enumerate()
        .map(|(i, task)| json!({"step_id": i + 1, "task": task}))
        .collect();
    Value::Array(steps)
}

/// A validation verdict response.
pub fn validation_response(result: &ValidationResult) -> Value {
    match result {
        ValidationResult::Complete { summary } => {
            json!({"status": "complete", "summary": summary})
        }
        ValidationResult::Incomplete { reason } => {
            json!({"status": "incomplete", "reason": reason})
        }
    }
}
