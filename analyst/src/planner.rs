//! Plan generation and re-planning against the completion service.
//!
//! The planner owns no context-construction logic: it receives fully
//! assembled context records, renders the matching template, and funnels
//! every failure mode (transport, format, shape) into the canonical
//! failure plan so the caller has exactly one signal to branch on.

use std::time::Duration;

use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::core::context::{FailureContext, PlannerContext};
use crate::core::plan::{decode_plan, failure_plan};
use crate::core::types::Plan;
use crate::io::llm::{CompletionClient, CompletionRequest, ResponseShape};
use crate::io::prompt::PromptEngine;
use crate::io::prompt_log::PromptLog;

/// Parameters shared by plan generation and re-planning.
#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub context: &'a PlannerContext,
    pub timeout: Duration,
}

/// Generate an initial plan for the current request.
#[instrument(skip_all)]
pub fn generate_plan<C: CompletionClient>(
    client: &C,
    engine: &PromptEngine,
    prompt_log: &PromptLog,
    request: &PlanRequest<'_>,
) -> Plan {
    info!("generating a new plan");
    let prompt = match engine.render_planner(request.context) {
        Ok(prompt) => prompt,
        Err(err) => {
            warn!(err = %err, "planner prompt rendering failed");
            return failure_plan();
        }
    };
    prompt_log.record("planner", &prompt);
    complete_into_plan(client, prompt, request.timeout)
}

/// Generate a fresh, complete plan after a failure. The failure may be a
/// failed plan step or an incomplete validation verdict; either way the
/// description is embedded in the prompt and a whole new plan replaces the
/// old one.
#[instrument(skip_all, fields(failed_task = %failure.failed_task))]
pub fn replan<C: CompletionClient>(
    client: &C,
    engine: &PromptEngine,
    prompt_log: &PromptLog,
    request: &PlanRequest<'_>,
    failure: &FailureContext,
) -> Plan {
    info!("previous plan failed, re-planning");
    let prompt = match engine.render_replanner(request.context, failure) {
        Ok(prompt) => prompt,
        Err(err) => {
            warn!(err = %err, "replanner prompt rendering failed");
            return failure_plan();
        }
    };
    prompt_log.record("replanner", &prompt);
    complete_into_plan(client, prompt, request.timeout)
}

fn complete_into_plan<C: CompletionClient>(
    client: &C,
    prompt: String,
    timeout: Duration,
) -> Plan {
    let response: Value = match client.complete(&CompletionRequest {
        prompt,
        shape: ResponseShape::Json,
        timeout,
    }) {
        Ok(value) => value,
        Err(err) => {
            warn!(err = %err, "planner completion failed");
            return failure_plan();
        }
    };
    let plan = decode_plan(&response);
    info!(steps = plan.len(), "plan decoded");
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::is_failure_plan;
    use crate::core::types::StepStatus;
    use crate::test_support::{ScriptedClient, ScriptedResponse};
    use serde_json::json;

    fn planner_ctx() -> PlannerContext {
        PlannerContext {
            history: "None.".to_string(),
            query: "total sales".to_string(),
            files: "`sales.csv`".to_string(),
            tables: "No tables are loaded yet.".to_string(),
        }
    }

    fn request(ctx: &PlannerContext) -> PlanRequest<'_> {
        PlanRequest {
            context: ctx,
            timeout: Duration::from_secs(1),
        }
    }

    fn fixtures() -> (PromptEngine, PromptLog, tempfile::TempDir) {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = PromptLog::new(temp.path().join("prompts.log"));
        (PromptEngine::new(), log, temp)
    }

    #[test]
    fn wrapped_response_becomes_a_pending_plan() {
        let (engine, log, _temp) = fixtures();
        let client = ScriptedClient::new(vec![ScriptedResponse::Json(
            json!({"plan": [{"step_id": 1, "task": "load"}]}),
        )]);
        let ctx = planner_ctx();

        let plan = generate_plan(&client, &engine, &log, &request(&ctx));
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].status, StepStatus::Pending);
    }

    #[test]
    fn completion_errors_become_the_failure_sentinel() {
        let (engine, log, _temp) = fixtures();
        let client = ScriptedClient::new(vec![ScriptedResponse::Error(
            "connection refused".to_string(),
        )]);
        let ctx = planner_ctx();

        let plan = generate_plan(&client, &engine, &log, &request(&ctx));
        assert!(is_failure_plan(&plan));
    }

    #[test]
    fn replan_prompt_carries_the_failure_description() {
        let (engine, log, _temp) = fixtures();
        let client = ScriptedClient::new(vec![ScriptedResponse::Json(
            json!([{"step_id": 1, "task": "retry load"}]),
        )]);
        let ctx = planner_ctx();
        let failure = FailureContext {
            failed_task: "load the data".to_string(),
            error: "FileNotFoundError: sales.csv".to_string(),
        };

        let plan = replan(&client, &engine, &log, &request(&ctx), &failure);
        assert_eq!(plan[0].task, "retry load");

        let prompts = client.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("FileNotFoundError: sales.csv"));
        assert!(prompts[0].contains("load the data"));
    }
}
