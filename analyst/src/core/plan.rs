//! Plan decoding from structurally unreliable model responses.
//!
//! The model is asked for a JSON list of steps but in practice returns one
//! of several shapes. Decoding tries an explicit, ordered list of accepted
//! shapes and falls back to a single canonical failure plan; callers only
//! ever branch on [`is_failure_plan`], never on raw response shapes.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::core::types::{Plan, PlanStep, StepStatus};

/// Task text of the one-step failure plan. This sentinel is the only
/// all-failing signal the rest of the system recognizes as "planning itself
/// is broken" as opposed to "a step failed".
pub const FAILURE_PLAN_TASK: &str = "planner failed to generate a valid plan";

static STEP_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^step_(\d+)$").expect("step key pattern should be valid"));

/// Minimal shape a response step must carry; extra fields (including any
/// `status` the model invented) are ignored.
#[derive(Debug, Deserialize)]
struct ResponseStep {
    step_id: u32,
    task: String,
}

/// Normalize a model response into a [`Plan`].
///
/// Accepted shapes, in priority order:
/// 1. a top-level array of step objects;
/// 2. an object with a `plan` key holding such an array;
/// 3. an object with a `plan` key holding a map of `step_<n>` to
///    `{description}` entries (legacy shape) — keys that do not parse as
///    `step_<int>` are dropped silently, survivors ordered by ascending id.
///
/// Every accepted step is stamped `pending` regardless of input. Anything
/// else yields the one-element failure plan.
pub fn decode_plan(value: &Value) -> Plan {
    if let Some(plan) = decode_step_array(value) {
        return plan;
    }
    if let Some(wrapped) = value.get("plan") {
        if let Some(plan) = decode_step_array(wrapped) {
            return plan;
        }
        if let Some(plan) = decode_step_map(wrapped) {
            return plan;
        }
    }
    failure_plan()
}

/// The canonical one-step failure plan.
pub fn failure_plan() -> Plan {
    vec![PlanStep {
        step_id: 1,
        task: FAILURE_PLAN_TASK.to_string(),
        status: StepStatus::Failed,
        code: None,
        result: None,
    }]
}

/// Recognize the failure sentinel produced by [`failure_plan`].
pub fn is_failure_plan(plan: &[PlanStep]) -> bool {
    matches!(plan, [step] if step.status == StepStatus::Failed && step.task == FAILURE_PLAN_TASK)
}

fn decode_step_array(value: &Value) -> Option<Plan> {
    let items = value.as_array()?;
    let mut plan = Vec::with_capacity(items.len());
    for item in items {
        let step: ResponseStep = serde_json::from_value(item.clone()).ok()?;
        if step.step_id == 0 {
            return None;
        }
        plan.push(PlanStep::pending(step.step_id, step.task));
    }
    (!plan.is_empty()).then_some(plan)
}

fn decode_step_map(value: &Value) -> Option<Plan> {
    let entries = value.as_object()?;
    let mut plan = Vec::new();
    for (key, entry) in entries {
        let Some(caps) = STEP_KEY_RE.captures(key) else {
            continue;
        };
        let Ok(step_id) = caps[1].parse::<u32>() else {
            continue;
        };
        let Some(description) = entry.get("description").and_then(Value::as_str) else {
            continue;
        };
        if step_id == 0 {
            continue;
        }
        plan.push(PlanStep::pending(step_id, description));
    }
    plan.sort_by_key(|step| step.step_id);
    (!plan.is_empty()).then_some(plan)
}
