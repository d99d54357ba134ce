//! Prompt rendering: pure functions from structured context to text.
//!
//! The instructional scaffolding lives in embedded templates; the content
//! records come from `core::context`. Keeping the two apart means both are
//! independently testable and no prompt is ever built by ad hoc string
//! concatenation in the orchestration code.

use anyhow::{Context as _, Result};
use minijinja::{Environment, context};

use crate::core::context::{FailureContext, PlannerContext, ValidatorContext, WorkerContext};

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const REPLANNER_TEMPLATE: &str = include_str!("prompts/replanner.md");
const WORKER_TEMPLATE: &str = include_str!("prompts/worker.md");
const VALIDATOR_TEMPLATE: &str = include_str!("prompts/validator.md");

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("planner", PLANNER_TEMPLATE)
            .expect("planner template should be valid");
        env.add_template("replanner", REPLANNER_TEMPLATE)
            .expect("replanner template should be valid");
        env.add_template("worker", WORKER_TEMPLATE)
            .expect("worker template should be valid");
        env.add_template("validator", VALIDATOR_TEMPLATE)
            .expect("validator template should be valid");
        Self { env }
    }

    pub fn render_planner(&self, ctx: &PlannerContext) -> Result<String> {
        let template = self.env.get_template("planner")?;
        template
            .render(context! { context => ctx })
            .context("render planner prompt")
    }

    pub fn render_replanner(
        &self,
        ctx: &PlannerContext,
        failure: &FailureContext,
    ) -> Result<String> {
        let template = self.env.get_template("replanner")?;
        template
            .render(context! { context => ctx, failure => failure })
            .context("render replanner prompt")
    }

    /// Render the worker prompt. `notes` carries diagnostics from earlier
    /// attempts at the same step; the section is omitted when empty.
    pub fn render_worker(&self, ctx: &WorkerContext, notes: &str) -> Result<String> {
        let template = self.env.get_template("worker")?;
        template
            .render(context! {
                context => ctx,
                notes => (!notes.trim().is_empty()).then(|| notes.trim()),
            })
            .context("render worker prompt")
    }

    pub fn render_validator(&self, ctx: &ValidatorContext) -> Result<String> {
        let template = self.env.get_template("validator")?;
        template
            .render(context! { context => ctx })
            .context("render validator prompt")
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}
