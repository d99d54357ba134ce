//! Top-level analysis loop: plan, execute, re-plan, validate.
//!
//! One [`AnalysisSession`] owns all mutable state for a sequence of user
//! requests plus the two external collaborators (completion client and
//! sandbox). Each request runs the loop as an explicit state machine:
//!
//! ```text
//! Planning -> Executing -> (Replanning <-> Executing) -> Validating
//!                                                          |      \
//!                                                         Done   Planning
//! ```
//!
//! Every plan acquisition (initial, step-failure re-plan, or post-validation
//! re-plan) consumes one analysis cycle from `max_analysis_cycles`, which
//! bounds the whole loop. Re-planning always installs a complete new plan
//! and restarts step iteration at the beginning; work done under the old
//! plan survives only in the executed-code ledger.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::context::{
    FailureContext, planner_context, validator_context, worker_context,
};
use crate::core::plan::is_failure_plan;
use crate::core::state::AnalysisState;
use crate::core::types::{Plan, PlanStep, StepStatus, TaskOutcome, ValidationResult};
use crate::core::validation::decode_validation;
use crate::io::config::AnalystConfig;
use crate::io::llm::{CompletionClient, CompletionRequest, ResponseShape};
use crate::io::prompt::PromptEngine;
use crate::io::prompt_log::PromptLog;
use crate::io::sandbox::Sandbox;
use crate::io::workspace::{Workspace, table_identifier};
use crate::planner::{PlanRequest, generate_plan, replan};
use crate::worker::{StepRequest, execute_step};

/// Final message when the cycle budget runs out without a complete verdict.
pub const FALLBACK_MESSAGE: &str =
    "failed to produce a complete analysis after multiple attempts";

/// Named states of the analysis loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Planning,
    Executing,
    Replanning,
    Validating,
    Done,
}

/// Terminal outcome of one analysis run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisOutcome {
    /// Validation judged the results complete; `summary` is the answer.
    Complete { summary: String },
    /// The cycle budget ran out; partial results are still reported.
    Exhausted,
}

/// What the user sees at the end of a run: the final message plus the
/// best-effort partial results (last execution output, full script).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisReport {
    pub outcome: AnalysisOutcome,
    pub last_result: String,
    pub script: String,
}

impl AnalysisReport {
    /// The natural-language message to present.
    pub fn message(&self) -> &str {
        match &self.outcome {
            AnalysisOutcome::Complete { summary } => summary,
            AnalysisOutcome::Exhausted => FALLBACK_MESSAGE,
        }
    }
}

pub struct AnalysisSession<C: CompletionClient, S: Sandbox> {
    state: AnalysisState,
    client: C,
    sandbox: S,
    workspace: Workspace,
    engine: PromptEngine,
    prompt_log: PromptLog,
    cfg: AnalystConfig,
    shut_down: bool,
}

impl<C: CompletionClient, S: Sandbox> AnalysisSession<C, S> {
    pub fn new(client: C, sandbox: S, cfg: AnalystConfig) -> Result<Self> {
        cfg.validate()?;
        let workspace = Workspace::create(&cfg.workspace_dir)?;
        let prompt_log = PromptLog::new(&cfg.prompt_log_path);
        Ok(Self {
            state: AnalysisState::new(),
            client,
            sandbox,
            workspace,
            engine: PromptEngine::new(),
            prompt_log,
            cfg,
            shut_down: false,
        })
    }

    pub fn state(&self) -> &AnalysisState {
        &self.state
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn sandbox(&self) -> &S {
        &self.sandbox
    }

    /// Copy input CSVs into the workspace and load each into a table
    /// variable inside the sandbox, so the first plan can build on them.
    ///
    /// A file whose auto-load fails is reported and skipped, not fatal;
    /// successful loads are appended to the ledger so prompts treat the
    /// data as already loaded.
    #[instrument(skip_all, fields(files = paths.len()))]
    pub fn load_tables(&mut self, paths: &[PathBuf]) -> Result<()> {
        let imported = self.workspace.import_tables(paths)?;
        for file_name in &imported {
            let name = table_identifier(file_name);
            let code = format!(
                "import pandas as pd\n{} = pd.read_csv('{}')",
                name, file_name
            );
            let prefixed = format!("{}{}", self.workspace.chdir_prelude(), code);
            let output = self
                .sandbox
                .run_code(&prefixed)
                .context("sandbox failed while loading input tables")?;
            if output.stderr.is_empty() {
                info!(file = %file_name, table = %name, "loaded input table");
                self.state.append_ledger(&code, &output.stdout);
            } else {
                warn!(file = %file_name, stderr = %output.stderr, "auto-load failed");
            }
        }
        let summaries = self.sandbox.table_summaries().unwrap_or_default();
        self.state.replace_summaries(summaries);
        Ok(())
    }

    /// Run the full analysis loop for one user request.
    ///
    /// Never surfaces model-format, execution, dispatch, or validation
    /// failures as errors; those are absorbed into re-planning and, at
    /// worst, the fallback report. `Err` means the session itself is broken
    /// (state invariant violation).
    #[instrument(skip_all)]
    pub fn run_analysis(&mut self, query: &str) -> Result<AnalysisReport> {
        self.state.begin_interaction(query);

        let mut phase = Phase::Planning;
        let mut cycle: u32 = 0;
        let mut index: usize = 0;
        let mut carry: Option<FailureContext> = None;
        let mut last_result = String::new();
        let mut summary: Option<String> = None;

        while phase != Phase::Done {
            phase = match phase {
                // Every plan acquisition consumes one analysis cycle; this
                // is what bounds the loop as a whole.
                Phase::Planning | Phase::Replanning => {
                    cycle += 1;
                    if cycle > self.cfg.max_analysis_cycles {
                        info!(cycle, "cycle budget exhausted");
                        Phase::Done
                    } else {
                        info!(cycle, replanning = carry.is_some(), "starting analysis cycle");
                        let plan = self.acquire_plan(carry.take());
                        let broken = is_failure_plan(&plan);
                        self.state.set_plan(plan).map_err(|err| anyhow!(err))?;
                        if broken {
                            // Planning itself is broken: non-recoverable
                            // within this cycle.
                            warn!(cycle, "planning failed, aborting cycle");
                            Phase::Planning
                        } else {
                            index = 0;
                            Phase::Executing
                        }
                    }
                }
                Phase::Executing => {
                    if index >= self.state.plan().len() {
                        Phase::Validating
                    } else {
                        let step_id = self.state.plan()[index].step_id;
                        self.state
                            .mark_step(step_id, StepStatus::InProgress)
                            .map_err(|err| anyhow!(err))?;
                        let step = self.state.plan()[index].clone();
                        info!(step_id, task = %step.task, "executing step");

                        match self.execute(&step) {
                            TaskOutcome::Success { code, result } => {
                                self.state
                                    .record_step_success(step_id, &code, &result)
                                    .map_err(|err| anyhow!(err))?;
                                self.state
                                    .mark_step(step_id, StepStatus::Completed)
                                    .map_err(|err| anyhow!(err))?;
                                if !result.is_empty() {
                                    last_result = result;
                                }
                                index += 1;
                                Phase::Executing
                            }
                            TaskOutcome::Failed { error, task } => {
                                warn!(step_id, error = %error, "step failed");
                                self.state
                                    .mark_step(step_id, StepStatus::Failed)
                                    .map_err(|err| anyhow!(err))?;
                                carry = Some(FailureContext {
                                    failed_task: task,
                                    error,
                                });
                                Phase::Replanning
                            }
                        }
                    }
                }
                Phase::Validating => {
                    let verdict = self.validate_results();
                    self.state
                        .set_validation(verdict.clone())
                        .map_err(|err| anyhow!(err))?;
                    match verdict {
                        ValidationResult::Complete { summary: text } => {
                            info!("validation complete");
                            summary = Some(text);
                            Phase::Done
                        }
                        ValidationResult::Incomplete { reason } => {
                            // The validation reason substitutes for an
                            // execution error in the next cycle's re-plan.
                            info!(reason = %reason, "validation incomplete");
                            carry = Some(FailureContext {
                                failed_task: "final review of the analysis results".to_string(),
                                error: reason,
                            });
                            Phase::Planning
                        }
                    }
                }
                Phase::Done => Phase::Done,
            };
        }

        let outcome = match summary {
            Some(summary) => AnalysisOutcome::Complete { summary },
            None => AnalysisOutcome::Exhausted,
        };
        Ok(AnalysisReport {
            outcome,
            last_result,
            script: self
                .state
                .ledger()
                .iter()
                .map(|entry| entry.code.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        })
    }

    /// Release sandbox resources. Safe to call more than once; only the
    /// first call does work.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.sandbox.shutdown()
    }

    fn acquire_plan(&mut self, failure: Option<FailureContext>) -> Plan {
        let files = self.workspace.list_files();
        let ctx = planner_context(&self.state, &files);
        let request = PlanRequest {
            context: &ctx,
            timeout: self.request_timeout(),
        };
        match failure {
            Some(failure) => replan(
                &self.client,
                &self.engine,
                &self.prompt_log,
                &request,
                &failure,
            ),
            None => generate_plan(&self.client, &self.engine, &self.prompt_log, &request),
        }
    }

    fn execute(&mut self, step: &PlanStep) -> TaskOutcome {
        let files = self.workspace.list_files();
        let ctx = worker_context(&self.state, &files, step);
        let prelude = self.workspace.chdir_prelude();
        let timeout = self.request_timeout();
        execute_step(
            &self.client,
            &mut self.sandbox,
            &self.engine,
            &self.prompt_log,
            &mut self.state,
            &StepRequest {
                context: &ctx,
                chdir_prelude: &prelude,
                max_retries: self.cfg.worker_max_retries,
                timeout,
            },
        )
    }

    /// Ask the validator whether the results answer the request. Transport
    /// and shape failures degrade to `incomplete`, never to success.
    fn validate_results(&mut self) -> ValidationResult {
        let ctx = validator_context(&self.state);
        let prompt = match self.engine.render_validator(&ctx) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %err, "validator prompt rendering failed");
                return ValidationResult::Incomplete {
                    reason: format!("validator prompt rendering failed: {err:#}"),
                };
            }
        };
        self.prompt_log.record("validator", &prompt);
        match self.client.complete(&CompletionRequest {
            prompt,
            shape: ResponseShape::Json,
            timeout: self.request_timeout(),
        }) {
            Ok(response) => decode_validation(&response),
            Err(err) => {
                warn!(err = %err, "validator completion failed");
                ValidationResult::Incomplete {
                    reason: format!("validator call failed: {err:#}"),
                }
            }
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.cfg.model.request_timeout_secs)
    }
}
