//! Single owner of all mutable analysis state.
//!
//! The interaction history, the executed-code ledger, and the cached table
//! summaries are only ever touched through the methods here. Exactly one
//! interaction is current (the last in history) and all mutation targets
//! it; the ledger is append-only and never reordered.
//!
//! Methods report caller bugs (no active interaction, unknown step id,
//! illegal status transition) as stable error strings, mirroring how other
//! pure state transitions in this crate surface violations.

use crate::core::status::validate_transition;
use crate::core::types::{
    Interaction, LedgerEntry, Plan, PlanStep, StepStatus, TableSummaries, ValidationResult,
};

#[derive(Debug, Clone, Default)]
pub struct AnalysisState {
    interactions: Vec<Interaction>,
    ledger: Vec<LedgerEntry>,
    summaries: TableSummaries,
}

impl AnalysisState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new interaction cycle for `query`. The previous interaction,
    /// if any, becomes immutable history.
    pub fn begin_interaction(&mut self, query: &str) {
        self.interactions.push(Interaction {
            query: query.to_string(),
            plan: Vec::new(),
            validation: None,
        });
    }

    /// The current interaction, if one has been started.
    pub fn current(&self) -> Option<&Interaction> {
        self.interactions.last()
    }

    pub fn current_query(&self) -> Option<&str> {
        self.current().map(|interaction| interaction.query.as_str())
    }

    /// All finished interactions, excluding the current one.
    pub fn past_interactions(&self) -> &[Interaction] {
        match self.interactions.len() {
            0 => &[],
            len => &self.interactions[..len - 1],
        }
    }

    /// Replace the current interaction's plan. Re-planning installs a whole
    /// new plan; steps of the old plan are never revisited.
    pub fn set_plan(&mut self, plan: Plan) -> Result<(), String> {
        let current = self.current_mut()?;
        current.plan = plan;
        Ok(())
    }

    /// The current plan (empty when no interaction or plan exists yet).
    pub fn plan(&self) -> &[PlanStep] {
        self.current().map(|i| i.plan.as_slice()).unwrap_or(&[])
    }

    /// Advance a step's status, enforcing forward-only transitions.
    pub fn mark_step(&mut self, step_id: u32, status: StepStatus) -> Result<(), String> {
        let step = self.step_mut(step_id)?;
        validate_transition(step_id, step.status, status)?;
        step.status = status;
        Ok(())
    }

    /// Record a successful execution: append to the ledger and stamp the
    /// step with the exact code and captured output that satisfied it.
    pub fn record_step_success(
        &mut self,
        step_id: u32,
        code: &str,
        result: &str,
    ) -> Result<(), String> {
        self.ledger.push(LedgerEntry {
            code: code.to_string(),
            result: result.to_string(),
            step_id: Some(step_id),
        });
        let step = self.step_mut(step_id)?;
        step.code = Some(code.to_string());
        step.result = Some(result.to_string());
        Ok(())
    }

    /// Append a ledger entry not tied to a plan step (e.g. table auto-load).
    pub fn append_ledger(&mut self, code: &str, result: &str) {
        self.ledger.push(LedgerEntry {
            code: code.to_string(),
            result: result.to_string(),
            step_id: None,
        });
    }

    /// The full cross-interaction executed-code ledger, oldest first.
    pub fn ledger(&self) -> &[LedgerEntry] {
        &self.ledger
    }

    /// Attach the validation verdict to the current interaction.
    pub fn set_validation(&mut self, result: ValidationResult) -> Result<(), String> {
        let current = self.current_mut()?;
        current.validation = Some(result);
        Ok(())
    }

    /// Replace the cached table summaries wholesale with a fresh snapshot
    /// from the sandbox.
    pub fn replace_summaries(&mut self, summaries: TableSummaries) {
        self.summaries = summaries;
    }

    pub fn summaries(&self) -> &TableSummaries {
        &self.summaries
    }

    fn current_mut(&mut self) -> Result<&mut Interaction, String> {
        self.interactions
            .last_mut()
            .ok_or_else(|| "no active interaction".to_string())
    }

    fn step_mut(&mut self, step_id: u32) -> Result<&mut PlanStep, String> {
        let current = self.current_mut()?;
        current
            .plan
            .iter_mut()
            .find(|step| step.step_id == step_id)
            .ok_or_else(|| format!("step {} not found in current plan", step_id))
    }
}
