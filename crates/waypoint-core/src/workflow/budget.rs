//! Cost budget enforcement for a single execution.
//!
//! The orchestrator checks the budget before every node attempt: if the
//! amount already spent plus the attempt's estimated cost would exceed the
//! ceiling, the attempt is never started.

use waypoint_types::config::EngineConfig;
use waypoint_types::execution::ExecutionParams;
use waypoint_types::workflow::WorkflowDefinition;

/// Outcome of a pre-attempt budget check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BudgetStatus {
    /// No ceiling, or comfortably below it.
    Ok,
    /// The projected spend just crossed 80% of the ceiling. Returned once.
    Warning,
    /// The attempt would breach the ceiling.
    Exceeded {
        spent: f64,
        estimate: f64,
        ceiling: f64,
    },
}

/// Per-execution budget guard. Owned by the orchestrator, so no atomics.
#[derive(Debug, Clone)]
pub struct CostBudget {
    ceiling: Option<f64>,
    warning_emitted: bool,
}

impl CostBudget {
    pub fn new(ceiling: Option<f64>) -> Self {
        Self {
            ceiling,
            warning_emitted: false,
        }
    }

    pub fn ceiling(&self) -> Option<f64> {
        self.ceiling
    }

    /// Check whether an attempt estimated at `estimate` may start.
    pub fn check(&mut self, spent: f64, estimate: f64) -> BudgetStatus {
        let Some(ceiling) = self.ceiling else {
            return BudgetStatus::Ok;
        };

        let projected = spent + estimate.max(0.0);
        if projected > ceiling {
            return BudgetStatus::Exceeded {
                spent,
                estimate,
                ceiling,
            };
        }

        if !self.warning_emitted && projected >= ceiling * 0.8 {
            self.warning_emitted = true;
            return BudgetStatus::Warning;
        }

        BudgetStatus::Ok
    }
}

/// Resolve the ceiling for a new execution.
///
/// Priority: submission params, then the definition, then the engine default.
pub fn resolve_ceiling(
    params: &ExecutionParams,
    definition: &WorkflowDefinition,
    config: &EngineConfig,
) -> Option<f64> {
    params
        .budget_usd
        .or(definition.budget_usd)
        .or(config.default_budget_usd)
}
