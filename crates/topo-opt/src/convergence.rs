//! Convergence monitor and iteration history.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceState {
    Running,
    Converged,
    MaxIterationsReached,
    /// Stopped through a [`crate::optimizer::StopHandle`]
    Cancelled,
}

impl ConvergenceState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ConvergenceState::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConvergenceState::Running => "running",
            ConvergenceState::Converged => "converged",
            ConvergenceState::MaxIterationsReached => "max_iterations_reached",
            ConvergenceState::Cancelled => "cancelled",
        }
    }
}

/// Recoverable problem handled inside an iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IterationWarning {
    /// The solve failed and was repeated with a relaxed tolerance
    SolveRetried {
        load_case: String,
        reason: String,
        relaxed_tolerance: f64,
    },
    /// The relaxed solve failed too; the iteration was repeated with a smaller step
    MoveLimitHalved { load_case: String, move_limit: f64 },
    /// The relaxed solve failed on the first iteration; it was evaluated again
    IterationRepeated { load_case: String },
    /// The multiplier search failed; the field was rescaled uniformly
    UpdateDegenerate { reason: String },
}

impl std::fmt::Display for IterationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IterationWarning::SolveRetried {
                load_case,
                reason,
                relaxed_tolerance,
            } => write!(
                f,
                "load case '{load_case}': {reason}; retried with tolerance {relaxed_tolerance:.1e}"
            ),
            IterationWarning::MoveLimitHalved {
                load_case,
                move_limit,
            } => write!(
                f,
                "load case '{load_case}' failed twice; iteration repeated with move limit {move_limit}"
            ),
            IterationWarning::IterationRepeated { load_case } => write!(
                f,
                "load case '{load_case}' failed twice; first iteration evaluated again"
            ),
            IterationWarning::UpdateDegenerate { reason } => {
                write!(f, "{reason}; applied uniform scaling")
            }
        }
    }
}

/// Per-case compliance of one iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseCompliance {
    pub load_case: String,
    pub compliance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based
    pub iteration: usize,
    /// Combined objective of the field evaluated in this iteration
    pub objective: f64,
    pub compliances: Vec<CaseCompliance>,
    /// Volume fraction after the update
    pub volume_fraction: f64,
    /// max |Δρ| over design elements
    pub max_change: f64,
    /// |ΔC| / |C_prev|; absent on the first iteration
    pub objective_change: Option<f64>,
    pub greyness: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<IterationWarning>,
}

#[derive(Debug, Clone)]
pub struct ConvergenceMonitor {
    design_tolerance: f64,
    objective_tolerance: f64,
    max_iterations: usize,
    state: ConvergenceState,
    history: Vec<IterationRecord>,
}

impl ConvergenceMonitor {
    pub fn new(design_tolerance: f64, objective_tolerance: f64, max_iterations: usize) -> Self {
        Self {
            design_tolerance,
            objective_tolerance,
            max_iterations,
            state: ConvergenceState::Running,
            history: Vec::new(),
        }
    }

    /// Relative objective change against the last recorded iteration
    pub fn objective_change(&self, objective: f64) -> Option<f64> {
        let previous = self.history.last()?.objective;
        Some((objective - previous).abs() / previous.abs().max(f64::MIN_POSITIVE))
    }

    /// Record a finished iteration and return the resulting state.
    ///
    /// Converged takes precedence when the iteration limit is reached on the
    /// same iteration.
    pub fn record(&mut self, record: IterationRecord) -> ConvergenceState {
        let converged = record.max_change < self.design_tolerance
            && record
                .objective_change
                .is_some_and(|change| change < self.objective_tolerance);
        let count = record.iteration;
        self.history.push(record);

        self.state = if converged {
            ConvergenceState::Converged
        } else if count >= self.max_iterations {
            ConvergenceState::MaxIterationsReached
        } else {
            ConvergenceState::Running
        };
        self.state
    }

    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = ConvergenceState::Cancelled;
        }
    }

    pub fn state(&self) -> ConvergenceState {
        self.state
    }

    pub fn history(&self) -> &[IterationRecord] {
        &self.history
    }

    pub fn into_history(self) -> Vec<IterationRecord> {
        self.history
    }
}
