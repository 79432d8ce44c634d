//! The SIMP optimization loop.
//!
//! ```text
//! initial field (uniform at the volume target)
//!   └─ loop
//!        evaluate every load case (worker pool)
//!        aggregate sensitivities → filter → OC update
//!        record iteration, check convergence / stop flag
//!   └─ safety verdicts on the final field
//! ```
//!
//! Recovery from a failed solve: the case is re-solved once with a relaxed
//! tolerance; if that fails too, the field of this iteration is re-derived
//! from the previous one with half the move limit and the whole iteration is
//! evaluated once more. A third failure aborts the run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::{FilterKind, OptimizationParams, SolverParams};
use crate::convergence::{
    CaseCompliance, ConvergenceMonitor, ConvergenceState, IterationRecord, IterationWarning,
};
use crate::density::DensityField;
use crate::error::{ConfigurationError, EvaluationError, OptimizationError, Result, UpdateError};
use crate::evaluator::{EvaluationResult, FeaEvaluator, SolveOptions};
use crate::filter::DensityFilter;
use crate::load_cases::{LoadCase, LoadCaseSet};
use crate::materials::MaterialProperties;
use crate::mesh::Mesh;
use crate::oc::OcUpdater;
use crate::safety::{SafetyEvaluator, SafetyVerdict};
use crate::sensitivity::{SensitivityAggregator, compliance_sensitivities};

/// What is optimized: domain, material and loading
#[derive(Debug, Clone)]
pub struct Problem {
    pub mesh: Arc<Mesh>,
    pub material: MaterialProperties,
    pub load_cases: LoadCaseSet,
}

/// Snapshot of the loop after an iteration
#[derive(Debug, Clone)]
pub struct OptimizationState {
    /// Completed iterations
    pub iteration: usize,
    /// Design variables, `mesh.design_elements()` order. Equal to the
    /// physical densities unless density filtering is used.
    pub design: Vec<f64>,
    /// Physical density field
    pub densities: DensityField,
    pub previous: DensityField,
    /// Objective of the last evaluated field (NaN before the first iteration)
    pub objective: f64,
    pub volume_fraction: f64,
    pub state: ConvergenceState,
}

/// Cooperative stop flag, checked between iterations
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a finished run produces
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: OptimizationState,
    pub history: Vec<IterationRecord>,
    /// Responses of the final field, one per load case
    pub final_results: Vec<EvaluationResult>,
    pub safety: Vec<SafetyVerdict>,
    /// Problems met while evaluating the final field
    pub warnings: Vec<IterationWarning>,
}

impl RunOutcome {
    pub fn converged(&self) -> bool {
        self.state.state == ConvergenceState::Converged
    }

    /// Every load case meets its required safety factor
    pub fn all_safe(&self) -> bool {
        self.safety.iter().all(|v| v.passed)
    }
}

/// Inputs of the last accepted update, kept to re-derive a field
struct UpdateInputs {
    design: Vec<f64>,
    dc: Vec<f64>,
    dv: Vec<f64>,
}

pub struct Optimizer {
    problem: Problem,
    params: OptimizationParams,
    solver: SolverParams,
    evaluator: Box<dyn FeaEvaluator>,
    filter: DensityFilter,
    aggregator: SensitivityAggregator,
    updater: OcUpdater,
    pool: ThreadPool,
    stop: StopHandle,
    design_volumes: Vec<f64>,
    template: DensityField,
    verbose: bool,
}

impl Optimizer {
    /// Validate the configuration against the problem and build the filter
    /// and worker pool. Nothing is evaluated yet.
    pub fn new(
        problem: Problem,
        params: OptimizationParams,
        solver: SolverParams,
        evaluator: Box<dyn FeaEvaluator>,
    ) -> Result<Self> {
        params.validate(problem.load_cases.len())?;
        solver.validate()?;
        problem.material.validate()?;

        let mesh = &*problem.mesh;
        for case in &problem.load_cases {
            for set in case.application_sets() {
                match mesh.node_set(set) {
                    None => return Err(ConfigurationError::MissingNodeSet(set.clone()).into()),
                    Some(nodes) if nodes.is_empty() => {
                        return Err(ConfigurationError::InvalidLoadCase {
                            name: case.name().to_string(),
                            reason: format!("load set '{set}' is empty"),
                        }
                        .into());
                    }
                    Some(_) => {}
                }
            }
        }

        let filter = DensityFilter::new(mesh, params.filter_radius, params.filter_kind);
        let aggregator = SensitivityAggregator::new(&params.combination, problem.load_cases.len())?;
        let updater = OcUpdater::new(params.move_limit, params.rho_min, params.volume_tolerance);
        let pool = ThreadPoolBuilder::new()
            .num_threads(params.workers())
            .thread_name(|i| format!("topo-eval-{i}"))
            .build()
            .map_err(|e| OptimizationError::ThreadPool(e.to_string()))?;
        let design_volumes = mesh
            .design_elements()
            .iter()
            .map(|&e| mesh.elements()[e].volume)
            .collect();
        let template = DensityField::uniform(mesh, params.volume_fraction, params.rho_min);

        Ok(Self {
            problem,
            params,
            solver,
            evaluator,
            filter,
            aggregator,
            updater,
            pool,
            stop: StopHandle::new(),
            design_volumes,
            template,
            verbose: false,
        })
    }

    /// Print progress to stderr
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Handle that stops the run before its next iteration
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    pub fn params(&self) -> &OptimizationParams {
        &self.params
    }

    pub fn evaluator_name(&self) -> &str {
        self.evaluator.name()
    }

    pub fn filter(&self) -> &DensityFilter {
        &self.filter
    }

    pub fn run(&self) -> Result<RunOutcome> {
        self.run_with_observer(|_| {})
    }

    /// Run to termination, calling `observer` after every iteration
    pub fn run_with_observer(&self, mut observer: impl FnMut(&IterationRecord)) -> Result<RunOutcome> {
        let mesh = &*self.problem.mesh;
        let target = self.params.volume_fraction;
        let penalty = self.params.penalty;
        let mut monitor = ConvergenceMonitor::new(
            self.params.design_tolerance,
            self.params.objective_tolerance(),
            self.params.max_iterations(),
        );

        let design = vec![target.clamp(self.params.rho_min, 1.0); self.design_volumes.len()];
        let densities = self.physical_field(&design)?;
        let mut state = OptimizationState {
            iteration: 0,
            design,
            previous: densities.clone(),
            volume_fraction: densities.volume_fraction(mesh),
            densities,
            objective: f64::NAN,
            state: ConvergenceState::Running,
        };
        let mut last_good: Option<OptimizationState> = None;
        let mut last_update: Option<UpdateInputs> = None;
        let mut last_results: Option<Vec<EvaluationResult>> = None;

        if self.verbose {
            eprintln!(
                "Optimizing {} design elements, {} load case(s), target volume fraction {}",
                self.design_volumes.len(),
                self.problem.load_cases.len(),
                target
            );
        }

        while !state.state.is_terminal() {
            if self.stop.is_stopped() {
                monitor.cancel();
                state.state = monitor.state();
                if self.verbose {
                    eprintln!("  Stop requested after {} iteration(s)", state.iteration);
                }
                break;
            }
            let iteration = state.iteration + 1;
            let abort = |source: OptimizationError, last_good: &Option<OptimizationState>| {
                OptimizationError::Aborted {
                    iteration,
                    source: Box::new(source),
                    last_state: last_good.clone().map(Box::new),
                }
            };
            let mut warnings = Vec::new();

            let results = match self.evaluate_cases(&state.densities, &mut warnings) {
                Ok(results) => results,
                Err(err) if err.is_solve_failure() => {
                    let move_limit = self.params.move_limit * 0.5;
                    let load_case = failed_case(&err);
                    if last_update.is_some() {
                        warnings.push(IterationWarning::MoveLimitHalved {
                            load_case,
                            move_limit,
                        });
                    } else {
                        // nothing to re-derive the first field from
                        warnings.push(IterationWarning::IterationRepeated { load_case });
                    }
                    if let Some(inputs) = &last_update {
                        let mut x = inputs.design.clone();
                        self.apply_update(
                            &self.updater.with_move_limit(move_limit),
                            &mut x,
                            &inputs.dc,
                            &inputs.dv,
                            &mut warnings,
                        )
                        .map_err(|e| abort(e, &last_good))?;
                        state.densities = self.physical_field(&x).map_err(|e| abort(e, &last_good))?;
                        state.volume_fraction = state.densities.volume_fraction(mesh);
                        state.design = x;
                    }
                    self.evaluate_cases(&state.densities, &mut warnings)
                        .map_err(|e| abort(e.into(), &last_good))?
                }
                Err(err) => return Err(abort(err.into(), &last_good)),
            };

            let compliances: Vec<f64> = results.iter().map(|r| r.compliance).collect();
            let objective = self.aggregator.objective(&compliances);
            let per_case: Vec<Vec<f64>> = results
                .iter()
                .map(|r| compliance_sensitivities(mesh, &state.densities, r, penalty))
                .collect();
            let (dc, dv) = self
                .design_gradients(&self.aggregator.aggregate(&per_case))
                .map_err(|e| abort(e.into(), &last_good))?;

            let mut x = state.design.clone();
            self.apply_update(&self.updater, &mut x, &dc, &dv, &mut warnings)
                .map_err(|e| abort(e, &last_good))?;
            let updated = self.physical_field(&x).map_err(|e| abort(e, &last_good))?;

            let record = IterationRecord {
                iteration,
                objective,
                compliances: results
                    .iter()
                    .map(|r| CaseCompliance {
                        load_case: r.load_case.clone(),
                        compliance: r.compliance,
                    })
                    .collect(),
                volume_fraction: updated.volume_fraction(mesh),
                max_change: updated.max_change(&state.densities, mesh),
                objective_change: monitor.objective_change(objective),
                greyness: updated.greyness(mesh),
                warnings,
            };
            if self.verbose {
                eprintln!(
                    "  Iteration {:3}: objective {:.6e}, volume {:.4}, change {:.3e}, greyness {:.3}",
                    record.iteration,
                    record.objective,
                    record.volume_fraction,
                    record.max_change,
                    record.greyness
                );
                for warning in &record.warnings {
                    eprintln!("    Warning: {warning}");
                }
            }
            observer(&record);

            last_update = Some(UpdateInputs {
                design: std::mem::replace(&mut state.design, x),
                dc,
                dv,
            });
            state.previous = std::mem::replace(&mut state.densities, updated);
            state.iteration = iteration;
            state.objective = objective;
            state.volume_fraction = record.volume_fraction;
            state.state = monitor.record(record);
            last_results = Some(results);
            last_good = Some(state.clone());
        }

        if self.verbose {
            eprintln!(
                "Finished: {} after {} iteration(s)",
                state.state.as_str(),
                state.iteration
            );
        }

        // responses of the final field feed the safety check
        let mut warnings = Vec::new();
        let final_results = match self.evaluate_cases(&state.densities, &mut warnings) {
            Ok(results) => results,
            Err(err) if err.is_solve_failure() && last_results.is_some() => {
                if self.verbose {
                    eprintln!("    Warning: final evaluation failed ({err}); using last iteration");
                }
                last_results.unwrap_or_default()
            }
            Err(err) => {
                return Err(OptimizationError::Aborted {
                    iteration: state.iteration,
                    source: Box::new(err.into()),
                    last_state: last_good.map(Box::new),
                });
            }
        };
        let safety = SafetyEvaluator::new(&self.problem.material).evaluate_all(
            mesh,
            self.problem.load_cases.cases(),
            &final_results,
        );
        if self.verbose {
            for verdict in &safety {
                eprintln!(
                    "  {}: safety factor {:.2} (required {:.2}) {}",
                    verdict.load_case,
                    verdict.observed_safety_factor,
                    verdict.required_safety_factor,
                    if verdict.passed { "PASS" } else { "FAIL" }
                );
            }
        }

        Ok(RunOutcome {
            state,
            history: monitor.into_history(),
            final_results,
            safety,
            warnings,
        })
    }

    fn solve_options(&self) -> SolveOptions {
        SolveOptions {
            penalty: self.params.penalty,
            tolerance: self.solver.tolerance,
            max_iterations: self.solver.max_iterations,
        }
    }

    /// One case, with a single relaxed retry on solve failure
    fn evaluate_with_retry(
        &self,
        field: &DensityField,
        case: &LoadCase,
    ) -> (std::result::Result<EvaluationResult, EvaluationError>, Option<IterationWarning>) {
        let options = self.solve_options();
        match self.evaluator.evaluate(field, case, &options) {
            Err(err) if err.is_solve_failure() => {
                let relaxed = options.relaxed(self.solver.relax_factor);
                let warning = IterationWarning::SolveRetried {
                    load_case: case.name().to_string(),
                    reason: err.to_string(),
                    relaxed_tolerance: relaxed.tolerance,
                };
                (self.evaluator.evaluate(field, case, &relaxed), Some(warning))
            }
            other => (other, None),
        }
    }

    /// All cases on the worker pool; results in load-case order
    fn evaluate_cases(
        &self,
        field: &DensityField,
        warnings: &mut Vec<IterationWarning>,
    ) -> std::result::Result<Vec<EvaluationResult>, EvaluationError> {
        let outcomes: Vec<_> = self.pool.install(|| {
            self.problem
                .load_cases
                .cases()
                .par_iter()
                .map(|case| self.evaluate_with_retry(field, case))
                .collect()
        });
        let mut results = Vec::with_capacity(outcomes.len());
        for (result, warning) in outcomes {
            warnings.extend(warning);
            results.push(result?);
        }
        Ok(results)
    }

    /// Physical densities of the design elements for design variables `x`
    fn physical_values(&self, x: &[f64]) -> std::result::Result<Vec<f64>, ConfigurationError> {
        match self.params.filter_kind {
            FilterKind::Sensitivity => Ok(x.to_vec()),
            FilterKind::Density => self.filter.apply(FilterKind::Density, x),
        }
    }

    fn physical_field(&self, x: &[f64]) -> Result<DensityField> {
        let mut field = self.template.clone();
        field.set_design_values(&self.problem.mesh, &self.physical_values(x)?)?;
        Ok(field)
    }

    /// Volume fraction of the physical field produced by `x`
    fn volume_of(&self, x: &[f64]) -> f64 {
        let total: f64 = self.design_volumes.iter().sum();
        self.physical_values(x).map_or(f64::INFINITY, |rho| {
            rho.iter().zip(&self.design_volumes).map(|(r, v)| r * v).sum::<f64>() / total
        })
    }

    /// Objective and volume gradients with respect to the design variables
    fn design_gradients(
        &self,
        dc_physical: &[f64],
    ) -> std::result::Result<(Vec<f64>, Vec<f64>), ConfigurationError> {
        match self.params.filter_kind {
            FilterKind::Sensitivity => Ok((
                self.filter.apply(FilterKind::Sensitivity, dc_physical)?,
                self.design_volumes.clone(),
            )),
            FilterKind::Density => Ok((
                self.filter.apply_transpose(FilterKind::Density, dc_physical)?,
                self.filter.apply_transpose(FilterKind::Density, &self.design_volumes)?,
            )),
        }
    }

    /// OC update with the uniform-scale fallback for a degenerate multiplier search
    fn apply_update(
        &self,
        updater: &OcUpdater,
        x: &mut [f64],
        dc: &[f64],
        dv: &[f64],
        warnings: &mut Vec<IterationWarning>,
    ) -> Result<()> {
        let target = self.params.volume_fraction;
        let volume_of = |candidate: &[f64]| self.volume_of(candidate);
        match updater.update(x, dc, dv, target, &volume_of) {
            Ok(_) => Ok(()),
            Err(UpdateError::Degenerate(reason)) => {
                warnings.push(IterationWarning::UpdateDegenerate { reason });
                updater.uniform_scale(x, target, &volume_of)?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn failed_case(err: &EvaluationError) -> String {
    match err {
        EvaluationError::SolveFailure { load_case, .. }
        | EvaluationError::MalformedResult { load_case, .. } => load_case.clone(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_cases::{LoadCaseSpec, LoadType};
    use crate::mesh::fixtures;
    use nalgebra::DVector;
    use std::sync::atomic::AtomicUsize;

    /// Unit strain energy everywhere; calls in `failing` return a solve failure
    struct ScriptedEvaluator {
        calls: AtomicUsize,
        failing: std::ops::Range<usize>,
    }

    impl ScriptedEvaluator {
        fn new(failing: std::ops::Range<usize>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failing,
            }
        }
    }

    impl FeaEvaluator for ScriptedEvaluator {
        fn evaluate(
            &self,
            density: &DensityField,
            load_case: &LoadCase,
            options: &SolveOptions,
        ) -> std::result::Result<EvaluationResult, EvaluationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(&call) {
                return Err(EvaluationError::SolveFailure {
                    load_case: load_case.name().to_string(),
                    reason: format!("scripted failure {call}"),
                });
            }
            let n = density.len();
            Ok(EvaluationResult {
                load_case: load_case.name().to_string(),
                displacements: DVector::zeros(3),
                compliance: density.values().iter().map(|r| r.powf(options.penalty)).sum(),
                von_mises: vec![1e6; n],
                strain_energies: vec![1.0; n],
                converged: true,
                solver_iterations: 1,
                residual: 0.0,
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn problem() -> Problem {
        let case = LoadCase::new(LoadCaseSpec {
            name: "static".to_string(),
            load_type: LoadType::Static,
            force_magnitude: 1.0,
            force_direction: [0.0, -1.0, 0.0],
            required_safety_factor: 2.0,
            cycles: None,
            frequency: None,
            description: String::new(),
            application_sets: vec!["TIP".to_string()],
        })
        .unwrap();
        Problem {
            mesh: Arc::new(fixtures::grid(4, 2, 1, 1.0)),
            material: MaterialProperties::steel(),
            load_cases: LoadCaseSet::new(vec![case]).unwrap(),
        }
    }

    fn optimizer(failing: std::ops::Range<usize>) -> Optimizer {
        let mut params = OptimizationParams::with_volume_fraction(0.4);
        params.max_iterations = Some(10);
        params.workers = Some(2);
        Optimizer::new(
            problem(),
            params,
            SolverParams::default(),
            Box::new(ScriptedEvaluator::new(failing)),
        )
        .unwrap()
    }

    #[test]
    fn uniform_response_converges_on_second_iteration() {
        let outcome = optimizer(0..0).run().unwrap();
        assert!(outcome.converged());
        assert_eq!(outcome.state.iteration, 2);
        assert!((outcome.state.volume_fraction - 0.4).abs() <= 1e-4);
        assert_eq!(outcome.safety.len(), 1);
        // steel yield 250 MPa over 1 MPa
        assert!(outcome.all_safe());
    }

    #[test]
    fn relaxed_retry_is_recorded() {
        let outcome = optimizer(0..1).run().unwrap();
        assert!(matches!(
            outcome.history[0].warnings.as_slice(),
            [IterationWarning::SolveRetried { .. }]
        ));
    }

    #[test]
    fn second_failure_halves_move_limit_and_repeats() {
        // iteration 2: first solve and relaxed retry fail
        let outcome = optimizer(1..3).run().unwrap();
        let warnings = &outcome.history[1].warnings;
        assert!(matches!(warnings[0], IterationWarning::SolveRetried { .. }));
        assert!(matches!(
            warnings[1],
            IterationWarning::MoveLimitHalved { move_limit, .. } if (move_limit - 0.1).abs() < 1e-12
        ));
    }

    #[test]
    fn first_iteration_failure_repeats_without_halving() {
        let outcome = optimizer(0..2).run().unwrap();
        let warnings = &outcome.history[0].warnings;
        assert!(matches!(warnings[0], IterationWarning::SolveRetried { .. }));
        assert!(matches!(
            &warnings[1],
            IterationWarning::IterationRepeated { load_case } if load_case == "static"
        ));
        assert!(
            !warnings
                .iter()
                .any(|w| matches!(w, IterationWarning::MoveLimitHalved { .. }))
        );
    }

    #[test]
    fn persistent_failure_aborts_with_last_state() {
        let err = optimizer(1..usize::MAX).run().unwrap_err();
        match &err {
            OptimizationError::Aborted { iteration, .. } => assert_eq!(*iteration, 2),
            other => panic!("expected abort, got {other}"),
        }
        let last = err.last_state().expect("iteration 1 completed");
        assert_eq!(last.iteration, 1);
    }

    #[test]
    fn failure_on_first_iteration_has_no_last_state() {
        let err = optimizer(0..usize::MAX).run().unwrap_err();
        assert!(err.last_state().is_none());
    }

    #[test]
    fn stop_before_start_cancels_with_initial_field() {
        let optimizer = optimizer(0..0);
        optimizer.stop_handle().stop();
        let outcome = optimizer.run().unwrap();
        assert_eq!(outcome.state.state, ConvergenceState::Cancelled);
        assert_eq!(outcome.state.iteration, 0);
        assert!(outcome.history.is_empty());
        assert_eq!(outcome.safety.len(), 1);
    }

    #[test]
    fn missing_load_set_is_rejected() {
        let mut problem = problem();
        let mut spec: LoadCaseSpec = problem.load_cases.cases()[0].clone().into();
        spec.application_sets = vec!["NOWHERE".to_string()];
        problem.load_cases = LoadCaseSet::new(vec![LoadCase::new(spec).unwrap()]).unwrap();
        let result = Optimizer::new(
            problem,
            OptimizationParams::with_volume_fraction(0.4),
            SolverParams::default(),
            Box::new(ScriptedEvaluator::new(0..0)),
        );
        assert!(matches!(
            result,
            Err(OptimizationError::Configuration(ConfigurationError::MissingNodeSet(_)))
        ));
    }
}
