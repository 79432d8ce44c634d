//! End-to-end behavior of the optimization loop.

mod common;

use approx::assert_abs_diff_eq;
use common::{UniformResponse, cantilever, load_case, problem};
use topo_opt::config::{OptimizationParams, SolverParams};
use topo_opt::safety::StrengthLimit;
use topo_opt::{ConvergenceState, InProcessEvaluator, IterationWarning, LoadType, Optimizer};

fn params(volume_fraction: f64, max_iterations: usize) -> OptimizationParams {
    let mut params = OptimizationParams::with_volume_fraction(volume_fraction);
    params.max_iterations = Some(max_iterations);
    params.workers = Some(2);
    params
}

#[test]
fn single_static_case_keeps_volume_target_after_one_iteration() {
    let problem = problem(
        cantilever(6, 2, 1, 0.01),
        vec![load_case("static", LoadType::Static, 2.5)],
    );
    let evaluator =
        InProcessEvaluator::new(problem.mesh.clone(), &problem.material, "SUPPORT").unwrap();
    let optimizer = Optimizer::new(
        problem,
        params(0.3, 1),
        SolverParams::default(),
        Box::new(evaluator),
    )
    .unwrap();

    let outcome = optimizer.run().unwrap();
    assert_eq!(outcome.state.iteration, 1);
    assert_eq!(outcome.history.len(), 1);
    assert_abs_diff_eq!(outcome.history[0].volume_fraction, 0.3, epsilon = 1e-4);
    assert_abs_diff_eq!(outcome.state.volume_fraction, 0.3, epsilon = 1e-4);
    assert!(outcome.history[0].objective > 0.0);
}

#[test]
fn safety_check_flags_only_the_overstressed_case() {
    let cases = vec![
        load_case("static", LoadType::Static, 2.5),
        load_case("dynamic", LoadType::Dynamic, 1.8),
        load_case("seismic", LoadType::Seismic, 3.0),
        load_case("fatigue", LoadType::Fatigue, 4.0),
    ];
    // steel: yield 250 MPa, fatigue limit 120 MPa
    let evaluator = UniformResponse::new(1.0)
        .with_stress("static", 50e6)
        .with_stress("dynamic", 100e6)
        .with_stress("seismic", 100e6)
        .with_stress("fatigue", 20e6);
    let optimizer = Optimizer::new(
        problem(cantilever(4, 2, 1, 1.0), cases),
        params(0.4, 3),
        SolverParams::default(),
        Box::new(evaluator),
    )
    .unwrap();

    let outcome = optimizer.run().unwrap();
    let verdicts: Vec<(&str, bool)> = outcome
        .safety
        .iter()
        .map(|v| (v.load_case.as_str(), v.passed))
        .collect();
    assert_eq!(
        verdicts,
        [
            ("static", true),
            ("dynamic", true),
            ("seismic", false),
            ("fatigue", true)
        ]
    );
    assert!(!outcome.all_safe());
    assert_eq!(outcome.safety[3].limit, StrengthLimit::Fatigue);
    assert_abs_diff_eq!(outcome.safety[2].observed_safety_factor, 2.5, epsilon = 1e-12);
}

#[test]
fn zero_sensitivity_falls_back_to_uniform_scaling() {
    let optimizer = Optimizer::new(
        problem(
            cantilever(4, 2, 1, 1.0),
            vec![load_case("static", LoadType::Static, 2.0)],
        ),
        params(0.35, 2),
        SolverParams::default(),
        Box::new(UniformResponse::new(0.0)),
    )
    .unwrap();

    let outcome = optimizer.run().unwrap();
    let first = &outcome.history[0];
    assert!(
        first
            .warnings
            .iter()
            .any(|w| matches!(w, IterationWarning::UpdateDegenerate { .. }))
    );
    assert_abs_diff_eq!(first.volume_fraction, 0.35, epsilon = 1e-4);
    assert!(outcome.state.densities.values().iter().all(|r| r.is_finite()));
}

#[test]
fn single_iteration_limit_ends_in_max_iterations_reached() {
    let mut params = params(0.4, 1);
    params.design_tolerance = 1e-300;
    params.objective_tolerance = Some(1e-300);
    let optimizer = Optimizer::new(
        problem(
            cantilever(4, 2, 1, 1.0),
            vec![load_case("static", LoadType::Static, 2.0)],
        ),
        params,
        SolverParams::default(),
        Box::new(UniformResponse::new(1.0)),
    )
    .unwrap();

    let outcome = optimizer.run().unwrap();
    assert_eq!(outcome.state.state, ConvergenceState::MaxIterationsReached);
    assert!(!outcome.converged());
    assert_eq!(outcome.history.len(), 1);
}

#[test]
fn cantilever_compliance_decreases_at_constant_volume() {
    let problem = problem(
        cantilever(8, 4, 1, 0.01),
        vec![load_case("tip", LoadType::Static, 2.0)],
    );
    let evaluator =
        InProcessEvaluator::new(problem.mesh.clone(), &problem.material, "SUPPORT").unwrap();
    let optimizer = Optimizer::new(
        problem,
        params(0.5, 8),
        SolverParams::default(),
        Box::new(evaluator),
    )
    .unwrap();

    let outcome = optimizer.run().unwrap();
    let objectives: Vec<f64> = outcome.history.iter().map(|r| r.objective).collect();
    assert!(objectives.len() >= 2);
    assert!(objectives.last().unwrap() < &objectives[0]);
    for record in &outcome.history {
        assert_abs_diff_eq!(record.volume_fraction, 0.5, epsilon = 1e-4);
    }
    // the final field is evaluated again for the safety check
    assert_eq!(outcome.final_results.len(), 1);
    assert!(outcome.final_results[0].compliance < objectives[0]);
}

#[test]
fn stop_handle_cancels_between_iterations() {
    let optimizer = Optimizer::new(
        problem(
            cantilever(4, 2, 1, 1.0),
            vec![load_case("static", LoadType::Static, 2.0)],
        ),
        params(0.4, 20),
        SolverParams::default(),
        Box::new(UniformResponse::new(1.0)),
    )
    .unwrap();

    let stop = optimizer.stop_handle();
    let outcome = optimizer
        .run_with_observer(|record| {
            if record.iteration == 1 {
                stop.stop();
            }
        })
        .unwrap();
    assert_eq!(outcome.state.state, ConvergenceState::Cancelled);
    assert_eq!(outcome.state.iteration, 1);
    assert_eq!(outcome.history.len(), 1);
}
