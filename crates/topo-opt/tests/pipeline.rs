//! Configuration file → mesh deck → optimization → written outputs.

mod common;

use std::fs;
use std::path::Path;

use common::cantilever_inp;
use topo_opt::error::ConfigurationError;
use topo_opt::{ConvergenceState, OptimizationError, OptimizationPipeline, RunReport};

fn write_run(dir: &Path, config: &str) -> std::path::PathBuf {
    fs::write(dir.join("bracket.inp"), cantilever_inp(6, 2, 1, 0.01)).unwrap();
    let path = dir.join("run.json");
    fs::write(&path, config).unwrap();
    path
}

const CONFIG: &str = r#"{
    "mesh": { "path": "bracket.inp" },
    "material": "Aluminum",
    "tv_mass_kg": 20.0,
    "mount_sets": ["LOAD"],
    "optimization": {
        "volume_fraction": 0.4,
        "max_iterations": 3,
        "workers": 2,
        "combination": { "rule": "worst_case" }
    },
    "output": {
        "report": "out/report.json",
        "density_csv": "out/densities.csv"
    }
}"#;

#[test]
fn pipeline_runs_from_config_and_writes_outputs() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let path = write_run(tmp.path(), CONFIG);

    let pipeline = OptimizationPipeline::from_file(&path).expect("pipeline should build");
    assert_eq!(pipeline.optimizer().problem().load_cases.len(), 4);
    assert_eq!(pipeline.optimizer().problem().material.name, "aluminum");

    let mut seen = Vec::new();
    let (outcome, report) = pipeline
        .run_with_observer(|record| seen.push(record.iteration))
        .expect("run should finish");
    assert_eq!(seen, (1..=outcome.state.iteration).collect::<Vec<_>>());
    assert!(matches!(
        report.state,
        ConvergenceState::Converged | ConvergenceState::MaxIterationsReached
    ));
    assert_eq!(report.safety.len(), 4);
    assert_eq!(report.densities.len(), 12);
    assert_eq!(report.evaluator, "in-process");
    assert!((report.final_volume_fraction - 0.4).abs() <= 1e-4);
    assert!(report.mass_kg > 0.0);

    let saved: RunReport =
        serde_json::from_slice(&fs::read(tmp.path().join("out/report.json")).unwrap()).unwrap();
    assert_eq!(saved.iterations, report.iterations);
    assert_eq!(saved.history.len(), report.history.len());

    let csv = fs::read_to_string(tmp.path().join("out/densities.csv")).unwrap();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("element_id,density"));
    assert_eq!(lines.count(), 12);
    assert!(report.summary().contains("Volume fraction"));
}

#[test]
fn unknown_material_is_a_configuration_error() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let path = write_run(tmp.path(), &CONFIG.replace("Aluminum", "unobtainium"));
    match OptimizationPipeline::from_file(&path) {
        Err(OptimizationError::Configuration(ConfigurationError::UnknownMaterial(name))) => {
            assert_eq!(name, "unobtainium")
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("unknown material accepted"),
    }
}

#[test]
fn missing_support_set_is_rejected_before_the_loop() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let config = CONFIG.replace(
        r#""path": "bracket.inp""#,
        r#""path": "bracket.inp", "support_set": "WALL""#,
    );
    let path = write_run(tmp.path(), &config);
    assert!(matches!(
        OptimizationPipeline::from_file(&path),
        Err(OptimizationError::Configuration(ConfigurationError::MissingNodeSet(set))) if set == "WALL"
    ));
}
