//! Run pipeline: configuration → mesh → evaluator → optimizer → report.

use std::path::Path;
use std::sync::Arc;

use crate::config::{EvaluatorConfig, RunConfig};
use crate::convergence::IterationRecord;
use crate::error::Result;
use crate::evaluator::{ExternalEvaluator, ExternalSettings, FeaEvaluator, InProcessEvaluator};
use crate::materials::MaterialLibrary;
use crate::mesh_builder::MeshBuilder;
use crate::optimizer::{Optimizer, Problem, RunOutcome, StopHandle};
use crate::report::RunReport;

/// One configured run
pub struct OptimizationPipeline {
    config: RunConfig,
    optimizer: Optimizer,
}

impl OptimizationPipeline {
    /// Load and validate a JSON run configuration, then set up the run
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_config(RunConfig::load(path)?)
    }

    /// Resolve the material, read the mesh and build the evaluator.
    /// Every fatal configuration or mesh problem surfaces here.
    pub fn from_config(config: RunConfig) -> Result<Self> {
        config.validate()?;
        let library = match &config.materials_file {
            Some(path) => MaterialLibrary::with_file(path)?,
            None => MaterialLibrary::builtin(),
        };
        let material = library.resolve(&config.material)?;
        material.validate()?;

        let mesh = MeshBuilder::build_from_file(&config.mesh.path, &config.mesh.region_sets())?;
        if config.verbose {
            eprintln!("Mesh {}:", config.mesh.path.display());
            for line in mesh.statistics().format().lines() {
                eprintln!("  {line}");
            }
        }
        let mesh = Arc::new(mesh);
        let load_cases = config.load_cases()?;

        let evaluator: Box<dyn FeaEvaluator> = match &config.evaluator {
            EvaluatorConfig::InProcess => Box::new(InProcessEvaluator::new(
                mesh.clone(),
                &material,
                &config.mesh.support_set,
            )?),
            EvaluatorConfig::External {
                program,
                args,
                work_dir,
                timeout_secs,
                keep_jobs,
            } => Box::new(ExternalEvaluator::new(
                mesh.clone(),
                &material,
                ExternalSettings {
                    program: program.clone(),
                    args: args.clone(),
                    work_dir: work_dir.clone(),
                    timeout: std::time::Duration::from_secs(*timeout_secs),
                    mesh_file: config.mesh.path.clone(),
                    support_set: config.mesh.support_set.clone(),
                    region_sets: config.mesh.region_sets(),
                    keep_jobs: *keep_jobs,
                },
            )?),
        };

        let optimizer = Optimizer::new(
            Problem {
                mesh,
                material,
                load_cases,
            },
            config.optimization.clone(),
            config.solver.clone(),
            evaluator,
        )?
        .verbose(config.verbose);

        Ok(Self { config, optimizer })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn optimizer(&self) -> &Optimizer {
        &self.optimizer
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.optimizer.stop_handle()
    }

    pub fn run(&self) -> Result<(RunOutcome, RunReport)> {
        self.run_with_observer(|_| {})
    }

    /// Run the optimizer, build the report and write the configured outputs
    pub fn run_with_observer(
        &self,
        observer: impl FnMut(&IterationRecord),
    ) -> Result<(RunOutcome, RunReport)> {
        let outcome = self.optimizer.run_with_observer(observer)?;
        let report = RunReport::new(&self.optimizer, &outcome);

        if let Some(path) = &self.config.output.report {
            report.save(path)?;
            if self.config.verbose {
                eprintln!("Report written to {}", path.display());
            }
        }
        if let Some(path) = &self.config.output.density_csv {
            report.write_density_csv(path)?;
            if self.config.verbose {
                eprintln!("Densities written to {}", path.display());
            }
        }
        Ok((outcome, report))
    }
}
