use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use topo_opt::config::{RunConfig, RunProfile};
use topo_opt::{MaterialLibrary, MeshBuilder, OptimizationPipeline};

#[derive(Parser, Debug)]
#[command(name = "topo-opt")]
#[command(about = "SIMP topology optimization of a wall-mount design domain", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an optimization from a JSON configuration
    Run {
        config: PathBuf,
        /// Progress and warnings on stderr
        #[arg(short, long)]
        verbose: bool,
        /// Override the iteration profile
        #[arg(long, value_enum, ignore_case = true)]
        profile: Option<RunProfile>,
        /// Override the iteration limit
        #[arg(long)]
        max_iterations: Option<usize>,
        /// Write the JSON report here
        #[arg(long)]
        report: Option<PathBuf>,
        /// Write per-element densities here
        #[arg(long)]
        density_csv: Option<PathBuf>,
    },
    /// Validate a configuration and print mesh statistics
    Check { config: PathBuf },
    /// List the available materials
    Materials {
        /// JSON array of extra materials
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

struct RunOverrides {
    verbose: bool,
    profile: Option<RunProfile>,
    max_iterations: Option<usize>,
    report: Option<PathBuf>,
    density_csv: Option<PathBuf>,
}

/// Returns whether every load case passed its safety check
fn run_file(path: &Path, overrides: RunOverrides) -> Result<bool, String> {
    let mut config = RunConfig::load(path).map_err(|err| format!("{}: {err}", path.display()))?;
    config.verbose |= overrides.verbose;
    if let Some(profile) = overrides.profile {
        config.optimization.profile = profile;
        config.optimization.max_iterations = None;
        config.optimization.objective_tolerance = None;
    }
    if let Some(n) = overrides.max_iterations {
        config.optimization.max_iterations = Some(n);
    }
    if overrides.report.is_some() {
        config.output.report = overrides.report;
    }
    if overrides.density_csv.is_some() {
        config.output.density_csv = overrides.density_csv;
    }

    let max_iterations = config.optimization.max_iterations();
    let pipeline = OptimizationPipeline::from_config(config).map_err(|err| err.to_string())?;

    let bar = ProgressBar::new(max_iterations as u64);
    let result = pipeline.run_with_observer(|record| {
        bar.set_position(record.iteration as u64);
        bar.set_message(format!("C = {:.4e}", record.objective));
    });
    let (outcome, report) = match result {
        Ok(done) => done,
        Err(err) => {
            bar.abandon();
            return Err(format!("Optimization error: {err}"));
        }
    };
    bar.finish_with_message(format!("{} after {} iterations", report.state.as_str(), report.iterations));

    println!("{}", report.summary());
    for warning in &outcome.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(outcome.all_safe())
}

fn check_file(path: &Path) -> Result<(), String> {
    let config = RunConfig::load(path).map_err(|err| format!("{}: {err}", path.display()))?;
    let mesh = MeshBuilder::build_from_file(&config.mesh.path, &config.mesh.region_sets())
        .map_err(|err| err.to_string())?;
    let cases = config.load_cases().map_err(|err| err.to_string())?;

    println!("config: {}", path.display());
    println!("{}", mesh.statistics().format());
    println!("load_cases: {}", cases.len());
    for case in &cases {
        println!(
            "  {} ({:?}): {:.1} N, SF {:.1}",
            case.name(),
            case.load_type(),
            case.force_magnitude(),
            case.required_safety_factor()
        );
    }
    Ok(())
}

fn list_materials(file: Option<&Path>) -> Result<(), String> {
    let library = match file {
        Some(path) => MaterialLibrary::with_file(path).map_err(|err| err.to_string())?,
        None => MaterialLibrary::builtin(),
    };
    for name in library.material_names() {
        if let Some(m) = library.get_material(&name) {
            println!(
                "{:<16} E={:.1} GPa  ν={:.2}  ρ={:.0} kg/m³  σy={:.0} MPa  σf={:.0} MPa",
                m.name,
                m.youngs_modulus / 1e9,
                m.poisson_ratio,
                m.density,
                m.yield_strength / 1e6,
                m.fatigue_limit / 1e6
            );
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            verbose,
            profile,
            max_iterations,
            report,
            density_csv,
        } => {
            let overrides = RunOverrides {
                verbose,
                profile,
                max_iterations,
                report,
                density_csv,
            };
            match run_file(&config, overrides) {
                Ok(true) => ExitCode::SUCCESS,
                // finished, but the design does not meet a required safety factor
                Ok(false) => ExitCode::from(2),
                Err(err) => {
                    eprintln!("run_error: {err}");
                    ExitCode::from(1)
                }
            }
        }
        Command::Check { config } => match check_file(&config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("check_error: {err}");
                ExitCode::from(1)
            }
        },
        Command::Materials { file } => match list_materials(file.as_deref()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("materials_error: {err}");
                ExitCode::from(1)
            }
        },
    }
}
