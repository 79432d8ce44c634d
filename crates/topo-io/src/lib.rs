//! File formats at the boundary of the topology optimizer.
//!
//! This crate provides:
//! - **INP (input deck)** parser for the CalculiX/Abaqus keyword subset used as mesh input
//! - **Simulation descriptors** (XML) and density files handed to an external FEA solver
//! - **Evaluation results** (XML) read back from that solver
//! - **JSON persistence** for run configurations and reports, and a density CSV export

pub mod descriptor;
pub mod error;
pub mod inp;
mod report;
pub mod results;

pub use descriptor::{
    DescriptorForce, DescriptorMaterial, SimulationDescriptor, write_density_file,
    write_descriptor,
};
pub use error::{IoError, Result};
pub use inp::{Card, Deck, Parameter, ParseError as InpParseError};
pub use report::{load_json, save_json, write_density_csv};
pub use results::{RawEvaluation, parse_evaluation_result, read_evaluation_result};
