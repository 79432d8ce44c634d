//! JSON persistence for run configurations and reports, plus the plain
//! `element_id,density` export of a final design.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::descriptor::ensure_parent_dir;
use crate::error::{IoError, Result};

/// Serialize `value` as pretty JSON at `path`
pub fn save_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    ensure_parent_dir(path)?;
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(path, bytes)?;
    Ok(())
}

pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(IoError::FileNotFound(path.display().to_string()));
    }
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Write the final density field as CSV with a header row
pub fn write_density_csv(path: impl AsRef<Path>, densities: &[(i32, f64)]) -> Result<()> {
    let path = path.as_ref();
    ensure_parent_dir(path)?;
    let mut out = BufWriter::new(fs::File::create(path)?);
    writeln!(out, "element_id,density")?;
    for (id, rho) in densities {
        writeln!(out, "{id},{rho:?}")?;
    }
    out.flush()?;
    Ok(())
}
