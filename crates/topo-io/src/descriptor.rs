//! XML simulation descriptors handed to an out-of-process FEA evaluator.
//!
//! One descriptor is written per load case per iteration. It names the mesh,
//! the element density file, the material, the SIMP penalty, the support and
//! force regions of the load case and the results the solver must store.
//! All quantities are SI: forces in N, moduli in Pa, lengths in m.

use std::fs;
use std::io::Write;
use std::path::Path;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesText, Event};

use crate::error::Result;

pub const SIMULATION_NAMESPACE: &str = "http://www.cfs++.org/simulation";

/// Material block of a descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorMaterial {
    pub name: String,
    /// Young's modulus at full density [Pa]
    pub youngs_modulus: f64,
    pub poisson_ratio: f64,
    /// Mass density [kg/m³]
    pub density: f64,
}

/// Force applied to every node of a named node set, total per set [N]
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorForce {
    pub node_set: String,
    pub force: [f64; 3],
}

/// Everything the external solver needs for one load case evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationDescriptor {
    pub job_name: String,
    pub load_case: String,
    pub load_type: String,
    pub description: String,
    pub required_safety_factor: f64,
    pub mesh_file: String,
    pub density_file: String,
    pub result_file: String,
    pub design_region: String,
    pub fixed_regions: Vec<String>,
    pub material: DescriptorMaterial,
    pub penalty: f64,
    pub solver_tolerance: f64,
    pub max_solver_iterations: usize,
    pub supports: Vec<String>,
    pub forces: Vec<DescriptorForce>,
}

impl SimulationDescriptor {
    /// Render the descriptor as an indented XML document
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let comment = format!(
            " Load case: {} ({}), required safety factor {} ",
            self.load_case, self.load_type, self.required_safety_factor
        );
        writer.write_event(Event::Comment(BytesText::new(&comment)))?;
        if !self.description.is_empty() {
            writer.write_event(Event::Comment(BytesText::new(&format!(
                " {} ",
                self.description
            ))))?;
        }

        writer
            .create_element("cfsSimulation")
            .with_attribute(("xmlns", SIMULATION_NAMESPACE))
            .with_attribute(("job", self.job_name.as_str()))
            .write_inner_content(|w| {
                self.write_file_formats(w)?;
                self.write_domain(w)?;
                self.write_sequence_step(w)?;
                self.write_design(w)?;
                Ok::<(), quick_xml::Error>(())
            })?;

        String::from_utf8(writer.into_inner())
            .map_err(|err| crate::error::IoError::InvalidData(err.to_string()))
    }

    fn write_file_formats(&self, w: &mut Writer<Vec<u8>>) -> quick_xml::Result<()> {
        w.create_element("fileFormats").write_inner_content(|w| {
            w.create_element("input")
                .write_inner_content(|w| {
                    w.create_element("mesh")
                        .with_attribute(("file", self.mesh_file.as_str()))
                        .write_empty()?;
                    w.create_element("density")
                        .with_attribute(("file", self.density_file.as_str()))
                        .write_empty()?;
                    Ok::<(), quick_xml::Error>(())
                })?;
            w.create_element("output").write_inner_content(|w| {
                w.create_element("result")
                    .with_attribute(("file", self.result_file.as_str()))
                    .with_attribute(("format", "xml"))
                    .write_empty()?;
                Ok::<(), quick_xml::Error>(())
            })?;
            Ok::<(), quick_xml::Error>(())
        })?;
        Ok(())
    }

    fn write_domain(&self, w: &mut Writer<Vec<u8>>) -> quick_xml::Result<()> {
        let m = &self.material;
        let youngs = format_f64(m.youngs_modulus);
        let poisson = format_f64(m.poisson_ratio);
        let density = format_f64(m.density);
        w.create_element("domain")
            .with_attribute(("geometryType", "3d"))
            .write_inner_content(|w| {
                w.create_element("material")
                    .with_attribute(("name", m.name.as_str()))
                    .with_attribute(("youngsModulus", youngs.as_str()))
                    .with_attribute(("poissonRatio", poisson.as_str()))
                    .with_attribute(("density", density.as_str()))
                    .with_attribute(("unit", "Pa"))
                    .write_empty()?;
                w.create_element("regionList").write_inner_content(|w| {
                    w.create_element("region")
                        .with_attribute(("name", self.design_region.as_str()))
                        .with_attribute(("material", m.name.as_str()))
                        .write_empty()?;
                    for region in &self.fixed_regions {
                        w.create_element("region")
                            .with_attribute(("name", region.as_str()))
                            .with_attribute(("material", m.name.as_str()))
                            .write_empty()?;
                    }
                    Ok::<(), quick_xml::Error>(())
                })?;
                Ok::<(), quick_xml::Error>(())
            })?;
        Ok(())
    }

    fn write_sequence_step(&self, w: &mut Writer<Vec<u8>>) -> quick_xml::Result<()> {
        let tolerance = format_f64(self.solver_tolerance);
        let max_iterations = self.max_solver_iterations.to_string();
        w.create_element("sequenceStep")
            .with_attribute(("index", "1"))
            .write_inner_content(|w| {
                w.create_element("analysis").write_inner_content(|w| {
                    w.create_element("static").write_empty()?;
                    Ok::<(), quick_xml::Error>(())
                })?;
                w.create_element("bcsAndLoads").write_inner_content(|w| {
                    for support in &self.supports {
                        w.create_element("fix")
                            .with_attribute(("name", support.as_str()))
                            .write_inner_content(|w| {
                                for dof in ["x", "y", "z"] {
                                    w.create_element("comp")
                                        .with_attribute(("dof", dof))
                                        .write_empty()?;
                                }
                                Ok::<(), quick_xml::Error>(())
                            })?;
                    }
                    for force in &self.forces {
                        w.create_element("force")
                            .with_attribute(("name", force.node_set.as_str()))
                            .with_attribute(("unit", "N"))
                            .write_inner_content(|w| {
                                for (dof, value) in ["x", "y", "z"].iter().zip(force.force) {
                                    let value = format_f64(value);
                                    w.create_element("comp")
                                        .with_attribute(("dof", *dof))
                                        .with_attribute(("value", value.as_str()))
                                        .write_empty()?;
                                }
                                Ok::<(), quick_xml::Error>(())
                            })?;
                    }
                    Ok::<(), quick_xml::Error>(())
                })?;
                w.create_element("storeResults").write_inner_content(|w| {
                    w.create_element("nodeResult")
                        .with_attribute(("type", "mechDisplacement"))
                        .write_empty()?;
                    w.create_element("elemResult")
                        .with_attribute(("type", "physicalPseudoDensity"))
                        .write_empty()?;
                    w.create_element("elemResult")
                        .with_attribute(("type", "mechStress"))
                        .write_empty()?;
                    Ok::<(), quick_xml::Error>(())
                })?;
                w.create_element("linearSystems").write_inner_content(|w| {
                    w.create_element("cg")
                        .with_attribute(("tol", tolerance.as_str()))
                        .with_attribute(("maxIter", max_iterations.as_str()))
                        .write_empty()?;
                    Ok::<(), quick_xml::Error>(())
                })?;
                Ok::<(), quick_xml::Error>(())
            })?;
        Ok(())
    }

    fn write_design(&self, w: &mut Writer<Vec<u8>>) -> quick_xml::Result<()> {
        let penalty = format_f64(self.penalty);
        w.create_element("ersatzMaterial")
            .with_attribute(("region", self.design_region.as_str()))
            .with_attribute(("method", "simp"))
            .write_inner_content(|w| {
                w.create_element("transferFunction")
                    .with_attribute(("type", "simp"))
                    .with_attribute(("param", penalty.as_str()))
                    .write_empty()?;
                Ok::<(), quick_xml::Error>(())
            })?;
        Ok(())
    }
}

/// Write the descriptor to `path`, creating parent directories as needed
pub fn write_descriptor(path: impl AsRef<Path>, descriptor: &SimulationDescriptor) -> Result<()> {
    let path = path.as_ref();
    ensure_parent_dir(path)?;
    fs::write(path, descriptor.to_xml()?)?;
    Ok(())
}

/// Write `element_id density` pairs, one per line
pub fn write_density_file(path: impl AsRef<Path>, densities: &[(i32, f64)]) -> Result<()> {
    let path = path.as_ref();
    ensure_parent_dir(path)?;
    let mut file = std::io::BufWriter::new(fs::File::create(path)?);
    writeln!(file, "# element_id density")?;
    for (id, rho) in densities {
        writeln!(file, "{id} {}", format_f64(*rho))?;
    }
    file.flush()?;
    Ok(())
}

/// Shortest representation that parses back to the same `f64`
fn format_f64(value: f64) -> String {
    format!("{value:?}")
}

pub(crate) fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
