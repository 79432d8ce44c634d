//! Reader for the XML result file written by an external FEA evaluator.
//!
//! ```xml
//! <evaluationResult converged="true" compliance="1.25" iterations="87" residual="3.1e-9">
//!   <nodeResult type="mechDisplacement">
//!     <node id="1" x="0.0" y="-1.2e-6" z="0.0"/>
//!   </nodeResult>
//!   <elemResult type="mechStress">
//!     <elem id="1" value="4.5e6"/>
//!   </elemResult>
//! </evaluationResult>
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use roxmltree::{Document, Node};

use crate::error::{IoError, Result};

/// Raw fields of one evaluation, keyed by node / element id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEvaluation {
    pub converged: bool,
    /// Compliance as reported by the solver, if it reports one
    pub compliance: Option<f64>,
    pub iterations: usize,
    pub residual: f64,
    pub displacements: BTreeMap<i32, [f64; 3]>,
    /// Von Mises stress per element [Pa]
    pub stresses: BTreeMap<i32, f64>,
}

pub fn read_evaluation_result(path: impl AsRef<Path>) -> Result<RawEvaluation> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(IoError::FileNotFound(path.display().to_string()));
    }
    let text = fs::read_to_string(path)?;
    parse_evaluation_result(&text)
}

pub fn parse_evaluation_result(text: &str) -> Result<RawEvaluation> {
    let doc = Document::parse(text)?;
    let root = doc.root_element();
    if root.tag_name().name() != "evaluationResult" {
        return Err(IoError::InvalidData(format!(
            "expected <evaluationResult> root, found <{}>",
            root.tag_name().name()
        )));
    }

    let converged = match root.attribute("converged") {
        Some(value) => parse_bool(value)?,
        None => {
            return Err(IoError::InvalidData(
                "evaluationResult is missing the 'converged' attribute".to_string(),
            ));
        }
    };

    let mut result = RawEvaluation {
        converged,
        compliance: optional_f64(root, "compliance")?,
        iterations: optional_attr(root, "iterations")?.unwrap_or(0),
        residual: optional_f64(root, "residual")?.unwrap_or(0.0),
        ..Default::default()
    };

    for block in root.children().filter(Node::is_element) {
        match (block.tag_name().name(), block.attribute("type")) {
            ("nodeResult", Some("mechDisplacement")) => {
                for node in block.children().filter(|n| n.has_tag_name("node")) {
                    let id = required_attr::<i32>(node, "id")?;
                    let u = [
                        required_attr::<f64>(node, "x")?,
                        required_attr::<f64>(node, "y")?,
                        required_attr::<f64>(node, "z")?,
                    ];
                    if result.displacements.insert(id, u).is_some() {
                        return Err(IoError::InvalidData(format!(
                            "duplicate displacement for node {id}"
                        )));
                    }
                }
            }
            ("elemResult", Some("mechStress")) => {
                for elem in block.children().filter(|n| n.has_tag_name("elem")) {
                    let id = required_attr::<i32>(elem, "id")?;
                    let value = required_attr::<f64>(elem, "value")?;
                    if result.stresses.insert(id, value).is_some() {
                        return Err(IoError::InvalidData(format!(
                            "duplicate stress for element {id}"
                        )));
                    }
                }
            }
            // Other stored results (e.g. the echoed pseudo density) are not needed
            _ => {}
        }
    }

    if result.converged && result.displacements.is_empty() {
        return Err(IoError::InvalidData(
            "converged result contains no mechDisplacement values".to_string(),
        ));
    }

    Ok(result)
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(IoError::Parse(format!("invalid boolean '{other}'"))),
    }
}

fn optional_attr<T: std::str::FromStr>(node: Node, key: &str) -> Result<Option<T>> {
    node.attribute(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| {
                IoError::Parse(format!(
                    "invalid value '{raw}' for attribute '{key}' on <{}>",
                    node.tag_name().name()
                ))
            })
        })
        .transpose()
}

fn optional_f64(node: Node, key: &str) -> Result<Option<f64>> {
    match optional_attr::<f64>(node, key)? {
        Some(v) if !v.is_finite() => Err(IoError::InvalidData(format!(
            "non-finite value for attribute '{key}'"
        ))),
        other => Ok(other),
    }
}

fn required_attr<T: std::str::FromStr>(node: Node, key: &str) -> Result<T> {
    optional_attr(node, key)?.ok_or_else(|| {
        IoError::InvalidData(format!(
            "<{}> is missing attribute '{key}'",
            node.tag_name().name()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONVERGED: &str = r#"<?xml version="1.0"?>
<evaluationResult converged="true" compliance="2.5" iterations="42" residual="1e-9">
  <nodeResult type="mechDisplacement">
    <node id="1" x="0" y="0" z="0"/>
    <node id="2" x="1e-6" y="-2.5e-6" z="0"/>
  </nodeResult>
  <elemResult type="physicalPseudoDensity">
    <elem id="1" value="0.3"/>
  </elemResult>
  <elemResult type="mechStress">
    <elem id="1" value="12500000.0"/>
  </elemResult>
</evaluationResult>"#;

    #[test]
    fn parses_converged_result() {
        let raw = parse_evaluation_result(CONVERGED).expect("result should parse");
        assert!(raw.converged);
        assert_eq!(raw.compliance, Some(2.5));
        assert_eq!(raw.iterations, 42);
        assert_eq!(raw.displacements.len(), 2);
        assert_eq!(raw.displacements[&2], [1e-6, -2.5e-6, 0.0]);
        // pseudo density block must not leak into stresses
        assert_eq!(raw.stresses.len(), 1);
        assert_eq!(raw.stresses[&1], 12.5e6);
    }

    #[test]
    fn non_converged_result_may_be_empty() {
        let raw = parse_evaluation_result(r#"<evaluationResult converged="false" iterations="5000"/>"#)
            .expect("non-converged result should parse");
        assert!(!raw.converged);
        assert_eq!(raw.iterations, 5000);
        assert!(raw.compliance.is_none());
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(matches!(
            parse_evaluation_result("<evaluationResult converged=\"true\">"),
            Err(IoError::Xml(_))
        ));
        assert!(matches!(
            parse_evaluation_result("<result converged=\"true\"/>"),
            Err(IoError::InvalidData(_))
        ));
        assert!(matches!(
            parse_evaluation_result(
                "<evaluationResult converged=\"true\"><nodeResult type=\"mechDisplacement\"><node id=\"1\" x=\"a\" y=\"0\" z=\"0\"/></nodeResult></evaluationResult>"
            ),
            Err(IoError::Parse(_))
        ));
        assert!(matches!(
            parse_evaluation_result("<evaluationResult converged=\"true\"/>"),
            Err(IoError::InvalidData(_))
        ));
    }

    #[test]
    fn missing_file_is_reported() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let err = read_evaluation_result(tmp.path().join("nope.xml")).expect_err("must fail");
        assert!(matches!(err, IoError::FileNotFound(_)));
    }
}
