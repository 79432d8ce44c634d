//! Error types for topo-io

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IoError>;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<quick_xml::Error> for IoError {
    fn from(err: quick_xml::Error) -> Self {
        IoError::Xml(err.to_string())
    }
}

impl From<roxmltree::Error> for IoError {
    fn from(err: roxmltree::Error) -> Self {
        IoError::Xml(err.to_string())
    }
}
