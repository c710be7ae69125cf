use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by schema and instance construction.
///
/// Per-value mutators (`Item::set_double`, `Item::set_discrete_index`, ...)
/// deliberately return `bool` instead: a rejected write is an expected
/// outcome that leaves the prior value untouched, not an error to bubble.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("duplicate definition type: {0}")]
    DuplicateDefinition(String),

    #[error("unknown definition: {0}")]
    UnknownDefinition(String),

    #[error("duplicate item '{item}' in definition '{definition}'")]
    DuplicateItem { definition: String, item: String },

    #[error("definition '{0}' is abstract and cannot be instantiated")]
    AbstractInstantiation(String),

    #[error("duplicate attribute name: {0}")]
    DuplicateAttribute(String),

    #[error("duplicate attribute id: {0}")]
    DuplicateAttributeId(u64),

    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("association conflict: entity '{entity}' already holds an attribute of the unique family of '{definition}'")]
    AssociationConflict { entity: String, definition: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
}

/// Severity of a reader diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// One accumulated diagnostic line from the XML reader.
///
/// The reader never fails hard mid-document; it collects these and keeps
/// going, leaving whatever it could not resolve in its default state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diag {
    pub severity: Severity,
    pub message: String,
}

impl Diag {
    pub fn error(message: impl Into<String>) -> Self {
        Diag {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Diag {
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)
    }
}
