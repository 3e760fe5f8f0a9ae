//! Error types for the appgraph core library.

/// Top-level error enum for the linker.
///
/// `MissingInventory`, `InvalidInput` and `Json` are returned by
/// [`crate::linker::assembler::assemble_json`] and the `from_json`
/// constructors. `Assembler::assemble` itself is infallible: the per-file
/// variants are raised inside worker closures, logged, and turned into gap
/// counters.
#[derive(Debug, thiserror::Error)]
pub enum LinkerError {
    #[error("Source inventory is missing")]
    MissingInventory,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Malformed detail in {path}: {reason}")]
    MalformedDetail { path: String, reason: String },

    #[error("Invalid pattern: {0}")]
    Pattern(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LinkerError {
    pub fn malformed(path: &str, reason: impl Into<String>) -> Self {
        LinkerError::MalformedDetail {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// A document whose top level should have been a JSON object.
    pub fn not_an_object(what: &str, value: &serde_json::Value) -> Self {
        let found = match value {
            serde_json::Value::Null => "null",
            serde_json::Value::Bool(_) => "a boolean",
            serde_json::Value::Number(_) => "a number",
            serde_json::Value::String(_) => "a string",
            serde_json::Value::Array(_) => "an array",
            serde_json::Value::Object(_) => "an object",
        };
        LinkerError::InvalidInput(format!("{what} must be a JSON object, found {found}"))
    }
}

#[cfg(feature = "python")]
impl From<LinkerError> for pyo3::PyErr {
    fn from(err: LinkerError) -> pyo3::PyErr {
        use pyo3::exceptions::{PyIOError, PyValueError};
        match &err {
            LinkerError::Io(_) => PyIOError::new_err(err.to_string()),
            _ => PyValueError::new_err(err.to_string()),
        }
    }
}

pub type LinkerResult<T> = Result<T, LinkerError>;
