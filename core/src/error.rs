//! Engine error types and utilities

use thiserror::Error;

/// Engine-level error taxonomy
///
/// Each variant maps to one transport outcome at the dispatch boundary:
/// `Configuration` is raised synchronously at registration time and never
/// reaches dispatch; `NotFound` becomes 404; `ParameterBinding` becomes 400;
/// execution failures are carried separately on the report body.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parameter '{name}' is not a valid {type_name}")]
    ParameterBinding {
        name: String,
        type_name: &'static str,
    },

    #[error("Execution failed: {0}")]
    Execution(String),
}

impl EngineError {
    /// HTTP status this error maps to at the dispatch boundary
    pub fn status(&self) -> u16 {
        match self {
            EngineError::Configuration(_) | EngineError::Execution(_) => 500,
            EngineError::NotFound(_) => 404,
            EngineError::ParameterBinding { .. } => 400,
        }
    }
}

/// Engine-level result type
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(EngineError::NotFound("x".to_string()).status(), 404);
        assert_eq!(
            EngineError::ParameterBinding {
                name: "count".to_string(),
                type_name: "integer",
            }
            .status(),
            400
        );
        assert_eq!(EngineError::Execution("boom".to_string()).status(), 500);
    }

    #[test]
    fn test_binding_error_names_parameter_and_type() {
        let err = EngineError::ParameterBinding {
            name: "count".to_string(),
            type_name: "integer",
        };
        let text = err.to_string();
        assert!(text.contains("count"));
        assert!(text.contains("integer"));
    }
}
