//! Unified error handling for MicroForge
//!
//! This module provides a centralized error type for every failure the
//! allocator core can report: arena exhaustion, allocation-protocol misuse,
//! model decoding problems and planner overflow. It implements error
//! categorization so callers can distinguish usage errors (fix the call
//! sequence or the model) from resource errors (grow the arena) and bugs.

use std::fmt;

/// Unified error type for MicroForge
///
/// All failures propagate to the caller through this enum; nothing is
/// retried or recovered locally.
#[derive(Debug, thiserror::Error)]
pub enum MicroForgeError {
    // ========== Arena Errors ==========
    /// The arena cannot satisfy an allocation request
    #[error("arena exhausted: {needed} bytes required, {available} available")]
    ArenaExhausted { needed: usize, available: usize },

    /// Planned activation footprint exceeds the remaining arena slack
    #[error("arena too small for planned buffers: needed {needed}, available {available}")]
    PlannerOverflow { needed: usize, available: usize },

    // ========== Protocol Errors ==========
    /// Allocation operations called out of order
    #[error("allocation protocol misuse: {0}")]
    ProtocolMisuse(String),

    // ========== Model Errors ==========
    /// Model shape the core refuses to handle (e.g. multiple subgraphs)
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    /// Model is internally contradictory (bad indices, count mismatches)
    #[error("inconsistent model: {0}")]
    InconsistentModel(String),

    /// Serialized model bytes failed to decode
    #[error("invalid model file: {0}")]
    InvalidModelFile(String),

    /// Operator option blob rejected by its parser
    #[error("failed to parse operator options: {0}")]
    OptionParseFailed(String),

    // ========== Planner Errors ==========
    /// Derived tensor lifetime has exactly one endpoint
    #[error(
        "tensor {tensor} has an invalid lifetime: first_created {first:?}, last_used {last:?}"
    )]
    InvalidLifetime {
        tensor: usize,
        first: Option<usize>,
        last: Option<usize>,
    },

    // ========== I/O Errors ==========
    /// File or byte-stream I/O error while decoding a model
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MicroForgeError {
    /// Categorize the error for handling decisions
    ///
    /// # Examples
    /// ```ignore
    /// match error.category() {
    ///     ErrorCategory::Resource => println!("Grow the arena"),
    ///     ErrorCategory::Usage => println!("Fix the call sequence"),
    ///     ErrorCategory::Model => println!("Fix the model file"),
    ///     ErrorCategory::Internal => println!("Report this bug"),
    /// }
    /// ```
    pub fn category(&self) -> ErrorCategory {
        match self {
            MicroForgeError::ArenaExhausted { .. } | MicroForgeError::PlannerOverflow { .. } => {
                ErrorCategory::Resource
            }

            MicroForgeError::ProtocolMisuse(_) => ErrorCategory::Usage,

            MicroForgeError::UnsupportedModel(_)
            | MicroForgeError::InconsistentModel(_)
            | MicroForgeError::InvalidModelFile(_)
            | MicroForgeError::OptionParseFailed(_)
            | MicroForgeError::Io(_) => ErrorCategory::Model,

            // A broken lifetime derivation indicates either a planner bug or
            // a graph no planner can place.
            MicroForgeError::InvalidLifetime { .. } => ErrorCategory::Internal,
        }
    }

    /// Check if this is a resource error (a larger arena may succeed)
    pub fn is_resource_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Resource)
    }

    /// Check if this is a usage error (caller broke the begin/finish protocol)
    pub fn is_usage_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Usage)
    }

    /// Check if this is a model error (the serialized input is at fault)
    pub fn is_model_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Model)
    }
}

/// Error category for handling decisions
///
/// - Resource: the arena is too small for the request
/// - Usage: operations were called out of protocol order
/// - Model: the serialized model is malformed or unsupported
/// - Internal: indicates a bug
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Arena capacity error - retry with a larger arena
    Resource,
    /// Protocol misuse - fix the call sequence
    Usage,
    /// Model error - fix the model file
    Model,
    /// Internal error - indicates a bug
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Resource => write!(f, "Resource"),
            ErrorCategory::Usage => write!(f, "Usage"),
            ErrorCategory::Model => write!(f, "Model"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

/// Helper type alias for Results using MicroForgeError
pub type ForgeResult<T> = std::result::Result<T, MicroForgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            MicroForgeError::ArenaExhausted {
                needed: 128,
                available: 64
            }
            .category(),
            ErrorCategory::Resource
        );
        assert_eq!(
            MicroForgeError::PlannerOverflow {
                needed: 1000,
                available: 500
            }
            .category(),
            ErrorCategory::Resource
        );
        assert_eq!(
            MicroForgeError::ProtocolMisuse("test".to_string()).category(),
            ErrorCategory::Usage
        );
        assert_eq!(
            MicroForgeError::UnsupportedModel("test".to_string()).category(),
            ErrorCategory::Model
        );
        assert_eq!(
            MicroForgeError::InvalidLifetime {
                tensor: 3,
                first: Some(1),
                last: None
            }
            .category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_category_predicates() {
        let err = MicroForgeError::ArenaExhausted {
            needed: 1,
            available: 0,
        };
        assert!(err.is_resource_error());
        assert!(!err.is_usage_error());

        let err = MicroForgeError::ProtocolMisuse("finish before begin".to_string());
        assert!(err.is_usage_error());
        assert!(!err.is_model_error());

        let err = MicroForgeError::InconsistentModel("bad buffer index".to_string());
        assert!(err.is_model_error());
    }

    #[test]
    fn test_error_display() {
        let err = MicroForgeError::PlannerOverflow {
            needed: 1008,
            available: 500,
        };
        assert_eq!(
            err.to_string(),
            "arena too small for planned buffers: needed 1008, available 500"
        );

        let err = MicroForgeError::InvalidLifetime {
            tensor: 2,
            first: None,
            last: Some(1),
        };
        assert!(err.to_string().contains("tensor 2"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated");
        let err: MicroForgeError = io_err.into();
        assert!(matches!(err, MicroForgeError::Io(_)));
        assert_eq!(err.category(), ErrorCategory::Model);
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::Resource.to_string(), "Resource");
        assert_eq!(ErrorCategory::Usage.to_string(), "Usage");
        assert_eq!(ErrorCategory::Model.to_string(), "Model");
        assert_eq!(ErrorCategory::Internal.to_string(), "Internal");
    }
}
