use std::fmt;

/// Result type for flowql operations
pub type Result<T> = std::result::Result<T, FlowQlError>;

/// Main error type for the flowql library
#[derive(Debug, Clone, PartialEq)]
pub enum FlowQlError {
    /// Invalid dimensions for operations
    DimensionMismatch {
        expected: String,
        actual: String,
    },

    /// Invalid parameter value
    InvalidParameter {
        name: String,
        reason: String,
    },

    /// IO errors (file operations)
    IoError(String),

    /// Serialization/deserialization errors
    SerializationError(String),

    /// Training error
    TrainingError(String),

    /// A loss became NaN or infinite during a learning phase
    DivergedLoss {
        stage: String,
        value: f32,
    },

    /// An action component fell outside the environment's bounds
    ActionOutOfRange {
        value: f32,
        low: f32,
        high: f32,
    },

    /// Consumed more transitions than the buffer holds
    BufferUnderflow {
        requested: usize,
        available: usize,
    },

    /// No environment registered under this name
    UnknownEnvironment(String),
}

impl fmt::Display for FlowQlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowQlError::DimensionMismatch { expected, actual } => {
                write!(f, "Dimension mismatch: expected {}, got {}", expected, actual)
            }
            FlowQlError::InvalidParameter { name, reason } => {
                write!(f, "Invalid parameter '{}': {}", name, reason)
            }
            FlowQlError::IoError(msg) => write!(f, "IO error: {}", msg),
            FlowQlError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            FlowQlError::TrainingError(msg) => write!(f, "Training error: {}", msg),
            FlowQlError::DivergedLoss { stage, value } => {
                write!(f, "Diverged loss in {}: {}", stage, value)
            }
            FlowQlError::ActionOutOfRange { value, low, high } => {
                write!(f, "Action {} outside of [{}, {}]", value, low, high)
            }
            FlowQlError::BufferUnderflow { requested, available } => {
                write!(
                    f,
                    "Buffer underflow: requested {} transitions, {} available",
                    requested, available
                )
            }
            FlowQlError::UnknownEnvironment(name) => write!(f, "Unknown environment: {}", name),
        }
    }
}

impl std::error::Error for FlowQlError {}

// Conversion from std::io::Error
impl From<std::io::Error> for FlowQlError {
    fn from(err: std::io::Error) -> Self {
        FlowQlError::IoError(err.to_string())
    }
}

// Conversion from bincode::Error
impl From<bincode::Error> for FlowQlError {
    fn from(err: bincode::Error) -> Self {
        FlowQlError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for FlowQlError {
    fn from(err: serde_json::Error) -> Self {
        FlowQlError::SerializationError(err.to_string())
    }
}

// Helper functions for common error patterns
impl FlowQlError {
    pub fn dimension_mismatch<S: Into<String>>(expected: S, actual: S) -> Self {
        FlowQlError::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn invalid_parameter<S: Into<String>>(name: S, reason: S) -> Self {
        FlowQlError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Returns `DivergedLoss` when `value` is NaN or infinite.
    pub fn ensure_finite(stage: &str, value: f32) -> Result<f32> {
        if value.is_finite() {
            Ok(value)
        } else {
            Err(FlowQlError::DivergedLoss {
                stage: stage.to_string(),
                value,
            })
        }
    }
}
