use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlignmentError {
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON parse error while {context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("invalid config `{field}`: {message}")]
    InvalidConfig {
        field: &'static str,
        message: String,
    },
    /// Raised when an assembled timeline breaks coverage or ordering. This is a
    /// defect in the engine, never a property of the input data.
    #[error("invariant violated in {context}: {message}")]
    InvariantViolation {
        context: &'static str,
        message: String,
    },
    #[error("{context}: {message}")]
    Runtime {
        context: &'static str,
        message: String,
    },
}

impl AlignmentError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn json(context: &'static str, source: serde_json::Error) -> Self {
        Self::Json { context, source }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_config(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            message: message.into(),
        }
    }

    pub(crate) fn invariant(context: &'static str, message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            context,
            message: message.into(),
        }
    }

    pub(crate) fn runtime(context: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Runtime {
            context,
            message: err.to_string(),
        }
    }

    /// True for failures that indicate a bug in the engine rather than bad data.
    pub fn is_defect(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. } | Self::Runtime { .. })
    }
}
