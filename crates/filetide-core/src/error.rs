use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type shared by carriers, steps and the executor.
///
/// Every failure a pipeline can surface maps to exactly one variant here so
/// the serving layer can translate kinds to HTTP statuses without inspecting
/// messages.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed step arguments.
    #[error("invalid arguments: {message}")]
    InvalidArguments { message: String },
    /// Step type name has no registered factory.
    #[error("unknown pipeline step `{name}`")]
    UnknownStep { name: String },
    /// Illegal pipeline composition (fan-out not at the end, empty pipeline).
    #[error("invalid pipeline shape: {message}")]
    PipelineShape { message: String },
    /// ZIP member, directory or upstream resource absent.
    #[error("not found: {resource} `{id}`")]
    NotFound { resource: &'static str, id: String },
    /// I/O failure against a source URL after bounded retries.
    #[error("network failure: {message}")]
    Network { message: String },
    /// Malformed container or image data.
    #[error("malformed {format} data: {message}")]
    Format {
        format: &'static str,
        message: String,
    },
    /// Key exchange or AEAD verification failure.
    #[error("decryption failed: {message}")]
    CryptoAuth { message: String },
    /// Operation the carrier backing cannot provide (seek on a queue).
    #[error("unsupported: {message}")]
    Unsupported { message: String },
    /// Input exceeds a configured buffering cap.
    #[error("resource limit exceeded: {message}")]
    ResourceLimit { message: String },
    /// Pipeline torn down before completion.
    #[error("pipeline cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
        }
    }

    pub fn unknown_step(name: impl Into<String>) -> Self {
        Self::UnknownStep { name: name.into() }
    }

    pub fn pipeline_shape(message: impl Into<String>) -> Self {
        Self::PipelineShape {
            message: message.into(),
        }
    }

    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn format(format: &'static str, message: impl Into<String>) -> Self {
        Self::Format {
            format,
            message: message.into(),
        }
    }

    pub fn crypto_auth(message: impl Into<String>) -> Self {
        Self::CryptoAuth {
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    pub fn resource_limit(message: impl Into<String>) -> Self {
        Self::ResourceLimit {
            message: message.into(),
        }
    }

    /// Whether `validate_crypt4gh` may fold this failure into its JSON
    /// verdict instead of failing the pipeline.
    pub fn is_validation_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Format { .. } | Self::CryptoAuth { .. } | Self::Network { .. }
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Self::Network {
            message: value.to_string(),
        }
    }
}
