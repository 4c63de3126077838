use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Needs user correction; never retried.
    Input,
    /// Generation is unusable for the whole session.
    Configuration,
    /// Service-side or transport failure; the user may retry.
    Upstream,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Configuration => "configuration",
            Self::Upstream => "upstream",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("Please provide an intent description")]
    MissingIntent,
    #[error("Please draw something on the canvas first")]
    NothingToExport,
    #[error("{0}")]
    Configuration(String),
    #[error("Generation service unreachable: {0}")]
    Unreachable(String),
    #[error("Generation service rejected the credentials: {0}")]
    Authentication(String),
    #[error("Model {0} not found")]
    ModelNotFound(String),
    #[error("{message}")]
    Upstream {
        message: String,
        details: Option<String>,
    },
    #[error("Model returned invalid output: {0}")]
    InvalidOutput(String),
    #[error("Failed to produce valid output after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
    #[error("No image returned")]
    NoImage,
    #[error("Could not extract image data")]
    ImageData,
    #[error("Canvas operation failed: {0}")]
    Canvas(String),
}

impl GenerationError {
    pub fn upstream(message: impl Into<String>, details: Option<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            details,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingIntent | Self::NothingToExport | Self::Canvas(_) => ErrorCategory::Input,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Unreachable(_)
            | Self::Authentication(_)
            | Self::ModelNotFound(_)
            | Self::Upstream { .. }
            | Self::InvalidOutput(_)
            | Self::RetriesExhausted { .. }
            | Self::NoImage
            | Self::ImageData => ErrorCategory::Upstream,
        }
    }

    /// Status code the relay endpoint answers with for this error.
    pub fn relay_status(&self) -> u16 {
        match self {
            Self::MissingIntent | Self::NothingToExport | Self::ModelNotFound(_) => 400,
            Self::Authentication(_) => 401,
            _ => 500,
        }
    }

    pub fn details(&self) -> Option<&str> {
        match self {
            Self::Upstream { details, .. } => details.as_deref(),
            _ => None,
        }
    }

    pub fn is_retryable_output(&self) -> bool {
        matches!(self, Self::InvalidOutput(_))
    }
}

/// Transport failures are classified by walking the error chain for
/// `reqwest::Error`.
pub(crate) fn classify_transport(err: anyhow::Error) -> GenerationError {
    let transport = err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| {
                reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request()
            })
            .unwrap_or(false)
    });
    let message = crate::error_chain_text(&err, 512);
    if transport {
        GenerationError::Unreachable(message)
    } else {
        GenerationError::upstream("Failed to call generation service", Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::{classify_transport, ErrorCategory, GenerationError};

    #[test]
    fn categories_follow_taxonomy() {
        assert_eq!(GenerationError::MissingIntent.category(), ErrorCategory::Input);
        assert_eq!(GenerationError::NothingToExport.category(), ErrorCategory::Input);
        assert_eq!(
            GenerationError::Configuration("no key".to_string()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(GenerationError::NoImage.category(), ErrorCategory::Upstream);
        assert_eq!(
            GenerationError::RetriesExhausted {
                attempts: 3,
                last: "x".to_string()
            }
            .category(),
            ErrorCategory::Upstream
        );
    }

    #[test]
    fn relay_status_codes() {
        assert_eq!(GenerationError::MissingIntent.relay_status(), 400);
        assert_eq!(
            GenerationError::Authentication("bad key".to_string()).relay_status(),
            401
        );
        assert_eq!(
            GenerationError::Configuration("no key".to_string()).relay_status(),
            500
        );
        assert_eq!(
            GenerationError::upstream("boom", Some("trace".to_string())).relay_status(),
            500
        );
    }

    #[test]
    fn messages_are_human_readable() {
        assert_eq!(
            GenerationError::RetriesExhausted {
                attempts: 3,
                last: "unbalanced root tags".to_string()
            }
            .to_string(),
            "Failed to produce valid output after 3 attempts: unbalanced root tags"
        );
        assert_eq!(GenerationError::NoImage.to_string(), "No image returned");
        assert_eq!(
            GenerationError::upstream("boom", Some("trace".to_string())).details(),
            Some("trace")
        );
    }

    #[test]
    fn non_transport_errors_become_upstream() {
        let err = classify_transport(anyhow::anyhow!("body read failed"));
        assert!(matches!(err, GenerationError::Upstream { .. }));
        assert_eq!(err.details(), Some("body read failed"));
    }
}
