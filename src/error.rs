//! Error taxonomy for the AI opponent pipeline.
//!
//! Every failure that crosses the controller boundary is one of these
//! variants. The enum is `Clone` so a single outcome can be handed to all
//! callers attached to the same in-flight operation.

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OpponentError {
    #[error("No AI model selected")]
    NotConfigured,
    #[error("Inference runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    #[error("AI model is not loaded")]
    ModelNotLoaded,
    #[error("Failed to load model: {0}")]
    ModelLoadFailed(String),
    #[error("Generation failed: {0}")]
    GenerationFailed(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("AI opponent is suspended")]
    Suspended,
    #[error("Unknown model: {0}")]
    UnknownModel(String),
}

impl From<std::io::Error> for OpponentError {
    fn from(err: std::io::Error) -> Self {
        OpponentError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for OpponentError {
    fn from(err: reqwest::Error) -> Self {
        OpponentError::Network(err.to_string())
    }
}

impl OpponentError {
    /// Returns a user-friendly error message suitable for display in the UI
    pub fn user_message(&self) -> String {
        match self {
            OpponentError::NotConfigured => {
                "AI model is not configured. Please select a model first.".to_string()
            }
            OpponentError::RuntimeUnavailable(_) => {
                "AI runtime is unavailable. Please restart the app.".to_string()
            }
            OpponentError::ModelNotLoaded => {
                "AI model is not loaded yet. Please wait for it to load or try selecting it again."
                    .to_string()
            }
            OpponentError::ModelLoadFailed(_) => {
                "Failed to load AI model. The model file may be corrupted. Try deleting and re-downloading it."
                    .to_string()
            }
            OpponentError::GenerationFailed(_) => {
                "Failed to generate AI response. Please try again.".to_string()
            }
            OpponentError::Network(_) => {
                "Network error while downloading model. Please check your internet connection and try again."
                    .to_string()
            }
            OpponentError::Io(msg) => format!("Could not access model storage: {}", msg),
            OpponentError::Cancelled => "The AI operation was cancelled.".to_string(),
            OpponentError::Suspended => {
                "The AI opponent is paused while the app is in the background.".to_string()
            }
            OpponentError::UnknownModel(id) => {
                format!("Model '{}' not found. Please select a valid model.", id)
            }
        }
    }

    /// Whether re-invoking the same operation can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OpponentError::Network(_)
                | OpponentError::GenerationFailed(_)
                | OpponentError::Cancelled
                | OpponentError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_failure_suggests_redownload() {
        let msg = OpponentError::ModelLoadFailed("bad magic".into()).user_message();
        assert!(msg.contains("re-downloading"));
    }

    #[test]
    fn network_failure_is_retryable() {
        assert!(OpponentError::Network("HTTP 503".into()).is_retryable());
        assert!(!OpponentError::NotConfigured.is_retryable());
    }

    #[test]
    fn io_error_converts() {
        let err: OpponentError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, OpponentError::Io(ref m) if m.contains("gone")));
    }
}
