//! Opponent configuration: storage location, network and pacing knobs.
//!
//! Generation parameters are fixed for short, fast trivia answers and are
//! intentionally not read from the environment.

use crate::llm::answer::ThinkingTime;
use crate::llm::runtime::GenerationParams;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the models directory.
pub const MODELS_DIR_ENV: &str = "TRIVIA_MODELS_DIR";
/// Environment variable naming the model the host selects on start.
pub const MODEL_ID_ENV: &str = "TRIVIA_MODEL_ID";

#[derive(Debug, Clone)]
pub struct OpponentConfig {
    /// Where downloaded model artifacts live.
    pub models_dir: PathBuf,
    /// Catalog id of the model to select on start, if any.
    pub model_id: Option<String>,
    pub connect_timeout: Duration,
    /// Minimum gap between two progress reports of one transfer.
    pub progress_interval: Duration,
    pub thinking_time: ThinkingTime,
    pub generation: GenerationParams,
}

impl Default for OpponentConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            model_id: None,
            connect_timeout: Duration::from_secs(30),
            progress_interval: Duration::from_millis(100),
            thinking_time: ThinkingTime::default(),
            generation: GenerationParams::default(),
        }
    }
}

impl OpponentConfig {
    /// Load config from the process environment (and an optional `.env`).
    pub fn from_env() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            log::debug!("[CONFIG] Loaded environment from {}", path.display());
        }

        let mut config = Self::default();
        if let Ok(dir) = std::env::var(MODELS_DIR_ENV) {
            if !dir.trim().is_empty() {
                config.models_dir = PathBuf::from(dir);
            }
        }
        config.model_id = std::env::var(MODEL_ID_ENV)
            .ok()
            .filter(|id| !id.trim().is_empty());

        log::info!("[CONFIG] Models directory: {}", config.models_dir.display());
        config
    }

    pub fn with_models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.models_dir = dir.into();
        self
    }
}

/// Base directory for downloaded models.
///
///   macOS:   ~/Library/Application Support/think-fast-trivia/models/
///   Linux:   ~/.config/think-fast-trivia/models/
///   Windows: %APPDATA%/think-fast-trivia/models/
pub fn default_models_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("think-fast-trivia")
        .join("models")
}
