//! Inference runtime capability: the seam between the opponent controller
//! and a concrete local backend.
//!
//! A runtime loads one model file, answers one bounded generation request at
//! a time, can be asked to stop, and must be released explicitly before it
//! is replaced.

use crate::error::OpponentError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Sampling parameters for a trivia answer. Fixed, tuned for short replies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7, // some randomness for realistic play
            top_p: 0.9,
            max_tokens: 50, // short answers only
        }
    }
}

#[async_trait]
pub trait InferenceRuntime: Send + Sync {
    /// Load a model file, replacing whatever this runtime held before.
    async fn load_model(&self, path: &Path, context_length: u32) -> Result<(), OpponentError>;

    /// Run one completion. Fails with `ModelNotLoaded` before a successful load.
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, OpponentError>;

    /// Ask an in-flight generation to stop. Cooperative; never blocks.
    fn cancel(&self);

    /// Release the loaded model and any native context.
    fn cleanup(&self);
}

/// Creates a fresh runtime handle. Failure means the backend is unavailable.
pub type RuntimeFactory =
    Arc<dyn Fn() -> Result<Arc<dyn InferenceRuntime>, OpponentError> + Send + Sync>;

/// Factory for the backend compiled into this build.
pub fn default_runtime_factory() -> RuntimeFactory {
    #[cfg(feature = "local-llm")]
    {
        Arc::new(|| -> Result<Arc<dyn InferenceRuntime>, OpponentError> {
            let runtime = super::local_state::LocalLlmState::new()?;
            Ok(Arc::new(runtime) as Arc<dyn InferenceRuntime>)
        })
    }

    #[cfg(not(feature = "local-llm"))]
    {
        Arc::new(|| -> Result<Arc<dyn InferenceRuntime>, OpponentError> {
            Err(OpponentError::RuntimeUnavailable(
                "built without the local-llm feature".to_string(),
            ))
        })
    }
}

/// Cancel flag and decoder ownership for a backend that generates on a
/// blocking thread.
///
/// Every generation gets its own flag, so starting a new one never clears a
/// cancel aimed at the previous one. The decoder lock is taken on the
/// blocking thread, so a cancelled generation that has not yet noticed its
/// flag still finishes before the next one decodes.
#[derive(Default)]
pub struct DecodeGate {
    current: Mutex<Arc<AtomicBool>>,
    decoder: Arc<Mutex<()>>,
}

impl DecodeGate {
    /// Register a new generation. Call on the async side, before spawning.
    pub fn begin(&self) -> DecodeTicket {
        let cancelled = Arc::new(AtomicBool::new(false));
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = cancelled.clone();
        DecodeTicket {
            cancelled,
            decoder: self.decoder.clone(),
        }
    }

    /// Flag the most recent generation.
    pub fn cancel(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .store(true, Ordering::SeqCst);
    }
}

pub struct DecodeTicket {
    cancelled: Arc<AtomicBool>,
    decoder: Arc<Mutex<()>>,
}

impl DecodeTicket {
    /// Blocking. Waits for the decoder, then runs `decode` with this
    /// generation's cancel flag unless it was cancelled while waiting.
    pub fn run<T>(
        self,
        decode: impl FnOnce(&AtomicBool) -> Result<T, OpponentError>,
    ) -> Result<T, OpponentError> {
        let _decoder = self.decoder.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(OpponentError::Cancelled);
        }
        decode(&self.cancelled)
    }
}

/// Chat-turn formatting convention a model expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelFamily {
    TinyLlama,
    Qwen,
    Phi3,
    Gemma,
    /// Unrecognized model; prompted with ChatML like Qwen.
    #[default]
    Default,
}

impl ModelFamily {
    /// Classify a model by its artifact filename.
    ///
    /// Checked in order, so "tinyllama" wins over any later substring.
    pub fn detect(filename: &str) -> Self {
        const MARKERS: [(&str, ModelFamily); 4] = [
            ("tinyllama", ModelFamily::TinyLlama),
            ("qwen", ModelFamily::Qwen),
            ("phi", ModelFamily::Phi3),
            ("gemma", ModelFamily::Gemma),
        ];

        let name = filename.to_lowercase();
        MARKERS
            .iter()
            .find(|(marker, _)| name.contains(marker))
            .map(|(_, family)| *family)
            .unwrap_or(ModelFamily::Default)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::TinyLlama => "tinyllama",
            ModelFamily::Qwen => "qwen",
            ModelFamily::Phi3 => "phi3",
            ModelFamily::Gemma => "gemma",
            ModelFamily::Default => "default",
        }
    }
}
