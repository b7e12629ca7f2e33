//! llama.cpp-backed inference runtime.
//!
//! The model is held via `Arc<LlamaModel>`. Each generation creates a fresh
//! context (LlamaContext is !Send, so it lives entirely inside spawn_blocking).
//! Cancellation is a per-generation flag checked between decoded tokens (see
//! `DecodeGate`).

use super::prompts_local::end_of_answer;
use super::runtime::{DecodeGate, GenerationParams, InferenceRuntime};
use crate::error::OpponentError;
use async_trait::async_trait;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::LlamaModel;
use llama_cpp_2::sampling::LlamaSampler;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// Process-wide llama.cpp backend. `LlamaBackend::init` may only succeed once.
struct SharedBackend(LlamaBackend);

// Safety: LlamaBackend is a zero-sized init proof token. It holds no data and
// is never mutated after init.
unsafe impl Send for SharedBackend {}
unsafe impl Sync for SharedBackend {}

static BACKEND: OnceLock<Result<SharedBackend, String>> = OnceLock::new();

fn backend() -> Result<&'static SharedBackend, OpponentError> {
    BACKEND
        .get_or_init(|| {
            LlamaBackend::init()
                .map(SharedBackend)
                .map_err(|e| format!("{:?}", e))
        })
        .as_ref()
        .map_err(|e| OpponentError::RuntimeUnavailable(e.clone()))
}

struct LoadedModel {
    inner: Arc<LlamaModel>,
    context_length: u32,
}

/// One live inference handle.
pub struct LocalLlmState {
    backend: &'static SharedBackend,
    model: Mutex<Option<LoadedModel>>,
    gate: DecodeGate,
}

impl LocalLlmState {
    pub fn new() -> Result<Self, OpponentError> {
        Ok(Self {
            backend: backend()?,
            model: Mutex::new(None),
            gate: DecodeGate::default(),
        })
    }

    fn loaded(&self) -> Option<(Arc<LlamaModel>, u32)> {
        self.model
            .lock()
            .ok()
            .and_then(|guard| {
                guard
                    .as_ref()
                    .map(|m| (m.inner.clone(), m.context_length))
            })
    }
}

#[async_trait]
impl InferenceRuntime for LocalLlmState {
    async fn load_model(&self, path: &Path, context_length: u32) -> Result<(), OpponentError> {
        self.cleanup();

        let path = path.to_path_buf();
        let backend = self.backend;
        let model = tokio::task::spawn_blocking(move || {
            let params = LlamaModelParams::default();
            LlamaModel::load_from_file(&backend.0, &path, &params)
                .map_err(|e| OpponentError::ModelLoadFailed(format!("{:?}", e)))
        })
        .await
        .map_err(|e| OpponentError::ModelLoadFailed(format!("Task join error: {}", e)))??;

        let mut guard = self
            .model
            .lock()
            .map_err(|_| OpponentError::ModelLoadFailed("model lock poisoned".to_string()))?;
        *guard = Some(LoadedModel {
            inner: Arc::new(model),
            context_length,
        });

        log::info!("[LOCAL_LLM] Model loaded (n_ctx={})", context_length);
        Ok(())
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, OpponentError> {
        let (model, context_length) = self.loaded().ok_or(OpponentError::ModelNotLoaded)?;

        let ticket = self.gate.begin();
        let prompt = prompt.to_string();
        let params = *params;
        let backend = self.backend;

        tokio::task::spawn_blocking(move || {
            ticket.run(|cancelled| {
                generate_sync(&backend.0, &model, &prompt, &params, context_length, cancelled)
            })
        })
        .await
        .map_err(|e| OpponentError::GenerationFailed(format!("Generation task failed: {}", e)))?
    }

    fn cancel(&self) {
        self.gate.cancel();
    }

    fn cleanup(&self) {
        self.cancel();
        if let Ok(mut guard) = self.model.lock() {
            if guard.take().is_some() {
                log::info!("[LOCAL_LLM] Model unloaded");
            }
        }
    }
}

impl Drop for LocalLlmState {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Synchronous generation. Runs inside spawn_blocking.
fn generate_sync(
    backend: &LlamaBackend,
    model: &LlamaModel,
    prompt: &str,
    params: &GenerationParams,
    context_length: u32,
    cancelled: &AtomicBool,
) -> Result<String, OpponentError> {
    let fail = |what: &str, e: &dyn std::fmt::Debug| {
        OpponentError::GenerationFailed(format!("{}: {:?}", what, e))
    };
    let start = std::time::Instant::now();

    let ctx_params = LlamaContextParams::default()
        .with_n_ctx(NonZeroU32::new(context_length))
        .with_n_batch(context_length);

    let mut ctx = model
        .new_context(backend, ctx_params)
        .map_err(|e| fail("Context creation failed", &e))?;

    let tokens = model
        .str_to_token(prompt, llama_cpp_2::model::AddBos::Always)
        .map_err(|e| fail("Tokenization failed", &e))?;

    let prompt_len = tokens.len();
    if prompt_len >= context_length as usize {
        return Err(OpponentError::GenerationFailed(format!(
            "Prompt of {} tokens does not fit a {}-token context",
            prompt_len, context_length
        )));
    }
    log::debug!("[LOCAL_LLM] Prompt: {} tokens", prompt_len);

    let mut batch = LlamaBatch::new(context_length as usize, 1);
    for (pos, &token) in tokens.iter().enumerate() {
        let is_last = pos == tokens.len() - 1;
        batch
            .add(token, pos as i32, &[0], is_last)
            .map_err(|e| fail("Batch add failed", &e))?;
    }

    ctx.decode(&mut batch)
        .map_err(|e| fail("Prompt decode failed", &e))?;

    let mut sampler = LlamaSampler::chain_simple([
        LlamaSampler::temp(params.temperature),
        LlamaSampler::top_k(40),
        LlamaSampler::top_p(params.top_p, 1),
        LlamaSampler::dist(rand::random::<u32>()),
    ]);

    let budget = params
        .max_tokens
        .min(context_length.saturating_sub(prompt_len as u32));
    let mut output = String::new();
    let mut n_decoded = 0u32;
    let eos = model.token_eos();
    let mut decoder = encoding_rs::UTF_8.new_decoder();

    for _ in 0..budget {
        if cancelled.load(Ordering::SeqCst) {
            log::info!("[LOCAL_LLM] Generation cancelled after {} tokens", n_decoded);
            return Err(OpponentError::Cancelled);
        }

        let token = sampler.sample(&ctx, -1);
        sampler.accept(token);

        if token == eos {
            break;
        }

        let piece = model
            .token_to_piece(token, &mut decoder, false, None)
            .unwrap_or_default();
        output.push_str(&piece);
        if let Some(end) = end_of_answer(&output) {
            output.truncate(end);
            n_decoded += 1;
            break;
        }

        batch.clear();
        batch
            .add(token, (prompt_len + n_decoded as usize) as i32, &[0], true)
            .map_err(|e| fail("Batch add failed", &e))?;
        ctx.decode(&mut batch)
            .map_err(|e| fail("Decode failed", &e))?;
        n_decoded += 1;
    }

    log::info!(
        "[LOCAL_LLM] Generated {} tokens in {}ms",
        n_decoded,
        start.elapsed().as_millis()
    );

    if output.trim().is_empty() {
        return Err(OpponentError::GenerationFailed(
            "model produced no output".to_string(),
        ));
    }
    Ok(output)
}
