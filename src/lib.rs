//! On-device AI trivia opponent.
//!
//! The pipeline that lets a small local language model play trivia:
//! - model catalog and artifact storage (llm/model_registry, llm/model_manager)
//! - resumable single-flight downloads (llm/download)
//! - the inference runtime seam and its llama.cpp backend (llm/runtime, llm/local_state)
//! - prompt building and answer parsing (llm/prompts_local, llm/answer)
//! - the opponent state machine tying them together (llm/opponent)
//! - the trivia question source the opponent plays against (trivia/)

pub mod config;
pub mod error;
pub mod llm;
pub mod trivia;

pub use config::OpponentConfig;
pub use error::OpponentError;
pub use llm::opponent::{LoadState, OpponentAnswer, OpponentController, OpponentSnapshot};

/// Initialise logging from `RUST_LOG`, defaulting to `info`. Safe to call twice.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
