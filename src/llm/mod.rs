pub mod answer;
pub mod download;
#[cfg(feature = "local-llm")]
pub mod local_state;
pub mod model_manager;
pub mod model_registry;
pub mod opponent;
pub mod prompts_local;
pub mod runtime;
