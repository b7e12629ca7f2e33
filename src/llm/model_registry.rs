//! Known opponent models: static registry of selectable GGUF models.
//!
//! Each entry carries the download URL, on-disk filename, context window and
//! display metadata. Small (< 5B) instruction-tuned models only, so an answer
//! comes back well inside a round's time limit.

use std::borrow::Cow;

/// Metadata for a selectable model. Immutable once defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDefinition {
    /// Stable key, no spaces (e.g., "qwen-0.5b")
    pub id: Cow<'static, str>,
    pub name: Cow<'static, str>,
    pub url: Cow<'static, str>,
    /// Filename on disk; also drives prompt-family detection
    pub filename: Cow<'static, str>,
    /// Token window passed to the runtime at load time
    pub context_length: u32,
    pub description: Cow<'static, str>,
    /// Approximate download size shown before the artifact exists
    pub approx_size: Cow<'static, str>,
    /// Optional SHA-256 (hex) checked before load
    pub sha256: Option<Cow<'static, str>>,
}

impl ModelDefinition {
    /// Build a definition outside the static catalog (custom mirrors, tests).
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
        filename: impl Into<String>,
        context_length: u32,
    ) -> Self {
        Self {
            id: Cow::Owned(id.into()),
            name: Cow::Owned(name.into()),
            url: Cow::Owned(url.into()),
            filename: Cow::Owned(filename.into()),
            context_length,
            description: Cow::Borrowed(""),
            approx_size: Cow::Borrowed("Unknown"),
            sha256: None,
        }
    }

    pub fn with_sha256(mut self, hash: impl Into<String>) -> Self {
        self.sha256 = Some(Cow::Owned(hash.into().to_lowercase()));
        self
    }
}

/// All models the opponent can run.
///
/// Qwen 0.5B comes first: it answers fastest on phones and small laptops.
/// All use Q4_K_M quantization with a 256-token window, which is plenty for
/// one question and four options.
static MODELS: &[ModelDefinition] = &[
    ModelDefinition {
        id: Cow::Borrowed("qwen-0.5b"),
        name: Cow::Borrowed("Qwen 2.5 0.5B"),
        url: Cow::Borrowed("https://huggingface.co/Qwen/Qwen2.5-0.5B-Instruct-GGUF/resolve/main/qwen2.5-0.5b-instruct-q4_k_m.gguf"),
        filename: Cow::Borrowed("qwen2.5-0.5b-instruct-q4_k_m.gguf"),
        context_length: 256,
        description: Cow::Borrowed("Ultra-fast 0.5B model - Lightning quick responses"),
        approx_size: Cow::Borrowed("0.4 GB"),
        sha256: None,
    },
    ModelDefinition {
        id: Cow::Borrowed("tinyllama"),
        name: Cow::Borrowed("TinyLlama 1.1B"),
        url: Cow::Borrowed("https://huggingface.co/TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF/resolve/main/tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf"),
        filename: Cow::Borrowed("tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf"),
        context_length: 256,
        description: Cow::Borrowed("Fast 1.1B model"),
        approx_size: Cow::Borrowed("0.7 GB"),
        sha256: None,
    },
    ModelDefinition {
        id: Cow::Borrowed("qwen2.5-3b"),
        name: Cow::Borrowed("Qwen 2.5 3B"),
        url: Cow::Borrowed("https://huggingface.co/Qwen/Qwen2.5-3B-Instruct-GGUF/resolve/main/qwen2.5-3b-instruct-q4_k_m.gguf"),
        filename: Cow::Borrowed("qwen2.5-3b-instruct-q4_k_m.gguf"),
        context_length: 256,
        description: Cow::Borrowed("Balanced 3B model"),
        approx_size: Cow::Borrowed("2.0 GB"),
        sha256: None,
    },
];

/// Return all available models.
pub fn available_models() -> &'static [ModelDefinition] {
    MODELS
}

/// The default recommended model.
pub fn default_model() -> &'static ModelDefinition {
    &MODELS[0] // qwen-0.5b
}

/// Look up a model by ID.
pub fn find_model(id: &str) -> Option<&'static ModelDefinition> {
    MODELS.iter().find(|m| m.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_three_models() {
        assert_eq!(available_models().len(), 3);
    }

    #[test]
    fn default_model_is_smallest_qwen() {
        let m = default_model();
        assert_eq!(m.id, "qwen-0.5b");
        assert_eq!(m.context_length, 256);
    }

    #[test]
    fn find_model_by_id() {
        assert!(find_model("tinyllama").is_some());
        assert!(find_model("qwen2.5-3b").is_some());
        assert!(find_model("nonexistent").is_none());
    }

    #[test]
    fn urls_point_to_huggingface() {
        for m in available_models() {
            assert!(m.url.starts_with("https://huggingface.co/"));
            assert!(m.url.ends_with(&*m.filename));
        }
    }

    #[test]
    fn ids_are_unique() {
        let mut ids: Vec<_> = available_models().iter().map(|m| &*m.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), available_models().len());
    }

    #[test]
    fn custom_definition_normalizes_hash() {
        let def = ModelDefinition::new("x", "X", "http://h/x.gguf", "x.gguf", 128).with_sha256("ABCD");
        assert_eq!(def.sha256.as_deref(), Some("abcd"));
        assert_eq!(def.approx_size, "Unknown");
    }
}
