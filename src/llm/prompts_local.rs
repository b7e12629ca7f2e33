//! Trivia answer prompts for local models, one chat template per family.
//!
//! These are short and explicit because small models have tight context
//! windows (256 tokens) and follow formatting hints better than prose.

use super::runtime::ModelFamily;

/// System instruction shared by every template.
pub const ANSWER_SYSTEM: &str = "Answer the trivia question promptly, your response should be the number of the answer AND the answer text. No explanations.";

/// Build the full prompt for a question and its presented option order.
///
/// Options are numbered from 1 in exactly the order given; the parser maps
/// a returned number back through the same slice.
pub fn build_answer_prompt(family: ModelFamily, question: &str, options: &[String]) -> String {
    let user = build_answer_user_content(question, options);
    wrap_in_template(family, ANSWER_SYSTEM, &user)
}

/// Build the user turn: question, numbered options, answer cue.
fn build_answer_user_content(question: &str, options: &[String]) -> String {
    let numbered = options
        .iter()
        .enumerate()
        .map(|(i, option)| format!("{}. {}", i + 1, option))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Question: {question}\n\nOptions:\n{numbered}\n\nYour answer (number and text):"
    )
}

fn wrap_in_template(family: ModelFamily, system: &str, user: &str) -> String {
    match family {
        // TinyLlama chat follows a plain User/Assistant transcript
        ModelFamily::TinyLlama => format!(
            "You are a helpful assistant. {system}\n\nUser: {user}\nAssistant:"
        ),
        ModelFamily::Phi3 => format!(
            "<|system|>\n{system}<|end|>\n<|user|>\n{user}<|end|>\n<|assistant|>\n"
        ),
        // Gemma has no system role; the instruction rides in the user turn
        ModelFamily::Gemma => format!(
            "<start_of_turn>user\n{system}\n\n{user}<end_of_turn>\n<start_of_turn>model\n"
        ),
        ModelFamily::Qwen | ModelFamily::Default => format!(
            "<|im_start|>system\n{system}<|im_end|>\n<|im_start|>user\n{user}<|im_end|>\n<|im_start|>assistant\n"
        ),
    }
}

/// Every chat-template control marker any supported family may echo back.
pub const CONTROL_TOKENS: &[&str] = &[
    "<|im_start|>",
    "<|im_end|>",
    "<|endoftext|>",
    "<|assistant|>",
    "<|system|>",
    "<|user|>",
    "<|start|>",
    "<|end|>",
    "<start_of_turn>",
    "<end_of_turn>",
    "<eos>",
    "<bos>",
    "</s>",
    "<s>",
    "assistant:",
    "Assistant:",
    "model:",
    "Model:",
];

/// Byte offset where a streamed completion should be cut: the first control
/// token that follows some answer text. Leading markers (an echoed
/// assistant header, say) do not end the answer.
pub fn end_of_answer(text: &str) -> Option<usize> {
    CONTROL_TOKENS
        .iter()
        .filter_map(|token| text.find(token))
        .filter(|&at| {
            let mut before = text[..at].to_string();
            for token in CONTROL_TOKENS {
                before = before.replace(token, "");
            }
            !before.trim().is_empty()
        })
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Vec<String> {
        ["London", "Paris", "Berlin", "Rome"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn qwen_prompt_uses_chatml_format() {
        let prompt = build_answer_prompt(ModelFamily::Qwen, "Capital of France?", &options());
        assert!(prompt.starts_with("<|im_start|>system\n"));
        assert!(prompt.contains("<|im_end|>"));
        assert!(prompt.ends_with("<|im_start|>assistant\n"));
    }

    #[test]
    fn default_family_matches_qwen() {
        assert_eq!(
            build_answer_prompt(ModelFamily::Default, "Q?", &options()),
            build_answer_prompt(ModelFamily::Qwen, "Q?", &options())
        );
    }

    #[test]
    fn options_are_numbered_from_one_in_order() {
        let prompt = build_answer_prompt(ModelFamily::Qwen, "Capital of France?", &options());
        assert!(prompt.contains("1. London\n2. Paris\n3. Berlin\n4. Rome"));
        assert!(prompt.contains("Question: Capital of France?"));
    }

    #[test]
    fn every_family_carries_system_instruction() {
        for family in [
            ModelFamily::TinyLlama,
            ModelFamily::Qwen,
            ModelFamily::Phi3,
            ModelFamily::Gemma,
            ModelFamily::Default,
        ] {
            let prompt = build_answer_prompt(family, "Q?", &options());
            assert!(prompt.contains(ANSWER_SYSTEM), "{:?} lost the instruction", family);
        }
    }

    #[test]
    fn family_specific_turn_markers() {
        let tiny = build_answer_prompt(ModelFamily::TinyLlama, "Q?", &options());
        assert!(tiny.ends_with("Assistant:"));
        let phi = build_answer_prompt(ModelFamily::Phi3, "Q?", &options());
        assert!(phi.ends_with("<|assistant|>\n"));
        let gemma = build_answer_prompt(ModelFamily::Gemma, "Q?", &options());
        assert!(gemma.ends_with("<start_of_turn>model\n"));
    }

    #[test]
    fn answer_ends_at_first_trailing_control_token() {
        assert_eq!(end_of_answer("2. Paris"), None);
        assert_eq!(end_of_answer("<|im_start|>assistant\n"), None);
        let text = "2. Paris<|im_end|>\n<|im_start|>user";
        assert_eq!(end_of_answer(text), Some("2. Paris".len()));
        assert_eq!(end_of_answer("<start_of_turn>Paris<end_of_turn>"), Some(20));
    }
}
