//! Turning a raw completion into a trivia answer.
//!
//! Small local models often ignore formatting instructions, so parsing never
//! fails: a number wins, then a literal option match, then a random pick.
//! Confidence is simulated from difficulty and correctness; the runtime
//! exposes no probability signal, so the value is a gameplay device and not
//! a calibrated probability.

use super::prompts_local::CONTROL_TOKENS;
use rand::Rng;
use std::time::Duration;

/// How the answer was recovered from the completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMethod {
    /// Leading option number
    Index,
    /// Literal option text found in the completion
    TextMatch,
    /// Unparseable output; uniformly random option
    RandomFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAnswer {
    /// 0-based index into the presented options
    pub index: usize,
    pub method: ParseMethod,
}

/// Strip template control markers and surrounding whitespace.
pub fn clean_completion(raw: &str) -> String {
    let mut clean = raw.trim().to_string();
    for token in CONTROL_TOKENS {
        clean = clean.replace(token, "");
    }
    clean.trim().to_string()
}

/// Pick one of `options` from a raw completion. `options` must be non-empty.
pub fn parse_answer(raw: &str, options: &[String]) -> ParsedAnswer {
    let clean = clean_completion(raw);
    log::debug!("[ANSWER] Cleaned completion: '{}'", clean);

    if let Some(index) = leading_option_number(&clean, options.len()) {
        return ParsedAnswer {
            index,
            method: ParseMethod::Index,
        };
    }

    let lowered = clean.to_lowercase();
    if let Some(index) = options
        .iter()
        .position(|option| !option.is_empty() && lowered.contains(&option.to_lowercase()))
    {
        return ParsedAnswer {
            index,
            method: ParseMethod::TextMatch,
        };
    }

    let index = rand::thread_rng().gen_range(0..options.len());
    log::warn!(
        "[ANSWER] Could not parse completion '{}', picking option {} at random",
        clean,
        index + 1
    );
    ParsedAnswer {
        index,
        method: ParseMethod::RandomFallback,
    }
}

/// 0-based index when the text starts with a digit in 1..=count.
fn leading_option_number(clean: &str, count: usize) -> Option<usize> {
    let n = clean.chars().next()?.to_digit(10)? as usize;
    (1..=count).contains(&n).then(|| n - 1)
}

/// Question difficulty as reported by the question source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Other(String),
}

impl Difficulty {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "easy" => Difficulty::Easy,
            "medium" => Difficulty::Medium,
            "hard" => Difficulty::Hard,
            _ => Difficulty::Other(value.to_string()),
        }
    }
}

/// Simulated confidence for an answer.
///
/// | difficulty | correct     | incorrect   |
/// |------------|-------------|-------------|
/// | easy       | 0.85–0.95   | 0.60–0.75   |
/// | medium     | 0.70–0.85   | 0.45–0.60   |
/// | hard       | 0.55–0.70   | 0.30–0.45   |
/// | other      | 0.50        | 0.50        |
pub fn simulated_confidence(difficulty: &Difficulty, is_correct: bool) -> f32 {
    let range = match (difficulty, is_correct) {
        (Difficulty::Easy, true) => 0.85..=0.95,
        (Difficulty::Easy, false) => 0.60..=0.75,
        (Difficulty::Medium, true) => 0.70..=0.85,
        (Difficulty::Medium, false) => 0.45..=0.60,
        (Difficulty::Hard, true) => 0.55..=0.70,
        (Difficulty::Hard, false) => 0.30..=0.45,
        (Difficulty::Other(_), _) => return 0.5,
    };
    rand::thread_rng().gen_range(range)
}

/// Minimum apparent deliberation per answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThinkingTime {
    pub normal: Duration,
    pub hard: Duration,
}

impl Default for ThinkingTime {
    fn default() -> Self {
        Self {
            normal: Duration::from_millis(1500),
            hard: Duration::from_secs(2),
        }
    }
}

impl ThinkingTime {
    pub fn minimum_for(&self, difficulty: &Difficulty) -> Duration {
        match difficulty {
            Difficulty::Hard => self.hard,
            _ => self.normal,
        }
    }

    /// Extra delay needed so an answer never looks faster than the minimum.
    pub fn remaining(&self, difficulty: &Difficulty, elapsed: Duration) -> Duration {
        self.minimum_for(difficulty).saturating_sub(elapsed)
    }
}
