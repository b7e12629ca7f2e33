//! Question model and API selectors.

use rand::seq::SliceRandom;
use regex::Regex;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

static NEXT_QUESTION_ID: AtomicU64 = AtomicU64::new(1);

/// Named entities the API is known to emit. `&amp;` is decoded last.
const NAMED_ENTITIES: &[(&str, &str)] = &[
    ("&quot;", "\""),
    ("&apos;", "'"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&rsquo;", "\u{2019}"),
    ("&lsquo;", "\u{2018}"),
    ("&rdquo;", "\u{201D}"),
    ("&ldquo;", "\u{201C}"),
    ("&hellip;", "\u{2026}"),
    ("&shy;", ""),
    ("&nbsp;", " "),
    ("&eacute;", "é"),
    ("&Eacute;", "É"),
    ("&aacute;", "á"),
    ("&iacute;", "í"),
    ("&oacute;", "ó"),
    ("&uacute;", "ú"),
    ("&ntilde;", "ñ"),
    ("&ouml;", "ö"),
    ("&Ouml;", "Ö"),
    ("&uuml;", "ü"),
    ("&Uuml;", "Ü"),
    ("&auml;", "ä"),
    ("&Auml;", "Ä"),
    ("&szlig;", "ß"),
];

static NUMERIC_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(?:x([0-9a-fA-F]+)|([0-9]+));").unwrap());

/// Decode the HTML entities found in API text.
pub fn decode_html(text: &str) -> String {
    let numeric = NUMERIC_ENTITY.replace_all(text, |caps: &regex::Captures| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (_, Some(dec)) => dec.as_str().parse::<u32>().ok(),
            _ => None,
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });

    let mut decoded = numeric.into_owned();
    for (entity, replacement) in NAMED_ENTITIES {
        decoded = decoded.replace(entity, replacement);
    }
    decoded.replace("&amp;", "&")
}

/// One question as the API returns it, still entity-encoded.
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuestion {
    pub category: String,
    #[serde(rename = "type")]
    pub question_type: String,
    pub difficulty: String,
    pub question: String,
    pub correct_answer: String,
    pub incorrect_answers: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawResponse {
    pub response_code: i64,
    #[serde(default)]
    pub results: Vec<RawQuestion>,
}

/// A decoded question with its presentation order fixed at construction.
///
/// `answer_options()` is shuffled exactly once, so the order shown to a
/// player and the order numbered in an opponent prompt are the same.
#[derive(Debug, Clone, PartialEq)]
pub struct TriviaQuestion {
    pub id: u64,
    pub category: String,
    pub question_type: String,
    pub difficulty: String,
    pub question: String,
    pub correct_answer: String,
    pub incorrect_answers: Vec<String>,
    options: Vec<String>,
}

impl TriviaQuestion {
    pub fn new(
        category: impl Into<String>,
        question_type: impl Into<String>,
        difficulty: impl Into<String>,
        question: impl Into<String>,
        correct_answer: impl Into<String>,
        incorrect_answers: Vec<String>,
    ) -> Self {
        let correct_answer = decode_html(&correct_answer.into());
        let incorrect_answers: Vec<String> =
            incorrect_answers.iter().map(|a| decode_html(a)).collect();

        let mut options = incorrect_answers.clone();
        options.push(correct_answer.clone());
        options.shuffle(&mut rand::thread_rng());

        Self {
            id: NEXT_QUESTION_ID.fetch_add(1, Ordering::Relaxed),
            category: decode_html(&category.into()),
            question_type: question_type.into(),
            difficulty: difficulty.into(),
            question: decode_html(&question.into()),
            correct_answer,
            incorrect_answers,
            options,
        }
    }

    /// Every answer, correct one included, in presentation order.
    pub fn answer_options(&self) -> &[String] {
        &self.options
    }

    pub fn is_correct(&self, answer: &str) -> bool {
        answer == self.correct_answer
    }

    pub fn is_true_false(&self) -> bool {
        self.question_type == "boolean"
    }
}

impl From<RawQuestion> for TriviaQuestion {
    fn from(raw: RawQuestion) -> Self {
        TriviaQuestion::new(
            raw.category,
            raw.question_type,
            raw.difficulty,
            raw.question,
            raw.correct_answer,
            raw.incorrect_answers,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriviaCategory {
    #[default]
    Any,
    GeneralKnowledge,
    Books,
    Film,
    Music,
    MusicalsTheatres,
    Television,
    VideoGames,
    BoardGames,
    ScienceNature,
    Computers,
    Mathematics,
    Mythology,
    Sports,
    Geography,
    History,
    Politics,
    Art,
    Celebrities,
    Animals,
    Vehicles,
    Comics,
    Gadgets,
    Anime,
    Cartoon,
}

impl TriviaCategory {
    pub const ALL: [TriviaCategory; 25] = [
        TriviaCategory::Any,
        TriviaCategory::GeneralKnowledge,
        TriviaCategory::Books,
        TriviaCategory::Film,
        TriviaCategory::Music,
        TriviaCategory::MusicalsTheatres,
        TriviaCategory::Television,
        TriviaCategory::VideoGames,
        TriviaCategory::BoardGames,
        TriviaCategory::ScienceNature,
        TriviaCategory::Computers,
        TriviaCategory::Mathematics,
        TriviaCategory::Mythology,
        TriviaCategory::Sports,
        TriviaCategory::Geography,
        TriviaCategory::History,
        TriviaCategory::Politics,
        TriviaCategory::Art,
        TriviaCategory::Celebrities,
        TriviaCategory::Animals,
        TriviaCategory::Vehicles,
        TriviaCategory::Comics,
        TriviaCategory::Gadgets,
        TriviaCategory::Anime,
        TriviaCategory::Cartoon,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            TriviaCategory::Any => "Any Category",
            TriviaCategory::GeneralKnowledge => "General Knowledge",
            TriviaCategory::Books => "Books",
            TriviaCategory::Film => "Film",
            TriviaCategory::Music => "Music",
            TriviaCategory::MusicalsTheatres => "Musicals & Theatres",
            TriviaCategory::Television => "Television",
            TriviaCategory::VideoGames => "Video Games",
            TriviaCategory::BoardGames => "Board Games",
            TriviaCategory::ScienceNature => "Science & Nature",
            TriviaCategory::Computers => "Computers",
            TriviaCategory::Mathematics => "Mathematics",
            TriviaCategory::Mythology => "Mythology",
            TriviaCategory::Sports => "Sports",
            TriviaCategory::Geography => "Geography",
            TriviaCategory::History => "History",
            TriviaCategory::Politics => "Politics",
            TriviaCategory::Art => "Art",
            TriviaCategory::Celebrities => "Celebrities",
            TriviaCategory::Animals => "Animals",
            TriviaCategory::Vehicles => "Vehicles",
            TriviaCategory::Comics => "Comics",
            TriviaCategory::Gadgets => "Gadgets",
            TriviaCategory::Anime => "Anime & Manga",
            TriviaCategory::Cartoon => "Cartoon & Animations",
        }
    }

    /// Query value; `None` means no filter. Ids run 9..=32 in declaration order.
    pub fn api_value(&self) -> Option<u32> {
        Self::ALL
            .iter()
            .position(|c| c == self)
            .filter(|&i| i > 0)
            .map(|i| i as u32 + 8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriviaDifficulty {
    #[default]
    Any,
    Easy,
    Medium,
    Hard,
}

impl TriviaDifficulty {
    pub fn api_value(&self) -> Option<&'static str> {
        match self {
            TriviaDifficulty::Any => None,
            TriviaDifficulty::Easy => Some("easy"),
            TriviaDifficulty::Medium => Some("medium"),
            TriviaDifficulty::Hard => Some("hard"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriviaQuestionType {
    #[default]
    Any,
    MultipleChoice,
    TrueFalse,
}

impl TriviaQuestionType {
    pub fn api_value(&self) -> Option<&'static str> {
        match self {
            TriviaQuestionType::Any => None,
            TriviaQuestionType::MultipleChoice => Some("multiple"),
            TriviaQuestionType::TrueFalse => Some("boolean"),
        }
    }
}

/// What to ask the question source for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionQuery {
    pub amount: u32,
    pub category: TriviaCategory,
    pub difficulty: TriviaDifficulty,
    pub question_type: TriviaQuestionType,
}

impl Default for QuestionQuery {
    fn default() -> Self {
        Self {
            amount: 10,
            category: TriviaCategory::Any,
            difficulty: TriviaDifficulty::Any,
            question_type: TriviaQuestionType::Any,
        }
    }
}

impl QuestionQuery {
    /// Query-string pairs; "any" selectors are omitted.
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![("amount", self.amount.to_string())];
        if let Some(category) = self.category.api_value() {
            query.push(("category", category.to_string()));
        }
        if let Some(difficulty) = self.difficulty.api_value() {
            query.push(("difficulty", difficulty.to_string()));
        }
        if let Some(question_type) = self.question_type.api_value() {
            query.push(("type", question_type.to_string()));
        }
        query
    }
}
