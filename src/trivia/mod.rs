//! Trivia questions: the model the opponent answers and the source they come from.

pub mod client;
pub mod types;

pub use client::{OpenTdbClient, QuestionSource, TriviaError};
pub use types::{
    decode_html, QuestionQuery, TriviaCategory, TriviaDifficulty, TriviaQuestion,
    TriviaQuestionType,
};
