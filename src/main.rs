//! Headless host: plays one round of trivia against the local opponent.
//!
//! Ctrl-C suspends the opponent, which cancels any download or generation in
//! flight before the process exits.

use trivia_opponent::llm::model_registry::{default_model, find_model};
use trivia_opponent::trivia::{OpenTdbClient, QuestionQuery, QuestionSource};
use trivia_opponent::{OpponentConfig, OpponentController, OpponentError};

const ROUND_SIZE: u32 = 5;

#[tokio::main]
async fn main() {
    trivia_opponent::init_logging();

    if let Err(message) = run().await {
        log::error!("{}", message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let config = OpponentConfig::from_env();
    let opponent = OpponentController::from_config(&config).map_err(|e| e.user_message())?;

    let model = match config.model_id.as_deref() {
        Some(id) => find_model(id).ok_or_else(|| OpponentError::UnknownModel(id.into()).user_message())?,
        None => default_model(),
    };
    log::info!(
        "Opponent model: {} ({})",
        model.name,
        opponent.model_size(model)
    );
    opponent.configure(model.clone()).await;

    // Suspend on Ctrl-C so native work is stopped, not torn down mid-call
    let on_signal = opponent.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, suspending opponent");
            on_signal.suspend().await;
        }
    });

    let mut progress = opponent.subscribe();
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let snapshot = progress.borrow_and_update().clone();
            if snapshot.is_downloading {
                match snapshot.progress_fraction() {
                    Some(fraction) => log::info!("Downloading model: {:.0}%", fraction * 100.0),
                    None => log::info!("Downloading model..."),
                }
            }
        }
    });

    let source = OpenTdbClient::new().map_err(|e| e.to_string())?;
    let query = QuestionQuery {
        amount: ROUND_SIZE,
        ..QuestionQuery::default()
    };
    let questions = source.fetch_questions(&query).await.map_err(|e| e.to_string())?;

    let mut score = 0;
    for (n, question) in questions.iter().enumerate() {
        log::info!("Q{} [{}] {}", n + 1, question.difficulty, question.question);
        for (i, option) in question.answer_options().iter().enumerate() {
            log::info!("  {}. {}", i + 1, option);
        }

        match opponent.ensure_and_generate_answer(question).await {
            Ok(answer) => {
                if answer.is_correct {
                    score += 1;
                }
                log::info!(
                    "Opponent: {} ({}, confidence {:.0}%, {:.1}s)",
                    answer.answer,
                    if answer.is_correct { "correct" } else { "wrong" },
                    answer.confidence * 100.0,
                    answer.thinking_time.as_secs_f32()
                );
            }
            Err(OpponentError::Suspended | OpponentError::Cancelled) => {
                log::info!("Opponent suspended, ending round");
                break;
            }
            Err(err) => return Err(err.user_message()),
        }
    }

    log::info!("Opponent scored {}/{}", score, questions.len());
    opponent.unload().await;
    Ok(())
}
