//! AI opponent, the single authority over "is a model ready".
//!
//! All session mutations happen under one async mutex. Long I/O (download,
//! load, generation) runs outside it; a preparation runs as its own task and
//! publishes its outcome on a watch channel so every caller that asked for
//! the same model observes one result.
//!
//! State machine: `Unloaded -> Downloading -> Loading -> Ready`, back to
//! `Unloaded` on unload, on selecting another model, or on any failure.
//!
//! A preparation that was cancelled or superseded is "retired". It still
//! owns whatever native work it started, so a new preparation waits for all
//! retired ones to finish first. Retired outcomes stay in the session until
//! they resolve, so every caller sees them and waits. Together with the epoch
//! check on commit this keeps at most one runtime handle alive.

use super::answer::{parse_answer, simulated_confidence, Difficulty, ParseMethod, ThinkingTime};
use super::download::{DownloadCoordinator, DownloadProgress};
use super::model_manager::{verify_model_hash, ArtifactStore};
use super::model_registry::{find_model, ModelDefinition};
use super::prompts_local::build_answer_prompt;
use super::runtime::{
    default_runtime_factory, GenerationParams, InferenceRuntime, ModelFamily, RuntimeFactory,
};
use crate::config::OpponentConfig;
use crate::error::OpponentError;
use crate::trivia::TriviaQuestion;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Unloaded,
    Downloading,
    Loading,
    Ready,
}

/// Read-only view of the session for UI layers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpponentSnapshot {
    pub load_state: LoadState,
    pub selected_model_id: Option<String>,
    /// Set iff `load_state == Downloading`.
    pub downloading_model_id: Option<String>,
    pub is_downloading: bool,
    /// Latest transfer progress while downloading.
    pub progress: Option<DownloadProgress>,
}

impl OpponentSnapshot {
    /// Fraction for a progress bar; `None` while indeterminate or idle.
    pub fn progress_fraction(&self) -> Option<f64> {
        self.progress.and_then(|p| p.fraction())
    }
}

/// The opponent's pick for one question.
#[derive(Debug, Clone, PartialEq)]
pub struct OpponentAnswer {
    pub answer: String,
    /// Index into `TriviaQuestion::answer_options()`.
    pub option_index: usize,
    pub is_correct: bool,
    /// Simulated; see `answer::simulated_confidence`.
    pub confidence: f32,
    pub thinking_time: Duration,
    pub parse_method: ParseMethod,
}

type Outcome = Option<Result<(), OpponentError>>;

struct Preparation {
    model_id: String,
    epoch: u64,
    cancel: CancellationToken,
    outcome: watch::Receiver<Outcome>,
}

#[derive(Default)]
struct Session {
    selected: Option<ModelDefinition>,
    runtime: Option<Arc<dyn InferenceRuntime>>,
    family: ModelFamily,
    load_state: LoadState,
    preparation: Option<Preparation>,
    /// Outcomes of cancelled preparations that may still be running.
    retired: Vec<watch::Receiver<Outcome>>,
    generation: Option<(u64, CancellationToken)>,
    next_generation: u64,
    epoch: u64,
    suspended: bool,
}

impl Session {
    fn is_ready(&self) -> bool {
        self.load_state == LoadState::Ready && self.runtime.is_some()
    }

    /// Cancel the active preparation and park its outcome until it winds down.
    fn retire_preparation(&mut self) {
        if let Some(preparation) = self.preparation.take() {
            log::info!(
                "[OPPONENT] Cancelling preparation of {} (epoch {})",
                preparation.model_id,
                preparation.epoch
            );
            preparation.cancel.cancel();
            self.retired.push(preparation.outcome);
            if self.load_state != LoadState::Ready {
                self.load_state = LoadState::Unloaded;
            }
        }
    }

    /// Retired preparations still running. Finished ones are dropped.
    fn pending_retired(&mut self) -> Vec<watch::Receiver<Outcome>> {
        self.retired
            .retain(|outcome| outcome.borrow().is_none() && outcome.has_changed().is_ok());
        self.retired.clone()
    }

    fn cancel_generation(&mut self) {
        if let Some((_, token)) = self.generation.take() {
            token.cancel();
        }
        if let Some(runtime) = &self.runtime {
            runtime.cancel();
        }
    }

    fn release_runtime(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.cleanup();
            log::info!("[OPPONENT] Runtime released");
        }
        self.load_state = LoadState::Unloaded;
    }
}

struct Inner {
    store: ArtifactStore,
    downloads: DownloadCoordinator,
    runtime_factory: RuntimeFactory,
    params: GenerationParams,
    thinking_time: ThinkingTime,
    session: Mutex<Session>,
    snapshot: watch::Sender<OpponentSnapshot>,
    /// Serializes generations; one completion at a time.
    generation_turn: Mutex<()>,
}

/// Cheap to clone; clones drive the same session.
#[derive(Clone)]
pub struct OpponentController {
    inner: Arc<Inner>,
}

impl OpponentController {
    /// Controller backed by the runtime compiled into this build.
    pub fn from_config(config: &OpponentConfig) -> Result<Self, OpponentError> {
        Self::with_runtime(config, default_runtime_factory())
    }

    pub fn with_runtime(
        config: &OpponentConfig,
        runtime_factory: RuntimeFactory,
    ) -> Result<Self, OpponentError> {
        let downloads = DownloadCoordinator::from_config(config)?;
        let (snapshot, _) = watch::channel(OpponentSnapshot::default());

        Ok(Self {
            inner: Arc::new(Inner {
                store: ArtifactStore::new(&config.models_dir),
                downloads,
                runtime_factory,
                params: config.generation,
                thinking_time: config.thinking_time,
                session: Mutex::new(Session::default()),
                snapshot,
                generation_turn: Mutex::new(()),
            }),
        })
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.inner.store
    }

    /// Select a model. Releases a different Ready model first; starts no I/O.
    pub async fn configure(&self, definition: ModelDefinition) {
        let mut session = self.inner.session.lock().await;
        let same = session
            .selected
            .as_ref()
            .is_some_and(|current| current.id == definition.id);

        if !same {
            session.cancel_generation();
            session.retire_preparation();
            session.release_runtime();
            log::info!("[OPPONENT] Selected model: {}", definition.id);
        }
        session.selected = Some(definition);
        self.inner.publish(&session);
    }

    /// Select a catalog model by id.
    pub async fn configure_by_id(&self, id: &str) -> Result<(), OpponentError> {
        let definition = find_model(id).ok_or_else(|| OpponentError::UnknownModel(id.to_string()))?;
        self.configure(definition.clone()).await;
        Ok(())
    }

    /// Download and load the selected model unless it is already Ready.
    ///
    /// Concurrent calls for the same model share one preparation and its
    /// outcome.
    pub async fn prepare(&self) -> Result<(), OpponentError> {
        loop {
            let outcome = {
                let mut session = self.inner.session.lock().await;
                if session.suspended {
                    return Err(OpponentError::Suspended);
                }
                let Some(definition) = session.selected.clone() else {
                    return Err(OpponentError::NotConfigured);
                };
                if session.is_ready() {
                    return Ok(());
                }

                let attached = session
                    .preparation
                    .as_ref()
                    .filter(|p| p.model_id == *definition.id)
                    .map(|p| p.outcome.clone());

                match attached {
                    Some(outcome) => {
                        log::debug!("[OPPONENT] Joining preparation of {}", definition.id);
                        outcome
                    }
                    None => {
                        session.retire_preparation();
                        let retired = session.pending_retired();
                        if !retired.is_empty() {
                            drop(session);
                            wait_for_retired(retired).await;
                            continue;
                        }
                        self.start_preparation(&mut session, definition)
                    }
                }
            };

            return wait_for_outcome(outcome).await;
        }
    }

    fn start_preparation(
        &self,
        session: &mut Session,
        definition: ModelDefinition,
    ) -> watch::Receiver<Outcome> {
        session.epoch += 1;
        let epoch = session.epoch;
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(None);

        session.load_state = if self.inner.store.is_downloaded(&definition) {
            LoadState::Loading
        } else {
            LoadState::Downloading
        };
        log::info!(
            "[OPPONENT] Preparing {} (epoch {}, {:?})",
            definition.id,
            epoch,
            session.load_state
        );

        let inner = self.inner.clone();
        let token = cancel.clone();
        let model_id = definition.id.to_string();
        tokio::spawn(async move {
            let result = inner.run_preparation(&definition, epoch, &token).await;
            tx.send_replace(Some(result));
        });

        session.preparation = Some(Preparation {
            model_id,
            epoch,
            cancel,
            outcome: rx.clone(),
        });
        self.inner.publish(session);
        rx
    }

    /// Prepare if needed, then answer `question`.
    pub async fn ensure_and_generate_answer(
        &self,
        question: &TriviaQuestion,
    ) -> Result<OpponentAnswer, OpponentError> {
        self.prepare().await?;

        let _turn = self.inner.generation_turn.lock().await;
        let started = Instant::now();

        let (runtime, family, generation_id, token) = {
            let mut session = self.inner.session.lock().await;
            if session.suspended {
                return Err(OpponentError::Suspended);
            }
            let runtime = match (&session.runtime, session.load_state) {
                (Some(runtime), LoadState::Ready) => runtime.clone(),
                _ => return Err(OpponentError::ModelNotLoaded),
            };
            session.next_generation += 1;
            let id = session.next_generation;
            let token = CancellationToken::new();
            session.generation = Some((id, token.clone()));
            (runtime, session.family, id, token)
        };

        let result = self
            .answer_with(runtime.as_ref(), family, question, &token, started)
            .await;

        let mut session = self.inner.session.lock().await;
        if session
            .generation
            .as_ref()
            .is_some_and(|(id, _)| *id == generation_id)
        {
            session.generation = None;
        }
        result
    }

    /// Generate, parse and pace one answer. `token` aborts both the
    /// generation and the thinking-time pause.
    async fn answer_with(
        &self,
        runtime: &dyn InferenceRuntime,
        family: ModelFamily,
        question: &TriviaQuestion,
        token: &CancellationToken,
        started: Instant,
    ) -> Result<OpponentAnswer, OpponentError> {
        let options = question.answer_options();
        let prompt = build_answer_prompt(family, &question.question, options);
        log::debug!("[OPPONENT] Prompt ({}): {}", family.as_str(), prompt);

        let completion = tokio::select! {
            biased;
            _ = token.cancelled() => {
                runtime.cancel();
                Err(OpponentError::Cancelled)
            }
            result = runtime.generate(&prompt, &self.inner.params) => result,
        };
        let completion = completion?;
        if completion.trim().is_empty() {
            return Err(OpponentError::GenerationFailed(
                "model returned an empty completion".to_string(),
            ));
        }
        log::debug!("[OPPONENT] Raw completion: {}", completion);

        let parsed = parse_answer(&completion, options);
        let answer = options[parsed.index].clone();
        let is_correct = answer == question.correct_answer;
        let difficulty = Difficulty::parse(&question.difficulty);
        let confidence = simulated_confidence(&difficulty, is_correct);

        let pause = self.inner.thinking_time.remaining(&difficulty, started.elapsed());
        if !pause.is_zero() {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    log::info!("[OPPONENT] Answer withdrawn while thinking");
                    return Err(OpponentError::Cancelled);
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
        let thinking_time = started.elapsed();

        log::info!(
            "[OPPONENT] Answered '{}' ({}, {:?}, confidence {:.2}, {}ms)",
            answer,
            if is_correct { "correct" } else { "incorrect" },
            parsed.method,
            confidence,
            thinking_time.as_millis()
        );

        Ok(OpponentAnswer {
            answer,
            option_index: parsed.index,
            is_correct,
            confidence,
            thinking_time,
            parse_method: parsed.method,
        })
    }

    /// Release the runtime and forget the selection. No-op when nothing is loaded.
    pub async fn unload(&self) {
        let mut session = self.inner.session.lock().await;
        session.cancel_generation();
        session.retire_preparation();
        session.release_runtime();
        session.selected = None;
        self.inner.publish(&session);
        log::info!("[OPPONENT] Unloaded");
    }

    /// Stop any download and any generation in flight. A Ready model stays Ready.
    pub async fn cancel_current_operation(&self) {
        let mut session = self.inner.session.lock().await;
        self.inner.cancel_in_flight(&mut session);
    }

    /// Host moved to the background: cancel work and refuse new work until `resume`.
    pub async fn suspend(&self) {
        let mut session = self.inner.session.lock().await;
        session.suspended = true;
        self.inner.cancel_in_flight(&mut session);
        log::info!("[OPPONENT] Suspended");
    }

    pub async fn resume(&self) {
        let mut session = self.inner.session.lock().await;
        session.suspended = false;
        log::info!("[OPPONENT] Resumed");
    }

    /// Remove a model's artifacts, unloading it first when it is selected.
    pub async fn delete_model(&self, definition: &ModelDefinition) -> Result<(), OpponentError> {
        let retired = {
            let mut session = self.inner.session.lock().await;
            let selected = session
                .selected
                .as_ref()
                .is_some_and(|current| current.id == definition.id);
            if selected {
                session.cancel_generation();
                session.retire_preparation();
                session.release_runtime();
                session.selected = None;
                self.inner.publish(&session);
            }
            session.pending_retired()
        };

        // Let cancelled transfers stop writing before their files go away
        wait_for_retired(retired).await;

        self.inner.store.delete(definition)
    }

    pub fn subscribe(&self) -> watch::Receiver<OpponentSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> OpponentSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn load_state(&self) -> LoadState {
        self.inner.snapshot.borrow().load_state
    }

    pub fn is_model_downloading(&self, id: &str) -> bool {
        self.inner.snapshot.borrow().downloading_model_id.as_deref() == Some(id)
    }

    pub fn is_model_downloaded(&self, definition: &ModelDefinition) -> bool {
        self.inner.store.is_downloaded(definition)
    }

    pub fn model_size(&self, definition: &ModelDefinition) -> String {
        self.inner.store.size_label(definition)
    }
}

async fn wait_for_outcome(mut outcome: watch::Receiver<Outcome>) -> Result<(), OpponentError> {
    match outcome.wait_for(Option::is_some).await {
        Ok(result) => (*result).clone().unwrap_or(Err(OpponentError::Cancelled)),
        // Task dropped without reporting
        Err(_) => Err(OpponentError::Cancelled),
    }
}

async fn wait_for_retired(retired: Vec<watch::Receiver<Outcome>>) {
    for mut outcome in retired {
        // Closed without a value means the task is gone too
        let _ = outcome.wait_for(Option::is_some).await;
    }
}

impl Inner {
    fn cancel_in_flight(&self, session: &mut Session) {
        session.cancel_generation();
        session.retire_preparation();
        self.downloads.cancel_all();
        self.publish(session);
    }

    fn publish(&self, session: &Session) {
        let downloading = match (&session.preparation, session.load_state) {
            (Some(preparation), LoadState::Downloading) => Some(preparation.model_id.clone()),
            _ => None,
        };
        self.snapshot.send_modify(|snapshot| {
            snapshot.load_state = session.load_state;
            snapshot.selected_model_id = session.selected.as_ref().map(|d| d.id.to_string());
            snapshot.is_downloading = downloading.is_some();
            snapshot.downloading_model_id = downloading;
            if !snapshot.is_downloading {
                snapshot.progress = None;
            }
        });
    }

    fn report_progress(&self, progress: DownloadProgress) {
        self.snapshot.send_modify(|snapshot| {
            if snapshot.is_downloading {
                snapshot.progress = Some(progress);
            }
        });
    }

    async fn run_preparation(
        &self,
        definition: &ModelDefinition,
        epoch: u64,
        cancel: &CancellationToken,
    ) -> Result<(), OpponentError> {
        let result = self.acquire_runtime(definition, epoch, cancel).await;

        let mut session = self.session.lock().await;
        let current = session
            .preparation
            .as_ref()
            .is_some_and(|p| p.epoch == epoch);

        let outcome = match result {
            Ok(runtime) if current && !cancel.is_cancelled() => {
                session.runtime = Some(runtime);
                session.family = ModelFamily::detect(&definition.filename);
                session.load_state = LoadState::Ready;
                session.preparation = None;
                log::info!(
                    "[OPPONENT] Model ready: {} (family {})",
                    definition.id,
                    session.family.as_str()
                );
                Ok(())
            }
            Ok(runtime) => {
                log::warn!("[OPPONENT] Discarding superseded load of {}", definition.id);
                runtime.cleanup();
                if current {
                    session.preparation = None;
                    session.load_state = LoadState::Unloaded;
                }
                Err(OpponentError::Cancelled)
            }
            Err(err) => {
                if err == OpponentError::Cancelled {
                    log::info!("[OPPONENT] Preparation of {} cancelled", definition.id);
                } else {
                    log::error!("[OPPONENT] Preparation of {} failed: {}", definition.id, err);
                }
                if current {
                    session.preparation = None;
                    session.load_state = LoadState::Unloaded;
                }
                Err(err)
            }
        };

        self.publish(&session);
        outcome
    }

    async fn acquire_runtime(
        &self,
        definition: &ModelDefinition,
        epoch: u64,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn InferenceRuntime>, OpponentError> {
        let dest = self.store.model_path(definition);

        let download = self
            .downloads
            .ensure_file(&definition.url, &dest, |progress| self.report_progress(progress));
        tokio::pin!(download);

        // Download first so the transfer is registered before a cancel can target it
        let path = tokio::select! {
            biased;
            result = &mut download => result?,
            _ = cancel.cancelled() => {
                self.downloads.cancel(&dest);
                // Wait for the transfer to stop so it never overlaps the next one
                let _ = download.await;
                return Err(OpponentError::Cancelled);
            }
        };

        if cancel.is_cancelled() {
            return Err(OpponentError::Cancelled);
        }
        self.enter_loading(epoch).await;

        if let Some(expected) = &definition.sha256 {
            let file = path.clone();
            let expected = expected.to_string();
            let verified = tokio::task::spawn_blocking(move || verify_model_hash(&file, &expected))
                .await
                .map_err(|e| OpponentError::ModelLoadFailed(format!("Verification task failed: {}", e)))?;
            if let Err(err) = verified {
                log::error!("[MODEL] {} failed verification, deleting", definition.id);
                let _ = self.store.delete(definition);
                return Err(err);
            }
        }

        let runtime = (self.runtime_factory)()?;
        log::info!(
            "[OPPONENT] Loading {} (n_ctx={})",
            path.display(),
            definition.context_length
        );

        // Not raced against the cancel token: a load in progress finishes and is discarded
        if let Err(err) = runtime.load_model(&path, definition.context_length).await {
            runtime.cleanup();
            return Err(err);
        }
        Ok(runtime)
    }

    async fn enter_loading(&self, epoch: u64) {
        let mut session = self.session.lock().await;
        let current = session
            .preparation
            .as_ref()
            .is_some_and(|p| p.epoch == epoch);
        if current && session.load_state == LoadState::Downloading {
            session.load_state = LoadState::Loading;
            self.publish(&session);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let session = self.session.get_mut();
        if let Some(preparation) = session.preparation.take() {
            preparation.cancel.cancel();
        }
        if let Some(runtime) = session.runtime.take() {
            runtime.cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_fraction_follows_progress() {
        let mut snapshot = OpponentSnapshot::default();
        assert_eq!(snapshot.progress_fraction(), None);
        snapshot.progress = Some(DownloadProgress {
            bytes_written: 1,
            bytes_total: Some(4),
        });
        assert_eq!(snapshot.progress_fraction(), Some(0.25));
        snapshot.progress = Some(DownloadProgress {
            bytes_written: 1,
            bytes_total: None,
        });
        assert_eq!(snapshot.progress_fraction(), None);
    }

    #[tokio::test]
    async fn prepare_without_selection_is_not_configured() {
        let dir = tempfile::tempdir().unwrap();
        let config = OpponentConfig::default().with_models_dir(dir.path());
        let controller = OpponentController::from_config(&config).unwrap();
        assert_eq!(controller.prepare().await, Err(OpponentError::NotConfigured));
        assert_eq!(controller.load_state(), LoadState::Unloaded);
    }

    #[tokio::test]
    async fn unknown_catalog_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = OpponentConfig::default().with_models_dir(dir.path());
        let controller = OpponentController::from_config(&config).unwrap();
        let err = controller.configure_by_id("gpt-9").await.unwrap_err();
        assert_eq!(err, OpponentError::UnknownModel("gpt-9".into()));
        controller.configure_by_id("qwen-0.5b").await.unwrap();
        assert_eq!(controller.snapshot().selected_model_id.as_deref(), Some("qwen-0.5b"));
    }
}
