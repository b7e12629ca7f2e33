//! Resumable, single-flight artifact transfers.
//!
//! One transfer runs per destination path. It streams into `<dest>.part`,
//! resumes from that file's size with a `Range` request, and is renamed
//! into place only once the byte count matches the advertised length.
//! Concurrent callers for the same destination attach to the running
//! transfer's state channel instead of issuing a second request.
//!
//! Cancellation stops the stream and keeps the partial file.

use super::model_manager::partial_path_for;
use crate::config::OpponentConfig;
use crate::error::OpponentError;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Bytes on disk versus bytes expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub bytes_written: u64,
    /// `None` when the server sent no length; progress is indeterminate.
    pub bytes_total: Option<u64>,
}

impl DownloadProgress {
    pub fn complete(size: u64) -> Self {
        Self {
            bytes_written: size,
            bytes_total: Some(size),
        }
    }

    /// Completed fraction in `0.0..=1.0`, or `None` when indeterminate.
    pub fn fraction(&self) -> Option<f64> {
        match self.bytes_total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.bytes_written as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadState {
    Idle,
    InProgress(DownloadProgress),
    Completed(PathBuf),
    Failed(OpponentError),
    Cancelled,
}

struct Transfer {
    state: watch::Receiver<DownloadState>,
    cancel: CancellationToken,
}

struct Shared {
    client: reqwest::Client,
    transfers: Mutex<HashMap<PathBuf, Transfer>>,
    progress_interval: Duration,
}

impl Shared {
    fn transfers(&self) -> MutexGuard<'_, HashMap<PathBuf, Transfer>> {
        self.transfers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns every in-flight transfer. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DownloadCoordinator {
    shared: Arc<Shared>,
}

impl DownloadCoordinator {
    pub fn new(connect_timeout: Duration, progress_interval: Duration) -> Result<Self, OpponentError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("trivia-opponent/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            shared: Arc::new(Shared {
                client,
                transfers: Mutex::new(HashMap::new()),
                progress_interval,
            }),
        })
    }

    pub fn from_config(config: &OpponentConfig) -> Result<Self, OpponentError> {
        Self::new(config.connect_timeout, config.progress_interval)
    }

    /// Make sure `dest` holds the artifact at `url`, downloading it if needed.
    ///
    /// Returns immediately, with a single complete progress report and no
    /// network traffic, when `dest` already holds a non-empty file.
    /// `on_progress` runs in the caller's task at most once per progress
    /// interval of the underlying transfer.
    pub async fn ensure_file<F>(
        &self,
        url: &str,
        dest: &Path,
        mut on_progress: F,
    ) -> Result<PathBuf, OpponentError>
    where
        F: FnMut(DownloadProgress) + Send,
    {
        if let Some(size) = completed_size(dest) {
            on_progress(DownloadProgress::complete(size));
            return Ok(dest.to_path_buf());
        }

        let mut state = {
            let mut transfers = self.shared.transfers();

            // A transfer may have finished between the first check and the lock
            if let Some(size) = completed_size(dest) {
                drop(transfers);
                on_progress(DownloadProgress::complete(size));
                return Ok(dest.to_path_buf());
            }

            match transfers.get(dest) {
                Some(transfer) => {
                    log::info!("[DOWNLOAD] Attaching to transfer for {}", dest.display());
                    transfer.state.clone()
                }
                None => {
                    let transfer = self.start_transfer(url, dest);
                    let state = transfer.state.clone();
                    transfers.insert(dest.to_path_buf(), transfer);
                    state
                }
            }
        };

        loop {
            let current = state.borrow_and_update().clone();
            match current {
                DownloadState::Idle => {}
                DownloadState::InProgress(progress) => on_progress(progress),
                DownloadState::Completed(path) => {
                    if let Some(size) = completed_size(&path) {
                        on_progress(DownloadProgress::complete(size));
                    }
                    return Ok(path);
                }
                DownloadState::Failed(err) => return Err(err),
                DownloadState::Cancelled => return Err(OpponentError::Cancelled),
            }

            if state.changed().await.is_err() {
                let last = state.borrow().clone();
                let outcome = terminal_outcome(last);
                if let Ok(path) = &outcome {
                    if let Some(size) = completed_size(path) {
                        on_progress(DownloadProgress::complete(size));
                    }
                }
                return outcome;
            }
        }
    }

    /// Spawn the transfer task for `dest`. The caller registers it.
    fn start_transfer(&self, url: &str, dest: &Path) -> Transfer {
        let (tx, rx) = watch::channel(DownloadState::Idle);
        let cancel = CancellationToken::new();

        let shared = self.shared.clone();
        let url = url.to_string();
        let dest = dest.to_path_buf();
        let token = cancel.clone();

        tokio::spawn(async move {
            log::info!("[DOWNLOAD] Starting {} -> {}", url, dest.display());
            let result = run_transfer(&shared, &url, &dest, &token, &tx).await;

            let final_state = match result {
                Ok(path) => {
                    log::info!("[DOWNLOAD] Complete: {}", path.display());
                    DownloadState::Completed(path)
                }
                Err(OpponentError::Cancelled) => {
                    log::info!("[DOWNLOAD] Cancelled, partial kept: {}", dest.display());
                    DownloadState::Cancelled
                }
                Err(err) => {
                    log::error!("[DOWNLOAD] Failed for {}: {}", dest.display(), err);
                    DownloadState::Failed(err)
                }
            };

            tx.send_replace(final_state);
            shared.transfers().remove(&dest);
        });

        Transfer { state: rx, cancel }
    }

    /// Cancel the transfer writing to `dest`. Returns whether one was running.
    pub fn cancel(&self, dest: &Path) -> bool {
        match self.shared.transfers().get(dest) {
            Some(transfer) => {
                transfer.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (dest, transfer) in self.shared.transfers().iter() {
            log::info!("[DOWNLOAD] Cancelling {}", dest.display());
            transfer.cancel.cancel();
        }
    }

    pub fn is_active(&self, dest: &Path) -> bool {
        self.shared.transfers().contains_key(dest)
    }

    /// Latest state of the transfer writing to `dest`, if one is running.
    pub fn state(&self, dest: &Path) -> Option<DownloadState> {
        self.shared
            .transfers()
            .get(dest)
            .map(|transfer| transfer.state.borrow().clone())
    }
}

fn terminal_outcome(state: DownloadState) -> Result<PathBuf, OpponentError> {
    match state {
        DownloadState::Completed(path) => Ok(path),
        DownloadState::Failed(err) => Err(err),
        DownloadState::Cancelled => Err(OpponentError::Cancelled),
        DownloadState::Idle | DownloadState::InProgress(_) => Err(OpponentError::Network(
            "transfer ended without a result".to_string(),
        )),
    }
}

/// Size of a finished artifact. Empty files do not count.
fn completed_size(dest: &Path) -> Option<u64> {
    std::fs::metadata(dest)
        .ok()
        .filter(|m| m.is_file() && m.len() > 0)
        .map(|m| m.len())
}

async fn run_transfer(
    shared: &Shared,
    url: &str,
    dest: &Path,
    cancel: &CancellationToken,
    state: &watch::Sender<DownloadState>,
) -> Result<PathBuf, OpponentError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let partial = partial_path_for(dest);
    let mut resume_from = tokio::fs::metadata(&partial)
        .await
        .map(|m| m.len())
        .unwrap_or(0);

    if resume_from > 0 {
        log::info!("[DOWNLOAD] Resuming {} from {} bytes", dest.display(), resume_from);
    }
    let mut response = send_request(shared, url, resume_from, cancel).await?;

    if resume_from > 0
        && response.status() == StatusCode::PARTIAL_CONTENT
        && content_range_start(&response) != Some(resume_from)
    {
        log::warn!(
            "[DOWNLOAD] Range for {} starts at {:?}, expected {}; restarting",
            dest.display(),
            content_range_start(&response),
            resume_from
        );
        drop(response);
        let _ = tokio::fs::remove_file(&partial).await;
        resume_from = 0;
        response = send_request(shared, url, 0, cancel).await?;
    }

    let status = response.status();
    if status == StatusCode::PARTIAL_CONTENT
        && content_range_start(&response).unwrap_or(0) != resume_from
    {
        return Err(OpponentError::Network(format!(
            "Unexpected Content-Range for a transfer starting at {} bytes",
            resume_from
        )));
    }
    if status == StatusCode::RANGE_NOT_SATISFIABLE {
        // The partial no longer lines up with the remote file; start over next time
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(OpponentError::Network(format!(
            "HTTP {} resuming from {} bytes",
            status, resume_from
        )));
    }
    if !(200..=206).contains(&status.as_u16()) {
        return Err(OpponentError::Network(format!("HTTP {}", status)));
    }

    let resumed = resume_from > 0 && status == StatusCode::PARTIAL_CONTENT;
    if resume_from > 0 && !resumed {
        log::warn!("[DOWNLOAD] Server ignored range request, restarting {}", dest.display());
    }
    let offset = if resumed { resume_from } else { 0 };
    let total = response.content_length().map(|len| len + offset);

    let file = if resumed {
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&partial)
            .await?
    } else {
        tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&partial)
            .await?
    };
    let mut file = BufWriter::new(file);

    state.send_replace(DownloadState::InProgress(DownloadProgress {
        bytes_written: offset,
        bytes_total: total,
    }));

    let streamed = stream_body(
        response,
        &mut file,
        offset,
        total,
        cancel,
        state,
        shared.progress_interval,
    )
    .await;
    // Flush whatever arrived so a later resume starts from the real size
    let flushed = file.flush().await;
    let written = streamed?;
    flushed?;
    drop(file);

    if let Some(total) = total {
        if written != total {
            return Err(OpponentError::Network(format!(
                "Incomplete transfer: {} of {} bytes",
                written, total
            )));
        }
    }

    state.send_replace(DownloadState::InProgress(DownloadProgress {
        bytes_written: written,
        bytes_total: Some(written),
    }));

    if tokio::fs::metadata(dest).await.is_ok() {
        tokio::fs::remove_file(dest).await?;
    }
    tokio::fs::rename(&partial, dest).await?;

    Ok(dest.to_path_buf())
}

async fn send_request(
    shared: &Shared,
    url: &str,
    resume_from: u64,
    cancel: &CancellationToken,
) -> Result<reqwest::Response, OpponentError> {
    let mut request = shared.client.get(url);
    if resume_from > 0 {
        request = request.header(RANGE, format!("bytes={}-", resume_from));
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(OpponentError::Cancelled),
        response = request.send() => Ok(response?),
    }
}

fn content_range_start(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_range_start)
}

/// First byte of a `Content-Range: bytes <start>-<end>/<total>` value.
fn parse_range_start(value: &str) -> Option<u64> {
    value
        .trim()
        .strip_prefix("bytes ")?
        .split('-')
        .next()?
        .trim()
        .parse()
        .ok()
}

async fn stream_body(
    response: reqwest::Response,
    file: &mut BufWriter<tokio::fs::File>,
    offset: u64,
    total: Option<u64>,
    cancel: &CancellationToken,
    state: &watch::Sender<DownloadState>,
    progress_interval: Duration,
) -> Result<u64, OpponentError> {
    let mut stream = response.bytes_stream();
    let mut written = offset;
    let mut last_report = Instant::now();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(OpponentError::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;

        file.write_all(&chunk).await?;
        written += chunk.len() as u64;

        if last_report.elapsed() >= progress_interval {
            let progress = DownloadProgress {
                bytes_written: written,
                bytes_total: total,
            };
            log::debug!(
                "[DOWNLOAD] {} bytes of {:?} ({:?})",
                written,
                total,
                progress.fraction()
            );
            state.send_replace(DownloadState::InProgress(progress));
            last_report = Instant::now();
        }
    }

    Ok(written)
}
