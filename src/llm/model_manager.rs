//! Model artifact storage: resolve, inspect, verify and delete GGUF files.
//!
//! Every artifact lives directly under the models directory, named by its
//! definition's filename. An in-progress transfer writes to
//! `<filename>.part` next to it, so a partial file is never visible under
//! the final name.

use super::model_registry::ModelDefinition;
use crate::error::OpponentError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Suffix marking an incomplete transfer.
pub const PARTIAL_SUFFIX: &str = "part";

/// Filesystem facade over the models directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    models_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Full path for a model's GGUF file.
    pub fn model_path(&self, model: &ModelDefinition) -> PathBuf {
        self.models_dir.join(&*model.filename)
    }

    /// Path of the in-progress transfer for a model.
    pub fn partial_path(&self, model: &ModelDefinition) -> PathBuf {
        partial_path_for(&self.model_path(model))
    }

    /// Check if a model is already downloaded.
    pub fn is_downloaded(&self, model: &ModelDefinition) -> bool {
        let path = self.model_path(model);
        path.is_file() && path.metadata().map(|m| m.len() > 0).unwrap_or(false)
    }

    /// On-disk size of the finished artifact, if present.
    pub fn file_size(&self, model: &ModelDefinition) -> Option<u64> {
        std::fs::metadata(self.model_path(model))
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len())
    }

    /// Bytes already fetched by an interrupted transfer.
    pub fn partial_size(&self, model: &ModelDefinition) -> u64 {
        std::fs::metadata(self.partial_path(model))
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Human-readable size: real size when downloaded, catalog estimate otherwise.
    pub fn size_label(&self, model: &ModelDefinition) -> String {
        match self.file_size(model) {
            Some(bytes) => format_file_size(bytes),
            None => model.approx_size.to_string(),
        }
    }

    /// Delete a downloaded model file and any partial transfer.
    pub fn delete(&self, model: &ModelDefinition) -> Result<(), OpponentError> {
        let path = self.model_path(model);
        if path.exists() {
            std::fs::remove_file(&path)?;
            log::info!("[MODEL] Deleted: {}", path.display());
        }
        let partial = self.partial_path(model);
        if partial.exists() {
            let _ = std::fs::remove_file(&partial);
        }
        Ok(())
    }
}

/// `<path>.part` for a final artifact path.
pub fn partial_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Verify a downloaded model's integrity via SHA-256.
///
/// Reads the file in 8 MB chunks to avoid loading a multi-GB artifact into memory.
pub fn verify_model_hash(path: &Path, expected_hash: &str) -> Result<(), OpponentError> {
    if expected_hash.is_empty() {
        return Ok(());
    }

    use std::io::Read;
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 8 * 1024 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let hash = format!("{:x}", hasher.finalize());
    if !hash.eq_ignore_ascii_case(expected_hash) {
        return Err(OpponentError::ModelLoadFailed(format!(
            "Hash mismatch: expected {}, got {}",
            expected_hash, hash
        )));
    }

    Ok(())
}

/// Format bytes with decimal units, e.g. "1.5 GB".
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1000 {
        return format!("{} bytes", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = "bytes";
    for u in UNITS {
        if value < 1000.0 {
            break;
        }
        value /= 1000.0;
        unit = u;
    }
    if unit == "KB" {
        format!("{:.0} {}", value, unit)
    } else {
        format!("{:.1} {}", value, unit)
    }
}
