//! Artifact ingestion.
//!
//! Uploads are staged to a scratch file while the content digest is
//! computed, validated in place, committed to the blob store, and only
//! then recorded. A failure after the blob write compensates by deleting
//! the blob (unless the same content was already stored by an earlier
//! upload). Uploading never enables a plugin.

use crate::validate;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use strato_core::record::PluginRecord;
use strato_core::{Phase, RoutePattern, StratoError};
use strato_store::{BlobStore, PluginStore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Metadata accompanying an uploaded artifact.
#[derive(Debug, Clone, Default)]
pub struct UploadMeta {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub uploaded_by: String,
    pub filename: String,
    pub config: serde_json::Map<String, serde_json::Value>,
    pub priority: u32,
    pub routes: Vec<RoutePattern>,
    pub phase: Phase,
    pub tags: BTreeSet<String>,
}

pub struct Uploader {
    store: Arc<PluginStore>,
    blobs: Arc<BlobStore>,
    staging_dir: PathBuf,
    max_upload_size: u64,
    priority_max: u32,
}

impl Uploader {
    pub fn new(
        store: Arc<PluginStore>,
        blobs: Arc<BlobStore>,
        staging_dir: impl Into<PathBuf>,
        max_upload_size: u64,
        priority_max: u32,
    ) -> Self {
        Self {
            store,
            blobs,
            staging_dir: staging_dir.into(),
            max_upload_size,
            priority_max,
        }
    }

    /// Ingest one artifact, producing a committed (disabled) record.
    pub async fn upload(
        &self,
        meta: UploadMeta,
        content: &[u8],
        cancel: &CancellationToken,
    ) -> Result<PluginRecord, StratoError> {
        ensure_live(cancel)?;

        if meta.name.is_empty() {
            return Err(StratoError::InvalidArgument("plugin name is required".into()));
        }
        if meta.priority > self.priority_max {
            return Err(StratoError::InvalidArgument(format!(
                "priority {} out of range 0..={}",
                meta.priority, self.priority_max
            )));
        }

        // Reject duplicates before doing any I/O.
        if let Some(existing) = self.store.cache().get(&meta.name) {
            return Err(StratoError::Conflict(format!(
                "plugin {} version {} already exists",
                existing.name, existing.version
            )));
        }

        // Stage to disk while hashing.
        std::fs::create_dir_all(&self.staging_dir)
            .map_err(|e| StratoError::Dependency(format!("create staging dir: {e}")))?;
        let mut staged = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&format!(".{}", std::env::consts::DLL_EXTENSION))
            .tempfile_in(&self.staging_dir)
            .map_err(|e| StratoError::Dependency(format!("create staging file: {e}")))?;

        let mut hasher = Sha256::new();
        for chunk in content.chunks(64 * 1024) {
            hasher.update(chunk);
            staged
                .write_all(chunk)
                .map_err(|e| StratoError::Dependency(format!("write staging file: {e}")))?;
        }
        staged
            .flush()
            .map_err(|e| StratoError::Dependency(format!("flush staging file: {e}")))?;
        let digest = hex::encode(hasher.finalize());

        ensure_live(cancel)?;

        // Validate the staged artifact; the staging file is dropped (and
        // removed) on any failure from here on.
        let report = validate::validate(staged.path(), &meta.name, self.max_upload_size)
            .map_err(StratoError::Validation)?;
        for warning in &report.warnings {
            warn!(plugin = %meta.name, warning = %warning, "Upload validation warning");
        }

        ensure_live(cancel)?;

        // Commit the blob. Remember whether the content was already
        // present: a compensating delete must not take out a blob another
        // record shares.
        let already_stored = self
            .blobs
            .contains(&format!("{}{digest}", strato_store::blob::BLOB_SCHEME));
        let staged_path = staged.into_temp_path();
        let binary_ref = self.blobs.import(&staged_path, &digest)?;
        let _ = staged_path.keep();

        let mut record = PluginRecord::new(&meta.name, &meta.version, &binary_ref);
        record.description = meta.description;
        record.author = meta.author;
        record.uploaded_by = meta.uploaded_by;
        record.filename = meta.filename;
        record.file_size = report.file_size;
        record.file_hash = digest;
        record.config = meta.config;
        record.priority = meta.priority;
        record.routes = meta.routes;
        record.phase = meta.phase;
        record.tags = meta.tags;
        record.build = report.toolchain;

        let commit = async {
            ensure_live(cancel)?;
            self.store.save(record).await
        };

        match commit.await {
            Ok(record) => {
                info!(
                    plugin = %record.name,
                    version = %record.version,
                    size = record.file_size,
                    hash = %record.file_hash,
                    "Artifact uploaded"
                );
                Ok(record)
            }
            Err(e) => {
                if !already_stored {
                    if let Err(cleanup) = self.blobs.delete(&binary_ref) {
                        warn!(error = %cleanup, "Failed to clean up orphaned blob");
                    }
                }
                Err(e)
            }
        }
    }
}

pub(crate) fn ensure_live(cancel: &CancellationToken) -> Result<(), StratoError> {
    if cancel.is_cancelled() {
        Err(StratoError::DeadlineExceeded("operation cancelled".into()))
    } else {
        Ok(())
    }
}
