//! Content-addressed artifact storage.
//!
//! Artifact bytes are stored under `root/<aa>/<sha256-hex>` where `<aa>` is
//! the first hash byte, and referenced from records as
//! `blob:sha256-<hex>`. Writes go through a `.tmp` sibling and a rename so
//! a crash never leaves a partial blob under its final name.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use strato_core::StratoError;

/// Scheme prefix for content-addressed references.
pub const BLOB_SCHEME: &str = "blob:sha256-";

pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open (creating if needed) a blob store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StratoError> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| StratoError::Dependency(format!("create blob dir: {e}")))?;
        Ok(Self { root })
    }

    /// Store bytes, returning their `blob:sha256-<hex>` reference.
    pub fn put(&self, bytes: &[u8]) -> Result<String, StratoError> {
        let digest = hash_hex(bytes);
        let dest = self.shard_path(&digest);
        if dest.exists() {
            return Ok(format!("{BLOB_SCHEME}{digest}"));
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StratoError::Dependency(format!("create blob shard: {e}")))?;
        }
        let tmp = dest.with_extension("tmp");
        std::fs::write(&tmp, bytes)
            .map_err(|e| StratoError::Dependency(format!("write blob: {e}")))?;
        std::fs::rename(&tmp, &dest)
            .map_err(|e| StratoError::Dependency(format!("rename blob: {e}")))?;
        Ok(format!("{BLOB_SCHEME}{digest}"))
    }

    /// Move an already-hashed staged file into the store.
    ///
    /// Used by the uploader, which hashes while streaming to staging. Falls
    /// back to copy+remove when staging and blob root sit on different
    /// filesystems.
    pub fn import(&self, staged: &Path, digest: &str) -> Result<String, StratoError> {
        let dest = self.shard_path(digest);
        if dest.exists() {
            let _ = std::fs::remove_file(staged);
            return Ok(format!("{BLOB_SCHEME}{digest}"));
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StratoError::Dependency(format!("create blob shard: {e}")))?;
        }
        if std::fs::rename(staged, &dest).is_err() {
            std::fs::copy(staged, &dest)
                .map_err(|e| StratoError::Dependency(format!("copy blob: {e}")))?;
            let _ = std::fs::remove_file(staged);
        }
        Ok(format!("{BLOB_SCHEME}{digest}"))
    }

    /// Resolve a reference to the on-disk artifact path.
    pub fn path_for(&self, reference: &str) -> Result<PathBuf, StratoError> {
        let digest = parse_ref(reference)?;
        let path = self.shard_path(digest);
        if !path.exists() {
            return Err(StratoError::NotFound(format!("blob {reference}")));
        }
        Ok(path)
    }

    pub fn read(&self, reference: &str) -> Result<Vec<u8>, StratoError> {
        let path = self.path_for(reference)?;
        std::fs::read(&path).map_err(|e| StratoError::Dependency(format!("read blob: {e}")))
    }

    pub fn contains(&self, reference: &str) -> bool {
        parse_ref(reference)
            .map(|digest| self.shard_path(digest).exists())
            .unwrap_or(false)
    }

    /// Remove a blob. Returns whether anything was deleted.
    pub fn delete(&self, reference: &str) -> Result<bool, StratoError> {
        let digest = parse_ref(reference)?;
        let path = self.shard_path(digest);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)
            .map_err(|e| StratoError::Dependency(format!("delete blob: {e}")))?;
        Ok(true)
    }

    fn shard_path(&self, digest: &str) -> PathBuf {
        let shard = &digest[..2.min(digest.len())];
        self.root.join(shard).join(digest)
    }
}

/// sha-256 hex digest of a byte slice.
pub fn hash_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn parse_ref(reference: &str) -> Result<&str, StratoError> {
    reference.strip_prefix(BLOB_SCHEME).ok_or_else(|| {
        StratoError::InvalidArgument(format!("not a blob reference: {reference}"))
    })
}
