//! Content-addressed blob storage on the local filesystem.
//!
//! Bytes live at `<root>/<first two hex chars>/<sha256 hex>`. The handle is
//! the hex digest, so storing identical bytes twice yields the same handle
//! and a single file.

use std::path::{Path, PathBuf};

use assay_core::blob::{ArtifactHandle, BlobStore};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct FsBlobStore {
  root: PathBuf,
}

impl FsBlobStore {
  /// Use `root` as the storage directory, creating it if needed.
  pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
    let root = root.as_ref().to_path_buf();
    fs::create_dir_all(&root).await?;
    Ok(Self { root })
  }

  fn path_for(&self, handle: &ArtifactHandle) -> Result<PathBuf> {
    let key = handle.as_str();
    if key.len() != 64 || !key.bytes().all(|b| b.is_ascii_hexdigit()) {
      return Err(Error::InvalidHandle(key.to_owned()));
    }
    Ok(self.root.join(&key[..2]).join(key))
  }
}

impl BlobStore for FsBlobStore {
  type Error = Error;

  async fn store(&self, bytes: Bytes) -> Result<ArtifactHandle> {
    let handle = ArtifactHandle::new(hex::encode(Sha256::digest(&bytes)));
    let path = self.path_for(&handle)?;
    if fs::try_exists(&path).await? {
      return Ok(handle);
    }
    if let Some(dir) = path.parent() {
      fs::create_dir_all(dir).await?;
    }
    // Readers must never see a partial file.
    let partial = path.with_extension("partial");
    fs::write(&partial, &bytes).await?;
    fs::rename(&partial, &path).await?;
    debug!(%handle, size = bytes.len(), "blob stored");
    Ok(handle)
  }

  async fn retrieve(&self, handle: &ArtifactHandle) -> Result<Bytes> {
    let path = self.path_for(handle)?;
    match fs::read(&path).await {
      Ok(data) => Ok(Bytes::from(data)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        Err(Error::NotFound(handle.to_string()))
      }
      Err(e) => Err(e.into()),
    }
  }

  async fn delete(&self, handle: &ArtifactHandle) -> Result<()> {
    let path = self.path_for(handle)?;
    match fs::remove_file(&path).await {
      Ok(()) => {
        debug!(%handle, "blob deleted");
        Ok(())
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }
}
