//! Durable name → bytes storage for response bodies and headers.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

use crate::Error;

/// Key → bytes storage addressed by unique file names.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Write `data` unless the name already exists. Returns whether it wrote.
    async fn create(&self, name: &str, data: Bytes) -> Result<bool, Error>;

    /// Write `data`, overwriting any existing file.
    async fn replace(&self, name: &str, data: Bytes) -> Result<(), Error>;

    /// Read a file. Missing files are `None`.
    async fn read(&self, name: &str) -> Result<Option<Bytes>, Error>;

    /// Delete a file. Missing files are not an error.
    async fn delete(&self, name: &str) -> Result<(), Error>;

    async fn exists(&self, name: &str) -> Result<bool, Error>;
}

/// Flat directory of content-addressed files.
#[derive(Debug, Clone)]
pub struct DiskFileStore {
    root: PathBuf,
}

impl DiskFileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, Error> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names are digests plus an optional suffix; anything else is rejected.
    fn path(&self, name: &str) -> Result<PathBuf, Error> {
        let valid = !name.is_empty()
            && name.len() <= 255
            && !name.starts_with('.')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::InvalidFileName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), Error> {
        let temp_path = path.with_file_name(format!(".tmp.{}", Uuid::new_v4()));
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl FileStore for DiskFileStore {
    #[instrument(skip(self, data), fields(store = "disk", size = data.len()))]
    async fn create(&self, name: &str, data: Bytes) -> Result<bool, Error> {
        let path = self.path(name)?;
        if fs::try_exists(&path).await? {
            return Ok(false);
        }
        self.write_atomic(&path, &data).await?;
        Ok(true)
    }

    #[instrument(skip(self, data), fields(store = "disk", size = data.len()))]
    async fn replace(&self, name: &str, data: Bytes) -> Result<(), Error> {
        let path = self.path(name)?;
        self.write_atomic(&path, &data).await
    }

    #[instrument(skip(self), fields(store = "disk"))]
    async fn read(&self, name: &str) -> Result<Option<Bytes>, Error> {
        let path = self.path(name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(store = "disk"))]
    async fn delete(&self, name: &str) -> Result<(), Error> {
        let path = self.path(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(store = "disk"))]
    async fn exists(&self, name: &str) -> Result<bool, Error> {
        let path = self.path(name)?;
        Ok(fs::try_exists(&path).await?)
    }
}
