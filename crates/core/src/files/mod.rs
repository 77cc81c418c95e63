//! Content and header files of persisted responses.
//!
//! Each item variant is stored as two files named after its unique file
//! name: the body, and `<name>__Header` holding the response headers as a
//! JSON object. The pair is written as one unit: if either half fails the
//! other is rolled back.

pub mod store;
pub mod writer;

use std::sync::Arc;

use bytes::Bytes;

use crate::Error;
use crate::fetch::{Headers, header_value};
use crate::keys::ItemKeyAndVariant;

pub use store::{DiskFileStore, FileStore};
pub use writer::FileWriter;

/// How a response pair is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Keep files that already exist.
    Create,
    /// Overwrite in place.
    Replace,
}

/// A response read back from the file store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedResponse {
    pub headers: Headers,
    pub body: Bytes,
}

impl PersistedResponse {
    pub fn etag(&self) -> Option<&str> {
        header_value(&self.headers, "etag")
    }
}

/// Reads and writes header/content pairs on a [`FileStore`].
#[derive(Clone)]
pub struct PersistedResponses {
    store: Arc<dyn FileStore>,
}

impl PersistedResponses {
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        Self { store }
    }

    /// Write headers and body for an item variant.
    pub async fn write(
        &self, key: &ItemKeyAndVariant, headers: &Headers, body: Bytes, mode: WriteMode,
    ) -> Result<(), Error> {
        let name = key.unique_file_name();
        let header_name = key.unique_header_file_name();
        let header_bytes = Bytes::from(serde_json::to_vec(headers)?);

        // Each half reports whether this call wrote it; only those are rolled back.
        let (header_result, content_result) = match mode {
            WriteMode::Create => tokio::join!(
                self.store.create(&header_name, header_bytes),
                self.store.create(&name, body)
            ),
            WriteMode::Replace => {
                let (h, c) = tokio::join!(
                    self.store.replace(&header_name, header_bytes),
                    self.store.replace(&name, body)
                );
                (h.map(|()| true), c.map(|()| true))
            }
        };

        match (header_result, content_result) {
            (Ok(_), Ok(_)) => Ok(()),
            (Ok(wrote_header), Err(e)) => {
                if wrote_header {
                    self.rollback(&header_name).await;
                }
                Err(e)
            }
            (Err(e), Ok(wrote_content)) => {
                if wrote_content {
                    self.rollback(&name).await;
                }
                Err(e)
            }
            (Err(e), Err(_)) => Err(e),
        }
    }

    async fn rollback(&self, name: &str) {
        if let Err(e) = self.store.delete(name).await {
            tracing::warn!(name, error = %e, "failed to roll back partial write");
        }
    }

    /// Read a stored pair. Returns `None` unless both files exist.
    pub async fn read(&self, key: &ItemKeyAndVariant) -> Result<Option<PersistedResponse>, Error> {
        let (header_name, name) = (key.unique_header_file_name(), key.unique_file_name());
        let (headers, body) = tokio::join!(self.store.read(&header_name), self.store.read(&name));

        match (headers?, body?) {
            (Some(headers), Some(body)) => {
                let headers: Headers = serde_json::from_slice(&headers)?;
                Ok(Some(PersistedResponse { headers, body }))
            }
            _ => Ok(None),
        }
    }

    /// Stored headers only.
    pub async fn read_headers(&self, key: &ItemKeyAndVariant) -> Result<Option<Headers>, Error> {
        match self.store.read(&key.unique_header_file_name()).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete both files. Missing files are not an error.
    pub async fn remove(&self, key: &ItemKeyAndVariant) -> Result<(), Error> {
        let (header_name, name) = (key.unique_header_file_name(), key.unique_file_name());
        let (header_result, content_result) = tokio::join!(self.store.delete(&header_name), self.store.delete(&name));
        header_result?;
        content_result
    }
}
