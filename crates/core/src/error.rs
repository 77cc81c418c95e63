//! Unified error types for the permanent cache.
//!
//! Every variant is cheap to clone so a single outcome can be fanned out to
//! all callers coalesced onto the same item or group.

use std::sync::Arc;

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the cache engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The relational index has no connection to run against.
    #[error("MISSING_EXECUTION_CONTEXT")]
    MissingExecutionContext,

    /// No cache group exists for the given key.
    #[error("CANNOT_FIND_CACHE_GROUP: {0}")]
    CannotFindCacheGroup(String),

    /// No cache item exists for the given key and variant.
    #[error("CANNOT_FIND_CACHE_ITEM: {0}")]
    CannotFindCacheItem(String),

    /// The URL could not be mapped to an item key.
    #[error("UNABLE_TO_DETERMINE_ITEM_KEY: {0}")]
    UnableToDetermineItemKey(String),

    /// Creating or loading a cache item row failed.
    #[error("FAILURE_FETCH_OR_CREATE_CACHE_ITEM: {0}")]
    FailureFetchOrCreateCacheItem(String),

    /// Creating or loading a cache group row failed.
    #[error("FAILURE_FETCH_OR_CREATE_CACHE_GROUP: {0}")]
    FailureFetchOrCreateCacheGroup(String),

    /// At least one item of a group add or remove failed.
    #[error("AT_LEAST_ONE_ITEM_FAILED_IN_FILE_WRITER")]
    AtLeastOneItemFailedInFileWriter,

    /// At least one item of a group sync failed.
    #[error("AT_LEAST_ONE_ITEM_FAILED_IN_SYNC")]
    AtLeastOneItemFailedInSync,

    /// Every request of an image batch failed to be recorded.
    #[error("BATCH_INSERT_FAILURE")]
    BatchInsertFailure,

    /// Network or transport failure from the fetcher.
    #[error("FETCH_FAILED: {0}")]
    Fetch(String),

    /// Non-success HTTP status.
    #[error("HTTP_ERROR: {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// The server answered 304 for a conditional request.
    #[error("NOT_MODIFIED")]
    NotModified,

    /// The remote resource does not exist (404).
    #[error("DOES_NOT_EXIST: {0}")]
    DoesNotExist(String),

    /// The work was cancelled through its group key.
    #[error("CANCELLED: {0}")]
    Cancelled(String),

    /// Invalid input parameters.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// File name rejected by the file store.
    #[error("INVALID_FILE_NAME: {0}")]
    InvalidFileName(String),

    /// File store I/O failed.
    #[error("IO_ERROR: {0}")]
    Io(Arc<std::io::Error>),

    /// Header or resource payload could not be (de)serialized.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(Arc<tokio_rusqlite::Error>),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Configuration could not be loaded or is invalid.
    #[error("CONFIG_ERROR: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error came from cancelling the owning group.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::MissingExecutionContext,
            tokio_rusqlite::Error::Close(c) => Error::Database(Arc::new(tokio_rusqlite::Error::Close(c))),
            _ => Error::MissingExecutionContext,
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        match err {
            tokio_rusqlite::Error::ConnectionClosed => Error::MissingExecutionContext,
            other => Error::Database(Arc::new(other)),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(Arc::new(tokio_rusqlite::Error::Error(err)))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::InvalidInput(_) | Error::InvalidFileName(_) | Error::UnableToDetermineItemKey(_) => -32602,
            Error::CannotFindCacheGroup(_) | Error::CannotFindCacheItem(_) | Error::DoesNotExist(_) => -32001,
            Error::Cancelled(_) => -32002,
            Error::Fetch(_) | Error::HttpStatus { .. } | Error::NotModified => -32003,
            Error::Database(_) | Error::MigrationFailed(_) | Error::MissingExecutionContext => -32603,
            Error::FailureFetchOrCreateCacheItem(_)
            | Error::FailureFetchOrCreateCacheGroup(_)
            | Error::AtLeastOneItemFailedInFileWriter
            | Error::AtLeastOneItemFailedInSync
            | Error::BatchInsertFailure
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Config(_) => -32000,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}
