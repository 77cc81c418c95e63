//! Core of the permanent cache.
//!
//! This crate provides:
//! - Item key and unique file name derivation
//! - A content-addressed file store for response bodies and headers
//! - The SQLite relational index of cache groups and items
//! - The gatekeeper that coalesces and orders concurrent workflows
//! - Article and image index writers, the file writer and the controller
//! - A fallback-serving fetcher and an in-memory LRU
//! - Unified error types and configuration

pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod fetch;
pub mod files;
pub mod gatekeeper;
pub mod keys;
pub mod memory;
pub mod tasks;
pub mod transport;
pub mod writers;

#[cfg(test)]
mod testing;

pub use cache::CacheDb;
pub use config::AppConfig;
pub use controller::CacheController;
pub use error::Error;
pub use fetch::{FetchRequest, FetchResponse, Fetcher, ResourceResolver};
pub use files::{DiskFileStore, FileStore, FileWriter};
pub use gatekeeper::Gatekeeper;
pub use keys::{ItemKeyAndVariant, KeyDeriver, PersistItemType};
pub use memory::MemoryCache;
pub use transport::PersistentUrlCache;
pub use writers::{ArticleDbWriter, ImageDbWriter};
