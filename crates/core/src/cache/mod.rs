//! SQLite-backed relational index of cache groups and cache items.
//!
//! This module tracks which items exist, which variant of each was
//! downloaded, and which groups reference them. It uses tokio-rusqlite so
//! every statement runs on one background thread:
//!
//! - Fetch-or-create semantics for groups and items (never duplicated)
//! - Must-have vs nice-to-have group membership
//! - Reference-counted item deletion through group membership
//! - Automatic schema migrations and WAL mode

pub mod connection;
pub mod groups;
pub mod items;
pub mod migrations;

pub use crate::Error;

pub use connection::CacheDb;
pub use groups::{CacheGroup, GroupMember};
pub use items::{CacheItem, NewItem};
