//! Network collaborators for the permanent cache.
//!
//! This crate provides the reqwest-backed [`FetchClient`] and the
//! [`WikiResolver`] that maps an article to the resources it is made of.

pub mod fetch;
pub mod wiki;

pub use fetch::{FetchClient, FetchConfig, canonicalize};
pub use wiki::WikiResolver;
