//! Object storage for recording artifacts.
//!
//! This crate provides:
//! - The `ArtifactStore` seam (a single idempotent `put`)
//! - An S3 implementation
//! - Object key and content type helpers for media segments

pub mod client;
pub mod error;
pub mod keys;

pub use client::{ArtifactStore, S3Config, S3Store};
pub use error::{StorageError, StorageResult};
pub use keys::{artifact_key, content_type_for};
