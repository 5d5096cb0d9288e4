//! Core types and utilities for Skiff object storage.
//!
//! This crate provides the building blocks shared across Skiff components:
//! - Error types with S3-compatible error codes
//! - Common data types (ETag, object metadata, replication status)
//! - Bucket replication configuration: raw wire schema, validation, and
//!   rule matching

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod replication;
pub mod types;

pub use error::{Error, Result, S3ErrorCode};
pub use replication::{
    ConfigError, Destination, MatchedRule, ReplicationConfiguration,
    ReplicationConfigurationDocument, ReplicationRule, RuleStatus, ValidationPolicy,
};
pub use types::{ETag, ObjectMetadata, ReplicationStatus};
