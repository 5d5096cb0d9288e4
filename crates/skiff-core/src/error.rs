// Copyright 2026 The Skiff Authors
// SPDX-License-Identifier: Apache-2.0

//! Error types for Skiff with S3-compatible error codes.

use thiserror::Error;

/// A specialized `Result` type for Skiff operations.
pub type Result<T> = std::result::Result<T, Error>;

/// S3-compatible error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S3ErrorCode {
    /// Access denied.
    AccessDenied,
    /// The XML you provided was not well-formed or did not validate
    /// against our published schema.
    MalformedXML,
    /// The specified argument is not valid.
    InvalidArgument,
    /// The specified bucket does not exist.
    NoSuchBucket,
    /// The specified key does not exist.
    NoSuchKey,
    /// The replication configuration was not found.
    ReplicationConfigurationNotFound,
    /// Internal server error.
    InternalError,
    /// Service is unable to handle the request right now.
    SlowDown,
}

impl S3ErrorCode {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::AccessDenied => 403,
            Self::NoSuchBucket | Self::NoSuchKey | Self::ReplicationConfigurationNotFound => 404,
            Self::MalformedXML | Self::InvalidArgument => 400,
            Self::InternalError => 500,
            Self::SlowDown => 503,
        }
    }

    /// Returns the HTTP status code as an `http::StatusCode`.
    #[must_use]
    pub fn status_code(&self) -> http::StatusCode {
        http::StatusCode::from_u16(self.http_status())
            .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Returns the S3 error code string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AccessDenied => "AccessDenied",
            Self::MalformedXML => "MalformedXML",
            Self::InvalidArgument => "InvalidArgument",
            Self::NoSuchBucket => "NoSuchBucket",
            Self::NoSuchKey => "NoSuchKey",
            Self::ReplicationConfigurationNotFound => "ReplicationConfigurationNotFound",
            Self::InternalError => "InternalError",
            Self::SlowDown => "SlowDown",
        }
    }
}

impl std::fmt::Display for S3ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur during Skiff operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An S3 API error with a specific error code.
    #[error("{code}: {message}")]
    S3 {
        /// The S3 error code.
        code: S3ErrorCode,
        /// A human-readable error message.
        message: String,
        /// The resource that caused the error (bucket name, key, etc.).
        resource: Option<String>,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Creates a new S3 error.
    #[must_use]
    pub fn s3(code: S3ErrorCode, message: impl Into<String>) -> Self {
        Self::S3 { code, message: message.into(), resource: None }
    }

    /// Creates a new S3 error with a resource.
    #[must_use]
    pub fn s3_with_resource(
        code: S3ErrorCode,
        message: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self::S3 { code, message: message.into(), resource: Some(resource.into()) }
    }

    /// Returns the S3 error code, if this is an S3 error.
    #[must_use]
    pub const fn s3_error_code(&self) -> Option<S3ErrorCode> {
        match self {
            Self::S3 { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::S3 { code, .. } => code.http_status(),
            Self::InvalidRequest(_) => 400,
            Self::Io(_) => 500,
        }
    }
}
