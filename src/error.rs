//! Error types for metadata acquisition, CRUD calls and form state.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::ValidationErrorMap;

/// A failed network exchange.
///
/// Cloneable so that one coalesced failure can be handed to every caller
/// waiting on the same fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("request to {url} failed: {message}")]
pub struct TransportError {
    pub url: String,
    /// HTTP status when the server answered, `None` for connection failures.
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn new(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// Errors while acquiring or parsing a schema document.
#[derive(Debug, Clone, Error)]
pub enum MetadataError {
    // IO errors (exit code 3)
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {message}")]
    ReadError { path: PathBuf, message: String },

    // Document errors (exit code 2)
    #[error("invalid metadata XML: {message}")]
    InvalidXml { message: String },

    #[error("invalid metadata document: {message}")]
    InvalidDocument { message: String },

    #[error("entity type \"{entity}\" not found in metadata of {endpoint}")]
    EntityNotFound { endpoint: String, entity: String },
}

impl MetadataError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            MetadataError::Transport(_)
            | MetadataError::FileNotFound { .. }
            | MetadataError::ReadError { .. } => 3,
            _ => 2,
        }
    }

    /// True when the document was fine but did not describe the entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MetadataError::EntityNotFound { .. })
    }
}

/// Errors returned by the CRUD client.
///
/// `Validation` is the recoverable case: its map is meant to be pushed onto
/// the owning form field by field. Everything else is an opaque failure with
/// a human-readable message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CrudError {
    #[error("validation failed with {} error(s)", errors.len())]
    Validation { errors: ValidationErrorMap },

    #[error("{entity}({key}) not found")]
    NotFound { entity: String, key: String },

    #[error("request failed with status {status}: {message}")]
    Request { status: u16, message: String },

    #[error("invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CrudError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            CrudError::Validation { .. } => 1,
            CrudError::Transport(_) => 3,
            _ => 2,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, CrudError::Validation { .. })
    }

    /// The normalized field map, if this is a validation failure.
    pub fn validation_errors(&self) -> Option<&ValidationErrorMap> {
        match self {
            CrudError::Validation { errors } => Some(errors),
            _ => None,
        }
    }
}

/// Errors raised by the form state engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("unknown field: {key}")]
    UnknownField { key: String },

    #[error("invalid validation schema: {message}")]
    InvalidSchema { message: String },
}

/// Errors raised by the field registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown field: {key}")]
    UnknownField { key: String },
}
