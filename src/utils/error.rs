//! Error types and handling
//!
//! `PkiError` covers the certificate lifecycle (request parsing, key and
//! certificate generation, persistence). `AgentError` is the surface error of
//! the remote agent and is converted to a JSON response.

use std::io;
use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Minimum accepted RSA modulus size in bits
pub const MIN_RSA_KEY_SIZE: usize = 2048;
/// Maximum accepted RSA modulus size in bits
pub const MAX_RSA_KEY_SIZE: usize = 8192;

/// Certificate lifecycle errors
#[derive(Debug, Error)]
pub enum PkiError {
    #[error("open file {path:?}: {source}")]
    OpenFile { path: PathBuf, source: io::Error },

    #[error("read file {path:?}: {source}")]
    ReadFile { path: PathBuf, source: io::Error },

    #[error("invalid extension: {0:?}")]
    InvalidExtension(PathBuf),

    #[error("parse certificate request {path:?}: {message}")]
    ParseDescriptor { path: PathBuf, message: String },

    #[error("missing mandatory field: {0}")]
    MissingMandatoryField(String),

    #[error("invalid key usages: {0}")]
    InvalidKeyUsage(String),

    #[error("invalid ext key usages: {0}")]
    InvalidExtKeyUsage(String),

    #[error("invalid ip addresses: {0}")]
    InvalidIpAddress(String),

    #[error("invalid duration for {field}: {value}")]
    InvalidDuration { field: String, value: String },

    #[error("RSA key size too weak, minimum is {}", MIN_RSA_KEY_SIZE)]
    RsaKeySizeTooWeak,

    #[error("RSA key size too big, maximum is {}", MAX_RSA_KEY_SIZE)]
    RsaKeySizeTooBig,

    #[error("unsupported ecdsa key size: {0}")]
    UnsupportedEcdsaKeySize(i64),

    #[error("unsupported private key algorithm: {0}")]
    UnsupportedPrivateKeyAlgorithm(String),

    #[error("key generation: {0}")]
    KeyGeneration(String),

    #[error("encode private key: {0}")]
    EncodePrivateKey(String),

    #[error("generate key: {0}")]
    GenerateKey(Box<PkiError>),

    #[error("generate serial number: {0}")]
    GenerateSerialNumber(String),

    #[error("generate cert: {0}")]
    GenerateCert(Box<PkiError>),

    #[error("sign certificate: {0}")]
    Sign(String),

    #[error("invalid validity period: {0}")]
    InvalidValidity(String),

    #[error("copy CA: {0}")]
    CopyCa(Box<PkiError>),

    #[error("load issuer key pair: {0}")]
    LoadIssuerKeyPair(String),

    #[error("parse issuer certificate: {0}")]
    ParseIssuerCertificate(String),

    #[error("create file {path:?}: {source}")]
    CreateFile { path: PathBuf, source: io::Error },

    #[error("create directory {path:?}: {source}")]
    CreateDirectory { path: PathBuf, source: io::Error },

    #[error("write file {path:?}: {source}")]
    WriteFile { path: PathBuf, source: io::Error },

    #[error("encode: {0}")]
    Encode(String),

    #[error("invalid PEM block")]
    InvalidPemBlock,

    #[error("parse certificate: {0}")]
    ParseCertificate(String),

    #[error("read directory {path:?}: {source}")]
    ReadDir { path: PathBuf, source: io::Error },
}

impl PkiError {
    /// Deepest cause behind the `GenerateKey`, `GenerateCert` and `CopyCa` wrappers
    pub fn root_cause(&self) -> &PkiError {
        let mut current = self;
        loop {
            match current {
                PkiError::GenerateKey(inner)
                | PkiError::GenerateCert(inner)
                | PkiError::CopyCa(inner) => current = inner.as_ref(),
                _ => return current,
            }
        }
    }

    pub(crate) fn generate_key(err: PkiError) -> Self {
        PkiError::GenerateKey(Box::new(err))
    }

    pub(crate) fn generate_cert(err: PkiError) -> Self {
        PkiError::GenerateCert(Box::new(err))
    }

    pub(crate) fn copy_ca(err: PkiError) -> Self {
        PkiError::CopyCa(Box::new(err))
    }
}

/// Result type alias for the certificate lifecycle
pub type PkiResult<T> = Result<T, PkiError>;

/// Remote agent errors
///
/// Internal failures are reported without detail; only argument errors carry
/// a message back to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    /// Caller-correctable input problem (400)
    #[error("{0}")]
    InvalidArgument(String),

    /// Anything else (500)
    #[error("Internal server error")]
    Internal,
}

/// Error response body
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            AgentError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "invalid_argument"),
            AgentError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        let body = ErrorResponse::new(error_type, self.to_string());

        (status, Json(body)).into_response()
    }
}

impl From<axum::extract::rejection::JsonRejection> for AgentError {
    fn from(err: axum::extract::rejection::JsonRejection) -> Self {
        error!(error = %err, "Rejected store certificate payload");
        AgentError::InvalidArgument(err.body_text())
    }
}

/// Result type alias for agent handlers
pub type AgentResult<T> = Result<T, AgentError>;
