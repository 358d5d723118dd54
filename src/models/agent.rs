//! Remote agent payloads

use serde::{Deserialize, Serialize};

/// Key, certificate and optional CA material to persist on the agent host
///
/// `*_data` fields carry PEM text. An empty string is treated as missing.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct StoreCertificateRequest {
    #[serde(default)]
    pub public_key_path: String,
    #[serde(default)]
    pub public_key_data: String,
    #[serde(default)]
    pub private_key_path: String,
    #[serde(default)]
    pub private_key_data: String,
    #[serde(default)]
    pub ca_path: String,
    #[serde(default)]
    pub ca_data: String,
}

/// Per-file result of a store operation
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Written,
    Unchanged,
    Skipped,
}

/// Response of a successful store operation
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct StoreCertificateResponse {
    pub public_key: FileStatus,
    pub private_key: FileStatus,
    pub ca: FileStatus,
}
