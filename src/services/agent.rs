//! Remote agent store operation

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};

use crate::models::{FileStatus, StoreCertificateRequest, StoreCertificateResponse};
use crate::services::pem_store::{ContentAwarePemStore, PemStore, WriteOutcome};
use crate::utils::{AgentError, AgentResult, PkiError};

/// Persists key material received from a manager
#[derive(Clone)]
pub struct AgentService {
    store: Arc<dyn PemStore>,
}

impl Default for AgentService {
    fn default() -> Self {
        Self::new(Arc::new(ContentAwarePemStore))
    }
}

impl AgentService {
    pub fn new(store: Arc<dyn PemStore>) -> Self {
        Self { store }
    }

    /// Validate `req` and write its public key, private key and CA
    ///
    /// Every payload is checked to be PEM before anything is written. The
    /// CA is only stored when `ca_path` is set.
    pub fn store_certificate(
        &self,
        req: &StoreCertificateRequest,
    ) -> AgentResult<StoreCertificateResponse> {
        validate_request(req)?;

        check_pem(&req.public_key_data, "public_key_data")?;
        check_pem(&req.private_key_data, "private_key_data")?;
        let store_ca = !req.ca_path.is_empty();
        if store_ca {
            check_pem(&req.ca_data, "ca_data")?;
        }

        let public_key = self.store(&req.public_key_data, &req.public_key_path, "public_key_data")?;
        let private_key =
            self.store(&req.private_key_data, &req.private_key_path, "private_key_data")?;
        let ca = if store_ca {
            self.store(&req.ca_data, &req.ca_path, "ca_data")?
        } else {
            FileStatus::Skipped
        };

        Ok(StoreCertificateResponse {
            public_key,
            private_key,
            ca,
        })
    }

    fn store(&self, data: &str, path: &str, field: &str) -> AgentResult<FileStatus> {
        match self.store.store_pem(data.as_bytes(), Path::new(path)) {
            Ok(WriteOutcome::Written) => {
                info!("Stored {} to {}", field, path);
                Ok(FileStatus::Written)
            }
            Ok(WriteOutcome::Unchanged) => Ok(FileStatus::Unchanged),
            Err(PkiError::InvalidPemBlock) => Err(invalid(field)),
            Err(e) => {
                error!("Failed to store {} to {}: {}", field, path, e);
                Err(AgentError::Internal)
            }
        }
    }
}

fn validate_request(req: &StoreCertificateRequest) -> AgentResult<()> {
    let required = [
        (&req.public_key_path, "public_key_path"),
        (&req.public_key_data, "public_key_data"),
        (&req.private_key_path, "private_key_path"),
        (&req.private_key_data, "private_key_data"),
    ];
    if let Some((_, field)) = required.iter().find(|(value, _)| value.is_empty()) {
        return Err(missing(field));
    }
    if !req.ca_path.is_empty() && req.ca_data.is_empty() {
        return Err(missing("ca_data"));
    }
    Ok(())
}

fn check_pem(data: &str, field: &str) -> AgentResult<()> {
    pem::parse(data).map(|_| ()).map_err(|_| invalid(field))
}

fn missing(field: &str) -> AgentError {
    AgentError::InvalidArgument(format!("Missing {}", field))
}

fn invalid(field: &str) -> AgentError {
    AgentError::InvalidArgument(format!("Invalid {}", field))
}
