//! Certificate state evaluation
//!
//! Decides what to do with the output certificate of a request by reading it
//! back from disk and comparing its expiry with the renewal window.

use std::io;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::CertificateRequest;
use crate::services::pem_store::load_certificate;
use crate::utils::PkiError;

/// What to do with the output certificate of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No certificate on disk yet
    Generate,
    /// A file exists but does not hold a readable certificate
    Regenerate { reason: String },
    /// The renewal window has been reached
    Renew { not_after: DateTime<Utc> },
    /// Valid and not yet due
    UpToDate { not_after: DateTime<Utc> },
}

impl Decision {
    /// Whether key and certificate have to be (re)issued
    pub fn requires_issuance(&self) -> bool {
        !matches!(self, Decision::UpToDate { .. })
    }
}

/// Evaluate the certificate at `req.out_cert_path` at instant `now`
pub fn evaluate(req: &CertificateRequest, now: DateTime<Utc>) -> Decision {
    evaluate_path(&req.out_cert_path, req.renew_before, now)
}

/// Evaluate the certificate stored at `path`
pub fn evaluate_path(path: &Path, renew_before: Duration, now: DateTime<Utc>) -> Decision {
    match load_certificate(path) {
        Ok(stored) if renewal_due(stored.not_after, now, renew_before) => Decision::Renew {
            not_after: stored.not_after,
        },
        Ok(stored) => Decision::UpToDate {
            not_after: stored.not_after,
        },
        Err(PkiError::ReadFile { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            Decision::Generate
        }
        Err(err) => Decision::Regenerate {
            reason: err.to_string(),
        },
    }
}

/// Whether a certificate expiring at `not_after` must be renewed at `now`
///
/// The boundary is inclusive: a certificate expiring exactly at
/// `now + renew_before` is renewed.
pub fn renewal_due(not_after: DateTime<Utc>, now: DateTime<Utc>, renew_before: Duration) -> bool {
    match chrono::Duration::from_std(renew_before)
        .ok()
        .and_then(|window| now.checked_add_signed(window))
    {
        Some(deadline) => not_after <= deadline,
        // A window too large to represent covers every certificate
        None => true,
    }
}
