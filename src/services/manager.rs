//! Certificate request handling
//!
//! [`CertificateManager`] is the single entry point shared by the scheduler
//! and the watcher. Handling one file never fails the caller: every error is
//! logged at the file boundary and reported through [`HandleOutcome`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::models::{is_supported_descriptor, load_certificate_request, CertificateRequest, SubjectDefaults};
use crate::services::certificate::generate_certificate;
use crate::services::evaluator::{evaluate, Decision};
use crate::services::issuer::{copy_ca, load_issuer};
use crate::services::keygen::generate_private_key;
use crate::services::pem_store::{
    ensure_parent_dir, DirectoryLister, FilePemWriter, FsDirectoryLister, PemWriter,
};
use crate::utils::PkiResult;

/// Result of handling one descriptor file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Extension is not a supported descriptor format
    Unsupported,
    /// The descriptor could not be loaded or validated
    Invalid,
    /// The existing certificate is valid and not due
    UpToDate,
    /// Key and certificate were (re)issued
    Issued(Decision),
    /// Issuance failed
    Failed,
}

/// Counters of one full scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub handled: usize,
    pub issued: usize,
    pub up_to_date: usize,
    pub failed: usize,
}

impl ScanSummary {
    fn record(&mut self, outcome: &HandleOutcome) {
        match outcome {
            HandleOutcome::Unsupported => return,
            HandleOutcome::Issued(_) => self.issued += 1,
            HandleOutcome::UpToDate => self.up_to_date += 1,
            HandleOutcome::Invalid | HandleOutcome::Failed => self.failed += 1,
        }
        self.handled += 1;
    }
}

/// Certificate lifecycle manager
pub struct CertificateManager {
    defaults: SubjectDefaults,
    request_dirs: Vec<PathBuf>,
    writer: Arc<dyn PemWriter>,
    lister: Arc<dyn DirectoryLister>,
}

impl CertificateManager {
    /// Manager writing to and listing the local filesystem
    pub fn new(defaults: SubjectDefaults, request_dirs: Vec<PathBuf>) -> Self {
        Self::with_collaborators(
            defaults,
            request_dirs,
            Arc::new(FilePemWriter),
            Arc::new(FsDirectoryLister),
        )
    }

    pub fn with_collaborators(
        defaults: SubjectDefaults,
        request_dirs: Vec<PathBuf>,
        writer: Arc<dyn PemWriter>,
        lister: Arc<dyn DirectoryLister>,
    ) -> Self {
        Self {
            defaults,
            request_dirs,
            writer,
            lister,
        }
    }

    /// Directories scanned and watched for descriptors
    pub fn request_dirs(&self) -> &[PathBuf] {
        &self.request_dirs
    }

    /// Handle every supported descriptor of every request directory
    ///
    /// A directory that cannot be listed is logged and skipped; the other
    /// directories are still handled.
    pub fn load_certificate_requests(&self) -> ScanSummary {
        let mut summary = ScanSummary::default();

        for dir in &self.request_dirs {
            let files = match self.lister.list_files(dir) {
                Ok(files) => files,
                Err(e) => {
                    error!("Failed to list certificate requests in {:?}: {}", dir, e);
                    continue;
                }
            };

            for file in files {
                let outcome = self.handle_certificate_request_file(&file);
                summary.record(&outcome);
            }
        }

        debug!(
            handled = summary.handled,
            issued = summary.issued,
            up_to_date = summary.up_to_date,
            failed = summary.failed,
            "Certificate request scan complete"
        );
        summary
    }

    /// Load, evaluate and if needed (re)issue the request stored at `path`
    pub fn handle_certificate_request_file(&self, path: &Path) -> HandleOutcome {
        if !is_supported_descriptor(path) {
            debug!("Skipping {:?}: unsupported extension", path);
            return HandleOutcome::Unsupported;
        }

        info!("Handle certificate request {}", path.display());

        let req = match load_certificate_request(path, &self.defaults) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to load certificate request {}: {}", path.display(), e);
                return HandleOutcome::Invalid;
            }
        };

        let decision = evaluate(&req, Utc::now());
        match &decision {
            Decision::UpToDate { not_after } => {
                debug!(
                    "Certificate {} valid until {}",
                    req.out_cert_path.display(),
                    not_after
                );
                return HandleOutcome::UpToDate;
            }
            Decision::Renew { not_after } => {
                info!(
                    %not_after,
                    "Expired certificate {}",
                    req.out_cert_path.display()
                );
            }
            Decision::Regenerate { reason } => {
                warn!("Invalid certificate {}: {}", req.out_cert_path.display(), reason);
            }
            Decision::Generate => {}
        }

        match self.generate_out_files(&req) {
            Ok(()) => HandleOutcome::Issued(decision),
            Err(e) => {
                error!(cause = %e.root_cause(), "Failure: {}", e);
                HandleOutcome::Failed
            }
        }
    }

    /// Issue key and certificate for `req` and copy the issuer certificate
    pub fn generate_out_files(&self, req: &CertificateRequest) -> PkiResult<()> {
        ensure_parent_dir(&req.out_cert_path)?;

        let issuer = load_issuer(&req.issuer_paths).inspect_err(|e| {
            warn!("Invalid issuer {:?}: {}", req.issuer_paths.public_key, e);
        })?;

        info!("Generate key to {}", req.out_key_path.display());
        let key = generate_private_key(req, self.writer.as_ref())?;

        info!("Generate certificate to {}", req.out_cert_path.display());
        generate_certificate(req, &key, issuer.as_ref(), self.writer.as_ref())?;

        if let Some(issuer) = &issuer {
            info!("Copy CA to {}", req.out_ca_path.display());
            copy_ca(issuer, &req.out_ca_path, self.writer.as_ref())?;
        }

        Ok(())
    }
}
