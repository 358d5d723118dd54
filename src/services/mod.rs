//! Certificate lifecycle services

pub mod agent;
pub mod certificate;
pub mod evaluator;
pub mod issuer;
pub mod keygen;
pub mod manager;
pub mod pem_store;
pub mod scheduler;
pub mod watcher;

pub use agent::AgentService;
pub use certificate::generate_certificate;
pub use evaluator::{evaluate, renewal_due, Decision};
pub use issuer::{copy_ca, load_issuer, Issuer};
pub use keygen::{generate_private_key, GeneratedKey, KeyAlgorithm};
pub use manager::{CertificateManager, HandleOutcome, ScanSummary};
pub use pem_store::{
    load_certificate, ContentAwarePemStore, DirectoryLister, FilePemWriter, FsDirectoryLister,
    PemStore, PemWriter, StoredCertificate, WriteOutcome,
};
pub use scheduler::start_certificate_scheduler;
pub use watcher::start_certificate_watcher;
