//! Test world for Cucumber scenarios

use std::fs;
use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::http::Request;
use cucumber::World;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use x509_parser::extensions::KeyUsage;
use x509_parser::parse_x509_certificate;
use x509_parser::x509::X509Name;

use certkeeper::models::SubjectDefaults;
use certkeeper::services::{CertificateManager, HandleOutcome};
use certkeeper::{api, AgentState};

pub const ISSUER_COMMON_NAME: &str = "Scenario Issuing CA";

/// Test world that maintains state across scenario steps
#[derive(Debug, Default, World)]
pub struct TestWorld {
    /// Scratch directory of the scenario
    pub workspace: Option<TempDir>,

    /// Descriptor being built by the Given steps
    pub descriptor: Value,

    /// Directory of the issuing CA, once created
    pub issuer_dir: Option<PathBuf>,

    /// Outcome of the last handled request
    pub outcome: Option<HandleOutcome>,

    /// Response from the last agent call
    pub last_response: Option<AgentResponse>,
}

#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub status: u16,
    pub body: Value,
}

/// What the scenarios check on an issued certificate
#[derive(Debug)]
pub struct CertificateView {
    pub subject_cn: Option<String>,
    pub issuer_cn: Option<String>,
    pub is_ca: bool,
    pub key_usage: Option<KeyUsage>,
    pub server_auth: bool,
    pub client_auth: bool,
}

impl TestWorld {
    /// Scenario root, created on first use
    pub fn root(&mut self) -> PathBuf {
        self.workspace
            .get_or_insert_with(|| TempDir::new().expect("Failed to create temp dir"))
            .path()
            .to_path_buf()
    }

    pub fn out_dir(&mut self) -> PathBuf {
        self.root().join("out")
    }

    pub fn requests_dir(&mut self) -> PathBuf {
        let dir = self.root().join("requests");
        fs::create_dir_all(&dir).expect("Failed to create requests dir");
        dir
    }

    /// Start a descriptor writing into the scenario output directory
    pub fn new_request(&mut self, common_name: &str) {
        let out = self.out_dir();
        self.descriptor = json!({
            "out": { "dir": out.display().to_string() },
            "commonName": common_name,
            "duration": "8760h",
            "renewBefore": "720h",
            "privateKey": { "algorithm": "ecdsa", "size": 256 },
        });
    }

    /// Write the current descriptor and let the manager handle it
    pub fn handle_request(&mut self) -> HandleOutcome {
        let dir = self.requests_dir();
        let path = dir.join("request.yaml");
        let yaml = serde_norway::to_string(&self.descriptor).expect("Failed to encode YAML");
        fs::write(&path, yaml).expect("Failed to write request");

        let manager = CertificateManager::new(SubjectDefaults::default(), vec![dir]);
        let outcome = manager.handle_certificate_request_file(&path);
        self.outcome = Some(outcome.clone());
        outcome
    }

    /// Create a self-signed CA under the scenario root
    pub fn create_issuer(&mut self) -> PathBuf {
        let dir = self.root().join("issuer");
        fs::create_dir_all(&dir).expect("Failed to create issuer dir");

        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384).expect("CA key");
        let mut params = CertificateParams::default();
        params.distinguished_name = rcgen::DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, ISSUER_COMMON_NAME);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).expect("CA certificate");

        fs::write(dir.join("ca.crt"), cert.pem()).expect("Failed to write CA certificate");
        fs::write(dir.join("ca.key"), key.serialize_pem()).expect("Failed to write CA key");
        self.issuer_dir = Some(dir.clone());
        dir
    }

    pub fn certificate(&mut self) -> CertificateView {
        let path = self.out_dir().join("tls.crt");
        read_certificate(&path)
    }

    /// Send a store request through the agent router
    pub async fn push_to_agent(&mut self, payload: Value) {
        let router = api::create_router(AgentState::default());
        let request = Request::builder()
            .method("POST")
            .uri("/v1/certificates")
            .header("Content-Type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();

        let response = router.oneshot(request).await.expect("Failed to execute request");
        let status = response.status().as_u16();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");

        self.last_response = Some(AgentResponse {
            status,
            body: serde_json::from_slice(&bytes).unwrap_or(Value::Null),
        });
    }

    pub fn response(&self) -> &AgentResponse {
        self.last_response.as_ref().expect("No response available")
    }
}

fn read_certificate(path: &Path) -> CertificateView {
    let data = fs::read(path).expect("Failed to read certificate");
    let block = ::pem::parse(&data).expect("Certificate is not PEM");
    let (_, cert) = parse_x509_certificate(block.contents()).expect("Invalid certificate");

    let eku = cert
        .extended_key_usage()
        .expect("extended key usage")
        .map(|ext| (ext.value.server_auth, ext.value.client_auth))
        .unwrap_or((false, false));
    let key_usage = cert
        .key_usage()
        .expect("key usage")
        .map(|ext| ext.value.clone());

    CertificateView {
        subject_cn: common_name(cert.subject()),
        issuer_cn: common_name(cert.issuer()),
        is_ca: cert.is_ca(),
        key_usage,
        server_auth: eku.0,
        client_auth: eku.1,
    }
}

fn common_name(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
}
