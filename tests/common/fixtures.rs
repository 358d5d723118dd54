//! Test fixtures for certificate requests and issuers

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use serde_json::{json, Value};
use tempfile::TempDir;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::parse_x509_certificate;
use x509_parser::x509::X509Name;

/// Temporary directory tree used by one test
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Directory holding request descriptors (created on demand)
    pub fn requests_dir(&self) -> PathBuf {
        let dir = self.path().join("requests");
        fs::create_dir_all(&dir).expect("Failed to create requests dir");
        dir
    }

    /// Output directory for the request `name` (not created)
    pub fn out_dir(&self, name: &str) -> PathBuf {
        self.path().join("out").join(name)
    }

    /// Write a descriptor file into the requests directory
    pub fn write_request(&self, file_name: &str, contents: &str) -> PathBuf {
        let path = self.requests_dir().join(file_name);
        fs::write(&path, contents).expect("Failed to write request");
        path
    }

    /// Create a self-signed CA under `<workspace>/issuer`
    pub fn write_issuer(&self) -> PathBuf {
        let dir = self.path().join("issuer");
        fs::create_dir_all(&dir).expect("Failed to create issuer dir");

        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).expect("CA key");
        let mut params = CertificateParams::default();
        params.distinguished_name = rcgen::DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, ISSUER_COMMON_NAME);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            rcgen::KeyUsagePurpose::KeyCertSign,
            rcgen::KeyUsagePurpose::CrlSign,
        ];
        let cert = params.self_signed(&key).expect("CA certificate");

        fs::write(dir.join("ca.crt"), cert.pem()).expect("Failed to write CA certificate");
        fs::write(dir.join("ca.key"), key.serialize_pem()).expect("Failed to write CA key");
        dir
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Common name of the CA created by [`Workspace::write_issuer`]
pub const ISSUER_COMMON_NAME: &str = "Certkeeper Test CA";

/// Certificate request descriptor builder
#[derive(Debug, Clone)]
pub struct RequestFixture {
    value: Value,
}

impl RequestFixture {
    /// A one year leaf request renewed 30 days before expiry
    pub fn new(out_dir: &Path) -> Self {
        Self {
            value: json!({
                "out": { "dir": out_dir.display().to_string() },
                "commonName": "localhost",
                "duration": "8760h",
                "renewBefore": "720h",
            }),
        }
    }

    /// A request without `out.dir`
    pub fn without_out_dir() -> Self {
        Self {
            value: json!({ "commonName": "orphan", "duration": "1h" }),
        }
    }

    pub fn set(mut self, key: &str, value: Value) -> Self {
        self.value[key] = value;
        self
    }

    pub fn private_key(self, algorithm: &str, size: i64) -> Self {
        self.set("privateKey", json!({ "algorithm": algorithm, "size": size }))
    }

    pub fn issuer(self, dir: &Path) -> Self {
        self.set("issuer", json!({ "dir": dir.display().to_string() }))
    }

    pub fn to_yaml(&self) -> String {
        serde_norway::to_string(&self.value).expect("Failed to encode YAML")
    }

    pub fn to_json(&self) -> String {
        self.value.to_string()
    }
}

/// Parsed summary of an issued certificate
#[derive(Debug)]
pub struct IssuedCertificate {
    pub common_name: Option<String>,
    pub issuer_common_name: Option<String>,
    pub is_ca: bool,
    pub digital_signature: bool,
    pub key_encipherment: bool,
    pub key_cert_sign: bool,
    pub server_auth: bool,
    pub client_auth: bool,
    pub dns_names: Vec<String>,
    pub ip_count: usize,
    pub lifetime: Duration,
    pub has_authority_key_id: bool,
}

/// Read and parse the PEM certificate at `path`
pub fn read_certificate(path: &Path) -> IssuedCertificate {
    let data = fs::read(path).expect("Failed to read certificate");
    let block = ::pem::parse(&data).expect("Certificate is not PEM");
    assert_eq!(block.tag(), "CERTIFICATE");
    let (_, cert) = parse_x509_certificate(block.contents()).expect("Invalid certificate");

    let ku = cert.key_usage().expect("key usage").map(|ext| ext.value.clone());
    let eku = cert
        .extended_key_usage()
        .expect("extended key usage")
        .map(|ext| (ext.value.server_auth, ext.value.client_auth));
    let (dns_names, ip_count) = match cert.subject_alternative_name().expect("SAN") {
        Some(san) => {
            let dns = san
                .value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect();
            let ips = san
                .value
                .general_names
                .iter()
                .filter(|name| matches!(name, GeneralName::IPAddress(_)))
                .count();
            (dns, ips)
        }
        None => (Vec::new(), 0),
    };

    let validity = cert.validity();
    let lifetime = (validity.not_after.timestamp() - validity.not_before.timestamp()) as u64;
    let has_authority_key_id = cert
        .iter_extensions()
        .any(|ext| matches!(ext.parsed_extension(), ParsedExtension::AuthorityKeyIdentifier(_)));

    IssuedCertificate {
        common_name: first_cn(cert.subject()),
        issuer_common_name: first_cn(cert.issuer()),
        is_ca: cert.is_ca(),
        digital_signature: ku.as_ref().is_some_and(|ku| ku.digital_signature()),
        key_encipherment: ku.as_ref().is_some_and(|ku| ku.key_encipherment()),
        key_cert_sign: ku.as_ref().is_some_and(|ku| ku.key_cert_sign()),
        server_auth: eku.is_some_and(|(server, _)| server),
        client_auth: eku.is_some_and(|(_, client)| client),
        dns_names,
        ip_count,
        lifetime: Duration::from_secs(lifetime),
        has_authority_key_id,
    }
}

fn first_cn(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
}

/// PEM tag of the first block stored at `path`
pub fn pem_tag(path: &Path) -> String {
    let data = fs::read(path).expect("Failed to read PEM file");
    ::pem::parse(&data).expect("Not a PEM file").tag().to_string()
}
