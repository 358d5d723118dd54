//! Certificate request descriptors and their validated form
//!
//! A descriptor is the on-disk YAML/JSON document. `CertificateRequest` is
//! the fully resolved, validated value the lifecycle engine works on.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::{parse_duration, PkiError, PkiResult};

/// File extensions recognised as certificate request descriptors
pub const SUPPORTED_EXTENSIONS: &[&str] = &["yaml", "yml", "json", "toml"];

/// Descriptor field holding the mandatory output directory
pub const KEY_OUT_DIR: &str = "out.dir";

/// Return the descriptor format of `path`, or `InvalidExtension`
pub fn descriptor_extension(path: &Path) -> PkiResult<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| PkiError::InvalidExtension(path.to_path_buf()))?;
    SUPPORTED_EXTENSIONS
        .iter()
        .find(|supported| **supported == ext)
        .copied()
        .ok_or_else(|| PkiError::InvalidExtension(path.to_path_buf()))
}

/// Whether `path` carries a supported descriptor extension
pub fn is_supported_descriptor(path: &Path) -> bool {
    descriptor_extension(path).is_ok()
}

// ----------------------------------------------------------------------------
// Descriptor (serialized form)
// ----------------------------------------------------------------------------

/// Certificate request descriptor as written by operators
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestDescriptor {
    #[serde(default)]
    pub out: OutDescriptor,
    #[serde(default)]
    pub common_name: String,
    #[serde(default, rename = "isCA")]
    pub is_ca: bool,
    /// Validity period, e.g. `8760h`
    #[serde(default)]
    pub duration: Option<String>,
    /// Renewal lead time before expiry, e.g. `720h`
    #[serde(default)]
    pub renew_before: Option<String>,
    #[serde(default)]
    pub key_usages: Vec<String>,
    #[serde(default)]
    pub ext_key_usages: Vec<String>,
    #[serde(default)]
    pub dns_names: Vec<String>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    #[serde(default)]
    pub subject: SubjectDescriptor,
    #[serde(default)]
    pub private_key: PrivateKeyDescriptor,
    #[serde(default)]
    pub issuer: IssuerDescriptor,
}

/// Output location of the generated files
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutDescriptor {
    #[serde(default)]
    pub dir: String,
    #[serde(default = "default_out_cert")]
    pub cert: String,
    #[serde(default = "default_out_key")]
    pub key: String,
    #[serde(default = "default_out_ca")]
    pub ca: String,
}

fn default_out_cert() -> String {
    "tls.crt".to_string()
}

fn default_out_key() -> String {
    "tls.key".to_string()
}

fn default_out_ca() -> String {
    "ca.crt".to_string()
}

impl Default for OutDescriptor {
    fn default() -> Self {
        Self {
            dir: String::new(),
            cert: default_out_cert(),
            key: default_out_key(),
            ca: default_out_ca(),
        }
    }
}

/// Subject fields; an omitted field falls back to the configured default
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectDescriptor {
    #[serde(default)]
    pub countries: Option<Vec<String>>,
    #[serde(default)]
    pub organizations: Option<Vec<String>>,
    #[serde(default)]
    pub organizational_units: Option<Vec<String>>,
    #[serde(default)]
    pub localities: Option<Vec<String>>,
    #[serde(default)]
    pub provinces: Option<Vec<String>>,
    #[serde(default)]
    pub street_addresses: Option<Vec<String>>,
    #[serde(default)]
    pub postal_codes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PrivateKeyDescriptor {
    #[serde(default)]
    pub algorithm: String,
    #[serde(default)]
    pub size: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerDescriptor {
    #[serde(default)]
    pub dir: String,
    #[serde(default = "default_issuer_public_key")]
    pub public_key: String,
    #[serde(default = "default_issuer_private_key")]
    pub private_key: String,
}

fn default_issuer_public_key() -> String {
    "ca.crt".to_string()
}

fn default_issuer_private_key() -> String {
    "ca.key".to_string()
}

impl Default for IssuerDescriptor {
    fn default() -> Self {
        Self {
            dir: String::new(),
            public_key: default_issuer_public_key(),
            private_key: default_issuer_private_key(),
        }
    }
}

// ----------------------------------------------------------------------------
// Resolved request
// ----------------------------------------------------------------------------

/// Process-wide subject defaults, applied per field when a descriptor omits it
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct SubjectDefaults {
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub organizations: Vec<String>,
    #[serde(default)]
    pub organizational_units: Vec<String>,
    #[serde(default)]
    pub localities: Vec<String>,
    #[serde(default)]
    pub provinces: Vec<String>,
    #[serde(default)]
    pub street_addresses: Vec<String>,
    #[serde(default)]
    pub postal_codes: Vec<String>,
}

/// Multi-valued X.509 subject attributes (common name excluded)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    pub countries: Vec<String>,
    pub organizations: Vec<String>,
    pub organizational_units: Vec<String>,
    pub localities: Vec<String>,
    pub provinces: Vec<String>,
    pub street_addresses: Vec<String>,
    pub postal_codes: Vec<String>,
}

impl Subject {
    fn resolve(descriptor: SubjectDescriptor, defaults: &SubjectDefaults) -> Self {
        Self {
            countries: descriptor
                .countries
                .unwrap_or_else(|| defaults.countries.clone()),
            organizations: descriptor
                .organizations
                .unwrap_or_else(|| defaults.organizations.clone()),
            organizational_units: descriptor
                .organizational_units
                .unwrap_or_else(|| defaults.organizational_units.clone()),
            localities: descriptor
                .localities
                .unwrap_or_else(|| defaults.localities.clone()),
            provinces: descriptor
                .provinces
                .unwrap_or_else(|| defaults.provinces.clone()),
            street_addresses: descriptor
                .street_addresses
                .unwrap_or_else(|| defaults.street_addresses.clone()),
            postal_codes: descriptor
                .postal_codes
                .unwrap_or_else(|| defaults.postal_codes.clone()),
        }
    }
}

/// Requested key algorithm and its size parameter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivateKeySpec {
    /// `rsa`, `ecdsa` or `ed25519`; empty means `rsa`
    pub algorithm: String,
    /// RSA modulus bits or ECDSA curve selector; 0 means algorithm default
    pub size: i64,
}

/// Issuer certificate and private key locations; both empty means self-signed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssuerPaths {
    pub public_key: PathBuf,
    pub private_key: PathBuf,
}

impl IssuerPaths {
    pub fn is_empty(&self) -> bool {
        self.public_key.as_os_str().is_empty() && self.private_key.as_os_str().is_empty()
    }
}

/// X.509 key usage purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyUsage {
    DigitalSignature,
    ContentCommitment,
    KeyEncipherment,
    DataEncipherment,
    KeyAgreement,
    CertSign,
    CrlSign,
    EncipherOnly,
    DecipherOnly,
}

impl KeyUsage {
    pub const ALL: [KeyUsage; 9] = [
        KeyUsage::DigitalSignature,
        KeyUsage::ContentCommitment,
        KeyUsage::KeyEncipherment,
        KeyUsage::DataEncipherment,
        KeyUsage::KeyAgreement,
        KeyUsage::CertSign,
        KeyUsage::CrlSign,
        KeyUsage::EncipherOnly,
        KeyUsage::DecipherOnly,
    ];

    pub fn name(self) -> &'static str {
        match self {
            KeyUsage::DigitalSignature => "digital signature",
            KeyUsage::ContentCommitment => "content commitment",
            KeyUsage::KeyEncipherment => "key encipherment",
            KeyUsage::DataEncipherment => "data encipherment",
            KeyUsage::KeyAgreement => "key agreement",
            KeyUsage::CertSign => "cert sign",
            KeyUsage::CrlSign => "crl sign",
            KeyUsage::EncipherOnly => "encipher only",
            KeyUsage::DecipherOnly => "decipher only",
        }
    }

    /// Case-insensitive lookup by name
    pub fn from_name(name: &str) -> Option<Self> {
        let lowered = name.to_lowercase();
        Self::ALL.into_iter().find(|usage| usage.name() == lowered)
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// Bitset of key usage purposes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyUsages(u16);

impl KeyUsages {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, usage: KeyUsage) {
        self.0 |= usage.bit();
    }

    pub fn with(mut self, usage: KeyUsage) -> Self {
        self.insert(usage);
        self
    }

    pub fn contains(&self, usage: KeyUsage) -> bool {
        self.0 & usage.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = KeyUsage> + '_ {
        KeyUsage::ALL.into_iter().filter(|usage| self.contains(*usage))
    }
}

impl FromIterator<KeyUsage> for KeyUsages {
    fn from_iter<I: IntoIterator<Item = KeyUsage>>(iter: I) -> Self {
        let mut usages = KeyUsages::empty();
        for usage in iter {
            usages.insert(usage);
        }
        usages
    }
}

/// Extended key usage purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtKeyUsage {
    Any,
    ServerAuth,
    ClientAuth,
    CodeSigning,
    EmailProtection,
    IpsecEndSystem,
    IpsecTunnel,
    IpsecUser,
    TimeStamping,
    OcspSigning,
    MicrosoftServerGatedCrypto,
    NetscapeServerGatedCrypto,
    MicrosoftCommercialCodeSigning,
    MicrosoftKernelCodeSigning,
}

impl ExtKeyUsage {
    pub const ALL: [ExtKeyUsage; 14] = [
        ExtKeyUsage::Any,
        ExtKeyUsage::ServerAuth,
        ExtKeyUsage::ClientAuth,
        ExtKeyUsage::CodeSigning,
        ExtKeyUsage::EmailProtection,
        ExtKeyUsage::IpsecEndSystem,
        ExtKeyUsage::IpsecTunnel,
        ExtKeyUsage::IpsecUser,
        ExtKeyUsage::TimeStamping,
        ExtKeyUsage::OcspSigning,
        ExtKeyUsage::MicrosoftServerGatedCrypto,
        ExtKeyUsage::NetscapeServerGatedCrypto,
        ExtKeyUsage::MicrosoftCommercialCodeSigning,
        ExtKeyUsage::MicrosoftKernelCodeSigning,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExtKeyUsage::Any => "any",
            ExtKeyUsage::ServerAuth => "server auth",
            ExtKeyUsage::ClientAuth => "client auth",
            ExtKeyUsage::CodeSigning => "code signing",
            ExtKeyUsage::EmailProtection => "email protection",
            ExtKeyUsage::IpsecEndSystem => "ipsec end system",
            ExtKeyUsage::IpsecTunnel => "ipsec tunnel",
            ExtKeyUsage::IpsecUser => "ipsec user",
            ExtKeyUsage::TimeStamping => "time stamping",
            ExtKeyUsage::OcspSigning => "ocsp signing",
            ExtKeyUsage::MicrosoftServerGatedCrypto => "microsoft server gated crypto",
            ExtKeyUsage::NetscapeServerGatedCrypto => "netscape server gated crypto",
            ExtKeyUsage::MicrosoftCommercialCodeSigning => "microsoft commercial code signing",
            ExtKeyUsage::MicrosoftKernelCodeSigning => "microsoft kernel code signing",
        }
    }

    /// Object identifier arcs of the purpose
    pub fn oid(self) -> &'static [u64] {
        match self {
            ExtKeyUsage::Any => &[2, 5, 29, 37, 0],
            ExtKeyUsage::ServerAuth => &[1, 3, 6, 1, 5, 5, 7, 3, 1],
            ExtKeyUsage::ClientAuth => &[1, 3, 6, 1, 5, 5, 7, 3, 2],
            ExtKeyUsage::CodeSigning => &[1, 3, 6, 1, 5, 5, 7, 3, 3],
            ExtKeyUsage::EmailProtection => &[1, 3, 6, 1, 5, 5, 7, 3, 4],
            ExtKeyUsage::IpsecEndSystem => &[1, 3, 6, 1, 5, 5, 7, 3, 5],
            ExtKeyUsage::IpsecTunnel => &[1, 3, 6, 1, 5, 5, 7, 3, 6],
            ExtKeyUsage::IpsecUser => &[1, 3, 6, 1, 5, 5, 7, 3, 7],
            ExtKeyUsage::TimeStamping => &[1, 3, 6, 1, 5, 5, 7, 3, 8],
            ExtKeyUsage::OcspSigning => &[1, 3, 6, 1, 5, 5, 7, 3, 9],
            ExtKeyUsage::MicrosoftServerGatedCrypto => &[1, 3, 6, 1, 4, 1, 311, 10, 3, 3],
            ExtKeyUsage::NetscapeServerGatedCrypto => &[2, 16, 840, 1, 113730, 4, 1],
            ExtKeyUsage::MicrosoftCommercialCodeSigning => &[1, 3, 6, 1, 4, 1, 311, 2, 1, 22],
            ExtKeyUsage::MicrosoftKernelCodeSigning => &[1, 3, 6, 1, 4, 1, 311, 61, 1, 1],
        }
    }

    /// Case-insensitive lookup by name
    pub fn from_name(name: &str) -> Option<Self> {
        let lowered = name.to_lowercase();
        Self::ALL.into_iter().find(|usage| usage.name() == lowered)
    }
}

impl fmt::Display for ExtKeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A validated certificate request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub out_cert_path: PathBuf,
    pub out_key_path: PathBuf,
    pub out_ca_path: PathBuf,
    pub common_name: String,
    pub is_ca: bool,
    pub subject: Subject,
    pub duration: Duration,
    pub renew_before: Duration,
    pub key_usage: KeyUsages,
    pub ext_key_usages: Vec<ExtKeyUsage>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub private_key: PrivateKeySpec,
    pub issuer_paths: IssuerPaths,
}

impl CertificateRequest {
    /// Validate a descriptor and resolve it against the subject defaults
    pub fn from_descriptor(
        descriptor: CertificateRequestDescriptor,
        defaults: &SubjectDefaults,
    ) -> PkiResult<Self> {
        let out_dir = descriptor.out.dir.trim();
        if out_dir.is_empty() {
            return Err(PkiError::MissingMandatoryField(KEY_OUT_DIR.to_string()));
        }
        let out_dir = PathBuf::from(out_dir);

        let duration = resolve_duration("duration", descriptor.duration.as_deref())?;
        let renew_before = resolve_duration("renewBefore", descriptor.renew_before.as_deref())?;

        let key_usage = descriptor
            .key_usages
            .iter()
            .map(|name| {
                KeyUsage::from_name(name).ok_or_else(|| PkiError::InvalidKeyUsage(name.clone()))
            })
            .collect::<PkiResult<KeyUsages>>()?;

        let ext_key_usages = descriptor
            .ext_key_usages
            .iter()
            .map(|name| {
                ExtKeyUsage::from_name(name)
                    .ok_or_else(|| PkiError::InvalidExtKeyUsage(name.clone()))
            })
            .collect::<PkiResult<Vec<_>>>()?;

        let ip_addresses = descriptor
            .ip_addresses
            .iter()
            .map(|raw| {
                raw.trim()
                    .parse::<IpAddr>()
                    .map_err(|_| PkiError::InvalidIpAddress(raw.clone()))
            })
            .collect::<PkiResult<Vec<_>>>()?;

        let issuer_paths = if descriptor.issuer.dir.is_empty() {
            IssuerPaths::default()
        } else {
            let issuer_dir = PathBuf::from(&descriptor.issuer.dir);
            IssuerPaths {
                public_key: issuer_dir.join(&descriptor.issuer.public_key),
                private_key: issuer_dir.join(&descriptor.issuer.private_key),
            }
        };

        Ok(Self {
            out_cert_path: out_dir.join(&descriptor.out.cert),
            out_key_path: out_dir.join(&descriptor.out.key),
            out_ca_path: out_dir.join(&descriptor.out.ca),
            common_name: descriptor.common_name,
            is_ca: descriptor.is_ca,
            subject: Subject::resolve(descriptor.subject, defaults),
            duration,
            renew_before,
            key_usage,
            ext_key_usages,
            dns_names: descriptor.dns_names,
            ip_addresses,
            private_key: PrivateKeySpec {
                algorithm: descriptor.private_key.algorithm,
                size: descriptor.private_key.size,
            },
            issuer_paths,
        })
    }
}

fn resolve_duration(field: &str, value: Option<&str>) -> PkiResult<Duration> {
    match value.map(str::trim) {
        None | Some("") => Ok(Duration::ZERO),
        Some(raw) => parse_duration(raw).map_err(|e| {
            debug!("Rejected {} {:?}: {}", field, raw, e);
            PkiError::InvalidDuration {
                field: field.to_string(),
                value: raw.to_string(),
            }
        }),
    }
}

/// Parse descriptor text in the given format (`yaml`, `yml`, `json` or `toml`)
pub fn parse_descriptor(
    contents: &str,
    format: &str,
    path: &Path,
) -> PkiResult<CertificateRequestDescriptor> {
    let parsed = match format {
        "json" => serde_json::from_str(contents).map_err(|e| e.to_string()),
        _ if contents.trim().is_empty() => Ok(CertificateRequestDescriptor::default()),
        "toml" => toml::from_str(contents).map_err(|e| e.to_string()),
        _ => serde_norway::from_str(contents).map_err(|e| e.to_string()),
    };
    parsed.map_err(|message| PkiError::ParseDescriptor {
        path: path.to_path_buf(),
        message,
    })
}

/// Read, parse and validate the certificate request stored at `path`
pub fn load_certificate_request(
    path: &Path,
    defaults: &SubjectDefaults,
) -> PkiResult<CertificateRequest> {
    let format = descriptor_extension(path)?;

    let mut file = File::open(path).map_err(|source| PkiError::OpenFile {
        path: path.to_path_buf(),
        source,
    })?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|source| PkiError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;

    let descriptor = parse_descriptor(&contents, format, path)?;
    CertificateRequest::from_descriptor(descriptor, defaults)
}
