//! Issuer (parent CA) loading
//!
//! An issuer is loaded fresh for every request handled so that a rotated CA
//! is picked up on the next pass.

use std::fs;
use std::path::Path;

use pem::Pem;
use rcgen::KeyPair;
use tracing::warn;
use x509_cert::der::Decode;
use x509_cert::name::Name;

use crate::models::IssuerPaths;
use crate::services::keygen::{EC_PRIVATE_KEY_TAG, PKCS8_PRIVATE_KEY_TAG, RSA_PRIVATE_KEY_TAG};
use crate::services::pem_store::{encode_pem, PemWriter, CERTIFICATE_TAG};
use crate::utils::{PkiError, PkiResult};

/// A CA certificate together with its private key
pub struct Issuer {
    certificate_der: Vec<u8>,
    subject: Name,
    signer: rcgen::Issuer<'static, KeyPair>,
}

impl std::fmt::Debug for Issuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Issuer")
            .field("certificate_len", &self.certificate_der.len())
            .finish_non_exhaustive()
    }
}

impl Issuer {
    /// DER encoding of the issuer certificate
    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    /// Subject of the issuer certificate, as encoded
    pub fn subject_name(&self) -> &Name {
        &self.subject
    }

    /// Signing handle used to issue child certificates
    pub fn signer(&self) -> &rcgen::Issuer<'static, KeyPair> {
        &self.signer
    }

    /// The issuer certificate as a `CERTIFICATE` PEM block
    pub fn certificate_pem(&self) -> Pem {
        Pem::new(CERTIFICATE_TAG, self.certificate_der.clone())
    }
}

/// Load the issuer referenced by `paths`
///
/// Returns `None` when both paths are empty (self-signed mode).
pub fn load_issuer(paths: &IssuerPaths) -> PkiResult<Option<Issuer>> {
    if paths.is_empty() {
        return Ok(None);
    }

    let cert_data = read_issuer_file(&paths.public_key)?;
    let key_data = read_issuer_file(&paths.private_key)?;

    let certificate_der = pem::parse_many(&cert_data)
        .map_err(|e| PkiError::LoadIssuerKeyPair(format!("{:?}: {}", paths.public_key, e)))?
        .into_iter()
        .find(|block| block.tag() == CERTIFICATE_TAG)
        .map(Pem::into_contents)
        .ok_or_else(|| {
            PkiError::LoadIssuerKeyPair(format!(
                "{:?}: no certificate PEM block found",
                paths.public_key
            ))
        })?;

    let key_pair = parse_private_key(&key_data)
        .map_err(|message| PkiError::LoadIssuerKeyPair(format!("{:?}: {}", paths.private_key, message)))?;

    {
        let (_, cert) = x509_parser::parse_x509_certificate(&certificate_der)
            .map_err(|e| PkiError::ParseIssuerCertificate(e.to_string()))?;

        if key_pair.public_key_raw() != &*cert.public_key().subject_public_key.data {
            return Err(PkiError::LoadIssuerKeyPair(
                "private key does not match certificate public key".to_string(),
            ));
        }
        if !cert.is_ca() {
            warn!(
                "Issuer certificate {:?} is not marked as a CA, verifiers may reject its children",
                paths.public_key
            );
        }
    }

    let subject = x509_cert::Certificate::from_der(&certificate_der)
        .map_err(|e| PkiError::ParseIssuerCertificate(e.to_string()))?
        .tbs_certificate
        .subject;

    let certificate_pem = encode_pem(&Pem::new(CERTIFICATE_TAG, certificate_der.clone()));
    let signer = rcgen::Issuer::from_ca_cert_pem(&certificate_pem, key_pair)
        .map_err(|e| PkiError::ParseIssuerCertificate(e.to_string()))?;

    Ok(Some(Issuer {
        certificate_der,
        subject,
        signer,
    }))
}

fn read_issuer_file(path: &Path) -> PkiResult<Vec<u8>> {
    fs::read(path).map_err(|e| PkiError::LoadIssuerKeyPair(format!("{:?}: {}", path, e)))
}

/// Parse a PKCS#1, SEC1 or PKCS#8 private key into a signing key pair
fn parse_private_key(data: &[u8]) -> Result<KeyPair, String> {
    use p256::pkcs8::{EncodePrivateKey, LineEnding};
    use rsa::pkcs1::DecodeRsaPrivateKey;

    let block = pem::parse_many(data)
        .map_err(|e| e.to_string())?
        .into_iter()
        .find(|block| block.tag().ends_with(PKCS8_PRIVATE_KEY_TAG))
        .ok_or_else(|| "no private key PEM block found".to_string())?;

    let (pkcs8, algorithm) = match block.tag() {
        RSA_PRIVATE_KEY_TAG => {
            let key = rsa::RsaPrivateKey::from_pkcs1_der(block.contents())
                .map_err(|e| e.to_string())?;
            let pkcs8 = key.to_pkcs8_pem(LineEnding::LF).map_err(|e| e.to_string())?;
            (pkcs8, &rcgen::PKCS_RSA_SHA256)
        }
        EC_PRIVATE_KEY_TAG => {
            let der = block.contents();
            if let Ok(key) = p256::SecretKey::from_sec1_der(der) {
                let pkcs8 = key.to_pkcs8_pem(LineEnding::LF).map_err(|e| e.to_string())?;
                (pkcs8, &rcgen::PKCS_ECDSA_P256_SHA256)
            } else if let Ok(key) = p384::SecretKey::from_sec1_der(der) {
                let pkcs8 = key.to_pkcs8_pem(LineEnding::LF).map_err(|e| e.to_string())?;
                (pkcs8, &rcgen::PKCS_ECDSA_P384_SHA384)
            } else if let Ok(key) = p521::SecretKey::from_sec1_der(der) {
                let pkcs8 = key.to_pkcs8_pem(LineEnding::LF).map_err(|e| e.to_string())?;
                (pkcs8, &rcgen::PKCS_ECDSA_P521_SHA512)
            } else {
                return Err("unsupported EC private key curve".to_string());
            }
        }
        PKCS8_PRIVATE_KEY_TAG => {
            return KeyPair::from_pem(&encode_pem(&block)).map_err(|e| e.to_string());
        }
        other => return Err(format!("unsupported private key type {}", other)),
    };

    KeyPair::from_pem_and_sign_algo(&pkcs8, algorithm).map_err(|e| e.to_string())
}

/// Write the issuer certificate to `path`
///
/// Failures are reported as `CopyCa`.
pub fn copy_ca(issuer: &Issuer, path: &Path, writer: &dyn PemWriter) -> PkiResult<()> {
    writer
        .write_pem(&issuer.certificate_pem(), path)
        .map_err(PkiError::copy_ca)
}
