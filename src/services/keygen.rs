//! Private key generation
//!
//! Keys are persisted in their algorithm-specific container:
//! - RSA: PKCS#1, tagged `RSA PRIVATE KEY`
//! - ECDSA: SEC1, tagged `EC PRIVATE KEY`
//! - Ed25519: PKCS#8, tagged `PRIVATE KEY`
//!
//! The returned [`GeneratedKey`] also carries an `rcgen` key pair used to
//! sign (self-signed) or embed the public key into the certificate.

use std::fmt;

use pem::Pem;
use rand::rngs::OsRng;
use rcgen::{KeyPair, SignatureAlgorithm};

use crate::models::{CertificateRequest, PrivateKeySpec};
use crate::services::pem_store::PemWriter;
use crate::utils::error::{MAX_RSA_KEY_SIZE, MIN_RSA_KEY_SIZE};
use crate::utils::{PkiError, PkiResult};

pub const RSA_PRIVATE_KEY_TAG: &str = "RSA PRIVATE KEY";
pub const EC_PRIVATE_KEY_TAG: &str = "EC PRIVATE KEY";
pub const PKCS8_PRIVATE_KEY_TAG: &str = "PRIVATE KEY";

const DEFAULT_ECDSA_KEY_SIZE: i64 = 256;

/// Supported private key algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    Ecdsa,
    Ed25519,
}

impl KeyAlgorithm {
    /// Case-insensitive lookup; an empty name selects RSA
    pub fn parse(name: &str) -> PkiResult<Self> {
        match name.trim().to_lowercase().as_str() {
            "" | "rsa" => Ok(KeyAlgorithm::Rsa),
            "ecdsa" => Ok(KeyAlgorithm::Ecdsa),
            "ed25519" => Ok(KeyAlgorithm::Ed25519),
            _ => Err(PkiError::UnsupportedPrivateKeyAlgorithm(name.to_string())),
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyAlgorithm::Rsa => "rsa",
            KeyAlgorithm::Ecdsa => "ecdsa",
            KeyAlgorithm::Ed25519 => "ed25519",
        })
    }
}

/// A freshly generated private key
pub struct GeneratedKey {
    pub algorithm: KeyAlgorithm,
    /// Private key in its persisted PEM container
    pub pem: Pem,
    /// Signing handle over the same key
    pub key_pair: KeyPair,
}

impl fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedKey")
            .field("algorithm", &self.algorithm)
            .field("tag", &self.pem.tag())
            .finish_non_exhaustive()
    }
}

/// Generate the private key of `req` and write it to `req.out_key_path`
///
/// Every failure, including the write, is reported as `GenerateKey`.
pub fn generate_private_key(
    req: &CertificateRequest,
    writer: &dyn PemWriter,
) -> PkiResult<GeneratedKey> {
    let key = generate_key_material(&req.private_key).map_err(PkiError::generate_key)?;
    writer
        .write_pem(&key.pem, &req.out_key_path)
        .map_err(PkiError::generate_key)?;
    Ok(key)
}

/// Generate key material without persisting it
pub fn generate_key_material(spec: &PrivateKeySpec) -> PkiResult<GeneratedKey> {
    match KeyAlgorithm::parse(&spec.algorithm)? {
        KeyAlgorithm::Rsa => generate_rsa(spec.size),
        KeyAlgorithm::Ecdsa => generate_ecdsa(spec.size),
        KeyAlgorithm::Ed25519 => generate_ed25519(),
    }
}

fn generate_rsa(size: i64) -> PkiResult<GeneratedKey> {
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};

    // Negative sizes land in the too-weak branch
    let bits = match size {
        0 => MIN_RSA_KEY_SIZE,
        s => usize::try_from(s).map_err(|_| PkiError::RsaKeySizeTooWeak)?,
    };
    if bits < MIN_RSA_KEY_SIZE {
        return Err(PkiError::RsaKeySizeTooWeak);
    }
    if bits > MAX_RSA_KEY_SIZE {
        return Err(PkiError::RsaKeySizeTooBig);
    }

    let key = rsa::RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| PkiError::KeyGeneration(e.to_string()))?;
    let pkcs1 = key
        .to_pkcs1_der()
        .map_err(|e| PkiError::EncodePrivateKey(e.to_string()))?;
    let pkcs8 = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| PkiError::EncodePrivateKey(e.to_string()))?;

    Ok(GeneratedKey {
        algorithm: KeyAlgorithm::Rsa,
        pem: Pem::new(RSA_PRIVATE_KEY_TAG, pkcs1.as_bytes().to_vec()),
        key_pair: signing_key_pair(&pkcs8, &rcgen::PKCS_RSA_SHA256)?,
    })
}

fn generate_ecdsa(size: i64) -> PkiResult<GeneratedKey> {
    use p256::pkcs8::{EncodePrivateKey, LineEnding};

    let size = if size == 0 {
        DEFAULT_ECDSA_KEY_SIZE
    } else {
        size
    };

    let (sec1, pkcs8, algorithm) = match size {
        256 => {
            let key = p256::SecretKey::random(&mut OsRng);
            (
                key.to_sec1_der().map(|der| der.to_vec()).map_err(encode_err)?,
                key.to_pkcs8_pem(LineEnding::LF).map_err(encode_err)?,
                &rcgen::PKCS_ECDSA_P256_SHA256,
            )
        }
        384 => {
            let key = p384::SecretKey::random(&mut OsRng);
            (
                key.to_sec1_der().map(|der| der.to_vec()).map_err(encode_err)?,
                key.to_pkcs8_pem(LineEnding::LF).map_err(encode_err)?,
                &rcgen::PKCS_ECDSA_P384_SHA384,
            )
        }
        521 => {
            let key = p521::SecretKey::random(&mut OsRng);
            (
                key.to_sec1_der().map(|der| der.to_vec()).map_err(encode_err)?,
                key.to_pkcs8_pem(LineEnding::LF).map_err(encode_err)?,
                &rcgen::PKCS_ECDSA_P521_SHA512,
            )
        }
        other => return Err(PkiError::UnsupportedEcdsaKeySize(other)),
    };

    Ok(GeneratedKey {
        algorithm: KeyAlgorithm::Ecdsa,
        pem: Pem::new(EC_PRIVATE_KEY_TAG, sec1),
        key_pair: signing_key_pair(&pkcs8, algorithm)?,
    })
}

fn generate_ed25519() -> PkiResult<GeneratedKey> {
    let key_pair = KeyPair::generate_for(&rcgen::PKCS_ED25519)
        .map_err(|e| PkiError::KeyGeneration(e.to_string()))?;
    Ok(GeneratedKey {
        algorithm: KeyAlgorithm::Ed25519,
        pem: Pem::new(PKCS8_PRIVATE_KEY_TAG, key_pair.serialize_der()),
        key_pair,
    })
}

fn signing_key_pair(pkcs8_pem: &str, algorithm: &'static SignatureAlgorithm) -> PkiResult<KeyPair> {
    KeyPair::from_pem_and_sign_algo(pkcs8_pem, algorithm)
        .map_err(|e| PkiError::KeyGeneration(e.to_string()))
}

fn encode_err(err: impl fmt::Display) -> PkiError {
    PkiError::EncodePrivateKey(err.to_string())
}
