//! Certificate template construction and signing
//!
//! rcgen builds and signs the certificate, then the subject and issuer names
//! are re-encoded with x509-cert so that every value of a multi-valued
//! subject field is kept (one RDN per value), and the TBS is signed again.

use pem::Pem;
use rand::rngs::OsRng;
use rand::RngCore;
use rcgen::string::Ia5String;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, ExtendedKeyUsagePurpose, IsCa,
    KeyUsagePurpose, SanType, SerialNumber, SigningKey,
};
use time::OffsetDateTime;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::der::asn1::{BitString, PrintableStringRef, SetOfVec};
use x509_cert::der::oid::ObjectIdentifier;
use x509_cert::der::{Any, Decode, Encode, Tag};
use x509_cert::name::{Name, RdnSequence, RelativeDistinguishedName};
use x509_cert::Certificate;

use crate::models::{CertificateRequest, ExtKeyUsage, KeyUsage, KeyUsages};
use crate::services::issuer::Issuer;
use crate::services::keygen::{GeneratedKey, KeyAlgorithm};
use crate::services::pem_store::{PemWriter, CERTIFICATE_TAG};
use crate::utils::{PkiError, PkiResult};

const SERIAL_NUMBER_BYTES: usize = 16;

const COUNTRY_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.6");
const STATE_OR_PROVINCE_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.8");
const LOCALITY_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.7");
const STREET_ADDRESS: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.9");
const POSTAL_CODE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.17");
const ORGANIZATION_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.10");
const ORGANIZATIONAL_UNIT_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.11");
const COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");

/// Sign a certificate for `req` and write it to `req.out_cert_path`
///
/// Without an issuer the certificate is self-signed by `key`. With an issuer,
/// `key` only provides the embedded public key. Every failure, including the
/// write, is reported as `GenerateCert`.
pub fn generate_certificate(
    req: &CertificateRequest,
    key: &GeneratedKey,
    issuer: Option<&Issuer>,
    writer: &dyn PemWriter,
) -> PkiResult<()> {
    let der = sign_certificate(req, key, issuer, OffsetDateTime::now_utc())
        .map_err(PkiError::generate_cert)?;
    writer
        .write_pem(&Pem::new(CERTIFICATE_TAG, der), &req.out_cert_path)
        .map_err(PkiError::generate_cert)
}

/// Build and sign the certificate, returning its DER encoding
pub fn sign_certificate(
    req: &CertificateRequest,
    key: &GeneratedKey,
    issuer: Option<&Issuer>,
    now: OffsetDateTime,
) -> PkiResult<Vec<u8>> {
    let serial = generate_serial_number()?;
    let mut params = build_certificate_params(req, key.algorithm, serial, now)?;
    let subject = subject_name(req)?;

    match issuer {
        None => {
            let cert = params
                .self_signed(&key.key_pair)
                .map_err(|e| PkiError::Sign(e.to_string()))?;
            encode_names(cert.der(), subject, None, &key.key_pair)
        }
        Some(issuer) => {
            params.use_authority_key_identifier_extension = true;
            let cert = params
                .signed_by(&key.key_pair, issuer.signer())
                .map_err(|e| PkiError::Sign(e.to_string()))?;
            encode_names(
                cert.der(),
                subject,
                Some(issuer.subject_name().clone()),
                issuer.signer().key(),
            )
        }
    }
}

/// Replace the names of a signed certificate and sign its TBS again
///
/// Without `issuer` the certificate is self-signed and its issuer is the
/// subject.
fn encode_names(
    der: &[u8],
    subject: Name,
    issuer: Option<Name>,
    signer: &impl SigningKey,
) -> PkiResult<Vec<u8>> {
    let mut cert = Certificate::from_der(der).map_err(|e| PkiError::Encode(e.to_string()))?;
    cert.tbs_certificate.issuer = issuer.unwrap_or_else(|| subject.clone());
    cert.tbs_certificate.subject = subject;

    let tbs = cert
        .tbs_certificate
        .to_der()
        .map_err(|e| PkiError::Encode(e.to_string()))?;
    let signature = signer
        .sign(&tbs)
        .map_err(|e| PkiError::Sign(e.to_string()))?;
    cert.signature =
        BitString::from_bytes(&signature).map_err(|e| PkiError::Encode(e.to_string()))?;

    cert.to_der().map_err(|e| PkiError::Encode(e.to_string()))
}

/// 128-bit random serial number
pub fn generate_serial_number() -> PkiResult<SerialNumber> {
    let mut bytes = [0u8; SERIAL_NUMBER_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| PkiError::GenerateSerialNumber(e.to_string()))?;
    Ok(SerialNumber::from(bytes.to_vec()))
}

/// Key usage bits of the issued certificate
///
/// Digital signature is always set, key encipherment only for RSA keys and
/// cert sign for CAs. Bits requested through `keyUsages` are added on top.
pub fn effective_key_usages(req: &CertificateRequest, algorithm: KeyAlgorithm) -> KeyUsages {
    let mut usages = req.key_usage.with(KeyUsage::DigitalSignature);
    if algorithm == KeyAlgorithm::Rsa {
        usages.insert(KeyUsage::KeyEncipherment);
    }
    if req.is_ca {
        usages.insert(KeyUsage::CertSign);
    }
    usages
}

/// Build the certificate template for `req`
pub fn build_certificate_params(
    req: &CertificateRequest,
    algorithm: KeyAlgorithm,
    serial: SerialNumber,
    now: OffsetDateTime,
) -> PkiResult<CertificateParams> {
    let lifetime = time::Duration::try_from(req.duration)
        .map_err(|e| PkiError::InvalidValidity(e.to_string()))?;
    let not_after = now
        .checked_add(lifetime)
        .ok_or_else(|| PkiError::InvalidValidity(format!("{:?} overflows", req.duration)))?;

    let mut params = CertificateParams::default();
    params.serial_number = Some(serial);
    // Names are encoded by `encode_names` once rcgen has signed
    params.distinguished_name = DistinguishedName::new();
    params.not_before = now;
    params.not_after = not_after;
    params.is_ca = if req.is_ca {
        IsCa::Ca(BasicConstraints::Unconstrained)
    } else {
        IsCa::ExplicitNoCa
    };
    params.key_usages = effective_key_usages(req, algorithm)
        .iter()
        .map(key_usage_purpose)
        .collect();
    params.extended_key_usages = req
        .ext_key_usages
        .iter()
        .map(|usage| ext_key_usage_purpose(*usage))
        .collect();
    params.subject_alt_names = subject_alt_names(req)?;

    Ok(params)
}

/// Subject name of `req`, one RDN per value, common name last
pub fn subject_name(req: &CertificateRequest) -> PkiResult<Name> {
    let subject = &req.subject;
    let common_name: Option<String> =
        (!req.common_name.is_empty()).then(|| req.common_name.clone());

    let attributes: [(ObjectIdentifier, &[String]); 8] = [
        (COUNTRY_NAME, &subject.countries),
        (STATE_OR_PROVINCE_NAME, &subject.provinces),
        (LOCALITY_NAME, &subject.localities),
        (STREET_ADDRESS, &subject.street_addresses),
        (POSTAL_CODE, &subject.postal_codes),
        (ORGANIZATION_NAME, &subject.organizations),
        (ORGANIZATIONAL_UNIT_NAME, &subject.organizational_units),
        (COMMON_NAME, common_name.as_slice()),
    ];

    let mut rdns = Vec::new();
    for (oid, values) in attributes {
        for value in values {
            rdns.push(relative_name(oid, value)?);
        }
    }
    Ok(RdnSequence(rdns))
}

fn relative_name(oid: ObjectIdentifier, value: &str) -> PkiResult<RelativeDistinguishedName> {
    // Country codes are PrintableString when they fit
    let tag = if oid == COUNTRY_NAME && PrintableStringRef::new(value).is_ok() {
        Tag::PrintableString
    } else {
        Tag::Utf8String
    };
    let value = Any::new(tag, value.as_bytes().to_vec())
        .map_err(|e| PkiError::Encode(format!("subject value {:?}: {}", value, e)))?;
    let set = SetOfVec::try_from(vec![AttributeTypeAndValue { oid, value }])
        .map_err(|e| PkiError::Encode(e.to_string()))?;
    Ok(RelativeDistinguishedName(set))
}

fn subject_alt_names(req: &CertificateRequest) -> PkiResult<Vec<SanType>> {
    let mut names = Vec::with_capacity(req.dns_names.len() + req.ip_addresses.len());
    for dns_name in &req.dns_names {
        let ia5 = Ia5String::try_from(dns_name.clone())
            .map_err(|e| PkiError::Sign(format!("invalid DNS name {:?}: {}", dns_name, e)))?;
        names.push(SanType::DnsName(ia5));
    }
    names.extend(req.ip_addresses.iter().copied().map(SanType::IpAddress));
    Ok(names)
}

fn key_usage_purpose(usage: KeyUsage) -> KeyUsagePurpose {
    match usage {
        KeyUsage::DigitalSignature => KeyUsagePurpose::DigitalSignature,
        KeyUsage::ContentCommitment => KeyUsagePurpose::ContentCommitment,
        KeyUsage::KeyEncipherment => KeyUsagePurpose::KeyEncipherment,
        KeyUsage::DataEncipherment => KeyUsagePurpose::DataEncipherment,
        KeyUsage::KeyAgreement => KeyUsagePurpose::KeyAgreement,
        KeyUsage::CertSign => KeyUsagePurpose::KeyCertSign,
        KeyUsage::CrlSign => KeyUsagePurpose::CrlSign,
        KeyUsage::EncipherOnly => KeyUsagePurpose::EncipherOnly,
        KeyUsage::DecipherOnly => KeyUsagePurpose::DecipherOnly,
    }
}

fn ext_key_usage_purpose(usage: ExtKeyUsage) -> ExtendedKeyUsagePurpose {
    match usage {
        ExtKeyUsage::Any => ExtendedKeyUsagePurpose::Any,
        ExtKeyUsage::ServerAuth => ExtendedKeyUsagePurpose::ServerAuth,
        ExtKeyUsage::ClientAuth => ExtendedKeyUsagePurpose::ClientAuth,
        ExtKeyUsage::CodeSigning => ExtendedKeyUsagePurpose::CodeSigning,
        ExtKeyUsage::EmailProtection => ExtendedKeyUsagePurpose::EmailProtection,
        ExtKeyUsage::TimeStamping => ExtendedKeyUsagePurpose::TimeStamping,
        ExtKeyUsage::OcspSigning => ExtendedKeyUsagePurpose::OcspSigning,
        other => ExtendedKeyUsagePurpose::Other(other.oid().to_vec()),
    }
}
