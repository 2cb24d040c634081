//! # PKI
//!
//! Generates the TLS material for Vault and its etcd cluster: a fresh
//! self-signed CA plus server, client and peer leaves signed by it. Every
//! leaf carries exactly the requested SAN set; IP literals become IP SANs,
//! everything else (wildcards included) a DNS SAN.
//!
//! Generation is all-or-nothing. Callers receive either a complete bundle or
//! an error, never a partially populated one.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use thiserror::Error;
use x509_parser::prelude::*;
use zeroize::Zeroizing;

const CA_COMMON_NAME: &str = "Vault Operator CA";
const ORGANIZATION: &str = "Vault Operator";

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    #[error("invalid subject alternative name '{san}': {reason}")]
    InvalidSan { san: String, reason: String },

    #[error("invalid validity period: {0}")]
    InvalidValidity(String),

    #[error("certificate parsing error: {0}")]
    ParseError(String),
}

pub type Result<T> = std::result::Result<T, PkiError>;

/// A PEM certificate and its PEM private key
#[derive(Clone)]
pub struct CertifiedKey {
    pub cert: String,
    pub key: Zeroizing<String>,
}

impl std::fmt::Debug for CertifiedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertifiedKey")
            .field("cert", &self.cert)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// CA certificate plus per-role leaves
#[derive(Debug, Clone)]
pub struct CertificateBundle {
    pub ca_cert: String,
    pub server: CertifiedKey,
    pub client: CertifiedKey,
    pub peer: CertifiedKey,
}

#[derive(Clone, Copy)]
enum Role {
    Server,
    Client,
    Peer,
}

impl Role {
    fn common_name(self) -> &'static str {
        match self {
            Role::Server => "Vault Operator Server",
            Role::Client => "Vault Operator Client",
            Role::Peer => "Vault Operator Peer",
        }
    }

    fn extended_key_usages(self) -> Vec<ExtendedKeyUsagePurpose> {
        match self {
            Role::Server | Role::Peer => vec![
                ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedKeyUsagePurpose::ClientAuth,
            ],
            Role::Client => vec![ExtendedKeyUsagePurpose::ClientAuth],
        }
    }
}

/// Generate a CA and server, client and peer leaves for `sans`, all valid
/// from now for `validity`.
pub fn generate(sans: &BTreeSet<String>, validity: Duration) -> Result<CertificateBundle> {
    let (not_before, not_after) = validity_window(validity)?;
    let subject_alt_names = sans
        .iter()
        .map(|san| to_san_type(san))
        .collect::<Result<Vec<_>>>()?;

    let mut ca_params = CertificateParams::default();
    ca_params.distinguished_name = distinguished_name(CA_COMMON_NAME);
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    ca_params.not_before = not_before;
    ca_params.not_after = not_after;

    let ca_key = KeyPair::generate().map_err(|e| {
        PkiError::KeyGenerationFailed(format!("failed to generate CA key: {e}"))
    })?;
    let ca_cert = ca_params.self_signed(&ca_key).map_err(|e| {
        PkiError::CertificateGenerationFailed(format!("failed to create CA cert: {e}"))
    })?;
    let ca_cert_pem = ca_cert.pem();

    let issuer = Issuer::from_ca_cert_pem(&ca_cert_pem, &ca_key)
        .map_err(|e| PkiError::ParseError(format!("failed to create issuer: {e}")))?;

    let leaf = |role: Role| -> Result<CertifiedKey> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(role.common_name());
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = role.extended_key_usages();
        params.not_before = not_before;
        params.not_after = not_after;
        params.subject_alt_names.clone_from(&subject_alt_names);

        let key = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate leaf key: {e}"))
        })?;
        let cert = params.signed_by(&key, &issuer).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to sign leaf cert: {e}"))
        })?;
        Ok(CertifiedKey {
            cert: cert.pem(),
            key: Zeroizing::new(key.serialize_pem()),
        })
    };

    Ok(CertificateBundle {
        server: leaf(Role::Server)?,
        client: leaf(Role::Client)?,
        peer: leaf(Role::Peer)?,
        ca_cert: ca_cert_pem,
    })
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(ORGANIZATION.to_string()),
    );
    dn
}

fn validity_window(validity: Duration) -> Result<(::time::OffsetDateTime, ::time::OffsetDateTime)> {
    if validity.is_zero() {
        return Err(PkiError::InvalidValidity("validity must be positive".to_string()));
    }
    let span = ::time::Duration::try_from(validity)
        .map_err(|e| PkiError::InvalidValidity(e.to_string()))?;
    // Certificates carry second precision
    let now = ::time::OffsetDateTime::now_utc()
        .replace_nanosecond(0)
        .map_err(|e| PkiError::InvalidValidity(e.to_string()))?;
    let not_after = now
        .checked_add(span)
        .ok_or_else(|| PkiError::InvalidValidity(format!("{validity:?} overflows")))?;
    Ok((now, not_after))
}

fn to_san_type(san: &str) -> Result<SanType> {
    if let Ok(ip) = san.parse::<IpAddr>() {
        return Ok(SanType::IpAddress(ip));
    }
    Ia5String::try_from(san.to_string())
        .map(SanType::DnsName)
        .map_err(|e| PkiError::InvalidSan {
            san: san.to_string(),
            reason: e.to_string(),
        })
}

/// Parse PEM-encoded data and return the DER bytes
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {e}")))?;
    Ok(pem_obj.contents().to_vec())
}

/// SAN entries of a PEM certificate, rendered back to strings.
pub fn subject_alt_names(cert_pem: &str) -> Result<BTreeSet<String>> {
    let der = parse_pem(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {e}")))?;
    let extension = cert
        .subject_alternative_name()
        .map_err(|e| PkiError::ParseError(format!("invalid SAN extension: {e}")))?;

    let mut names = BTreeSet::new();
    let Some(extension) = extension else {
        return Ok(names);
    };
    for name in &extension.value.general_names {
        match name {
            GeneralName::DNSName(dns) => {
                names.insert((*dns).to_string());
            }
            GeneralName::IPAddress(bytes) => {
                let ip = match bytes.len() {
                    4 => <[u8; 4]>::try_from(*bytes).map(|b| IpAddr::V4(Ipv4Addr::from(b))),
                    _ => <[u8; 16]>::try_from(*bytes).map(|b| IpAddr::V6(Ipv6Addr::from(b))),
                }
                .map_err(|e| PkiError::ParseError(format!("invalid IP SAN: {e}")))?;
                names.insert(ip.to_string());
            }
            _ => {}
        }
    }
    Ok(names)
}

/// `(not_before, not_after)` of a PEM certificate as Unix timestamps
pub fn validity(cert_pem: &str) -> Result<(i64, i64)> {
    let der = parse_pem(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {e}")))?;
    Ok((
        cert.validity().not_before.timestamp(),
        cert.validity().not_after.timestamp(),
    ))
}

/// Check that `leaf_pem` carries a valid signature from `ca_pem`.
pub fn verify_signed_by(leaf_pem: &str, ca_pem: &str) -> Result<bool> {
    let leaf_der = parse_pem(leaf_pem)?;
    let (_, leaf) = X509Certificate::from_der(&leaf_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse leaf cert: {e}")))?;
    let ca_der = parse_pem(ca_pem)?;
    let (_, ca) = X509Certificate::from_der(&ca_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse CA cert: {e}")))?;
    Ok(leaf.verify_signature(Some(ca.public_key())).is_ok())
}
