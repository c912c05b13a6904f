//! Push certificate utilities.

use apns_core::Endpoint;
use chrono::{DateTime, Utc};
use color_eyre::eyre::WrapErr as _;
use x509_parser::prelude::*;

/// OID of the `UID` subject attribute, which carries the push topic.
const UID_OID: &str = "0.9.2342.19200300.100.1.1";

/// Extract the push topic (bundle id) from a push certificate.
pub fn extract_topic_from_cert(cert_der: &[u8]) -> color_eyre::eyre::Result<String> {
    let cert = parse(cert_der)?;

    for rdn in cert.subject().iter() {
        for attr in rdn.iter() {
            if attr.attr_type().to_id_string() != UID_OID {
                continue;
            }
            if let Ok(value) = attr.attr_value().as_str() {
                return Ok(value.to_string());
            }
        }
    }

    color_eyre::eyre::bail!("no push topic found in certificate")
}

/// Guess the gateway environment a push certificate was issued for.
///
/// Development certificates say so in their common name; everything else is
/// treated as production.
pub fn certificate_endpoint(cert_der: &[u8]) -> color_eyre::eyre::Result<Endpoint> {
    let cert = parse(cert_der)?;

    let development = cert
        .subject()
        .iter_common_name()
        .filter_map(|cn| cn.as_str().ok())
        .any(|cn| cn.contains("Development"));

    Ok(Endpoint::from_sandbox(development))
}

/// Expiry time of a certificate.
pub fn expires_at(cert_der: &[u8]) -> color_eyre::eyre::Result<DateTime<Utc>> {
    let cert = parse(cert_der)?;

    let not_after = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(not_after, 0)
        .ok_or_else(|| color_eyre::eyre::eyre!("certificate expiry out of range: {}", not_after))
}

fn parse(cert_der: &[u8]) -> color_eyre::eyre::Result<X509Certificate<'_>> {
    let (_, cert) =
        X509Certificate::from_der(cert_der).wrap_err("failed to parse certificate DER")?;
    Ok(cert)
}
