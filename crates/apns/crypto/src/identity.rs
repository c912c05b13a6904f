//! Client identity for TLS authentication against the gateway.

use std::path::Path;
use std::sync::Arc;

use color_eyre::eyre::WrapErr as _;
use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
};

/// Push certificate chain and its private key.
#[derive(Debug)]
pub struct Identity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl Identity {
    /// Load an identity from PEM text.
    ///
    /// `cert_pem` may hold a chain; the first certificate is the leaf.
    /// `key_pem` must hold one PKCS#8, PKCS#1 or SEC1 private key.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> color_eyre::eyre::Result<Self> {
        let chain: Vec<CertificateDer<'static>> = ::pem::parse_many(cert_pem)
            .map_err(|e| color_eyre::eyre::eyre!("failed to parse certificate PEM: {}", e))?
            .into_iter()
            .filter(|p| p.tag() == "CERTIFICATE")
            .map(|p| CertificateDer::from(p.into_contents()))
            .collect();

        if chain.is_empty() {
            color_eyre::eyre::bail!("no certificate found in PEM");
        }

        let key = ::pem::parse_many(key_pem)
            .map_err(|e| color_eyre::eyre::eyre!("failed to parse key PEM: {}", e))?
            .into_iter()
            .find_map(|p| match p.tag() {
                "PRIVATE KEY" => Some(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
                    p.into_contents(),
                ))),
                "RSA PRIVATE KEY" => Some(PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(
                    p.into_contents(),
                ))),
                "EC PRIVATE KEY" => Some(PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(
                    p.into_contents(),
                ))),
                _ => None,
            })
            .ok_or_else(|| color_eyre::eyre::eyre!("no supported private key found in PEM"))?;

        tracing::debug!(certificates = chain.len(), "loaded push identity");

        Ok(Self { chain, key })
    }

    /// Load an identity from PEM files.
    pub fn from_files(cert_path: &Path, key_path: &Path) -> color_eyre::eyre::Result<Self> {
        let cert_pem = std::fs::read_to_string(cert_path)
            .wrap_err_with(|| format!("failed to read certificate {}", cert_path.display()))?;
        let key_pem = std::fs::read_to_string(key_path)
            .wrap_err_with(|| format!("failed to read private key {}", key_path.display()))?;

        Self::from_pem(&cert_pem, &key_pem)
    }

    /// DER bytes of the leaf certificate.
    pub fn leaf(&self) -> &[u8] {
        self.chain[0].as_ref()
    }

    /// Build a TLS client configuration presenting this identity.
    pub fn client_config(&self) -> color_eyre::eyre::Result<Arc<rustls::ClientConfig>> {
        let roots = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_client_auth_cert(self.chain.clone(), self.key.clone_key())
            .wrap_err("failed to build TLS client config")?;

        Ok(Arc::new(config))
    }
}
