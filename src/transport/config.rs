//! Transport security configuration.
//!
//! Each side of the proxy is independently plain or TLS. The client side
//! presents a certificate (from PEM files or self-signed for development);
//! the game side connects without verifying the server certificate, as
//! MUD servers behind the proxy commonly use self-signed certificates.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use rcgen::{Certificate, CertificateParams};
use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, Result};

/// Transport security for one side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// Plain TCP (default).
    #[default]
    None,
    /// TLS over TCP.
    #[serde(alias = "ssl")]
    Tls,
}

impl Security {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Tls => "tls",
        }
    }
}

impl std::fmt::Display for Security {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Security {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "plain" => Ok(Self::None),
            "tls" | "ssl" => Ok(Self::Tls),
            _ => Err(format!("Unknown security mode: {}", s)),
        }
    }
}

/// Certificate configuration source.
#[derive(Debug, Clone)]
pub enum CertConfig {
    /// Generate a self-signed certificate (development only).
    SelfSigned {
        /// Common name for the certificate.
        common_name: String,
    },
    /// Load certificates from PEM files.
    Files {
        /// Leaf certificate.
        cert_path: PathBuf,
        /// Private key (PKCS8 or RSA).
        key_path: PathBuf,
        /// Intermediate certificates appended after the leaf.
        chain_path: Option<PathBuf>,
    },
}

impl CertConfig {
    /// Load the certificate chain and private key for rustls 0.21.
    pub fn load(&self) -> Result<(Vec<rustls::Certificate>, rustls::PrivateKey)> {
        match self {
            Self::SelfSigned { common_name } => {
                tracing::warn!(
                    "Using self-signed certificate for '{}' - NOT FOR PRODUCTION",
                    common_name
                );

                let mut params = CertificateParams::new(vec![
                    common_name.clone(),
                    "127.0.0.1".to_string(),
                    "::1".to_string(),
                ]);
                params.distinguished_name = rcgen::DistinguishedName::new();
                params
                    .distinguished_name
                    .push(rcgen::DnType::CommonName, common_name.clone());

                let cert = Certificate::from_params(params).map_err(|e| {
                    ProxyError::Tls(format!("Failed to generate self-signed cert: {}", e))
                })?;
                let cert_der = rustls::Certificate(
                    cert.serialize_der()
                        .map_err(|e| ProxyError::Tls(format!("Failed to serialize cert: {}", e)))?,
                );
                let key_der = rustls::PrivateKey(cert.serialize_private_key_der());

                Ok((vec![cert_der], key_der))
            },
            Self::Files {
                cert_path,
                key_path,
                chain_path,
            } => {
                let mut certs = read_certs(cert_path)?;
                if certs.is_empty() {
                    return Err(ProxyError::Tls(format!(
                        "No certificates found in {:?}",
                        cert_path
                    )));
                }
                if let Some(chain_path) = chain_path {
                    certs.extend(read_certs(chain_path)?);
                }

                let key_pem = fs::read(key_path).map_err(|e| {
                    ProxyError::Tls(format!("Failed to read key file {:?}: {}", key_path, e))
                })?;
                let key = rustls_pemfile::pkcs8_private_keys(&mut key_pem.as_slice())
                    .map_err(|e| ProxyError::Tls(format!("Failed to parse key PEM: {}", e)))?
                    .into_iter()
                    .next()
                    .or_else(|| {
                        rustls_pemfile::rsa_private_keys(&mut key_pem.as_slice())
                            .ok()?
                            .into_iter()
                            .next()
                    })
                    .map(rustls::PrivateKey)
                    .ok_or_else(|| {
                        ProxyError::Tls(format!("No private key found in {:?}", key_path))
                    })?;

                Ok((certs, key))
            },
        }
    }
}

fn read_certs(path: &PathBuf) -> Result<Vec<rustls::Certificate>> {
    let pem = fs::read(path)
        .map_err(|e| ProxyError::Tls(format!("Failed to read cert file {:?}: {}", path, e)))?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .map_err(|e| ProxyError::Tls(format!("Failed to parse cert PEM {:?}: {}", path, e)))?;
    Ok(certs.into_iter().map(rustls::Certificate).collect())
}

/// `[tls]` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// PEM certificate presented to clients.
    pub cert: Option<PathBuf>,
    /// PEM private key for `cert`.
    pub key: Option<PathBuf>,
    /// Optional PEM intermediate chain.
    pub chain: Option<PathBuf>,
    /// Generate a throwaway certificate when no files are configured.
    pub self_signed: bool,
    /// Common name for the self-signed certificate.
    pub common_name: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert: None,
            key: None,
            chain: None,
            self_signed: false,
            common_name: "localhost".to_string(),
        }
    }
}

impl TlsConfig {
    /// Create development TLS config with a self-signed cert.
    pub fn development() -> Self {
        Self {
            self_signed: true,
            ..Default::default()
        }
    }

    /// Where the server certificate comes from.
    pub fn cert_source(&self) -> Result<CertConfig> {
        match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => Ok(CertConfig::Files {
                cert_path: cert.clone(),
                key_path: key.clone(),
                chain_path: self.chain.clone(),
            }),
            _ if self.self_signed => Ok(CertConfig::SelfSigned {
                common_name: self.common_name.clone(),
            }),
            _ => Err(ProxyError::Config(
                "TLS requested but [tls] cert and key are not set".to_string(),
            )),
        }
    }

    /// Build the rustls server config used for accepted clients.
    pub fn server_config(&self) -> Result<Arc<rustls::ServerConfig>> {
        let (certs, key) = self.cert_source()?.load()?;
        let config = rustls::ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ProxyError::Tls(format!("Failed to build TLS config: {}", e)))?;
        Ok(Arc::new(config))
    }

    /// Build the rustls client config used towards the game.
    ///
    /// The game's certificate is not verified.
    pub fn client_config() -> Arc<rustls::ClientConfig> {
        let config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_no_client_auth();
        Arc::new(config)
    }
}

struct AcceptAnyServerCert;

impl rustls::client::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_cert_config_self_signed() {
        let config = CertConfig::SelfSigned {
            common_name: "localhost".to_string(),
        };
        let (certs, _key) = config.load().unwrap();
        assert_eq!(certs.len(), 1);
    }

    #[test]
    fn test_security_from_str() {
        assert_eq!(Security::from_str("SSL").unwrap(), Security::Tls);
        assert_eq!(Security::from_str("tls").unwrap(), Security::Tls);
        assert_eq!(Security::from_str("none").unwrap(), Security::None);
        assert!(Security::from_str("maybe").is_err());
    }

    #[test]
    fn test_missing_cert_is_config_error() {
        let config = TlsConfig::default();
        assert!(matches!(config.cert_source(), Err(ProxyError::Config(_))));
        assert!(TlsConfig::development().cert_source().is_ok());
    }

    #[test]
    fn test_files_take_precedence_over_self_signed() {
        let config = TlsConfig {
            cert: Some("cert.pem".into()),
            key: Some("key.pem".into()),
            self_signed: true,
            ..Default::default()
        };
        assert!(matches!(
            config.cert_source().unwrap(),
            CertConfig::Files { .. }
        ));
    }

    #[test]
    fn test_unreadable_cert_file_is_tls_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = CertConfig::Files {
            cert_path: dir.path().join("missing.pem"),
            key_path: dir.path().join("missing.key"),
            chain_path: None,
        };
        assert!(matches!(config.load(), Err(ProxyError::Tls(_))));
    }

    #[test]
    fn test_server_and_client_configs_build() {
        assert!(TlsConfig::development().server_config().is_ok());
        let _ = TlsConfig::client_config();
    }
}
