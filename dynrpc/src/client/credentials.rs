use std::path::PathBuf;
use tonic::transport::{Certificate, ClientTlsConfig, Identity};

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Failed to read credential file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("A client identity needs both a private key and a certificate chain")]
    IncompleteIdentity,
}

/// PEM encoded credential material, given inline or as a file to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl CredentialSource {
    pub fn load(&self) -> Result<Vec<u8>, CredentialError> {
        match self {
            CredentialSource::Path(path) => {
                std::fs::read(path).map_err(|source| CredentialError::Read {
                    path: path.clone(),
                    source,
                })
            }
            CredentialSource::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

impl From<PathBuf> for CredentialSource {
    fn from(path: PathBuf) -> Self {
        CredentialSource::Path(path)
    }
}

impl From<&std::path::Path> for CredentialSource {
    fn from(path: &std::path::Path) -> Self {
        CredentialSource::Path(path.to_path_buf())
    }
}

impl From<Vec<u8>> for CredentialSource {
    fn from(bytes: Vec<u8>) -> Self {
        CredentialSource::Bytes(bytes)
    }
}

impl From<&[u8]> for CredentialSource {
    fn from(bytes: &[u8]) -> Self {
        CredentialSource::Bytes(bytes.to_vec())
    }
}

/// TLS material for a secure channel.
///
/// Without any field set, the platform's native roots are trusted and no client identity is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub root_certificates: Option<CredentialSource>,
    pub private_key: Option<CredentialSource>,
    pub certificate_chain: Option<CredentialSource>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.root_certificates.is_none()
            && self.private_key.is_none()
            && self.certificate_chain.is_none()
    }

    /// Loads every configured source and builds the transport TLS configuration.
    pub fn tls_config(&self) -> Result<ClientTlsConfig, CredentialError> {
        let mut config = ClientTlsConfig::new().with_native_roots();

        if let Some(roots) = &self.root_certificates {
            config = config.ca_certificate(Certificate::from_pem(roots.load()?));
        }

        match (&self.private_key, &self.certificate_chain) {
            (Some(key), Some(chain)) => {
                config = config.identity(Identity::from_pem(chain.load()?, key.load()?));
            }
            (None, None) => {}
            _ => return Err(CredentialError::IncompleteIdentity),
        }

        Ok(config)
    }
}
