use super::{
    DynamicClient,
    credentials::{CredentialError, CredentialSource, Credentials},
};
use crate::registry::RegistryError;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

/// Errors that can occur when connecting to a gRPC server.
#[derive(Debug, thiserror::Error)]
pub enum ClientConnectError {
    #[error("Invalid URL '{0}': {1}")]
    InvalidUrl(String, #[source] tonic::transport::Error),
    #[error("Failed to connect to '{0}': {1}")]
    ConnectionFailed(String, #[source] tonic::transport::Error),
    #[error("Invalid TLS configuration for '{0}': {1}")]
    Tls(String, #[source] tonic::transport::Error),
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error("Invalid file descriptor set: {0}")]
    FileDescriptorSet(#[from] RegistryError),
}

/// Configures and connects a [`DynamicClient`].
///
/// ```rust,no_run
/// use dynrpc::DynamicClient;
/// use std::time::Duration;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let client = DynamicClient::builder("api.example.com:443")
///     .tls(true)
///     .root_certificates(std::path::Path::new("ca.pem"))
///     .connect_timeout(Duration::from_secs(5))
///     .gzip(true)
///     .connect()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    endpoint: String,
    tls: bool,
    credentials: Credentials,
    connect_timeout: Option<Duration>,
    timeout: Option<Duration>,
    gzip: bool,
    skip_availability_check: bool,
    file_descriptor_set: Option<Vec<u8>>,
}

impl ClientBuilder {
    /// The endpoint may omit its scheme, `http://` is assumed (`https://` once TLS is enabled).
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            tls: false,
            credentials: Credentials::default(),
            connect_timeout: None,
            timeout: None,
            gzip: false,
            skip_availability_check: false,
            file_descriptor_set: None,
        }
    }

    pub fn tls(mut self, enabled: bool) -> Self {
        self.tls = enabled;
        self
    }

    /// Sets every credential at once and enables TLS.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self.tls = true;
        self
    }

    pub fn root_certificates(mut self, source: impl Into<CredentialSource>) -> Self {
        self.credentials.root_certificates = Some(source.into());
        self.tls = true;
        self
    }

    pub fn private_key(mut self, source: impl Into<CredentialSource>) -> Self {
        self.credentials.private_key = Some(source.into());
        self.tls = true;
        self
    }

    pub fn certificate_chain(mut self, source: impl Into<CredentialSource>) -> Self {
        self.credentials.certificate_chain = Some(source.into());
        self.tls = true;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Deadline applied to every request made on the channel.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Compresses requests with gzip and accepts gzip compressed responses.
    pub fn gzip(mut self, enabled: bool) -> Self {
        self.gzip = enabled;
        self
    }

    /// Calls skip the up-front registration of every advertised service. Only the called
    /// service is registered.
    pub fn skip_availability_check(mut self, skip: bool) -> Self {
        self.skip_availability_check = skip;
        self
    }

    /// Uses an encoded `FileDescriptorSet` as the schema source instead of server reflection.
    pub fn file_descriptor_set(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.file_descriptor_set = Some(bytes.into());
        self
    }

    /// The endpoint as given.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The endpoint URI with its scheme.
    pub fn uri(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else if self.tls {
            format!("https://{}", self.endpoint)
        } else {
            format!("http://{}", self.endpoint)
        }
    }

    /// Connects to the server.
    pub async fn connect(self) -> Result<DynamicClient<Channel>, ClientConnectError> {
        let uri = self.uri();
        let endpoint = self.endpoint_config(&uri)?;

        tracing::debug!(endpoint = %uri, tls = self.tls, "connecting");

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| ClientConnectError::ConnectionFailed(uri.clone(), e))?;

        self.into_client(uri, channel)
    }

    /// Builds the client without connecting. The connection is established on the first call.
    pub fn connect_lazy(self) -> Result<DynamicClient<Channel>, ClientConnectError> {
        let uri = self.uri();
        let channel = self.endpoint_config(&uri)?.connect_lazy();

        self.into_client(uri, channel)
    }

    fn endpoint_config(&self, uri: &str) -> Result<Endpoint, ClientConnectError> {
        let mut endpoint = Endpoint::new(uri.to_string())
            .map_err(|e| ClientConnectError::InvalidUrl(uri.to_string(), e))?;

        if self.tls || uri.starts_with("https://") {
            endpoint = endpoint
                .tls_config(self.credentials.tls_config()?)
                .map_err(|e| ClientConnectError::Tls(uri.to_string(), e))?;
        }

        if let Some(timeout) = self.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }
        if let Some(timeout) = self.timeout {
            endpoint = endpoint.timeout(timeout);
        }

        Ok(endpoint)
    }

    fn into_client(
        self,
        uri: String,
        channel: Channel,
    ) -> Result<DynamicClient<Channel>, ClientConnectError> {
        let client = match self.file_descriptor_set {
            Some(bytes) => DynamicClient::from_service_with_file_descriptor_set(channel, bytes)?,
            None => DynamicClient::from_service(channel),
        };

        Ok(client
            .with_gzip(self.gzip)
            .with_skip_availability_check(self.skip_availability_check)
            .with_endpoint(uri))
    }
}
