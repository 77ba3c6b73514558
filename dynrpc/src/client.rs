//! # Dynamic Client
//!
//! [`DynamicClient`] ties the layers together for a single endpoint:
//!
//! 1. The [`ServiceCatalog`] discovers services and binds their methods, either through server
//!    reflection or from a `FileDescriptorSet` supplied up front.
//! 2. The [`RequestDispatcher`] executes calls against the bound methods.
//!
//! By default the first call registers every advertised service, so unknown names fail with the
//! full list of alternatives. With `skip_availability_check`, only the called service is
//! registered.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dynrpc::{CallOptions, DynamicClient};
//! use futures_util::StreamExt;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = DynamicClient::connect("localhost:50051").await?;
//!
//! let mut replies = client
//!     .unary_stream(
//!         "helloworld.Greeter",
//!         "SayHelloGroup",
//!         serde_json::json!({ "name": "sinskyjack" }),
//!         CallOptions::default(),
//!     )
//!     .await?;
//!
//! while let Some(reply) = replies.next().await {
//!     println!("{}", reply?.to_value()?);
//! }
//! # Ok(())
//! # }
//! ```
mod builder;
mod cache;
mod credentials;
mod proxy;

pub use builder::{ClientBuilder, ClientConnectError};
pub use cache::{ClientCache, SharedClient, get_by_endpoint, reset_cached_client};
pub use credentials::{CredentialError, CredentialSource, Credentials};
pub use proxy::{BoundMethod, ServiceProxy};

use crate::{
    BoxError,
    catalog::{CatalogError, MethodMetadata, ServiceCatalog, ServiceMetadata, StreamingShape},
    dispatch::{
        CallError, CallInput, CallOptions, CallResponse, RequestDispatcher, RequestMessage,
        ResponseMessage, ResponseStream,
    },
    grpc::client::GrpcClient,
    reflection::client::ReflectionClient,
    registry::{DescriptorRegistry, RegistryError},
};
use http_body::Body as HttpBody;
use prost_reflect::{MethodDescriptor, ServiceDescriptor};
use prost_types::FileDescriptorProto;
use std::sync::Arc;
use tonic::{client::GrpcService, codec::CompressionEncoding, transport::Channel};

/// A gRPC client bound to one endpoint for its whole lifetime.
#[derive(Debug, Clone)]
pub struct DynamicClient<S = Channel> {
    endpoint: Option<String>,
    catalog: ServiceCatalog<S>,
    dispatcher: RequestDispatcher<S>,
    skip_availability_check: bool,
}

impl DynamicClient<Channel> {
    /// Connects to `endpoint` and discovers its services through server reflection.
    ///
    /// The endpoint may omit its scheme (e.g., `localhost:50051`).
    pub async fn connect(endpoint: impl Into<String>) -> Result<Self, ClientConnectError> {
        ClientBuilder::new(endpoint).connect().await
    }

    /// Starts configuring a client for `endpoint`.
    pub fn builder(endpoint: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(endpoint)
    }
}

impl<S> DynamicClient<S>
where
    S: GrpcService<tonic::body::Body> + Clone,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Creates a client from an existing Tonic service/channel, discovering schemas through
    /// server reflection.
    pub fn from_service(service: S) -> Self {
        let reflection = ReflectionClient::new(service.clone());
        let dispatcher = RequestDispatcher::new(GrpcClient::new(service));

        Self::new(ServiceCatalog::with_reflection(reflection), dispatcher)
    }

    /// Creates a client from an existing Tonic service/channel that never uses reflection.
    ///
    /// Only the services defined in the encoded `FileDescriptorSet` are callable.
    pub fn from_service_with_file_descriptor_set(
        service: S,
        file_descriptor_set: impl AsRef<[u8]>,
    ) -> Result<Self, RegistryError> {
        let registry = DescriptorRegistry::from_file_descriptor_set(file_descriptor_set.as_ref())?;
        let dispatcher = RequestDispatcher::new(GrpcClient::new(service));

        Ok(Self::new(ServiceCatalog::with_registry(registry), dispatcher))
    }

    fn new(catalog: ServiceCatalog<S>, dispatcher: RequestDispatcher<S>) -> Self {
        Self {
            endpoint: None,
            catalog,
            dispatcher,
            skip_availability_check: false,
        }
    }

    /// Compresses requests with gzip and accepts gzip compressed replies.
    pub fn with_gzip(mut self, enabled: bool) -> Self {
        if enabled {
            self.dispatcher = self.dispatcher.with_compression(CompressionEncoding::Gzip);
        }
        self
    }

    /// When set, calls register only the called service instead of every advertised one.
    pub fn with_skip_availability_check(mut self, skip: bool) -> Self {
        self.skip_availability_check = skip;
        self
    }

    pub(crate) fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// The endpoint this client was connected to, if it was built from one.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn catalog(&self) -> &ServiceCatalog<S> {
        &self.catalog
    }

    /// Calls `service`/`method`, whatever its shape.
    ///
    /// Single-message methods take a [`CallInput::Unary`]; streaming-request methods take a
    /// [`CallInput::Streaming`] or a JSON array.
    pub async fn call(
        &mut self,
        service: &str,
        method: &str,
        input: impl Into<CallInput>,
        options: CallOptions,
    ) -> Result<CallResponse, CallError> {
        let metadata = self.resolve(service, method, None).await?;
        self.dispatcher.call(&metadata, input.into(), options).await
    }

    /// Calls a Unary method (Single Request -> Single Response).
    pub async fn unary_unary(
        &mut self,
        service: &str,
        method: &str,
        request: impl Into<RequestMessage>,
        options: CallOptions,
    ) -> Result<ResponseMessage, CallError> {
        let input = CallInput::Unary(request.into());
        let response = self
            .call_with_shape(service, method, StreamingShape::UnaryUnary, input, options)
            .await?;
        Ok(expect_unary(response))
    }

    /// Calls a Server Streaming method (Single Request -> Stream of Responses).
    pub async fn unary_stream(
        &mut self,
        service: &str,
        method: &str,
        request: impl Into<RequestMessage>,
        options: CallOptions,
    ) -> Result<ResponseStream, CallError> {
        let input = CallInput::Unary(request.into());
        let response = self
            .call_with_shape(service, method, StreamingShape::UnaryStream, input, options)
            .await?;
        Ok(expect_stream(response))
    }

    /// Calls a Client Streaming method (Stream of Requests -> Single Response).
    pub async fn stream_unary(
        &mut self,
        service: &str,
        method: &str,
        requests: impl Into<CallInput>,
        options: CallOptions,
    ) -> Result<ResponseMessage, CallError> {
        let response = self
            .call_with_shape(
                service,
                method,
                StreamingShape::StreamUnary,
                requests.into(),
                options,
            )
            .await?;
        Ok(expect_unary(response))
    }

    /// Calls a Bidirectional Streaming method (Stream of Requests -> Stream of Responses).
    pub async fn stream_stream(
        &mut self,
        service: &str,
        method: &str,
        requests: impl Into<CallInput>,
        options: CallOptions,
    ) -> Result<ResponseStream, CallError> {
        let response = self
            .call_with_shape(
                service,
                method,
                StreamingShape::StreamStream,
                requests.into(),
                options,
            )
            .await?;
        Ok(expect_stream(response))
    }

    async fn call_with_shape(
        &mut self,
        service: &str,
        method: &str,
        shape: StreamingShape,
        input: CallInput,
        options: CallOptions,
    ) -> Result<CallResponse, CallError> {
        let metadata = self.resolve(service, method, Some(shape)).await?;
        self.dispatcher.call(&metadata, input, options).await
    }

    async fn resolve(
        &mut self,
        service: &str,
        method: &str,
        shape: Option<StreamingShape>,
    ) -> Result<Arc<MethodMetadata>, CatalogError> {
        if self.skip_availability_check {
            self.catalog.resolve_method(service, method, shape).await
        } else {
            self.catalog.check_available(service, method, shape).await
        }
    }

    /// Names of the services exposed by the server. Fetched once per client.
    pub async fn service_names(&mut self) -> Result<Vec<String>, CatalogError> {
        Ok(self.catalog.service_names().await?.to_vec())
    }

    pub async fn register_service(
        &mut self,
        service: &str,
    ) -> Result<Arc<ServiceMetadata>, CatalogError> {
        self.catalog.register_service(service).await
    }

    pub async fn register_all_services(&mut self) -> Result<(), CatalogError> {
        self.catalog.register_all_services().await
    }

    /// Checks that `service` exposes `method`, and that it has `shape` when one is given.
    pub async fn check_method_available(
        &mut self,
        service: &str,
        method: &str,
        shape: Option<StreamingShape>,
    ) -> Result<Arc<MethodMetadata>, CatalogError> {
        self.catalog.check_available(service, method, shape).await
    }

    /// The metadata of every method of `service`, registering it on first use.
    pub async fn methods_meta(
        &mut self,
        service: &str,
    ) -> Result<Arc<ServiceMetadata>, CatalogError> {
        self.catalog.service_metadata(service).await
    }

    pub async fn method_meta(
        &mut self,
        service: &str,
        method: &str,
    ) -> Result<Arc<MethodMetadata>, CatalogError> {
        self.catalog.resolve_method(service, method, None).await
    }

    pub fn service_descriptor(&self, service: &str) -> Option<ServiceDescriptor> {
        self.catalog.service_descriptor(service)
    }

    pub fn method_descriptor(&self, service: &str, method: &str) -> Option<MethodDescriptor> {
        self.catalog.method_descriptor(service, method)
    }

    pub async fn file_descriptors_by_name(
        &mut self,
        name: &str,
    ) -> Result<Vec<FileDescriptorProto>, CatalogError> {
        self.catalog.file_descriptors_by_name(name).await
    }

    pub async fn file_descriptors_by_symbol(
        &mut self,
        symbol: &str,
    ) -> Result<Vec<FileDescriptorProto>, CatalogError> {
        self.catalog.file_descriptors_by_symbol(symbol).await
    }

    /// Installs `files` and their missing dependencies.
    pub async fn register_file_descriptors(
        &mut self,
        files: Vec<FileDescriptorProto>,
    ) -> Result<(), CatalogError> {
        self.catalog.register_file_descriptors(files).await
    }

    /// Returns a proxy exposing every method of `service`.
    pub async fn service(&mut self, service: &str) -> Result<ServiceProxy<S>, CatalogError> {
        let metadata = self.catalog.service_metadata(service).await?;
        Ok(ServiceProxy::new(metadata, self.dispatcher.clone()))
    }

    /// Drops this client's handle on the connection.
    ///
    /// The underlying `Channel` is shut down only when its last clone is dropped. Streams and
    /// proxies obtained from this client each hold such a clone, so the connection stays open
    /// until all of them are gone.
    pub fn close(self) {
        tracing::debug!(endpoint = self.endpoint.as_deref(), "client closed");
    }
}

fn expect_unary(response: CallResponse) -> ResponseMessage {
    match response {
        CallResponse::Unary(reply) => reply,
        CallResponse::Streaming(_) => unreachable!("shape checked before dispatch"),
    }
}

fn expect_stream(response: CallResponse) -> ResponseStream {
    match response {
        CallResponse::Streaming(replies) => replies,
        CallResponse::Unary(_) => unreachable!("shape checked before dispatch"),
    }
}
