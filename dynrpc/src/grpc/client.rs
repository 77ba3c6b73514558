//! # Generic gRPC Client
//!
//! This module wraps a standard `tonic` client to provide a generic interface for
//! gRPC communication. It is agnostic to the specific Protobuf messages being exchanged.
//!
//! ## How it works
//!
//! A [`MethodHandler`] is bound once per method when a service is registered. It carries the
//! HTTP/2 path (e.g., `/package.Service/Method`) and the input/output schemas used to build a
//! [`DynamicCodec`]. [`GrpcClient`] then performs the call for any of the four call shapes.
//!
//! ## Features
//!
//! * **Dynamic Pathing**: Constructs the HTTP/2 path at registration time.
//! * **Metadata Handling**: Converts standard Rust string tuples into Tonic's `MetadataMap` for headers.
//! * **Access Patterns**: Provides specific methods for Unary, Server Streaming, Client Streaming,
//!   and Bidirectional Streaming calls.
use super::codec::DynamicCodec;
use crate::BoxError;
use futures_util::Stream;
use http_body::Body as HttpBody;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use std::{str::FromStr, time::Duration};
use tonic::{
    Streaming,
    client::GrpcService,
    codec::CompressionEncoding,
    metadata::{
        MetadataKey, MetadataValue,
        errors::{InvalidMetadataKey, InvalidMetadataValue},
    },
    transport::Channel,
};

#[derive(thiserror::Error, Debug)]
pub enum GrpcRequestError {
    #[error("Internal error, the client was not ready: '{0}'")]
    ClientNotReady(#[source] BoxError),
    #[error("Invalid metadata (header) key '{key}': '{source}'")]
    InvalidMetadataKey {
        key: String,
        source: InvalidMetadataKey,
    },
    #[error("Invalid metadata (header) value for key '{key}': '{source}'")]
    InvalidMetadataValue {
        key: String,
        source: InvalidMetadataValue,
    },
}

/// The transport binding of a single method.
///
/// Holds the fully-qualified method path and the schemas the request and response are
/// serialized with.
#[derive(Debug, Clone)]
pub struct MethodHandler {
    path: http::uri::PathAndQuery,
    input: MessageDescriptor,
    output: MessageDescriptor,
}

impl MethodHandler {
    pub fn new(
        service: &str,
        method: &str,
        input: MessageDescriptor,
        output: MessageDescriptor,
    ) -> Self {
        Self {
            path: http_path(service, method),
            input,
            output,
        }
    }

    /// The method path, `/{service}/{method}`.
    pub fn path(&self) -> &str {
        self.path.as_str()
    }

    pub fn input(&self) -> &MessageDescriptor {
        &self.input
    }

    pub fn output(&self) -> &MessageDescriptor {
        &self.output
    }

    fn codec(&self) -> DynamicCodec {
        DynamicCodec::new(self.input.clone(), self.output.clone())
    }
}

/// Transport options applied to a single request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Custom gRPC metadata (headers) to attach to the request.
    pub headers: Vec<(String, String)>,
    /// Deadline propagated to the server through the `grpc-timeout` header.
    pub timeout: Option<Duration>,
}

/// A generic gRPC client exchanging [`DynamicMessage`] values.
#[derive(Debug, Clone)]
pub struct GrpcClient<S = Channel> {
    client: tonic::client::Grpc<S>,
}

impl<S> GrpcClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        let client = tonic::client::Grpc::new(service);
        Self { client }
    }

    /// Compresses requests with `encoding` and advertises support for compressed responses.
    pub fn with_compression(self, encoding: CompressionEncoding) -> Self {
        let client = self
            .client
            .send_compressed(encoding)
            .accept_compressed(encoding);
        Self { client }
    }

    /// Performs a Unary gRPC call (Single Request -> Single Response).
    ///
    /// # Returns
    /// * `Ok(Ok(DynamicMessage))` - Successful RPC execution.
    /// * `Ok(Err(Status))` - RPC executed, but server returned an error.
    /// * `Err(GrpcRequestError)` - Failed to send request or connect.
    pub async fn unary(
        &mut self,
        handler: &MethodHandler,
        payload: DynamicMessage,
        options: RequestOptions,
    ) -> Result<Result<DynamicMessage, tonic::Status>, GrpcRequestError> {
        self.ready().await?;

        let request = build_request(payload, options)?;

        match self
            .client
            .unary(request, handler.path.clone(), handler.codec())
            .await
        {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    /// Performs a Server Streaming gRPC call (Single Request -> Stream of Responses).
    ///
    /// # Returns
    ///
    /// * `Ok(Ok(Streaming))` - Successful RPC execution.
    /// * `Ok(Err(Status))` - RPC executed, but server returned an error.
    /// * `Err(GrpcRequestError)` - Failed to send request or connect.
    pub async fn server_streaming(
        &mut self,
        handler: &MethodHandler,
        payload: DynamicMessage,
        options: RequestOptions,
    ) -> Result<Result<Streaming<DynamicMessage>, tonic::Status>, GrpcRequestError> {
        self.ready().await?;

        let request = build_request(payload, options)?;

        match self
            .client
            .server_streaming(request, handler.path.clone(), handler.codec())
            .await
        {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    /// Performs a Client Streaming gRPC call (Stream of Requests -> Single Response).
    ///
    /// # Returns
    ///
    /// * `Ok(Ok(DynamicMessage))` - Successful RPC execution.
    /// * `Ok(Err(Status))` - RPC executed, but server returned an error.
    /// * `Err(GrpcRequestError)` - Failed to send request or connect.
    pub async fn client_streaming(
        &mut self,
        handler: &MethodHandler,
        payload_stream: impl Stream<Item = DynamicMessage> + Send + 'static,
        options: RequestOptions,
    ) -> Result<Result<DynamicMessage, tonic::Status>, GrpcRequestError> {
        self.ready().await?;

        let request = build_request(payload_stream, options)?;

        match self
            .client
            .client_streaming(request, handler.path.clone(), handler.codec())
            .await
        {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    /// Performs a Bidirectional Streaming gRPC call (Stream of Requests -> Stream of Responses).
    ///
    /// # Returns
    ///
    /// * `Ok(Ok(Streaming))` - Successful RPC execution.
    /// * `Ok(Err(Status))` - RPC executed, but server returned an error.
    /// * `Err(GrpcRequestError)` - Failed to send request or connect.
    pub async fn bidirectional_streaming(
        &mut self,
        handler: &MethodHandler,
        payload_stream: impl Stream<Item = DynamicMessage> + Send + 'static,
        options: RequestOptions,
    ) -> Result<Result<Streaming<DynamicMessage>, tonic::Status>, GrpcRequestError> {
        self.ready().await?;

        let request = build_request(payload_stream, options)?;

        match self
            .client
            .streaming(request, handler.path.clone(), handler.codec())
            .await
        {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    async fn ready(&mut self) -> Result<(), GrpcRequestError> {
        self.client
            .ready()
            .await
            .map_err(|e| GrpcRequestError::ClientNotReady(e.into()))
    }
}

fn http_path(service: &str, method: &str) -> http::uri::PathAndQuery {
    let path = format!("/{}/{}", service, method);
    http::uri::PathAndQuery::from_str(&path).expect("valid gRPC path")
}

fn build_request<T>(
    payload: T,
    options: RequestOptions,
) -> Result<tonic::Request<T>, GrpcRequestError> {
    let mut request = tonic::Request::new(payload);
    for (k, v) in options.headers {
        let key =
            MetadataKey::from_str(&k).map_err(|source| GrpcRequestError::InvalidMetadataKey {
                key: k.clone(),
                source,
            })?;
        let val = MetadataValue::from_str(&v)
            .map_err(|source| GrpcRequestError::InvalidMetadataValue { key: k, source })?;
        request.metadata_mut().insert(key, val);
    }
    if let Some(timeout) = options.timeout {
        request.set_timeout(timeout);
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_path_is_fully_qualified() {
        assert_eq!(
            http_path("helloworld.Greeter", "SayHello").as_str(),
            "/helloworld.Greeter/SayHello"
        );
    }

    #[test]
    fn test_build_request_rejects_invalid_header_key() {
        let options = RequestOptions {
            headers: vec![("bad key".to_string(), "value".to_string())],
            timeout: None,
        };

        let result = build_request((), options);

        assert!(matches!(
            result,
            Err(GrpcRequestError::InvalidMetadataKey { key, .. }) if key == "bad key"
        ));
    }

    #[test]
    fn test_build_request_sets_headers() {
        let options = RequestOptions {
            headers: vec![("password".to_string(), "12345".to_string())],
            timeout: Some(Duration::from_secs(1)),
        };

        let request = build_request((), options).unwrap();

        assert_eq!(
            request.metadata().get("password").unwrap().to_str().unwrap(),
            "12345"
        );
        assert!(request.metadata().get("grpc-timeout").is_some());
    }
}
