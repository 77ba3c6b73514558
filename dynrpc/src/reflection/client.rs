//! # Reflection Client
//!
//! A client implementation for `grpc.reflection.v1`.
//!
//! Every operation opens the bidirectional `ServerReflectionInfo` stream, sends exactly one
//! request and consumes exactly the first response. Only one logical request is ever in flight
//! per call, even though the transport is a full duplex stream. Dependency resolution is not
//! done here, see [`crate::registry::DescriptorRegistry`].
//!
//! ## References
//!
//! * [gRPC Server Reflection Protocol](https://github.com/grpc/grpc/blob/master/doc/server-reflection.md)
use crate::BoxError;
use futures_util::stream::once;
use http_body::Body as HttpBody;
use prost::Message;
use prost_types::FileDescriptorProto;
use tonic::{Code, client::GrpcService, transport::Channel};
use tonic_reflection::pb::v1::{
    ServerReflectionRequest, server_reflection_client::ServerReflectionClient,
    server_reflection_request::MessageRequest, server_reflection_response::MessageResponse,
};

#[derive(Debug, thiserror::Error)]
pub enum ReflectionResolveError {
    #[error(
        "Failed to start a stream request with the reflection server, reflection might not be supported: '{0}'"
    )]
    ServerStreamInitFailed(#[source] tonic::Status),

    #[error("The server stream returned an error status: '{0}'")]
    ServerStreamFailure(#[source] tonic::Status),

    #[error("Reflection stream closed before a response was received")]
    StreamClosed,

    #[error("The reflection server does not know '{0}'")]
    NotFound(String),

    #[error("Server returned reflection error code {code}: {message}")]
    ServerError { code: i32, message: String },

    #[error("Protocol error: Received unexpected response type: {0}")]
    UnexpectedResponseType(String),

    #[error("Failed to decode FileDescriptorProto: {0}")]
    DecodeError(#[from] prost::DecodeError),
}

impl ReflectionResolveError {
    /// Whether the server positively reported the requested name as unknown.
    ///
    /// A `false` answer does not mean the name exists: transport failures are reported
    /// through the other variants and leave the question open.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReflectionResolveError::NotFound(_))
    }
}

// The host defined in the reflection requests doesn't seem to be a mandatory field
// and there is no documentation about what it is about.
// So we won't enforce it from the user.
const EMPTY_HOST: &str = "";

/// A generic client for the gRPC Server Reflection Protocol.
#[derive(Debug, Clone)]
pub struct ReflectionClient<S = Channel> {
    client: ServerReflectionClient<S>,
}

impl<S> ReflectionClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(channel: S) -> Self {
        let client = ServerReflectionClient::new(channel);
        Self { client }
    }

    /// Lists all services exposed by the server, in the order the server advertises them.
    pub async fn list_services(&mut self) -> Result<Vec<String>, ReflectionResolveError> {
        let response = self
            .single_request(MessageRequest::ListServices(String::new()), "*")
            .await?;

        match response {
            MessageResponse::ListServicesResponse(resp) => {
                Ok(resp.service.into_iter().map(|s| s.name).collect())
            }
            other => Err(ReflectionResolveError::UnexpectedResponseType(format!(
                "{other:?}"
            ))),
        }
    }

    /// Fetches the file named `name`.
    ///
    /// Servers usually answer with the requested file first, optionally followed by some or all
    /// of its transitive dependencies. No ordering is assumed by callers.
    pub async fn file_descriptors_by_name(
        &mut self,
        name: &str,
    ) -> Result<Vec<FileDescriptorProto>, ReflectionResolveError> {
        let response = self
            .single_request(MessageRequest::FileByFilename(name.to_string()), name)
            .await?;

        decode_file_descriptors(response)
    }

    /// Fetches the file(s) defining `symbol` (e.g., `my.package.MyService`).
    pub async fn file_descriptors_by_symbol(
        &mut self,
        symbol: &str,
    ) -> Result<Vec<FileDescriptorProto>, ReflectionResolveError> {
        let response = self
            .single_request(MessageRequest::FileContainingSymbol(symbol.to_string()), symbol)
            .await?;

        decode_file_descriptors(response)
    }

    /// Sends one request and returns the first response on the stream.
    ///
    /// The response stream is dropped afterwards, which cancels the underlying HTTP/2 stream.
    async fn single_request(
        &mut self,
        message_request: MessageRequest,
        subject: &str,
    ) -> Result<MessageResponse, ReflectionResolveError> {
        let req = ServerReflectionRequest {
            host: EMPTY_HOST.to_string(),
            message_request: Some(message_request),
        };

        let mut response_stream = self
            .client
            .server_reflection_info(once(async { req }))
            .await
            .map_err(ReflectionResolveError::ServerStreamInitFailed)?
            .into_inner();

        let response = match response_stream.message().await {
            Ok(Some(response)) => response,
            Ok(None) => {
                tracing::warn!(subject, "reflection stream closed without a response");
                return Err(ReflectionResolveError::StreamClosed);
            }
            Err(status) if status.code() == Code::NotFound => {
                tracing::debug!(subject, "reflection server reported not found");
                return Err(ReflectionResolveError::NotFound(subject.to_string()));
            }
            Err(status) => {
                tracing::warn!(subject, %status, "reflection stream failed");
                return Err(ReflectionResolveError::ServerStreamFailure(status));
            }
        };

        match response.message_response {
            Some(MessageResponse::ErrorResponse(e)) if e.error_code == Code::NotFound as i32 => {
                Err(ReflectionResolveError::NotFound(subject.to_string()))
            }
            Some(MessageResponse::ErrorResponse(e)) => Err(ReflectionResolveError::ServerError {
                code: e.error_code,
                message: e.error_message,
            }),
            Some(other) => Ok(other),
            None => Err(ReflectionResolveError::UnexpectedResponseType(
                "Empty Message".into(),
            )),
        }
    }
}

fn decode_file_descriptors(
    response: MessageResponse,
) -> Result<Vec<FileDescriptorProto>, ReflectionResolveError> {
    match response {
        MessageResponse::FileDescriptorResponse(res) => res
            .file_descriptor_proto
            .iter()
            .map(|raw| FileDescriptorProto::decode(raw.as_ref()).map_err(Into::into))
            .collect(),
        other => Err(ReflectionResolveError::UnexpectedResponseType(format!(
            "{other:?}"
        ))),
    }
}
