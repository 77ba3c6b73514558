//! # Request Dispatcher
//!
//! A single call path for the four RPC shapes:
//!
//! 1. **Encode**: a unary request is converted into the input schema before anything is sent,
//!    so structural mismatches fail without a network call. A streaming request is converted
//!    element by element while the transport pulls it; a mismatch cancels the call, so the
//!    server never sees a cleanly closed but truncated request, and is reported in place of
//!    the reply.
//! 2. **Invoke**: the method's bound [`MethodHandler`](crate::grpc::client::MethodHandler) is
//!    called through [`GrpcClient`].
//! 3. **Decode**: replies are turned into JSON records keyed by proto field names, unless raw
//!    output was requested. Streaming replies stay lazy, see [`ResponseStream`].
//!
//! Transport failures are never retried; the server's `tonic::Status` reaches the caller as is.
mod stream;
mod types;

pub use stream::ResponseStream;
pub use types::*;

use crate::{
    BoxError,
    catalog::{CatalogError, MethodMetadata, StreamingShape},
    grpc::client::{GrpcClient, GrpcRequestError, RequestOptions},
};
use futures_util::{StreamExt, stream::BoxStream};
use http_body::Body as HttpBody;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use stream::{EncodeAbort, encode_lazily};
use tonic::{client::GrpcService, codec::CompressionEncoding, transport::Channel};

/// A request or reply that does not fit its schema.
#[derive(Debug, thiserror::Error)]
pub enum StructuralParseError {
    #[error("Record does not match '{message_type}': {source}")]
    Mismatch {
        message_type: String,
        source: serde_json::Error,
    },
    #[error("Expected a '{expected}' message, got '{actual}'")]
    WrongMessageType { expected: String, actual: String },
    #[error("Message cannot be rebound to '{message_type}': {source}")]
    Transcode {
        message_type: String,
        source: prost::DecodeError,
    },
    #[error("Message '{message_type}' cannot be represented as JSON: {source}")]
    Unrepresentable {
        message_type: String,
        source: serde_json::Error,
    },
}

/// Errors that can occur during a dynamic call.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("Invalid input: '{0}'")]
    InvalidInput(String),
    #[error("Structural parse error: {0}")]
    StructuralParse(#[from] StructuralParseError),
    #[error("gRPC client request error: '{0}'")]
    GrpcRequest(#[from] GrpcRequestError),
    #[error("The server returned an error status: '{0}'")]
    Status(#[from] tonic::Status),
}

/// The result of a dynamic call.
#[derive(Debug)]
pub enum CallResponse {
    /// A single reply (for Unary and Client Streaming calls).
    Unary(ResponseMessage),
    /// A lazy sequence of replies (for Server Streaming and Bidirectional calls).
    Streaming(ResponseStream),
}

impl CallResponse {
    pub fn into_unary(self) -> Option<ResponseMessage> {
        match self {
            CallResponse::Unary(message) => Some(message),
            CallResponse::Streaming(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<ResponseStream> {
        match self {
            CallResponse::Streaming(stream) => Some(stream),
            CallResponse::Unary(_) => None,
        }
    }
}

/// Executes calls against registered methods.
///
/// Holds no per-method state; cloning it is cheap and clones share the connection.
#[derive(Debug, Clone)]
pub struct RequestDispatcher<S = Channel> {
    grpc: GrpcClient<S>,
}

impl<S> RequestDispatcher<S>
where
    S: GrpcService<tonic::body::Body> + Clone,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(grpc: GrpcClient<S>) -> Self {
        Self { grpc }
    }

    /// Compresses requests with `encoding` and accepts replies compressed with it.
    pub fn with_compression(self, encoding: CompressionEncoding) -> Self {
        Self {
            grpc: self.grpc.with_compression(encoding),
        }
    }

    /// Calls `method` with `input`.
    ///
    /// Availability is not checked here: `method` must come from the catalog.
    pub async fn call(
        &self,
        method: &MethodMetadata,
        input: CallInput,
        options: CallOptions,
    ) -> Result<CallResponse, CallError> {
        let mut grpc = self.grpc.clone();
        let handler = method.handler();
        let raw_output = options.raw_output;
        let request_options = RequestOptions {
            headers: options.headers,
            timeout: options.timeout,
        };

        tracing::debug!(
            path = handler.path(),
            shape = %method.shape(),
            "dispatching call"
        );

        match method.shape() {
            StreamingShape::UnaryUnary => {
                let payload = unary_payload(input, handler.input())?;
                let reply = grpc.unary(handler, payload, request_options).await??;
                Ok(CallResponse::Unary(ResponseMessage::decode(reply, raw_output)?))
            }
            StreamingShape::UnaryStream => {
                let payload = unary_payload(input, handler.input())?;
                let replies = grpc
                    .server_streaming(handler, payload, request_options)
                    .await??;
                Ok(CallResponse::Streaming(ResponseStream::new(
                    replies,
                    raw_output,
                    EncodeAbort::default(),
                )))
            }
            StreamingShape::StreamUnary => {
                let (payload, mut abort) =
                    encode_lazily(streaming_payload(input)?, handler.input().clone());
                let reply = abort
                    .cancel_on_failure(grpc.client_streaming(handler, payload, request_options))
                    .await???;

                Ok(CallResponse::Unary(ResponseMessage::decode(reply, raw_output)?))
            }
            StreamingShape::StreamStream => {
                let (payload, mut abort) =
                    encode_lazily(streaming_payload(input)?, handler.input().clone());
                let replies = abort
                    .cancel_on_failure(grpc.bidirectional_streaming(
                        handler,
                        payload,
                        request_options,
                    ))
                    .await???;

                Ok(CallResponse::Streaming(ResponseStream::new(
                    replies, raw_output, abort,
                )))
            }
        }
    }
}

fn unary_payload(
    input: CallInput,
    descriptor: &MessageDescriptor,
) -> Result<DynamicMessage, CallError> {
    match input {
        CallInput::Unary(request) => Ok(request.into_message(descriptor)?),
        CallInput::Streaming(_) => Err(CallError::InvalidInput(
            "Unary requests require a single message, got a stream".to_string(),
        )),
    }
}

fn streaming_payload(input: CallInput) -> Result<BoxStream<'static, RequestMessage>, CallError> {
    match input {
        CallInput::Streaming(requests) => Ok(requests),
        CallInput::Unary(RequestMessage::Record(serde_json::Value::Array(items))) => {
            Ok(futures_util::stream::iter(items)
                .map(RequestMessage::from)
                .boxed())
        }
        CallInput::Unary(_) => Err(CallError::InvalidInput(
            "Client streaming requires a JSON Array body or a stream of messages".to_string(),
        )),
    }
}
