//! # dynrpc
//!
//! `dynrpc` is a schema-less gRPC client. It talks to servers whose interface is unknown
//! at build time, discovers that interface at runtime through the gRPC Server Reflection
//! Protocol, and lets callers invoke any method with plain JSON values instead of
//! pre-compiled stubs.
//!
//! ## Key Components
//!
//! * **[`DynamicClient`]:** The main entry point. It owns the connection, the service catalog
//!   and the dispatcher, and exposes calls for the four RPC shapes.
//! * **[`ServiceProxy`]:** A per-service façade with one bound callable per method.
//! * **[`ClientCache`]:** An endpoint keyed cache that keeps at most one live client per endpoint.
//!
//! ## Internal building blocks
//!
//! The layers used internally are public so they can be composed differently:
//!
//! * **[`ReflectionClient`]:** Issues single reflection requests (list services, file by name,
//!   file containing symbol).
//! * **[`DescriptorRegistry`]:** A descriptor pool that installs files only after their
//!   transitive dependencies.
//! * **[`ServiceCatalog`]:** Maps services to per-method metadata and bound handlers.
//! * **[`RequestDispatcher`]:** Encodes input, invokes the bound handler and decodes output,
//!   uniformly across all call shapes.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dynrpc::{CallOptions, DynamicClient};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = DynamicClient::connect("localhost:50051").await?;
//!
//! let greeter = client.service("helloworld.Greeter").await?;
//! let response = greeter
//!     .call("SayHello", serde_json::json!({ "name": "sinsky" }), CallOptions::default())
//!     .await?;
//!
//! if let Some(reply) = response.into_unary() {
//!     println!("{}", reply.to_value()?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod catalog;
pub mod client;
pub mod dispatch;
pub mod grpc;
pub mod reflection;
pub mod registry;

pub use catalog::{
    CatalogError, MethodMetadata, ServiceCatalog, ServiceMetadata, StreamingShape,
};
pub use client::{
    BoundMethod, ClientBuilder, ClientCache, ClientConnectError, CredentialError,
    CredentialSource, Credentials, DynamicClient, ServiceProxy, SharedClient, get_by_endpoint,
    reset_cached_client,
};
pub use dispatch::{
    CallError, CallInput, CallOptions, CallResponse, RequestDispatcher, RequestMessage,
    ResponseMessage, ResponseStream, StructuralParseError,
};
pub use grpc::client::MethodHandler;
pub use reflection::client::{ReflectionClient, ReflectionResolveError};
pub use registry::{DescriptorRegistry, FileDescriptorSource, RegistryError};

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
