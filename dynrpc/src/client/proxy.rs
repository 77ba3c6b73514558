use crate::{
    BoxError,
    catalog::{CatalogError, MethodMetadata, ServiceMetadata, StreamingShape},
    dispatch::{CallError, CallInput, CallOptions, CallResponse, RequestDispatcher},
};
use http_body::Body as HttpBody;
use std::{collections::HashMap, sync::Arc};
use tonic::{client::GrpcService, transport::Channel};

/// A method bound to the dispatcher that executes it.
#[derive(Debug, Clone)]
pub struct BoundMethod<S = Channel> {
    metadata: Arc<MethodMetadata>,
    dispatcher: RequestDispatcher<S>,
}

impl<S> BoundMethod<S>
where
    S: GrpcService<tonic::body::Body> + Clone,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn metadata(&self) -> &MethodMetadata {
        &self.metadata
    }

    pub fn shape(&self) -> StreamingShape {
        self.metadata.shape()
    }

    pub async fn call(
        &self,
        input: impl Into<CallInput>,
        options: CallOptions,
    ) -> Result<CallResponse, CallError> {
        self.dispatcher
            .call(&self.metadata, input.into(), options)
            .await
    }
}

/// A registered service with one callable per method.
///
/// The callables are bound once, when the proxy is built, and share the catalog's metadata.
#[derive(Debug, Clone)]
pub struct ServiceProxy<S = Channel> {
    metadata: Arc<ServiceMetadata>,
    methods: HashMap<String, BoundMethod<S>>,
}

impl<S> ServiceProxy<S>
where
    S: GrpcService<tonic::body::Body> + Clone,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub(crate) fn new(metadata: Arc<ServiceMetadata>, dispatcher: RequestDispatcher<S>) -> Self {
        let methods = metadata
            .methods()
            .map(|method| {
                let bound = BoundMethod {
                    metadata: method.clone(),
                    dispatcher: dispatcher.clone(),
                };
                (method.name().to_string(), bound)
            })
            .collect();

        Self { metadata, methods }
    }

    /// The fully qualified service name.
    pub fn name(&self) -> &str {
        self.metadata.full_name()
    }

    /// Method names in declaration order.
    pub fn method_names(&self) -> &[String] {
        self.metadata.method_names()
    }

    pub fn methods_meta(&self) -> &ServiceMetadata {
        &self.metadata
    }

    pub fn method(&self, name: &str) -> Option<&BoundMethod<S>> {
        self.methods.get(name)
    }

    /// Calls `method` on this service.
    pub async fn call(
        &self,
        method: &str,
        input: impl Into<CallInput>,
        options: CallOptions,
    ) -> Result<CallResponse, CallError> {
        let bound = self
            .method(method)
            .ok_or_else(|| CatalogError::MethodNotFound {
                service: self.name().to_string(),
                method: method.to_string(),
                available: self.method_names().to_vec(),
            })?;

        bound.call(input, options).await
    }
}
