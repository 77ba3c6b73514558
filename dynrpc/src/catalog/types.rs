use crate::grpc::client::MethodHandler;
use prost_reflect::{MessageDescriptor, MethodDescriptor, ServiceDescriptor};
use std::{collections::HashMap, fmt, sync::Arc};

/// The four RPC shapes, named `{request}_{response}`.
///
/// Derived from a method's client-streaming and server-streaming flags and fixed for the
/// lifetime of the method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamingShape {
    UnaryUnary,
    StreamUnary,
    UnaryStream,
    StreamStream,
}

impl StreamingShape {
    pub fn from_flags(client_streaming: bool, server_streaming: bool) -> Self {
        match (client_streaming, server_streaming) {
            (false, false) => StreamingShape::UnaryUnary,
            (true, false) => StreamingShape::StreamUnary,
            (false, true) => StreamingShape::UnaryStream,
            (true, true) => StreamingShape::StreamStream,
        }
    }

    /// Classifies a method from its descriptor.
    pub fn of(method: &MethodDescriptor) -> Self {
        Self::from_flags(method.is_client_streaming(), method.is_server_streaming())
    }

    /// Whether the caller sends a single message.
    pub fn is_unary_request(self) -> bool {
        matches!(self, StreamingShape::UnaryUnary | StreamingShape::UnaryStream)
    }

    /// Whether the server answers with a single message.
    pub fn is_unary_response(self) -> bool {
        matches!(self, StreamingShape::UnaryUnary | StreamingShape::StreamUnary)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamingShape::UnaryUnary => "unary_unary",
            StreamingShape::StreamUnary => "stream_unary",
            StreamingShape::UnaryStream => "unary_stream",
            StreamingShape::StreamStream => "stream_stream",
        }
    }
}

impl fmt::Display for StreamingShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to call one method. Immutable once registered.
#[derive(Debug, Clone)]
pub struct MethodMetadata {
    name: String,
    service: String,
    shape: StreamingShape,
    descriptor: MethodDescriptor,
    handler: MethodHandler,
}

impl MethodMetadata {
    pub fn from_descriptor(descriptor: MethodDescriptor) -> Self {
        let service = descriptor.parent_service().full_name().to_string();
        let handler = MethodHandler::new(
            &service,
            descriptor.name(),
            descriptor.input(),
            descriptor.output(),
        );

        Self {
            name: descriptor.name().to_string(),
            service,
            shape: StreamingShape::of(&descriptor),
            descriptor,
            handler,
        }
    }

    /// The method name (e.g., `SayHello`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The fully qualified name of the owning service (e.g., `helloworld.Greeter`).
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn shape(&self) -> StreamingShape {
        self.shape
    }

    pub fn input(&self) -> &MessageDescriptor {
        self.handler.input()
    }

    pub fn output(&self) -> &MessageDescriptor {
        self.handler.output()
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub fn handler(&self) -> &MethodHandler {
        &self.handler
    }
}

/// The registered methods of a service.
///
/// Only ever built complete: a service is either absent from the catalog or has all of its
/// methods bound.
#[derive(Debug, Clone)]
pub struct ServiceMetadata {
    descriptor: ServiceDescriptor,
    method_names: Vec<String>,
    methods: HashMap<String, Arc<MethodMetadata>>,
}

impl ServiceMetadata {
    pub fn from_descriptor(descriptor: ServiceDescriptor) -> Self {
        let mut method_names = Vec::new();
        let mut methods = HashMap::new();

        for method in descriptor.methods() {
            let metadata = MethodMetadata::from_descriptor(method);

            tracing::debug!(
                service = descriptor.full_name(),
                method = metadata.name(),
                shape = %metadata.shape(),
                "bound method handler"
            );

            method_names.push(metadata.name().to_string());
            methods.insert(metadata.name().to_string(), Arc::new(metadata));
        }

        Self {
            descriptor,
            method_names,
            methods,
        }
    }

    pub fn full_name(&self) -> &str {
        self.descriptor.full_name()
    }

    /// Method names in declaration order.
    pub fn method_names(&self) -> &[String] {
        &self.method_names
    }

    pub fn method(&self, name: &str) -> Option<Arc<MethodMetadata>> {
        self.methods.get(name).cloned()
    }

    pub fn methods(&self) -> impl Iterator<Item = &Arc<MethodMetadata>> {
        self.method_names.iter().filter_map(|name| self.methods.get(name))
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }
}
