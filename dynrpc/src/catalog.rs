//! # Service Catalog
//!
//! Maps service names to the metadata of their methods: call shape, input/output schemas and
//! the bound transport handler.
//!
//! A catalog discovers schemas in one of two ways:
//!
//! 1. **Reflection**: service names and schema files are fetched from the server on demand and
//!    installed through the [`DescriptorRegistry`].
//! 2. **Static**: the registry is seeded with a known `FileDescriptorSet` and no reflection call
//!    is ever made.
//!
//! Registration is idempotent: registering a service twice rebinds the same metadata and never
//! fetches files that are already installed.
mod types;

pub use types::*;

use crate::{
    BoxError,
    reflection::client::{ReflectionClient, ReflectionResolveError},
    registry::{DescriptorRegistry, RegistryError},
};
use http_body::Body as HttpBody;
use prost_reflect::{MethodDescriptor, ServiceDescriptor};
use prost_types::FileDescriptorProto;
use std::{collections::HashMap, sync::Arc};
use tonic::{client::GrpcService, transport::Channel};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Service '{service}' not found. Available services: {available:?}")]
    ServiceNotFound {
        service: String,
        available: Vec<String>,
    },
    #[error("Service '{service}' doesn't support method '{method}'. Available methods: {available:?}")]
    MethodNotFound {
        service: String,
        method: String,
        available: Vec<String>,
    },
    #[error("Method '{method}' is {actual} not {expected}")]
    ShapeMismatch {
        method: String,
        expected: StreamingShape,
        actual: StreamingShape,
    },
    #[error("Reflection resolution failed: '{0}'")]
    ReflectionResolve(#[from] ReflectionResolveError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("Schema discovery through reflection is disabled for this client")]
    ReflectionDisabled,
}

/// Where a catalog gets its schemas from.
#[derive(Debug, Clone)]
pub enum SchemaDiscovery<S = Channel> {
    /// Schemas are fetched through the server reflection service.
    Reflection(ReflectionClient<S>),
    /// Schemas were supplied up front; registration never fetches anything.
    Static,
}

#[derive(Debug, Clone)]
pub struct ServiceCatalog<S = Channel> {
    discovery: SchemaDiscovery<S>,
    registry: DescriptorRegistry,
    service_names: Option<Vec<String>>,
    services: HashMap<String, Arc<ServiceMetadata>>,
    fully_registered: bool,
}

impl<S> ServiceCatalog<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Creates a catalog discovering schemas through `reflection`.
    pub fn with_reflection(reflection: ReflectionClient<S>) -> Self {
        Self::new(SchemaDiscovery::Reflection(reflection), DescriptorRegistry::new())
    }

    /// Creates a catalog serving only the services already present in `registry`.
    pub fn with_registry(registry: DescriptorRegistry) -> Self {
        Self::new(SchemaDiscovery::Static, registry)
    }

    fn new(discovery: SchemaDiscovery<S>, registry: DescriptorRegistry) -> Self {
        Self {
            discovery,
            registry,
            service_names: None,
            services: HashMap::new(),
            fully_registered: false,
        }
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    pub fn is_fully_registered(&self) -> bool {
        self.fully_registered
    }

    pub fn uses_reflection(&self) -> bool {
        matches!(self.discovery, SchemaDiscovery::Reflection(_))
    }

    /// Names of the services exposed by the server.
    ///
    /// Fetched once, later calls read the cached list.
    pub async fn service_names(&mut self) -> Result<&[String], CatalogError> {
        if self.service_names.is_none() {
            let names = match &mut self.discovery {
                SchemaDiscovery::Reflection(reflection) => reflection.list_services().await?,
                SchemaDiscovery::Static => self
                    .registry
                    .pool()
                    .services()
                    .map(|s| s.full_name().to_string())
                    .collect(),
            };
            self.service_names = Some(names);
        }

        Ok(self.service_names.as_deref().unwrap_or_default())
    }

    /// Installs the schemas of `name` and binds a handler for each of its methods.
    pub async fn register_service(
        &mut self,
        name: &str,
    ) -> Result<Arc<ServiceMetadata>, CatalogError> {
        tracing::debug!(service = name, "start service registration");

        if let SchemaDiscovery::Reflection(reflection) = &mut self.discovery
            && self.registry.pool().get_service_by_name(name).is_none()
        {
            let fetched = reflection.file_descriptors_by_symbol(name).await;

            match fetched {
                Ok(files) => {
                    self.registry
                        .register_file_descriptors(files, reflection)
                        .await?
                }
                Err(err) if err.is_not_found() => return Err(self.service_not_found(name).await),
                Err(err) => return Err(err.into()),
            }
        }

        let Some(descriptor) = self.registry.pool().get_service_by_name(name) else {
            return Err(self.service_not_found(name).await);
        };

        let metadata = Arc::new(ServiceMetadata::from_descriptor(descriptor));
        self.services.insert(name.to_string(), metadata.clone());

        tracing::debug!(
            service = name,
            methods = metadata.method_names().len(),
            "service registration complete"
        );

        Ok(metadata)
    }

    /// Registers every service the server advertises.
    pub async fn register_all_services(&mut self) -> Result<(), CatalogError> {
        let names = self.service_names().await?.to_vec();

        for name in &names {
            self.register_service(name).await?;
        }

        self.fully_registered = true;
        Ok(())
    }

    /// Returns the metadata of `service`, registering it first if it is advertised but not yet
    /// registered.
    pub async fn service_metadata(
        &mut self,
        service: &str,
    ) -> Result<Arc<ServiceMetadata>, CatalogError> {
        if let Some(metadata) = self.services.get(service) {
            return Ok(metadata.clone());
        }

        if self.service_names().await?.iter().any(|s| s == service) {
            return self.register_service(service).await;
        }

        Err(self.service_not_found(service).await)
    }

    /// Checks that `service` exposes `method`, optionally with the given shape.
    ///
    /// Registers every service on first use.
    pub async fn check_available(
        &mut self,
        service: &str,
        method: &str,
        shape: Option<StreamingShape>,
    ) -> Result<Arc<MethodMetadata>, CatalogError> {
        if !self.fully_registered {
            self.register_all_services().await?;
        }

        let Some(service_metadata) = self.services.get(service).cloned() else {
            return Err(self.service_not_found(service).await);
        };

        select_method(&service_metadata, method, shape)
    }

    /// Like [`ServiceCatalog::check_available`], but only registers `service` itself, on first
    /// use.
    pub async fn resolve_method(
        &mut self,
        service: &str,
        method: &str,
        shape: Option<StreamingShape>,
    ) -> Result<Arc<MethodMetadata>, CatalogError> {
        let service_metadata = self.service_metadata(service).await?;
        select_method(&service_metadata, method, shape)
    }

    /// Looks up an already registered method without triggering any registration.
    pub fn method_metadata(&self, service: &str, method: &str) -> Option<Arc<MethodMetadata>> {
        self.services.get(service)?.method(method)
    }

    pub fn service_descriptor(&self, service: &str) -> Option<ServiceDescriptor> {
        self.registry.pool().get_service_by_name(service)
    }

    pub fn method_descriptor(&self, service: &str, method: &str) -> Option<MethodDescriptor> {
        self.service_descriptor(service)?
            .methods()
            .find(|m| m.name() == method)
    }

    /// Fetches the file named `name` through reflection, without registering it.
    pub async fn file_descriptors_by_name(
        &mut self,
        name: &str,
    ) -> Result<Vec<FileDescriptorProto>, CatalogError> {
        match &mut self.discovery {
            SchemaDiscovery::Reflection(reflection) => {
                Ok(reflection.file_descriptors_by_name(name).await?)
            }
            SchemaDiscovery::Static => Err(CatalogError::ReflectionDisabled),
        }
    }

    /// Fetches the file(s) defining `symbol` through reflection, without registering them.
    pub async fn file_descriptors_by_symbol(
        &mut self,
        symbol: &str,
    ) -> Result<Vec<FileDescriptorProto>, CatalogError> {
        match &mut self.discovery {
            SchemaDiscovery::Reflection(reflection) => {
                Ok(reflection.file_descriptors_by_symbol(symbol).await?)
            }
            SchemaDiscovery::Static => Err(CatalogError::ReflectionDisabled),
        }
    }

    /// Installs a batch of files, fetching missing dependencies through reflection.
    pub async fn register_file_descriptors(
        &mut self,
        files: Vec<FileDescriptorProto>,
    ) -> Result<(), CatalogError> {
        match &mut self.discovery {
            SchemaDiscovery::Reflection(reflection) => {
                Ok(self.registry.register_file_descriptors(files, reflection).await?)
            }
            SchemaDiscovery::Static => Err(CatalogError::ReflectionDisabled),
        }
    }

    async fn service_not_found(&mut self, service: &str) -> CatalogError {
        match self.service_names().await {
            Ok(names) => CatalogError::ServiceNotFound {
                service: service.to_string(),
                available: names.to_vec(),
            },
            Err(err) => err,
        }
    }
}

fn select_method(
    service: &ServiceMetadata,
    method: &str,
    shape: Option<StreamingShape>,
) -> Result<Arc<MethodMetadata>, CatalogError> {
    let metadata = service
        .method(method)
        .ok_or_else(|| CatalogError::MethodNotFound {
            service: service.full_name().to_string(),
            method: method.to_string(),
            available: service.method_names().to_vec(),
        })?;

    if let Some(expected) = shape
        && expected != metadata.shape()
    {
        return Err(CatalogError::ShapeMismatch {
            method: method.to_string(),
            expected,
            actual: metadata.shape(),
        });
    }

    Ok(metadata)
}
