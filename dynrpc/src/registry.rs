//! # Descriptor Registry
//!
//! A [`DescriptorPool`] that only ever grows, plus the algorithm that installs files into it.
//!
//! A file can only be added to a pool once every file it imports is already there. Reflection
//! servers usually return files in a usable order, but nothing in the protocol guarantees it, so
//! [`DescriptorRegistry::register_file_descriptor`] resolves dependencies itself:
//!
//! 1. Dependencies are looked up in the working batch (files fetched together with the request)
//!    before asking the [`FileDescriptorSource`] for them.
//! 2. Extra files returned by a fetch are folded into the batch for later lookups.
//! 3. Traversal uses an explicit stack, so recursion depth does not depend on the depth of the
//!    import graph and the install order is observable through
//!    [`DescriptorRegistry::registration_order`].
use crate::reflection::client::{ReflectionClient, ReflectionResolveError};
use crate::BoxError;
use http_body::Body as HttpBody;
use prost_reflect::{DescriptorError, DescriptorPool};
use prost_types::FileDescriptorProto;
use std::collections::HashSet;
use std::future::Future;
use tonic::client::GrpcService;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Failed to fetch dependency '{name}': '{source}'")]
    FetchFailed {
        name: String,
        source: ReflectionResolveError,
    },
    #[error("Dependency '{0}' was not returned by the server")]
    MissingDependency(String),
    #[error("File '{0}' depends on itself")]
    DependencyCycle(String),
    #[error("Failed to add file '{file}' to the descriptor pool: '{source}'")]
    Descriptor {
        file: String,
        source: DescriptorError,
    },
    #[error("Failed to decode file descriptor set: '{0}'")]
    InvalidFileDescriptorSet(#[source] DescriptorError),
}

/// Something able to fetch schema files by their file name.
///
/// Implemented by [`ReflectionClient`]; tests provide in-memory implementations.
pub trait FileDescriptorSource {
    /// Returns the file named `name`, possibly followed by other files.
    fn file_descriptors_by_name(
        &mut self,
        name: &str,
    ) -> impl Future<Output = Result<Vec<FileDescriptorProto>, ReflectionResolveError>>;
}

impl<S> FileDescriptorSource for ReflectionClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    fn file_descriptors_by_name(
        &mut self,
        name: &str,
    ) -> impl Future<Output = Result<Vec<FileDescriptorProto>, ReflectionResolveError>> {
        ReflectionClient::file_descriptors_by_name(self, name)
    }
}

/// The set of schema files known to a client.
///
/// A file is registered at most once and only after all of its dependencies. Nothing is ever
/// evicted.
#[derive(Debug, Clone, Default)]
pub struct DescriptorRegistry {
    pool: DescriptorPool,
    registered: Vec<String>,
}

enum Pending {
    /// Dependencies of this file still have to be resolved.
    Expand(FileDescriptorProto),
    /// Every dependency of this file has been installed.
    Install(FileDescriptorProto),
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry seeded with an existing pool.
    ///
    /// Files of the pool count as registered but are not part of [`Self::registration_order`].
    pub fn from_pool(pool: DescriptorPool) -> Self {
        Self {
            pool,
            registered: Vec::new(),
        }
    }

    /// Creates a registry seeded with an encoded `FileDescriptorSet`.
    pub fn from_file_descriptor_set(bytes: &[u8]) -> Result<Self, RegistryError> {
        let pool = DescriptorPool::decode(bytes).map_err(RegistryError::InvalidFileDescriptorSet)?;
        Ok(Self::from_pool(pool))
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub fn is_registered(&self, file_name: &str) -> bool {
        self.pool.get_file_by_name(file_name).is_some()
    }

    /// Names of the files installed by this registry, in installation order.
    pub fn registration_order(&self) -> &[String] {
        &self.registered
    }

    /// Registers every file of `files`, using the whole batch to satisfy dependencies.
    pub async fn register_file_descriptors<F>(
        &mut self,
        files: Vec<FileDescriptorProto>,
        source: &mut F,
    ) -> Result<(), RegistryError>
    where
        F: FileDescriptorSource,
    {
        let mut batch = files.clone();

        for file in files {
            self.register_file_descriptor(file, &mut batch, source)
                .await?;
        }

        Ok(())
    }

    /// Registers `file` after all of its transitive dependencies.
    ///
    /// Dependencies are searched in `batch` first; anything fetched from `source` is appended to
    /// `batch`. Registering an already registered file is a no-op.
    pub async fn register_file_descriptor<F>(
        &mut self,
        file: FileDescriptorProto,
        batch: &mut Vec<FileDescriptorProto>,
        source: &mut F,
    ) -> Result<(), RegistryError>
    where
        F: FileDescriptorSource,
    {
        let mut stack = vec![Pending::Expand(file)];
        let mut expanded = HashSet::new();

        while let Some(pending) = stack.pop() {
            let file = match pending {
                Pending::Install(file) => {
                    self.install(file)?;
                    continue;
                }
                Pending::Expand(file) => file,
            };

            let name = file.name().to_string();

            if self.is_registered(&name) {
                tracing::debug!(file = %name, "already registered");
                continue;
            }

            // Popping a file again before it was installed means it is its own ancestor.
            if !expanded.insert(name.clone()) {
                return Err(RegistryError::DependencyCycle(name));
            }

            tracing::debug!(
                file = %name,
                dependencies = file.dependency.len(),
                "start file registration"
            );

            let mut dependencies = Vec::with_capacity(file.dependency.len());

            for dependency in &file.dependency {
                if self.is_registered(dependency) {
                    continue;
                }
                dependencies.push(resolve_dependency(dependency, batch, source).await?);
            }

            stack.push(Pending::Install(file));
            // Reversed so the first declared dependency is installed first.
            stack.extend(dependencies.into_iter().rev().map(Pending::Expand));
        }

        Ok(())
    }

    fn install(&mut self, file: FileDescriptorProto) -> Result<(), RegistryError> {
        let name = file.name().to_string();

        if self.is_registered(&name) {
            return Ok(());
        }

        match self.pool.add_file_descriptor_proto(file) {
            Ok(()) => {
                tracing::debug!(file = %name, "file registration complete");
                self.registered.push(name);
                Ok(())
            }
            Err(_) if self.is_registered(&name) => {
                tracing::debug!(file = %name, "already present in pool, skipping");
                Ok(())
            }
            Err(source) => Err(RegistryError::Descriptor { file: name, source }),
        }
    }
}

async fn resolve_dependency<F>(
    name: &str,
    batch: &mut Vec<FileDescriptorProto>,
    source: &mut F,
) -> Result<FileDescriptorProto, RegistryError>
where
    F: FileDescriptorSource,
{
    if let Some(found) = batch.iter().find(|f| f.name() == name) {
        return Ok(found.clone());
    }

    tracing::debug!(file = name, "fetching dependency");

    let fetched = source
        .file_descriptors_by_name(name)
        .await
        .map_err(|source| RegistryError::FetchFailed {
            name: name.to_string(),
            source,
        })?;

    let found = fetched
        .iter()
        .find(|f| f.name() == name)
        .cloned()
        .ok_or_else(|| RegistryError::MissingDependency(name.to_string()))?;

    for file in fetched {
        if !batch.iter().any(|f| f.name() == file.name()) {
            batch.push(file);
        }
    }

    Ok(found)
}
