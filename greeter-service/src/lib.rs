//! # Greeter Service
//!
//! **INTERNAL USE ONLY**: This crate exists solely to provide gRPC server stubs
//! and an encoded descriptor set for integration testing `dynrpc`.
//! It is not intended for production use.

pub mod helloworld {
    include!(concat!(env!("OUT_DIR"), "/helloworld.rs"));
}

pub mod dependencies {
    include!(concat!(env!("OUT_DIR"), "/dependencies.rs"));
}

pub use dependencies::greeter_server::{
    Greeter as DependenciesGreeter, GreeterServer as DependenciesGreeterServer,
};
pub use helloworld::greeter_server::{Greeter, GreeterServer};

pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("descriptors");
