//! # Server Reflection
//!
//! This module contains the logic necessary to interact with the gRPC Server Reflection Protocol.
//!
//! It lets the client query a server for the names of its services and for the serialized
//! schemas that describe them, so calls can be built without pre-compiled descriptors.
pub mod client;
