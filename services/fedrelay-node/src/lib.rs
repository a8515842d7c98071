//! FedRelay node
//!
//! Library half of the `fedrelay-node` binary: the [`RelayService`] facade
//! over registries, the proof bridge and the audit coordinator, and the
//! coordinator key file.

pub mod keyfile;
pub mod service;

pub use keyfile::KeyFileError;
pub use service::{RelayService, ServiceError, Stores};

/// Version of the node-to-node relay protocol
pub const PROTOCOL_VERSION: u32 = 1;

/// Version of the on-disk store layout
pub const STORE_VERSION: u32 = 1;
