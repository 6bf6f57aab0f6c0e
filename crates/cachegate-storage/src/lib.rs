//! Cold-tier storage for cachegate.
//!
//! Byte-level [`object_store`] backends are wrapped by
//! [`engine::ObjectStoreEngine`] into the [`engine::StorageEngine`] contract
//! the controller talks to; [`registry::connect`] picks one by name.

pub mod compression;
pub mod engine;
pub mod key_codec;
pub mod object_store;
pub mod rate_limit;
pub mod registry;

pub use compression::CompressionConfig;
pub use engine::{ObjectStoreEngine, StorageEngine};
pub use object_store::{LocalObjectStore, MockFailure, MockObjectStore, ObjectStore, S3ObjectStore};
pub use rate_limit::FixedWindowLimiter;
pub use registry::{connect, EngineDescriptor, ENGINES};
