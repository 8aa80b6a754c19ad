//! Private package registry engine: a transactional record store, the
//! package/release/ownership domain logic on top of it, and a pull-through
//! cache in front of an upstream registry.

pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod schema;
pub mod services;

pub use config::{AppConfig, TableTiers, UpstreamConfig};
pub use database::{DatabaseService, StorageTier, TableSnapshot};
pub use error::{BlobError, RegistryError, RegistryResult, UpstreamError};
pub use services::{BlobStore, Registry, UpstreamClient};
