//! Record store: typed tables over SQLite with serialized transactions
//!
//! - `connection`: pool setup, storage tier probe and table placement
//! - `tables`: DDL, created per table at its effective tier
//! - `packages`, `releases`, `owners`, `repositories`, `downloads`:
//!   per-table operations that run on a caller-supplied connection
//! - `service`: `DatabaseService`, the transactional entry point

pub mod connection;
pub mod downloads;
pub mod owners;
pub mod packages;
pub mod releases;
pub mod repositories;
pub mod service;
pub mod tables;

pub use connection::{
    DbConnection, DbPool, StorageLayout, StorageTier, VOLATILE_SCHEMA, probe_storage_tier,
};
pub use service::{DatabaseService, TableSnapshot};
pub use tables::Table;

pub use downloads::DownloadOperations;
pub use owners::OwnerOperations;
pub use packages::PackageOperations;
pub use releases::ReleaseOperations;
pub use repositories::RepositoryOperations;
