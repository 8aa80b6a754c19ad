use super::connection::{
    DbConnection, DbPool, StorageLayout, StorageTier, create_pool, get_connection_with_retry,
    probe_storage_tier,
};
use super::owners::OwnerOperations;
use super::packages::PackageOperations;
use super::releases::ReleaseOperations;
use super::tables::{Table, create_all_tables};
use crate::config::AppConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::models::{Owner, Package, PackageSource, Release};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::{debug, info};
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// Every row belonging to packages of one source, for backup exporters.
#[derive(Serialize, Debug, Clone, Default)]
pub struct TableSnapshot {
    pub packages: Vec<Package>,
    pub releases: Vec<Release>,
    pub owners: Vec<Owner>,
}

/// The record store: a pooled SQLite database with serialized write
/// transactions and a point-read path.
pub struct DatabaseService {
    pub pool: DbPool,
    layout: StorageLayout,
    write_lock: Mutex<()>,
    // Keeps shared in-memory databases alive while the pool recycles connections
    _anchor: Option<Mutex<SqliteConnection>>,
}

impl fmt::Debug for DatabaseService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseService")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl DatabaseService {
    /// Probes the node's storage capability and opens the store with it
    pub fn new(config: &AppConfig) -> RegistryResult<Self> {
        let capability = probe_storage_tier(config);
        Self::with_capability(config, capability)
    }

    /// Opens the store with an already-decided storage capability
    pub fn with_capability(config: &AppConfig, capability: StorageTier) -> RegistryResult<Self> {
        let layout = StorageLayout::resolve(config, capability);

        let anchor = match layout.memory_anchor_url() {
            Some(url) => Some(Mutex::new(SqliteConnection::establish(url).map_err(|e| {
                RegistryError::StorageFailure(format!("Failed to open in-memory database: {e}"))
            })?)),
            None => None,
        };

        let pool = create_pool(&layout)?;

        {
            let mut conn = get_connection_with_retry(&pool)?;
            create_all_tables(&mut conn, &config.table_tiers, &layout)?;
        }

        info!(
            "Record store initialized ({} node{})",
            layout.capability,
            if layout.volatile_url.is_some() {
                ", mixed table tiers"
            } else {
                ""
            }
        );

        Ok(Self {
            pool,
            layout,
            write_lock: Mutex::new(()),
            _anchor: anchor,
        })
    }

    /// Gets a connection from the pool with retry logic
    pub fn get_connection(&self) -> Result<DbConnection, diesel::r2d2::Error> {
        get_connection_with_retry(&self.pool)
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn tier_of(&self, table: Table) -> StorageTier {
        table.tier_in(&self.layout.tiers)
    }

    /// Non-transactional point read of committed state. Shared-cache
    /// in-memory tables have no snapshot isolation, so on stores holding
    /// any of them the read waits for the in-flight writer to finish.
    pub fn read<T, F>(&self, f: F) -> RegistryResult<T>
    where
        F: FnOnce(&mut SqliteConnection) -> RegistryResult<T>,
    {
        let _guard = self.layout.uses_shared_memory().then(|| self.lock_writes());
        let mut conn = self.get_connection()?;
        f(&mut conn)
    }

    /// Runs `f` in a write transaction. Writers are serialized by the store;
    /// any error returned by `f` rolls the whole transaction back.
    pub fn transaction<T, F>(&self, f: F) -> RegistryResult<T>
    where
        F: FnOnce(&mut SqliteConnection) -> RegistryResult<T>,
    {
        let _guard = self.lock_writes();
        let mut conn = self.get_connection()?;
        conn.immediate_transaction(f)
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Exports every package of `source` with its releases and owners.
    pub fn snapshot(&self, source: PackageSource) -> RegistryResult<TableSnapshot> {
        self.transaction(|conn| {
            let packages = PackageOperations::new(conn).load_by_source(source)?;
            let names: Vec<String> = packages.iter().map(|p| p.name.clone()).collect();
            let releases = ReleaseOperations::new(conn).load_for_packages(&names)?;
            let owners = OwnerOperations::new(conn).load_for_packages(&names)?;

            debug!(
                "Snapshot of {source} packages: {} packages, {} releases, {} owners",
                packages.len(),
                releases.len(),
                owners.len()
            );

            Ok(TableSnapshot {
                packages,
                releases,
                owners,
            })
        })
    }
}
