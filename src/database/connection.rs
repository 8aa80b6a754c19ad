use crate::config::{AppConfig, TableTiers};
use crate::error::{RegistryError, RegistryResult};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use diesel::sqlite::SqliteConnection;
use log::{info, warn};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConnection = diesel::r2d2::PooledConnection<ConnectionManager<SqliteConnection>>;

/// Schema name under which in-memory tables are attached when the main
/// database lives on disk.
pub const VOLATILE_SCHEMA: &str = "volatile";

/// Where a table's rows live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageTier {
    /// On-disk, survives restarts
    Durable,
    /// In-memory for the lifetime of the store
    Memory,
}

impl StorageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageTier::Durable => "durable",
            StorageTier::Memory => "memory",
        }
    }

    /// The tier a table actually gets on a node with the given capability.
    pub fn effective(self, capability: StorageTier) -> StorageTier {
        match (self, capability) {
            (StorageTier::Durable, StorageTier::Durable) => StorageTier::Durable,
            _ => StorageTier::Memory,
        }
    }
}

impl FromStr for StorageTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "durable" | "disk" | "disc" => Ok(StorageTier::Durable),
            "memory" | "ram" => Ok(StorageTier::Memory),
            other => Err(format!("unknown storage tier: {other}")),
        }
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether this node can hold durable tables at all. Durable
/// storage needs a stable node identity and a writable data directory;
/// anything else downgrades to memory with a warning, never an error.
pub fn probe_storage_tier(config: &AppConfig) -> StorageTier {
    let Some(node_name) = config.node_name.as_deref().filter(|n| !n.trim().is_empty()) else {
        warn!("No stable node identity configured; all tables fall back to in-memory storage");
        return StorageTier::Memory;
    };

    if config.database_url == ":memory:" {
        warn!("Database URL is :memory:; node {node_name} runs with in-memory storage");
        return StorageTier::Memory;
    }

    let db_dir = Path::new(&config.database_url)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    if let Err(e) = std::fs::create_dir_all(db_dir) {
        warn!(
            "Database directory {} is not usable ({e}); node {node_name} falls back to in-memory storage",
            db_dir.display()
        );
        return StorageTier::Memory;
    }

    let probe_file = db_dir.join(format!(".depot-probe-{}", Uuid::new_v4().simple()));
    match std::fs::write(&probe_file, node_name.as_bytes()) {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe_file);
            info!("Node {node_name} has durable storage at {}", db_dir.display());
            StorageTier::Durable
        }
        Err(e) => {
            warn!(
                "Database directory {} is not writable ({e}); node {node_name} falls back to in-memory storage",
                db_dir.display()
            );
            StorageTier::Memory
        }
    }
}

fn shared_memory_url() -> String {
    format!("file:depot-{}?mode=memory&cache=shared", Uuid::new_v4().simple())
}

/// Resolved placement of every table, computed once per store.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub capability: StorageTier,
    pub main_url: String,
    /// Shared in-memory database attached as `volatile`, present only when
    /// some tables are memory-tier while the main database is on disk
    pub volatile_url: Option<String>,
    pub tiers: TableTiers,
}

impl StorageLayout {
    pub fn resolve(config: &AppConfig, capability: StorageTier) -> Self {
        let requested = config.table_tiers;
        let tiers = TableTiers {
            repositories: requested.repositories.effective(capability),
            packages: requested.packages.effective(capability),
            releases: requested.releases.effective(capability),
            owners: requested.owners.effective(capability),
            downloads: requested.downloads.effective(capability),
        };

        let any_memory = [
            tiers.repositories,
            tiers.packages,
            tiers.releases,
            tiers.owners,
            tiers.downloads,
        ]
        .contains(&StorageTier::Memory);

        match capability {
            StorageTier::Durable => Self {
                capability,
                main_url: config.database_url.clone(),
                volatile_url: any_memory.then(shared_memory_url),
                tiers,
            },
            StorageTier::Memory => Self {
                capability,
                main_url: shared_memory_url(),
                volatile_url: None,
                tiers,
            },
        }
    }

    /// Schema a table of the given tier is created in.
    pub fn schema_for(&self, tier: StorageTier) -> &'static str {
        match (tier, self.capability) {
            (StorageTier::Memory, StorageTier::Durable) => VOLATILE_SCHEMA,
            _ => "main",
        }
    }

    pub fn uses_shared_memory(&self) -> bool {
        self.capability == StorageTier::Memory || self.volatile_url.is_some()
    }

    /// URL of the in-memory database that must stay open for the store's
    /// lifetime, if any.
    pub fn memory_anchor_url(&self) -> Option<&str> {
        match self.capability {
            StorageTier::Memory => Some(&self.main_url),
            StorageTier::Durable => self.volatile_url.as_deref(),
        }
    }
}

/// SQLite connection customizer to enable WAL mode, set pragmas and attach
/// the volatile database on every pooled connection
#[derive(Debug)]
pub struct SqliteConnectionCustomizer {
    volatile_url: Option<String>,
}

impl SqliteConnectionCustomizer {
    pub fn new(layout: &StorageLayout) -> Self {
        Self {
            volatile_url: layout.volatile_url.clone(),
        }
    }
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqliteConnectionCustomizer {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        use diesel::sql_query;

        // Set busy timeout first (before WAL mode) - this one is critical
        sql_query("PRAGMA busy_timeout = 60000")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        let mut wal_attempts = 0;
        let max_wal_attempts = 3;
        loop {
            match sql_query("PRAGMA journal_mode = WAL").execute(conn) {
                Ok(_) => break,
                Err(e) => {
                    wal_attempts += 1;
                    if wal_attempts >= max_wal_attempts {
                        warn!("Failed to enable WAL mode after {max_wal_attempts} attempts: {e}");
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }

        if let Err(e) = sql_query("PRAGMA foreign_keys = ON").execute(conn) {
            warn!("Failed to enable foreign keys: {e}");
        }

        if let Err(e) = sql_query("PRAGMA synchronous = NORMAL").execute(conn) {
            warn!("Failed to set synchronous mode: {e}");
        }

        if let Err(e) = sql_query("PRAGMA cache_size = -32000").execute(conn) {
            warn!("Failed to set cache size: {e}");
        }

        if let Err(e) = sql_query("PRAGMA temp_store = MEMORY").execute(conn) {
            warn!("Failed to set temp store: {e}");
        }

        if let Some(url) = &self.volatile_url {
            sql_query(format!("ATTACH DATABASE '{url}' AS {VOLATILE_SCHEMA}"))
                .execute(conn)
                .map_err(diesel::r2d2::Error::QueryError)?;
        }

        Ok(())
    }
}

/// Creates a new database connection pool for the given layout
pub fn create_pool(layout: &StorageLayout) -> RegistryResult<DbPool> {
    if layout.capability == StorageTier::Durable {
        if let Some(parent) = Path::new(&layout.main_url)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                RegistryError::StorageFailure(format!(
                    "Failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
    }

    let manager = ConnectionManager::<SqliteConnection>::new(layout.main_url.as_str());
    let mut builder = Pool::builder()
        .max_size(20)
        .min_idle(Some(2))
        .connection_timeout(Duration::from_secs(60))
        .connection_customizer(Box::new(SqliteConnectionCustomizer::new(layout)));

    // In-memory data is anchored elsewhere, but recycling connections buys nothing
    if layout.uses_shared_memory() {
        builder = builder.idle_timeout(None).max_lifetime(None);
    } else {
        builder = builder
            .idle_timeout(Some(Duration::from_secs(300)))
            .max_lifetime(Some(Duration::from_secs(1800)));
    }

    let pool = builder.build(manager)?;

    info!(
        "Database pool ready ({} storage, main: {})",
        layout.capability,
        if layout.capability == StorageTier::Durable {
            layout.main_url.as_str()
        } else {
            "in-memory"
        }
    );

    Ok(pool)
}

/// Gets a connection from the pool with retry logic and exponential backoff
pub fn get_connection_with_retry(pool: &DbPool) -> Result<DbConnection, diesel::r2d2::Error> {
    let mut attempts = 0;
    let max_attempts = 5;

    loop {
        match pool.get() {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                attempts += 1;
                if attempts >= max_attempts {
                    return Err(diesel::r2d2::Error::ConnectionError(
                        diesel::ConnectionError::BadConnection(format!(
                            "Failed to get connection after {max_attempts} attempts: {e}"
                        )),
                    ));
                }

                // Exponential backoff: 10ms, 20ms, 40ms, 80ms
                let delay = Duration::from_millis(10 * (1 << (attempts - 1)));
                std::thread::sleep(delay);
            }
        }
    }
}
