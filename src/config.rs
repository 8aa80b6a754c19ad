use crate::database::StorageTier;
use log::info;
use std::env;
use std::time::Duration;

/// Requested storage tier for every table the record store creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableTiers {
    pub repositories: StorageTier,
    pub packages: StorageTier,
    pub releases: StorageTier,
    pub owners: StorageTier,
    pub downloads: StorageTier,
}

impl Default for TableTiers {
    fn default() -> Self {
        Self::uniform(StorageTier::Durable)
    }
}

impl TableTiers {
    pub fn uniform(tier: StorageTier) -> Self {
        Self {
            repositories: tier,
            packages: tier,
            releases: tier,
            owners: tier,
            downloads: tier,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub enabled: bool,
    pub api_url: String,
    pub repo_url: String,
    /// Repository name given to packages cached from upstream
    pub repository: String,
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: "https://hex.pm/api".to_string(),
            repo_url: "https://repo.hex.pm".to_string(),
            repository: "hexpm".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: String,
    pub database_url: String,
    pub blob_dir: String,
    pub node_name: Option<String>,
    pub table_tiers: TableTiers,
    pub upstream: UpstreamConfig,
    pub default_per_page: u32,
    pub max_per_page: u32,
    pub recent_download_days: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            database_url: "./data/depot.db".to_string(),
            blob_dir: "./data/blobs".to_string(),
            node_name: None,
            table_tiers: TableTiers::default(),
            upstream: UpstreamConfig::default(),
            default_per_page: 30,
            max_per_page: 100,
            recent_download_days: 90,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_tier(key: &str) -> StorageTier {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<StorageTier>().ok())
        .unwrap_or(StorageTier::Durable)
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let data_dir = env::var("DEPOT_DATA_DIR").unwrap_or(defaults.data_dir);

        let database_url =
            env::var("DEPOT_DATABASE_URL").unwrap_or_else(|_| format!("{data_dir}/depot.db"));

        let blob_dir = env::var("DEPOT_BLOB_DIR").unwrap_or_else(|_| format!("{data_dir}/blobs"));

        let node_name = env::var("DEPOT_NODE_NAME")
            .ok()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        let table_tiers = TableTiers {
            repositories: env_tier("DEPOT_TIER_REPOSITORIES"),
            packages: env_tier("DEPOT_TIER_PACKAGES"),
            releases: env_tier("DEPOT_TIER_RELEASES"),
            owners: env_tier("DEPOT_TIER_OWNERS"),
            downloads: env_tier("DEPOT_TIER_DOWNLOADS"),
        };

        let upstream = UpstreamConfig {
            enabled: env_parse("DEPOT_UPSTREAM_ENABLED", defaults.upstream.enabled),
            api_url: env::var("DEPOT_UPSTREAM_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.upstream.api_url),
            repo_url: env::var("DEPOT_UPSTREAM_REPO_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.upstream.repo_url),
            repository: env::var("DEPOT_UPSTREAM_REPOSITORY")
                .unwrap_or(defaults.upstream.repository),
            timeout: Duration::from_secs(env_parse("DEPOT_UPSTREAM_TIMEOUT_SECS", 30u64)),
        };

        let default_per_page = env_parse("DEPOT_DEFAULT_PER_PAGE", defaults.default_per_page);
        let max_per_page = env_parse("DEPOT_MAX_PER_PAGE", defaults.max_per_page).max(1);
        let recent_download_days =
            env_parse("DEPOT_RECENT_DOWNLOAD_DAYS", defaults.recent_download_days);

        info!("Configuration loaded:");
        info!("  Data Directory: {data_dir}");
        info!("  Database URL: {database_url}");
        info!("  Blob Directory: {blob_dir}");
        info!(
            "  Node Name: {}",
            node_name.as_deref().unwrap_or("<none>")
        );
        info!("  Table Tiers: {table_tiers:?}");
        info!("  Upstream Enabled: {}", upstream.enabled);
        info!("  Upstream API: {}", upstream.api_url);
        info!("  Upstream Repo: {}", upstream.repo_url);
        info!("  Upstream Timeout: {:?}", upstream.timeout);
        info!("  Page Size: {default_per_page} (max {max_per_page})");

        Self {
            data_dir,
            database_url,
            blob_dir,
            node_name,
            table_tiers,
            upstream,
            default_per_page,
            max_per_page,
            recent_download_days,
        }
    }

    /// Config for an ephemeral node: no identity, upstream disabled.
    pub fn ephemeral() -> Self {
        Self {
            upstream: UpstreamConfig {
                enabled: false,
                ..UpstreamConfig::default()
            },
            ..Self::default()
        }
    }
}
