use crate::config::UpstreamConfig;
use crate::error::{UpstreamError, UpstreamResult};
use crate::models::{PackageInfo, ReleaseInfo, SearchOptions, SearchResults};
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

/// Read-only access to the public upstream registry.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    fn is_enabled(&self) -> bool;

    async fn fetch_package(&self, name: &str) -> UpstreamResult<PackageInfo>;

    async fn fetch_releases(&self, name: &str) -> UpstreamResult<Vec<ReleaseInfo>>;

    async fn fetch_release_tarball(&self, name: &str, version: &str) -> UpstreamResult<Vec<u8>>;

    async fn fetch_docs_tarball(&self, name: &str, version: &str) -> UpstreamResult<Vec<u8>>;

    async fn search_packages(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> UpstreamResult<SearchResults>;
}

/// Upstream client speaking the Hex HTTP API.
#[derive(Debug, Clone)]
pub struct HttpUpstreamClient {
    client: reqwest::Client,
    config: UpstreamConfig,
}

impl HttpUpstreamClient {
    pub fn new(config: &UpstreamConfig) -> UpstreamResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("depot/", env!("CARGO_PKG_VERSION")))
            .build()?;

        if config.enabled {
            info!("Upstream registry: {} ({})", config.api_url, config.repo_url);
        } else {
            info!("Upstream registry disabled");
        }

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn ensure_enabled(&self) -> UpstreamResult<()> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(UpstreamError::Disabled)
        }
    }

    async fn get(&self, url: &str, what: &str) -> UpstreamResult<Response> {
        self.ensure_enabled()?;
        debug!("Fetching from upstream: {url}");

        let response = self.client.get(url).send().await?;
        check_status(response, what)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> UpstreamResult<T> {
        let response = self.get(url, what).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| UpstreamError::Decode(format!("{what}: {e}")))
    }

    async fn get_bytes(&self, url: &str, what: &str) -> UpstreamResult<Vec<u8>> {
        let response = self.get(url, what).await?;
        let bytes = response.bytes().await?;
        debug!("Fetched {what} from upstream ({} bytes)", bytes.len());
        Ok(bytes.to_vec())
    }
}

fn check_status(response: Response, what: &str) -> UpstreamResult<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else if status == StatusCode::NOT_FOUND {
        Err(UpstreamError::NotFound(what.to_string()))
    } else {
        warn!("Upstream returned error {status} for {what}");
        Err(UpstreamError::Status(status.as_u16()))
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn fetch_package(&self, name: &str) -> UpstreamResult<PackageInfo> {
        let url = format!("{}/packages/{name}", self.config.api_url);
        self.get_json(&url, &format!("package {name}")).await
    }

    async fn fetch_releases(&self, name: &str) -> UpstreamResult<Vec<ReleaseInfo>> {
        let url = format!("{}/packages/{name}/releases", self.config.api_url);
        self.get_json(&url, &format!("releases of {name}")).await
    }

    async fn fetch_release_tarball(&self, name: &str, version: &str) -> UpstreamResult<Vec<u8>> {
        let url = format!("{}/tarballs/{name}-{version}.tar", self.config.repo_url);
        self.get_bytes(&url, &format!("tarball {name}-{version}"))
            .await
    }

    async fn fetch_docs_tarball(&self, name: &str, version: &str) -> UpstreamResult<Vec<u8>> {
        let url = format!("{}/docs/{name}-{version}.tar.gz", self.config.repo_url);
        self.get_bytes(&url, &format!("docs {name}-{version}")).await
    }

    async fn search_packages(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> UpstreamResult<SearchResults> {
        self.ensure_enabled()?;
        let url = format!("{}/packages", self.config.api_url);
        debug!("Searching upstream for '{query}'");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("search", query.to_string()),
                ("page", options.page.to_string()),
                ("per_page", options.per_page.to_string()),
                ("sort", options.sort.as_str().to_string()),
            ])
            .send()
            .await?;
        let response = check_status(response, &format!("search '{query}'"))?;

        let total_header = response
            .headers()
            .get("x-total-count")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let packages: Vec<PackageInfo> = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(format!("search '{query}': {e}")))?;

        let total = total_header.unwrap_or(packages.len() as u64);
        Ok(SearchResults { packages, total })
    }
}
