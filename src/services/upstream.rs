use super::blob::BlobKey;
use super::journal::WriteJournal;
use super::registry::Registry;
use super::upstream_client::UpstreamClient;
use crate::error::{RegistryError, RegistryResult};
use crate::models::{
    Metadata, NewPackage, NewRelease, Package, PackageSource, Release, Requirements,
    SearchOptions,
};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Steps of an upstream fetch, named in failure logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchStep {
    PackageInfo,
    PackageRecord,
    ReleaseTarball,
    ReleaseList,
    ParentPackage,
    ExtractMetadata,
    BlobUpload,
    ReleaseRecord,
    Search,
}

impl fmt::Display for FetchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            FetchStep::PackageInfo => "fetch package info",
            FetchStep::PackageRecord => "persist package",
            FetchStep::ReleaseTarball => "fetch release tarball",
            FetchStep::ReleaseList => "fetch release list",
            FetchStep::ParentPackage => "resolve parent package",
            FetchStep::ExtractMetadata => "extract release metadata",
            FetchStep::BlobUpload => "upload tarball",
            FetchStep::ReleaseRecord => "persist release",
            FetchStep::Search => "search",
        };
        f.write_str(step)
    }
}

#[derive(Debug, Default)]
struct UpstreamStats {
    packages_cached: AtomicU64,
    releases_cached: AtomicU64,
    failed_fetches: AtomicU64,
}

/// Point-in-time copy of the proxy counters.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpstreamStatsSnapshot {
    pub packages_cached: u64,
    pub releases_cached: u64,
    pub failed_fetches: u64,
}

/// Pull-through cache in front of the upstream registry.
///
/// Everything fetched is persisted with source `cached` and served locally
/// from then on. No fetch failure reaches the caller as anything but
/// `NotFound`; the failed step and cause go to the log.
pub struct UpstreamProxy {
    client: Arc<dyn UpstreamClient>,
    repository: String,
    stats: UpstreamStats,
}

impl UpstreamProxy {
    pub fn new(client: Arc<dyn UpstreamClient>, repository: impl Into<String>) -> Self {
        Self {
            client,
            repository: repository.into(),
            stats: UpstreamStats::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_enabled()
    }

    /// Repository name given to cached packages
    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn stats(&self) -> UpstreamStatsSnapshot {
        UpstreamStatsSnapshot {
            packages_cached: self.stats.packages_cached.load(Ordering::Relaxed),
            releases_cached: self.stats.releases_cached.load(Ordering::Relaxed),
            failed_fetches: self.stats.failed_fetches.load(Ordering::Relaxed),
        }
    }

    fn step_failed(
        &self,
        step: FetchStep,
        subject: &str,
        cause: &dyn fmt::Display,
    ) -> RegistryError {
        self.stats.failed_fetches.fetch_add(1, Ordering::Relaxed);
        warn!("Upstream fetch of {subject} failed at step '{step}': {cause}");
        RegistryError::NotFound(subject.to_string())
    }

    fn ensure_enabled(&self) -> RegistryResult<()> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(RegistryError::UpstreamDisabled)
        }
    }

    /// Fetches a package document and persists it as a cached package.
    /// Losing an insert race to a concurrent fetch returns the winner's row.
    pub async fn fetch_package(&self, registry: &Registry, name: &str) -> RegistryResult<Package> {
        self.ensure_enabled()?;
        let subject = format!("package {name}");

        let info = self
            .client
            .fetch_package(name)
            .await
            .map_err(|e| self.step_failed(FetchStep::PackageInfo, &subject, &e))?;

        if info.name != name {
            let cause = format!("upstream answered with package '{}'", info.name);
            return Err(self.step_failed(FetchStep::PackageInfo, &subject, &cause));
        }

        let new_package = NewPackage::new(
            name.to_string(),
            self.repository.clone(),
            Metadata::from_value(&info.meta),
            false,
            PackageSource::Cached,
        );

        match registry.insert_package(&new_package) {
            Ok(package) => {
                self.stats.packages_cached.fetch_add(1, Ordering::Relaxed);
                info!("Cached package from upstream: {name}");
                Ok(package)
            }
            Err(RegistryError::DuplicateName(_)) => {
                debug!("Package {name} was cached concurrently, using existing row");
                match registry.find_local_package(name) {
                    Ok(Some(package)) => Ok(package),
                    Ok(None) => Err(self.step_failed(
                        FetchStep::PackageRecord,
                        &subject,
                        &"row vanished after insert race",
                    )),
                    Err(e) => Err(self.step_failed(FetchStep::PackageRecord, &subject, &e)),
                }
            }
            Err(e) => Err(self.step_failed(FetchStep::PackageRecord, &subject, &e)),
        }
    }

    /// Fetches one release with its tarball (and docs when upstream has
    /// them) and persists it, creating the cached parent package first if
    /// needed.
    pub async fn fetch_release(
        &self,
        registry: &Registry,
        name: &str,
        version: &str,
    ) -> RegistryResult<Release> {
        self.ensure_enabled()?;
        let subject = format!("release {name} {version}");

        let tarball = self
            .client
            .fetch_release_tarball(name, version)
            .await
            .map_err(|e| self.step_failed(FetchStep::ReleaseTarball, &subject, &e))?;

        let releases = self
            .client
            .fetch_releases(name)
            .await
            .map_err(|e| self.step_failed(FetchStep::ReleaseList, &subject, &e))?;
        let info = releases
            .into_iter()
            .find(|release| release.version == version)
            .ok_or_else(|| {
                self.step_failed(FetchStep::ReleaseList, &subject, &"version not listed")
            })?;

        let local_parent = registry
            .find_local_package(name)
            .map_err(|e| self.step_failed(FetchStep::ParentPackage, &subject, &e))?;
        let parent = match local_parent {
            Some(package) => package,
            // fetch_package logs and counts its own failure
            None => self.fetch_package(registry, name).await.inspect_err(|_| {
                warn!(
                    "Upstream fetch of {subject} failed at step '{}'",
                    FetchStep::ParentPackage
                )
            })?,
        };

        if !matches!(
            info.requirements,
            Value::Null | Value::Object(_) | Value::Array(_)
        ) {
            let cause = format!("unusable requirements: {}", info.requirements);
            return Err(self.step_failed(FetchStep::ExtractMetadata, &subject, &cause));
        }
        let meta = Metadata::from_value(&info.meta);
        let requirements = Requirements::from_value(&info.requirements);
        let retirement = info.retirement.as_ref().map(|r| r.normalize());

        let docs = if info.has_docs {
            match self.client.fetch_docs_tarball(name, version).await {
                Ok(docs) => Some(docs),
                Err(e) => {
                    warn!("Docs for {name} {version} unavailable upstream, caching without: {e}");
                    None
                }
            }
        } else {
            None
        };

        let mut journal = WriteJournal::new(registry.blobs());
        if let Err(e) = journal
            .upload(&BlobKey::package(name, version), &tarball)
            .await
        {
            journal.rollback().await;
            return Err(self.step_failed(FetchStep::BlobUpload, &subject, &e));
        }

        let mut has_docs = false;
        if let Some(docs) = docs {
            match journal.upload(&BlobKey::docs(name, version), &docs).await {
                Ok(()) => has_docs = true,
                Err(e) => warn!("Failed to store docs for {name} {version}, caching without: {e}"),
            }
        }

        let mut new_release =
            NewRelease::new(parent.name.clone(), version.to_string(), meta, requirements)
                .retired(retirement);
        new_release.has_docs = has_docs;

        let result = registry.write_release(&new_release);
        let release = journal
            .finish(result)
            .await
            .map_err(|e| self.step_failed(FetchStep::ReleaseRecord, &subject, &e))?;

        self.stats.releases_cached.fetch_add(1, Ordering::Relaxed);
        info!(
            "Cached release from upstream: {name} {version} ({} bytes{})",
            tarball.len(),
            if has_docs { ", with docs" } else { "" }
        );
        Ok(release)
    }

    /// Upstream search results as unpersisted package records.
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> RegistryResult<(Vec<Package>, u64)> {
        self.ensure_enabled()?;
        let subject = format!("search '{query}'");

        let results = self
            .client
            .search_packages(query, options)
            .await
            .map_err(|e| self.step_failed(FetchStep::Search, &subject, &e))?;

        let packages = results
            .packages
            .iter()
            .map(|info| info.to_unpersisted_package(&self.repository))
            .collect();
        Ok((packages, results.total))
    }
}
