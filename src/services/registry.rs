use super::blob::{BlobKey, BlobStore, FilesystemBlobStore, MemoryBlobStore};
use super::journal::WriteJournal;
use super::upstream::UpstreamProxy;
use super::upstream_client::{HttpUpstreamClient, UpstreamClient};
use crate::config::AppConfig;
use crate::database::{
    DatabaseService, DownloadOperations, OwnerOperations, PackageOperations, ReleaseOperations,
    RepositoryOperations, StorageTier, TableSnapshot,
};
use crate::error::{BlobError, RegistryError, RegistryResult};
use crate::models::{
    ListQuery, Metadata, NewOwner, NewPackage, NewRelease, Owner, Package, PackagePage,
    PackageSort, PackageSource, PermissionLevel, Release, Repository, RepositorySummary,
    Requirements, Retirement, RetirementReason, SearchOptions, is_valid_version,
};
use chrono::{Days, NaiveDate, Utc};
use diesel::sqlite::SqliteConnection;
use log::{debug, info, warn};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

const MAX_NAME_LENGTH: usize = 100;

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("name pattern is a valid regex"));

/// Package and repository names: lowercase ASCII letter first, then
/// lowercase letters, digits or underscores, at most 100 characters.
pub fn is_valid_name(name: &str) -> bool {
    name.len() <= MAX_NAME_LENGTH && NAME_PATTERN.is_match(name)
}

fn validate_name(kind: &str, name: &str) -> RegistryResult<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(RegistryError::InvalidInput(format!(
            "invalid {kind} name '{name}'"
        )))
    }
}

fn validate_version(version: &str) -> RegistryResult<()> {
    if is_valid_version(version) {
        Ok(())
    } else {
        Err(RegistryError::InvalidInput(format!(
            "invalid version '{version}'"
        )))
    }
}

fn package_not_found(name: &str) -> RegistryError {
    RegistryError::NotFound(format!("package {name}"))
}

fn release_not_found(name: &str, version: &str) -> RegistryError {
    RegistryError::NotFound(format!("release {name} {version}"))
}

fn matches_listing(package: &Package, search: Option<&str>, letter: Option<char>) -> bool {
    if let Some(letter) = letter {
        let first = package.name.chars().next().map(|c| c.to_ascii_lowercase());
        if first != Some(letter.to_ascii_lowercase()) {
            return false;
        }
    }

    match search {
        None => true,
        Some(term) => {
            package.name.to_lowercase().contains(term)
                || package
                    .description()
                    .is_some_and(|d| d.to_lowercase().contains(term))
        }
    }
}

/// Orders packages for listing. Every ordering falls back to name ascending.
fn sort_packages(
    packages: &mut [Package],
    sort: PackageSort,
    recent_downloads: &HashMap<String, i64>,
) {
    let recent = |package: &Package| recent_downloads.get(&package.name).copied().unwrap_or(0);

    packages.sort_by(|a, b| {
        let primary = match sort {
            PackageSort::RecentDownloads => recent(b).cmp(&recent(a)),
            PackageSort::TotalDownloads => b.downloads.cmp(&a.downloads),
            PackageSort::Name => Ordering::Equal,
            PackageSort::RecentlyUpdated => b.updated_at.cmp(&a.updated_at),
            PackageSort::RecentlyCreated => b.created_at.cmp(&a.created_at),
        };
        primary.then_with(|| a.name.cmp(&b.name))
    });
}

/// Removes a package and everything hanging off it. Returns the versions
/// it had so their blobs can be removed once the transaction commits.
fn delete_package_rows(conn: &mut SqliteConnection, name: &str) -> RegistryResult<Vec<String>> {
    let versions = ReleaseOperations::new(conn)
        .list_for_package(name)?
        .into_iter()
        .map(|release| release.version)
        .collect();

    let releases = ReleaseOperations::new(conn).delete_for_package(name)?;
    let owners = OwnerOperations::new(conn).delete_for_package(name)?;
    DownloadOperations::new(conn).delete_for_package(name)?;
    PackageOperations::new(conn).delete(name)?;

    debug!("Deleted package {name} with {releases} releases and {owners} owner rows");
    Ok(versions)
}

/// Package, release, ownership and repository logic over the record store,
/// the blob store and the upstream caching proxy.
pub struct Registry {
    config: AppConfig,
    store: Arc<DatabaseService>,
    blobs: Arc<dyn BlobStore>,
    upstream: UpstreamProxy,
}

impl Registry {
    pub fn new(
        config: AppConfig,
        store: Arc<DatabaseService>,
        blobs: Arc<dyn BlobStore>,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Self {
        let upstream = UpstreamProxy::new(upstream, config.upstream.repository.clone());
        Self {
            config,
            store,
            blobs,
            upstream,
        }
    }

    /// Opens the record store, the blob store and the HTTP upstream client
    /// described by `config`. Nodes that fall back to in-memory storage
    /// keep their blobs in memory too.
    pub fn from_config(config: AppConfig) -> RegistryResult<Self> {
        let store = Arc::new(DatabaseService::new(&config)?);

        let blobs: Arc<dyn BlobStore> = match store.layout().capability {
            StorageTier::Durable => Arc::new(FilesystemBlobStore::new(&config.blob_dir)?),
            StorageTier::Memory => {
                info!("Blob store kept in memory");
                Arc::new(MemoryBlobStore::new())
            }
        };

        let client = HttpUpstreamClient::new(&config.upstream).map_err(|e| {
            RegistryError::InvalidInput(format!("Failed to build upstream client: {e}"))
        })?;

        Ok(Self::new(config, store, blobs, Arc::new(client)))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &DatabaseService {
        &self.store
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    pub fn upstream(&self) -> &UpstreamProxy {
        &self.upstream
    }

    pub(crate) fn find_local_package(&self, name: &str) -> RegistryResult<Option<Package>> {
        self.store
            .read(|conn| Ok(PackageOperations::new(conn).find_by_name(name)?))
    }

    /// Inserts a package, creating its repository record if needed.
    pub(crate) fn insert_package(&self, new_package: &NewPackage) -> RegistryResult<Package> {
        self.store.transaction(|conn| {
            if PackageOperations::new(conn).exists(&new_package.name)? {
                return Err(RegistryError::DuplicateName(new_package.name.clone()));
            }
            RepositoryOperations::new(conn).ensure(&new_package.repository_name)?;
            Ok(PackageOperations::new(conn).insert(new_package)?)
        })
    }

    /// Writes the release row and touches its package. The package must
    /// still exist when the transaction runs.
    pub(crate) fn write_release(&self, new_release: &NewRelease) -> RegistryResult<Release> {
        self.store.transaction(|conn| {
            if !PackageOperations::new(conn).exists(&new_release.package_name)? {
                return Err(RegistryError::DependencyMissing(format!(
                    "package {}",
                    new_release.package_name
                )));
            }
            let release = ReleaseOperations::new(conn).upsert(new_release)?;
            PackageOperations::new(conn).touch(&new_release.package_name, release.updated_at)?;
            Ok(release)
        })
    }

    async fn remove_release_blobs(&self, name: &str, versions: &[String]) {
        for version in versions {
            for key in [BlobKey::package(name, version), BlobKey::docs(name, version)] {
                if let Err(e) = self.blobs.delete(&key).await {
                    warn!("Failed to remove blob {key} of deleted package {name}: {e}");
                }
            }
        }
    }

    async fn download_blob(&self, key: &str) -> RegistryResult<Vec<u8>> {
        match self.blobs.download(key).await {
            Ok(bytes) => Ok(bytes),
            Err(BlobError::NotFound(key)) => Err(RegistryError::NotFound(key)),
            Err(e) => Err(e.into()),
        }
    }

    // Packages

    pub fn create_package(
        &self,
        name: &str,
        repository: &str,
        meta: Metadata,
        private: bool,
        source: PackageSource,
    ) -> RegistryResult<Package> {
        validate_name("package", name)?;
        validate_name("repository", repository)?;

        let new_package = NewPackage::new(
            name.to_string(),
            repository.to_string(),
            meta,
            private,
            source,
        );
        let package = self.insert_package(&new_package)?;

        info!("Created {source} package {name} in repository {repository}");
        Ok(package)
    }

    /// Local point read, falling back to the upstream proxy on a miss.
    pub async fn get_package(&self, name: &str) -> RegistryResult<Package> {
        if !is_valid_name(name) {
            return Err(package_not_found(name));
        }

        if let Some(package) = self.find_local_package(name)? {
            debug!("Package {name} served locally ({})", package.source);
            return Ok(package);
        }

        if self.upstream.is_enabled() {
            debug!("Package {name} missing locally, trying upstream");
            self.upstream.fetch_package(self, name).await
        } else {
            Err(package_not_found(name))
        }
    }

    pub async fn list_packages(&self, query: &ListQuery) -> RegistryResult<PackagePage> {
        let page = query.page.max(1);
        let per_page = match query.per_page {
            0 => self.config.default_per_page,
            n => n,
        }
        .clamp(1, self.config.max_per_page.max(1));

        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty());
        let search_lower = search.map(str::to_lowercase);

        let since = Utc::now()
            .date_naive()
            .checked_sub_days(Days::new(self.config.recent_download_days.max(0) as u64))
            .unwrap_or(NaiveDate::MIN);

        let (mut packages, recent) = self.store.read(|conn| {
            let packages = PackageOperations::new(conn).load_all()?;
            let recent = match query.sort {
                PackageSort::RecentDownloads => DownloadOperations::new(conn).totals_since(since)?,
                _ => HashMap::new(),
            };
            Ok((packages, recent))
        })?;

        packages.retain(|package| matches_listing(package, search_lower.as_deref(), query.letter));
        sort_packages(&mut packages, query.sort, &recent);

        let total = packages.len();
        if total == 0 && query.upstream_fallback && self.upstream.is_enabled() {
            if let Some(term) = search {
                return Ok(self
                    .search_upstream(term, query.letter, query.sort, page, per_page)
                    .await);
            }
        }

        let offset = (page as usize - 1).saturating_mul(per_page as usize);
        let packages = packages
            .into_iter()
            .skip(offset)
            .take(per_page as usize)
            .collect();

        Ok(PackagePage {
            packages,
            total,
            page,
            per_page,
        })
    }

    /// Upstream has no first-letter filter, so it is applied to the fetched
    /// page and the total then counts only that page's matches.
    async fn search_upstream(
        &self,
        term: &str,
        letter: Option<char>,
        sort: PackageSort,
        page: u32,
        per_page: u32,
    ) -> PackagePage {
        let options = SearchOptions {
            page,
            per_page,
            sort,
        };

        let (mut packages, mut total) = match self.upstream.search(term, &options).await {
            Ok(results) => results,
            Err(e) => {
                debug!("Upstream search for '{term}' gave nothing: {e}");
                (Vec::new(), 0)
            }
        };

        if letter.is_some() {
            packages.retain(|package| matches_listing(package, None, letter));
            total = packages.len() as u64;
        }

        debug!(
            "Upstream search for '{term}' returned {} of {total}",
            packages.len()
        );
        PackagePage {
            packages,
            total: total as usize,
            page,
            per_page,
        }
    }

    /// Replaces the metadata of a local package.
    pub fn update_package_meta(&self, name: &str, meta: Metadata) -> RegistryResult<Package> {
        let now = Utc::now().naive_utc();
        self.store.transaction(|conn| {
            let mut packages = PackageOperations::new(conn);
            let package = packages
                .find_by_name(name)?
                .ok_or_else(|| package_not_found(name))?;
            if !package.is_local() {
                return Err(RegistryError::InvalidInput(format!(
                    "package {name} is cached from upstream and read-only"
                )));
            }

            packages.update_meta(name, &meta, now)?;
            packages
                .find_by_name(name)?
                .ok_or_else(|| package_not_found(name))
        })
    }

    pub async fn delete_package(&self, name: &str) -> RegistryResult<()> {
        let versions = self.store.transaction(|conn| {
            if !PackageOperations::new(conn).exists(name)? {
                return Err(package_not_found(name));
            }
            delete_package_rows(conn, name)
        })?;

        self.remove_release_blobs(name, &versions).await;
        info!("Deleted package {name} ({} releases)", versions.len());
        Ok(())
    }

    // Releases

    /// Stores the tarball, then the release record. A failed record write
    /// removes the tarball again.
    pub async fn create_release(
        &self,
        name: &str,
        version: &str,
        meta: Metadata,
        requirements: Requirements,
        tarball: &[u8],
    ) -> RegistryResult<Release> {
        validate_name("package", name)?;
        validate_version(version)?;
        if tarball.is_empty() {
            return Err(RegistryError::InvalidInput(format!(
                "empty tarball for {name} {version}"
            )));
        }
        if self.find_local_package(name)?.is_none() {
            return Err(RegistryError::DependencyMissing(format!("package {name}")));
        }

        let new_release = NewRelease::new(name.to_string(), version.to_string(), meta, requirements);

        let mut journal = WriteJournal::new(self.blobs.as_ref());
        let result = async {
            journal
                .upload(&BlobKey::package(name, version), tarball)
                .await?;
            self.write_release(&new_release)
        }
        .await;
        let release = journal.finish(result).await?;

        info!(
            "Published {name} {version} ({} bytes, {} requirements)",
            tarball.len(),
            release.requirements.len()
        );
        Ok(release)
    }

    /// The current entry for the key, falling back to upstream on a miss.
    /// Versions missing from a locally published package are never looked
    /// up upstream.
    pub async fn get_release(&self, name: &str, version: &str) -> RegistryResult<Release> {
        if !is_valid_name(name) || !is_valid_version(version) {
            return Err(release_not_found(name, version));
        }

        let (release, package) = self.store.read(|conn| {
            let release = ReleaseOperations::new(conn).find_current(name, version)?;
            let package = match release {
                Some(_) => None,
                None => PackageOperations::new(conn).find_by_name(name)?,
            };
            Ok((release, package))
        })?;

        if let Some(release) = release {
            debug!("Release {name} {version} served locally");
            return Ok(release);
        }

        match package {
            Some(package) if package.is_local() => Err(release_not_found(name, version)),
            _ if self.upstream.is_enabled() => {
                debug!("Release {name} {version} missing locally, trying upstream");
                self.upstream.fetch_release(self, name, version).await
            }
            _ => Err(release_not_found(name, version)),
        }
    }

    /// Current releases of a package, newest first.
    pub fn list_releases(&self, name: &str) -> RegistryResult<Vec<Release>> {
        self.store.read(|conn| {
            if !PackageOperations::new(conn).exists(name)? {
                return Err(package_not_found(name));
            }
            Ok(ReleaseOperations::new(conn).list_for_package(name)?)
        })
    }

    pub fn retire(
        &self,
        name: &str,
        version: &str,
        reason: RetirementReason,
        message: Option<String>,
    ) -> RegistryResult<Release> {
        let retirement = Retirement { reason, message };
        let release = self.set_retirement(name, version, Some(&retirement))?;
        info!("Retired {name} {version} ({reason})");
        Ok(release)
    }

    pub fn unretire(&self, name: &str, version: &str) -> RegistryResult<Release> {
        let release = self.set_retirement(name, version, None)?;
        info!("Unretired {name} {version}");
        Ok(release)
    }

    fn set_retirement(
        &self,
        name: &str,
        version: &str,
        retirement: Option<&Retirement>,
    ) -> RegistryResult<Release> {
        let now = Utc::now().naive_utc();
        self.store.transaction(|conn| {
            let mut releases = ReleaseOperations::new(conn);
            let release = releases
                .find_current(name, version)?
                .ok_or_else(|| release_not_found(name, version))?;

            if release.retirement().as_ref() == retirement {
                return Ok(release);
            }

            releases.set_retirement(release.id, retirement, now)?;
            releases
                .find_current(name, version)?
                .ok_or_else(|| release_not_found(name, version))
        })
    }

    /// Sets the docs flag. Enabling stores `docs` first (or requires a
    /// docs blob to already exist); disabling removes the docs blob after
    /// the flag is cleared.
    pub async fn toggle_docs(
        &self,
        name: &str,
        version: &str,
        has_docs: bool,
        docs: Option<&[u8]>,
    ) -> RegistryResult<Release> {
        let docs_key = BlobKey::docs(name, version);

        let exists = self.store.read(|conn| {
            Ok(ReleaseOperations::new(conn)
                .find_current(name, version)?
                .is_some())
        })?;
        if !exists {
            return Err(release_not_found(name, version));
        }

        if has_docs && docs.is_none() && !self.blobs.exists(&docs_key).await {
            return Err(RegistryError::InvalidInput(format!(
                "no documentation uploaded for {name} {version}"
            )));
        }

        let mut journal = WriteJournal::new(self.blobs.as_ref());
        let result = async {
            if let (true, Some(bytes)) = (has_docs, docs) {
                journal.upload(&docs_key, bytes).await?;
            }
            self.set_has_docs(name, version, has_docs)
        }
        .await;
        let release = journal.finish(result).await?;

        if !has_docs {
            if let Err(e) = self.blobs.delete(&docs_key).await {
                warn!("Failed to remove docs blob {docs_key}: {e}");
            }
        }

        info!(
            "Docs for {name} {version} {}",
            if has_docs { "enabled" } else { "disabled" }
        );
        Ok(release)
    }

    fn set_has_docs(&self, name: &str, version: &str, has_docs: bool) -> RegistryResult<Release> {
        let now = Utc::now().naive_utc();
        self.store.transaction(|conn| {
            let mut releases = ReleaseOperations::new(conn);
            let release = releases
                .find_current(name, version)?
                .ok_or_else(|| release_not_found(name, version))?;

            releases.set_has_docs(release.id, has_docs, now)?;
            releases
                .find_current(name, version)?
                .ok_or_else(|| release_not_found(name, version))
        })
    }

    /// Counts one download of a release towards its package and today.
    pub fn record_download(&self, name: &str, version: &str) -> RegistryResult<()> {
        let today = Utc::now().date_naive();
        self.store.transaction(|conn| {
            let release = ReleaseOperations::new(conn)
                .find_current(name, version)?
                .ok_or_else(|| release_not_found(name, version))?;

            ReleaseOperations::new(conn).increment_downloads(release.id)?;
            PackageOperations::new(conn).increment_downloads(name)?;
            DownloadOperations::new(conn).record(name, today)?;
            Ok(())
        })
    }

    pub async fn get_tarball(&self, name: &str, version: &str) -> RegistryResult<Vec<u8>> {
        let release = self.get_release(name, version).await?;
        self.download_blob(&BlobKey::package(&release.package_name, &release.version))
            .await
    }

    pub async fn get_docs(&self, name: &str, version: &str) -> RegistryResult<Vec<u8>> {
        let release = self.get_release(name, version).await?;
        if !release.has_docs {
            return Err(RegistryError::NotFound(format!("docs for {name} {version}")));
        }
        self.download_blob(&BlobKey::docs(&release.package_name, &release.version))
            .await
    }

    // Owners

    /// Appends an owner row. Adding the same user again keeps both rows.
    pub fn add_owner(
        &self,
        name: &str,
        username: &str,
        level: PermissionLevel,
    ) -> RegistryResult<Owner> {
        let username = username.trim();
        if username.is_empty() {
            return Err(RegistryError::InvalidInput("empty username".to_string()));
        }

        let owner = self.store.transaction(|conn| {
            if !PackageOperations::new(conn).exists(name)? {
                return Err(package_not_found(name));
            }
            let new_owner = NewOwner::new(name.to_string(), username.to_string(), level);
            Ok(OwnerOperations::new(conn).insert(&new_owner)?)
        })?;

        info!("Added {level} owner {username} to {name}");
        Ok(owner)
    }

    pub fn list_owners(&self, name: &str) -> RegistryResult<Vec<Owner>> {
        self.store.read(|conn| {
            if !PackageOperations::new(conn).exists(name)? {
                return Err(package_not_found(name));
            }
            Ok(OwnerOperations::new(conn).list(name)?)
        })
    }

    /// Removes every owner row of the user. Returns how many were removed.
    pub fn remove_owner(&self, name: &str, username: &str) -> RegistryResult<usize> {
        let removed = self.store.transaction(|conn| {
            let removed = OwnerOperations::new(conn).delete_user(name, username)?;
            if removed == 0 {
                return Err(RegistryError::NotFound(format!(
                    "owner {username} of {name}"
                )));
            }
            Ok(removed)
        })?;

        info!("Removed owner {username} from {name}");
        Ok(removed)
    }

    pub fn has_write_permission(&self, name: &str, username: &str) -> RegistryResult<bool> {
        self.store
            .read(|conn| Ok(OwnerOperations::new(conn).has_write_permission(name, username)?))
    }

    // Repositories

    pub fn create_repository(&self, name: &str) -> RegistryResult<Repository> {
        validate_name("repository", name)?;

        let repository = self.store.transaction(|conn| {
            let mut repositories = RepositoryOperations::new(conn);
            if repositories.find(name)?.is_some() {
                return Err(RegistryError::DuplicateName(name.to_string()));
            }
            Ok(repositories.insert(name)?)
        })?;

        info!("Created repository {name}");
        Ok(repository)
    }

    /// Renames a repository and moves every member package with it.
    /// Returns the number of packages moved.
    pub fn rename_repository(&self, from: &str, to: &str) -> RegistryResult<usize> {
        validate_name("repository", to)?;
        let now = Utc::now().naive_utc();

        let moved = self.store.transaction(|conn| {
            let mut repositories = RepositoryOperations::new(conn);
            if repositories.find(from)?.is_none() {
                return Err(RegistryError::NotFound(format!("repository {from}")));
            }
            if repositories.find(to)?.is_some() {
                return Err(RegistryError::DuplicateName(to.to_string()));
            }
            repositories.rename(from, to)?;
            Ok(PackageOperations::new(conn).move_repository(from, to, now)?)
        })?;

        info!("Renamed repository {from} to {to} ({moved} packages)");
        Ok(moved)
    }

    /// Deletes a repository with all its packages. Returns the number of
    /// packages deleted.
    pub async fn delete_repository(&self, name: &str) -> RegistryResult<usize> {
        let removed = self.store.transaction(|conn| {
            if RepositoryOperations::new(conn).find(name)?.is_none() {
                return Err(RegistryError::NotFound(format!("repository {name}")));
            }

            let members = PackageOperations::new(conn).load_by_repository(name)?;
            let mut removed = Vec::with_capacity(members.len());
            for package in members {
                let versions = delete_package_rows(conn, &package.name)?;
                removed.push((package.name, versions));
            }

            RepositoryOperations::new(conn).delete(name)?;
            Ok(removed)
        })?;

        for (package, versions) in &removed {
            self.remove_release_blobs(package, versions).await;
        }

        info!("Deleted repository {name} ({} packages)", removed.len());
        Ok(removed.len())
    }

    pub fn list_repositories(&self) -> RegistryResult<Vec<RepositorySummary>> {
        self.store.read(|conn| {
            let repositories = RepositoryOperations::new(conn).list()?;

            let mut counts: HashMap<String, usize> = HashMap::new();
            for repository in PackageOperations::new(conn).repository_names()? {
                *counts.entry(repository).or_insert(0) += 1;
            }

            Ok(repositories
                .into_iter()
                .map(|repository| RepositorySummary {
                    package_count: counts.get(&repository.name).copied().unwrap_or(0),
                    name: repository.name,
                    created_at: repository.created_at,
                })
                .collect())
        })
    }

    // Export

    /// Every package of `source` with its releases and owners.
    pub fn snapshot(&self, source: PackageSource) -> RegistryResult<TableSnapshot> {
        self.store.snapshot(source)
    }
}
