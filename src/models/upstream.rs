use super::package::{Metadata, Package, PackageSort, PackageSource};
use super::release::{Retirement, RetirementReason};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamDownloads {
    #[serde(default)]
    pub all: i64,
    #[serde(default)]
    pub recent: i64,
}

/// Package document as returned by the upstream registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub meta: Value,
    #[serde(default)]
    pub downloads: Option<UpstreamDownloads>,
    #[serde(default)]
    pub inserted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PackageInfo {
    /// Package-shaped view of an upstream search hit. Nothing is persisted;
    /// the record is tagged `cached` and carries id 0.
    pub fn to_unpersisted_package(&self, repository: &str) -> Package {
        let now = Utc::now().naive_utc();
        Package {
            id: 0,
            name: self.name.clone(),
            repository_name: self
                .repository
                .clone()
                .unwrap_or_else(|| repository.to_string()),
            meta: Metadata::from_value(&self.meta),
            private: false,
            source: PackageSource::Cached,
            downloads: self.downloads.as_ref().map(|d| d.all).unwrap_or(0),
            created_at: self.inserted_at.map(|t| t.naive_utc()).unwrap_or(now),
            updated_at: self.updated_at.map(|t| t.naive_utc()).unwrap_or(now),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetirementInfo {
    pub reason: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl RetirementInfo {
    /// Unknown reasons are kept as `other` rather than dropped.
    pub fn normalize(&self) -> Retirement {
        Retirement {
            reason: self
                .reason
                .parse::<RetirementReason>()
                .unwrap_or(RetirementReason::Other),
            message: self.message.clone(),
        }
    }
}

/// Release document as returned by the upstream registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub version: String,
    #[serde(default)]
    pub has_docs: bool,
    #[serde(default)]
    pub meta: Value,
    #[serde(default)]
    pub requirements: Value,
    #[serde(default)]
    pub retirement: Option<RetirementInfo>,
    #[serde(default)]
    pub inserted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub page: u32,
    pub per_page: u32,
    pub sort: PackageSort,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 30,
            sort: PackageSort::Name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    pub packages: Vec<PackageInfo>,
    pub total: u64,
}
