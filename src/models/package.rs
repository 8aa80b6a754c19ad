use crate::schema::{package_downloads, packages};
use chrono::{NaiveDate, NaiveDateTime};
use diesel::deserialize::FromSqlRow;
use diesel::expression::AsExpression;
use diesel::prelude::*;
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Where a package's data came from. Set once at creation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum PackageSource {
    /// Published by an administrator of this registry
    Local,
    /// Fetched from the upstream registry on a local miss
    Cached,
}

impl PackageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageSource::Local => "local",
            PackageSource::Cached => "cached",
        }
    }
}

impl FromStr for PackageSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(PackageSource::Local),
            "cached" => Ok(PackageSource::Cached),
            other => Err(format!("unknown package source: {other}")),
        }
    }
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

text_column_enum!(PackageSource);

/// Free-form metadata map, stored as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
#[serde(transparent)]
pub struct Metadata(pub Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn description(&self) -> Option<&str> {
        self.get_str("description")
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builds a metadata map from an arbitrary JSON value. Non-object
    /// values yield an empty map and null entries are dropped.
    pub fn from_value(value: &Value) -> Self {
        let map = value
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Self(map)
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

json_text_column!(Metadata);

// Package model - one row per package name
#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = packages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Package {
    /// Zero for records that only exist in an upstream search result
    pub id: i32,
    pub name: String,
    pub repository_name: String,
    pub meta: Metadata,
    pub private: bool,
    pub source: PackageSource,
    pub downloads: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Package {
    pub fn description(&self) -> Option<&str> {
        self.meta.description()
    }

    pub fn is_local(&self) -> bool {
        matches!(self.source, PackageSource::Local)
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = packages)]
pub struct NewPackage {
    pub name: String,
    pub repository_name: String,
    pub meta: Metadata,
    pub private: bool,
    pub source: PackageSource,
    pub downloads: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NewPackage {
    pub fn new(
        name: String,
        repository_name: String,
        meta: Metadata,
        private: bool,
        source: PackageSource,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            name,
            repository_name,
            meta,
            private,
            source,
            downloads: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

// Daily download counter, summed over a window for "recent downloads"
#[derive(Insertable, Debug)]
#[diesel(table_name = package_downloads)]
pub struct NewDailyDownload {
    pub package_name: String,
    pub day: NaiveDate,
    pub downloads: i64,
}

/// Orderings offered by package listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageSort {
    RecentDownloads,
    TotalDownloads,
    #[default]
    Name,
    RecentlyUpdated,
    RecentlyCreated,
}

impl PackageSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageSort::RecentDownloads => "recent_downloads",
            PackageSort::TotalDownloads => "total_downloads",
            PackageSort::Name => "name",
            PackageSort::RecentlyUpdated => "updated_at",
            PackageSort::RecentlyCreated => "inserted_at",
        }
    }
}

impl FromStr for PackageSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recent_downloads" | "recent-downloads" => Ok(PackageSort::RecentDownloads),
            "total_downloads" | "total-downloads" | "downloads" => {
                Ok(PackageSort::TotalDownloads)
            }
            "name" => Ok(PackageSort::Name),
            "updated_at" | "recently-updated" => Ok(PackageSort::RecentlyUpdated),
            "inserted_at" | "created_at" | "recently-created" => Ok(PackageSort::RecentlyCreated),
            other => Err(format!("unknown sort: {other}")),
        }
    }
}

/// Parameters of a package listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub search: Option<String>,
    pub sort: PackageSort,
    /// Only names starting with this letter (case-insensitive)
    pub letter: Option<char>,
    /// 1-based
    pub page: u32,
    pub per_page: u32,
    pub upstream_fallback: bool,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            search: None,
            sort: PackageSort::Name,
            letter: None,
            page: 1,
            per_page: 30,
            upstream_fallback: false,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct PackagePage {
    pub packages: Vec<Package>,
    /// Size of the whole filtered set, before pagination
    pub total: usize,
    pub page: u32,
    pub per_page: u32,
}
