use super::package::Metadata;
use crate::schema::releases;
use chrono::NaiveDateTime;
use diesel::deserialize::FromSqlRow;
use diesel::expression::AsExpression;
use diesel::prelude::*;
use diesel::sql_types::Text;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+\.\d+\.\d+.*$").expect("version pattern is a valid regex")
});

pub fn is_valid_version(version: &str) -> bool {
    VERSION_PATTERN.is_match(version)
}

/// Why a release was retired.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum RetirementReason {
    Other,
    Invalid,
    Security,
    Deprecated,
    Renamed,
}

impl RetirementReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetirementReason::Other => "other",
            RetirementReason::Invalid => "invalid",
            RetirementReason::Security => "security",
            RetirementReason::Deprecated => "deprecated",
            RetirementReason::Renamed => "renamed",
        }
    }
}

impl FromStr for RetirementReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "other" => Ok(RetirementReason::Other),
            "invalid" => Ok(RetirementReason::Invalid),
            "security" => Ok(RetirementReason::Security),
            "deprecated" => Ok(RetirementReason::Deprecated),
            "renamed" => Ok(RetirementReason::Renamed),
            other => Err(format!("unknown retirement reason: {other}")),
        }
    }
}

impl fmt::Display for RetirementReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

text_column_enum!(RetirementReason);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retirement {
    pub reason: RetirementReason,
    pub message: Option<String>,
}

/// `Active ⇄ Retired`, nothing terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RetirementState {
    Active,
    Retired,
}

/// One dependency of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub requirement: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

impl Requirement {
    pub fn new(requirement: impl Into<String>) -> Self {
        Self {
            requirement: requirement.into(),
            optional: false,
            app: None,
            repository: None,
        }
    }
}

/// Dependency name to requirement, stored as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
#[serde(transparent)]
pub struct Requirements(pub BTreeMap<String, Requirement>);

impl Requirements {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, name: impl Into<String>, requirement: Requirement) -> Self {
        self.0.insert(name.into(), requirement);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Accepts either `{"dep": {"requirement": ..}}` or
    /// `[{"name": "dep", "requirement": ..}]`; bare strings are taken as the
    /// requirement itself. Entries without a usable requirement are skipped.
    pub fn from_value(value: &Value) -> Self {
        let mut map = BTreeMap::new();

        match value {
            Value::Object(obj) => {
                for (name, entry) in obj {
                    if let Some(req) = requirement_from_entry(entry) {
                        map.insert(name.clone(), req);
                    }
                }
            }
            Value::Array(items) => {
                for entry in items {
                    let name = entry
                        .get("name")
                        .or_else(|| entry.get("app"))
                        .and_then(Value::as_str);
                    if let (Some(name), Some(req)) = (name, requirement_from_entry(entry)) {
                        map.insert(name.to_string(), req);
                    }
                }
            }
            _ => {}
        }

        Self(map)
    }
}

fn requirement_from_entry(entry: &Value) -> Option<Requirement> {
    match entry {
        Value::String(req) => Some(Requirement::new(req.clone())),
        Value::Object(obj) => {
            let requirement = obj.get("requirement").and_then(Value::as_str)?;
            Some(Requirement {
                requirement: requirement.to_string(),
                optional: obj.get("optional").and_then(Value::as_bool).unwrap_or(false),
                app: obj.get("app").and_then(Value::as_str).map(str::to_string),
                repository: obj
                    .get("repository")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        }
        _ => None,
    }
}

json_text_column!(Requirements);

// Release model - one row per (package, version)
#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = releases)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Release {
    pub id: i32,
    pub package_name: String,
    pub version: String,
    pub has_docs: bool,
    pub meta: Metadata,
    pub requirements: Requirements,
    pub retirement_reason: Option<RetirementReason>,
    pub retirement_message: Option<String>,
    pub downloads: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Release {
    pub fn retirement(&self) -> Option<Retirement> {
        self.retirement_reason.map(|reason| Retirement {
            reason,
            message: self.retirement_message.clone(),
        })
    }

    pub fn state(&self) -> RetirementState {
        match self.retirement_reason {
            Some(_) => RetirementState::Retired,
            None => RetirementState::Active,
        }
    }

    pub fn is_retired(&self) -> bool {
        self.state() == RetirementState::Retired
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = releases)]
pub struct NewRelease {
    pub package_name: String,
    pub version: String,
    pub has_docs: bool,
    pub meta: Metadata,
    pub requirements: Requirements,
    pub retirement_reason: Option<RetirementReason>,
    pub retirement_message: Option<String>,
    pub downloads: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NewRelease {
    pub fn new(
        package_name: String,
        version: String,
        meta: Metadata,
        requirements: Requirements,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            package_name,
            version,
            has_docs: false,
            meta,
            requirements,
            retirement_reason: None,
            retirement_message: None,
            downloads: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn retired(mut self, retirement: Option<Retirement>) -> Self {
        if let Some(retirement) = retirement {
            self.retirement_reason = Some(retirement.reason);
            self.retirement_message = retirement.message;
        }
        self
    }
}
