use crate::schema::owners;
use chrono::NaiveDateTime;
use diesel::deserialize::FromSqlRow;
use diesel::expression::AsExpression;
use diesel::prelude::*;
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Read,
    Write,
    Admin,
}

impl PermissionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::Read => "read",
            PermissionLevel::Write => "write",
            PermissionLevel::Admin => "admin",
        }
    }

    pub fn can_write(&self) -> bool {
        matches!(self, PermissionLevel::Write | PermissionLevel::Admin)
    }
}

impl FromStr for PermissionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(PermissionLevel::Read),
            "write" => Ok(PermissionLevel::Write),
            "admin" | "full" => Ok(PermissionLevel::Admin),
            other => Err(format!("unknown permission level: {other}")),
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

text_column_enum!(PermissionLevel);

// Package ownership - append-only, repeated adds keep every row
#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = owners)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Owner {
    pub id: i32,
    pub package_name: String,
    pub username: String,
    pub level: PermissionLevel,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = owners)]
pub struct NewOwner {
    pub package_name: String,
    pub username: String,
    pub level: PermissionLevel,
    pub created_at: NaiveDateTime,
}

impl NewOwner {
    pub fn new(package_name: String, username: String, level: PermissionLevel) -> Self {
        Self {
            package_name,
            username,
            level,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}
