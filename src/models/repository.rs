use crate::schema::repositories;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

// Repository model - a named grouping of packages
#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = repositories)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Repository {
    pub id: i32,
    pub name: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = repositories)]
pub struct NewRepository {
    pub name: String,
    pub created_at: NaiveDateTime,
}

impl NewRepository {
    pub fn new(name: String) -> Self {
        Self {
            name,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RepositorySummary {
    pub name: String,
    pub package_count: usize,
    pub created_at: NaiveDateTime,
}
