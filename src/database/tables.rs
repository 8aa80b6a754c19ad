use super::connection::{StorageLayout, StorageTier, VOLATILE_SCHEMA};
use crate::config::TableTiers;
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{BigInt, Text};
use log::{info, warn};

/// Every table the record store owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Repositories,
    Packages,
    Releases,
    Owners,
    Downloads,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Repositories,
        Table::Packages,
        Table::Releases,
        Table::Owners,
        Table::Downloads,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Repositories => "repositories",
            Table::Packages => "packages",
            Table::Releases => "releases",
            Table::Owners => "owners",
            Table::Downloads => "package_downloads",
        }
    }

    pub fn tier_in(&self, tiers: &TableTiers) -> StorageTier {
        match self {
            Table::Repositories => tiers.repositories,
            Table::Packages => tiers.packages,
            Table::Releases => tiers.releases,
            Table::Owners => tiers.owners,
            Table::Downloads => tiers.downloads,
        }
    }

    fn columns(&self) -> &'static str {
        match self {
            Table::Repositories => {
                "id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                 name TEXT NOT NULL,
                 created_at TIMESTAMP NOT NULL"
            }
            Table::Packages => {
                "id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                 name TEXT NOT NULL,
                 repository_name TEXT NOT NULL,
                 meta TEXT NOT NULL DEFAULT '{}',
                 private BOOLEAN NOT NULL DEFAULT 0,
                 source TEXT NOT NULL,
                 downloads BIGINT NOT NULL DEFAULT 0,
                 created_at TIMESTAMP NOT NULL,
                 updated_at TIMESTAMP NOT NULL"
            }
            Table::Releases => {
                "id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                 package_name TEXT NOT NULL,
                 version TEXT NOT NULL,
                 has_docs BOOLEAN NOT NULL DEFAULT 0,
                 meta TEXT NOT NULL DEFAULT '{}',
                 requirements TEXT NOT NULL DEFAULT '{}',
                 retirement_reason TEXT,
                 retirement_message TEXT,
                 downloads BIGINT NOT NULL DEFAULT 0,
                 created_at TIMESTAMP NOT NULL,
                 updated_at TIMESTAMP NOT NULL"
            }
            Table::Owners => {
                "id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                 package_name TEXT NOT NULL,
                 username TEXT NOT NULL,
                 level TEXT NOT NULL,
                 created_at TIMESTAMP NOT NULL"
            }
            Table::Downloads => {
                "id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                 package_name TEXT NOT NULL,
                 day DATE NOT NULL,
                 downloads BIGINT NOT NULL DEFAULT 0"
            }
        }
    }

    /// (index name, unique, indexed columns)
    fn indexes(&self) -> &'static [(&'static str, bool, &'static str)] {
        match self {
            Table::Repositories => &[("idx_repositories_name", true, "name")],
            Table::Packages => &[
                ("idx_packages_name", true, "name"),
                ("idx_packages_source", false, "source"),
                ("idx_packages_updated_at", false, "updated_at"),
                ("idx_packages_repository_name", false, "repository_name"),
            ],
            Table::Releases => &[
                ("idx_releases_package_version", true, "package_name, version"),
                ("idx_releases_updated_at", false, "updated_at"),
            ],
            Table::Owners => &[("idx_owners_package_name", false, "package_name")],
            Table::Downloads => &[("idx_package_downloads_day", true, "package_name, day")],
        }
    }
}

#[derive(QueryableByName)]
struct TableCount {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

fn table_exists_in(conn: &mut SqliteConnection, schema: &str, table: &str) -> QueryResult<bool> {
    let row = sql_query(format!(
        "SELECT COUNT(*) AS count FROM {schema}.sqlite_master WHERE type = 'table' AND name = ?"
    ))
    .bind::<Text, _>(table)
    .get_result::<TableCount>(conn)?;
    Ok(row.count > 0)
}

/// Creates one table and its indices in the schema its tier maps to.
pub fn create_table(
    conn: &mut SqliteConnection,
    table: Table,
    tier: StorageTier,
    layout: &StorageLayout,
) -> QueryResult<()> {
    let schema = layout.schema_for(tier);

    // Unqualified names resolve main before attached databases
    if schema == VOLATILE_SCHEMA && table_exists_in(conn, "main", table.name())? {
        warn!(
            "Table {} still exists in the durable database and shadows its in-memory copy",
            table.name()
        );
    }

    sql_query(format!(
        "CREATE TABLE IF NOT EXISTS {schema}.{} ({})",
        table.name(),
        table.columns()
    ))
    .execute(conn)?;

    for (index, unique, columns) in table.indexes() {
        let unique = if *unique { "UNIQUE " } else { "" };
        sql_query(format!(
            "CREATE {unique}INDEX IF NOT EXISTS {schema}.{index} ON {} ({columns})",
            table.name()
        ))
        .execute(conn)?;
    }

    Ok(())
}

/// Creates every table at its effective tier, logging each placement once.
pub fn create_all_tables(
    conn: &mut SqliteConnection,
    requested: &TableTiers,
    layout: &StorageLayout,
) -> QueryResult<()> {
    for table in Table::ALL {
        let wanted = table.tier_in(requested);
        let effective = table.tier_in(&layout.tiers);

        if wanted != effective {
            warn!(
                "Table {}: requested {wanted} storage, downgraded to {effective}",
                table.name()
            );
        } else {
            info!("Table {}: {effective} storage", table.name());
        }

        create_table(conn, table, effective, layout)?;
    }
    Ok(())
}
