use crate::models::package::NewDailyDownload;
use crate::schema::package_downloads;
use chrono::NaiveDate;
use diesel::prelude::*;
use std::collections::HashMap;

/// Download statistics operations
pub struct DownloadOperations<'a> {
    conn: &'a mut SqliteConnection,
}

impl<'a> DownloadOperations<'a> {
    pub fn new(conn: &'a mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Adds one download to the package's row for `day`
    pub fn record(&mut self, package: &str, day: NaiveDate) -> QueryResult<usize> {
        let row = NewDailyDownload {
            package_name: package.to_string(),
            day,
            downloads: 1,
        };

        diesel::insert_into(package_downloads::table)
            .values(&row)
            .on_conflict((package_downloads::package_name, package_downloads::day))
            .do_update()
            .set(package_downloads::downloads.eq(package_downloads::downloads + 1))
            .execute(self.conn)
    }

    /// Downloads per package on or after `since`
    pub fn totals_since(&mut self, since: NaiveDate) -> QueryResult<HashMap<String, i64>> {
        // Summed in Rust to avoid SQL type issues with SUM over BigInt
        let rows: Vec<(String, i64)> = package_downloads::table
            .filter(package_downloads::day.ge(since))
            .select((package_downloads::package_name, package_downloads::downloads))
            .load(self.conn)?;

        let mut totals = HashMap::new();
        for (package, downloads) in rows {
            *totals.entry(package).or_insert(0) += downloads;
        }
        Ok(totals)
    }

    pub fn delete_for_package(&mut self, package: &str) -> QueryResult<usize> {
        diesel::delete(package_downloads::table.filter(package_downloads::package_name.eq(package)))
            .execute(self.conn)
    }
}
