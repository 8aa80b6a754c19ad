use crate::models::package::*;
use crate::schema::packages;
use chrono::NaiveDateTime;
use diesel::prelude::*;

/// Package-related database operations, run on a connection the caller owns
/// (usually inside a store transaction)
pub struct PackageOperations<'a> {
    conn: &'a mut SqliteConnection,
}

impl<'a> PackageOperations<'a> {
    pub fn new(conn: &'a mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Gets a package by name
    pub fn find_by_name(&mut self, name: &str) -> QueryResult<Option<Package>> {
        packages::table
            .filter(packages::name.eq(name))
            .select(Package::as_select())
            .first(self.conn)
            .optional()
    }

    pub fn exists(&mut self, name: &str) -> QueryResult<bool> {
        let count: i64 = packages::table
            .filter(packages::name.eq(name))
            .count()
            .get_result(self.conn)?;
        Ok(count > 0)
    }

    pub fn insert(&mut self, new_package: &NewPackage) -> QueryResult<Package> {
        diesel::insert_into(packages::table)
            .values(new_package)
            .returning(Package::as_returning())
            .get_result(self.conn)
    }

    pub fn load_all(&mut self) -> QueryResult<Vec<Package>> {
        packages::table
            .order(packages::name.asc())
            .select(Package::as_select())
            .load(self.conn)
    }

    pub fn load_by_source(&mut self, source: PackageSource) -> QueryResult<Vec<Package>> {
        packages::table
            .filter(packages::source.eq(source))
            .order(packages::name.asc())
            .select(Package::as_select())
            .load(self.conn)
    }

    pub fn load_by_repository(&mut self, repository: &str) -> QueryResult<Vec<Package>> {
        packages::table
            .filter(packages::repository_name.eq(repository))
            .order(packages::name.asc())
            .select(Package::as_select())
            .load(self.conn)
    }

    /// Package names per repository, for repository summaries
    pub fn repository_names(&mut self) -> QueryResult<Vec<String>> {
        packages::table
            .select(packages::repository_name)
            .load(self.conn)
    }

    pub fn touch(&mut self, name: &str, now: NaiveDateTime) -> QueryResult<usize> {
        diesel::update(packages::table.filter(packages::name.eq(name)))
            .set(packages::updated_at.eq(now))
            .execute(self.conn)
    }

    pub fn update_meta(
        &mut self,
        name: &str,
        meta: &Metadata,
        now: NaiveDateTime,
    ) -> QueryResult<usize> {
        diesel::update(packages::table.filter(packages::name.eq(name)))
            .set((packages::meta.eq(meta), packages::updated_at.eq(now)))
            .execute(self.conn)
    }

    /// Moves every member of one repository into another
    pub fn move_repository(
        &mut self,
        from: &str,
        to: &str,
        now: NaiveDateTime,
    ) -> QueryResult<usize> {
        diesel::update(packages::table.filter(packages::repository_name.eq(from)))
            .set((
                packages::repository_name.eq(to),
                packages::updated_at.eq(now),
            ))
            .execute(self.conn)
    }

    pub fn increment_downloads(&mut self, name: &str) -> QueryResult<usize> {
        diesel::update(packages::table.filter(packages::name.eq(name)))
            .set(packages::downloads.eq(packages::downloads + 1))
            .execute(self.conn)
    }

    pub fn delete(&mut self, name: &str) -> QueryResult<usize> {
        diesel::delete(packages::table.filter(packages::name.eq(name))).execute(self.conn)
    }
}
