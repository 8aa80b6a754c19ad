use crate::models::release::*;
use crate::schema::releases;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::upsert::excluded;

/// Release-related database operations
pub struct ReleaseOperations<'a> {
    conn: &'a mut SqliteConnection,
}

impl<'a> ReleaseOperations<'a> {
    pub fn new(conn: &'a mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Writes a release, replacing metadata and requirements of an existing
    /// row for the same key. Downloads, docs and retirement of an existing
    /// row are kept.
    pub fn upsert(&mut self, new_release: &NewRelease) -> QueryResult<Release> {
        diesel::insert_into(releases::table)
            .values(new_release)
            .on_conflict((releases::package_name, releases::version))
            .do_update()
            .set((
                releases::meta.eq(excluded(releases::meta)),
                releases::requirements.eq(excluded(releases::requirements)),
                releases::updated_at.eq(excluded(releases::updated_at)),
            ))
            .execute(self.conn)?;

        self.find_current(&new_release.package_name, &new_release.version)?
            .ok_or(diesel::result::Error::NotFound)
    }

    /// The entry with the latest `updated_at` for the key
    pub fn find_current(&mut self, package: &str, version: &str) -> QueryResult<Option<Release>> {
        releases::table
            .filter(releases::package_name.eq(package))
            .filter(releases::version.eq(version))
            .order((releases::updated_at.desc(), releases::id.desc()))
            .select(Release::as_select())
            .first(self.conn)
            .optional()
    }

    /// Current release per version, newest first
    pub fn list_for_package(&mut self, package: &str) -> QueryResult<Vec<Release>> {
        let rows = releases::table
            .filter(releases::package_name.eq(package))
            .order((releases::updated_at.desc(), releases::id.desc()))
            .select(Release::as_select())
            .load(self.conn)?;

        let mut seen = std::collections::HashSet::new();
        let mut current: Vec<Release> = rows
            .into_iter()
            .filter(|release| seen.insert(release.version.clone()))
            .collect();
        current.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(current)
    }

    pub fn load_for_packages(&mut self, packages: &[String]) -> QueryResult<Vec<Release>> {
        releases::table
            .filter(releases::package_name.eq_any(packages))
            .order((releases::package_name.asc(), releases::id.asc()))
            .select(Release::as_select())
            .load(self.conn)
    }

    pub fn set_retirement(
        &mut self,
        id: i32,
        retirement: Option<&Retirement>,
        now: NaiveDateTime,
    ) -> QueryResult<usize> {
        diesel::update(releases::table.find(id))
            .set((
                releases::retirement_reason.eq(retirement.map(|r| r.reason)),
                releases::retirement_message.eq(retirement.and_then(|r| r.message.clone())),
                releases::updated_at.eq(now),
            ))
            .execute(self.conn)
    }

    pub fn set_has_docs(&mut self, id: i32, has_docs: bool, now: NaiveDateTime) -> QueryResult<usize> {
        diesel::update(releases::table.find(id))
            .set((releases::has_docs.eq(has_docs), releases::updated_at.eq(now)))
            .execute(self.conn)
    }

    pub fn increment_downloads(&mut self, id: i32) -> QueryResult<usize> {
        diesel::update(releases::table.find(id))
            .set(releases::downloads.eq(releases::downloads + 1))
            .execute(self.conn)
    }

    pub fn delete_for_package(&mut self, package: &str) -> QueryResult<usize> {
        diesel::delete(releases::table.filter(releases::package_name.eq(package)))
            .execute(self.conn)
    }
}
