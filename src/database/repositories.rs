use crate::models::repository::*;
use crate::schema::repositories;
use diesel::prelude::*;

pub struct RepositoryOperations<'a> {
    conn: &'a mut SqliteConnection,
}

impl<'a> RepositoryOperations<'a> {
    pub fn new(conn: &'a mut SqliteConnection) -> Self {
        Self { conn }
    }

    pub fn find(&mut self, name: &str) -> QueryResult<Option<Repository>> {
        repositories::table
            .filter(repositories::name.eq(name))
            .select(Repository::as_select())
            .first(self.conn)
            .optional()
    }

    pub fn insert(&mut self, name: &str) -> QueryResult<Repository> {
        diesel::insert_into(repositories::table)
            .values(&NewRepository::new(name.to_string()))
            .returning(Repository::as_returning())
            .get_result(self.conn)
    }

    /// Returns the existing row or creates it
    pub fn ensure(&mut self, name: &str) -> QueryResult<Repository> {
        match self.find(name)? {
            Some(repository) => Ok(repository),
            None => self.insert(name),
        }
    }

    pub fn list(&mut self) -> QueryResult<Vec<Repository>> {
        repositories::table
            .order(repositories::name.asc())
            .select(Repository::as_select())
            .load(self.conn)
    }

    pub fn rename(&mut self, from: &str, to: &str) -> QueryResult<usize> {
        diesel::update(repositories::table.filter(repositories::name.eq(from)))
            .set(repositories::name.eq(to))
            .execute(self.conn)
    }

    pub fn delete(&mut self, name: &str) -> QueryResult<usize> {
        diesel::delete(repositories::table.filter(repositories::name.eq(name))).execute(self.conn)
    }
}
