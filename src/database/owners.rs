use crate::models::owner::*;
use crate::schema::owners;
use diesel::prelude::*;

/// Package ownership-related database operations
pub struct OwnerOperations<'a> {
    conn: &'a mut SqliteConnection,
}

impl<'a> OwnerOperations<'a> {
    pub fn new(conn: &'a mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Appends an owner row. Repeated adds for the same user are kept.
    pub fn insert(&mut self, new_owner: &NewOwner) -> QueryResult<Owner> {
        diesel::insert_into(owners::table)
            .values(new_owner)
            .returning(Owner::as_returning())
            .get_result(self.conn)
    }

    /// Gets all owners of a package, oldest first
    pub fn list(&mut self, package: &str) -> QueryResult<Vec<Owner>> {
        owners::table
            .filter(owners::package_name.eq(package))
            .order(owners::id.asc())
            .select(Owner::as_select())
            .load(self.conn)
    }

    /// Checks if a user has write permission for a package
    pub fn has_write_permission(&mut self, package: &str, username: &str) -> QueryResult<bool> {
        let count: i64 = owners::table
            .filter(owners::package_name.eq(package))
            .filter(owners::username.eq(username))
            .filter(
                owners::level
                    .eq(PermissionLevel::Write)
                    .or(owners::level.eq(PermissionLevel::Admin)),
            )
            .count()
            .get_result(self.conn)?;
        Ok(count > 0)
    }

    pub fn load_for_packages(&mut self, packages: &[String]) -> QueryResult<Vec<Owner>> {
        owners::table
            .filter(owners::package_name.eq_any(packages))
            .order((owners::package_name.asc(), owners::id.asc()))
            .select(Owner::as_select())
            .load(self.conn)
    }

    /// Removes every row for the user on the package
    pub fn delete_user(&mut self, package: &str, username: &str) -> QueryResult<usize> {
        diesel::delete(
            owners::table
                .filter(owners::package_name.eq(package))
                .filter(owners::username.eq(username)),
        )
        .execute(self.conn)
    }

    pub fn delete_for_package(&mut self, package: &str) -> QueryResult<usize> {
        diesel::delete(owners::table.filter(owners::package_name.eq(package))).execute(self.conn)
    }
}
