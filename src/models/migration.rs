use std::time::SystemTime;

use schema::schema_migrations;

/// Schema change shipped with the binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub version: &'static str,
    pub name: &'static str,
    pub sql: &'static str,
}

#[derive(Debug, Queryable, Clone, PartialEq)]
pub struct AppliedMigration {
    pub version: String,
    pub name: String,
    pub applied_at: SystemTime,
}

#[derive(Insertable, Debug, Clone)]
#[table_name = "schema_migrations"]
pub struct NewAppliedMigration {
    pub version: String,
    pub name: String,
}

impl<'a> From<&'a Migration> for NewAppliedMigration {
    fn from(migration: &'a Migration) -> Self {
        Self {
            version: migration.version.to_string(),
            name: migration.name.to_string(),
        }
    }
}
