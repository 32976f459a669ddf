use std::time::SystemTime;

use models::StoreId;
use schema::store_databases;

/// Encrypted credentials of a store database.
///
/// The version only ever grows for a store, through rotations and through
/// provisioning a store again after its credentials were revoked.
#[derive(Debug, Queryable, Clone, PartialEq)]
pub struct StoreDatabase {
    pub store_id: StoreId,
    pub encrypted_credentials: String,
    pub credentials_version: i32,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    pub revoked_at: Option<SystemTime>,
}

impl StoreDatabase {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

#[derive(Insertable, Debug, Clone)]
#[table_name = "store_databases"]
pub struct NewStoreDatabase {
    pub store_id: StoreId,
    pub encrypted_credentials: String,
}
