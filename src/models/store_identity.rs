use std::time::SystemTime;

use models::StoreId;
use schema::store_identity;

/// Row of a store database naming the store it belongs to
#[derive(Debug, Queryable, Clone, PartialEq)]
pub struct StoreIdentity {
    pub store_id: StoreId,
    pub slug: String,
    pub bound_at: SystemTime,
}

#[derive(Insertable, Debug, Clone)]
#[table_name = "store_identity"]
pub struct NewStoreIdentity {
    pub store_id: StoreId,
    pub slug: String,
}
