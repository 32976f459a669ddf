//! Module containg store model for query, insert, update
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use diesel::sql_types::VarChar;
use failure::Error as FailureError;
use validator::Validate;

use models::validation_rules::*;
use schema::stores;

uuid_id!(StoreId);

/// Lifecycle of a store and of its dedicated database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromSqlRow, AsExpression)]
#[sql_type = "VarChar"]
#[serde(rename_all = "snake_case")]
pub enum StoreStatus {
    PendingDatabase,
    Provisioning,
    Provisioned,
    Active,
    Demo,
    Suspended,
    Inactive,
}

impl StoreStatus {
    pub fn as_str(&self) -> &'static str {
        match *self {
            StoreStatus::PendingDatabase => "pending_database",
            StoreStatus::Provisioning => "provisioning",
            StoreStatus::Provisioned => "provisioned",
            StoreStatus::Active => "active",
            StoreStatus::Demo => "demo",
            StoreStatus::Suspended => "suspended",
            StoreStatus::Inactive => "inactive",
        }
    }

    /// Statuses whose store database may be connected to
    pub fn has_database(&self) -> bool {
        match *self {
            StoreStatus::Provisioned | StoreStatus::Active | StoreStatus::Demo => true,
            _ => false,
        }
    }

    /// Statuses that take away access to an existing store database
    pub fn revokes_access(&self) -> bool {
        match *self {
            StoreStatus::Suspended | StoreStatus::Inactive => true,
            _ => false,
        }
    }

    pub fn can_transition_to(&self, next: StoreStatus) -> bool {
        use self::StoreStatus::*;

        match (*self, next) {
            (PendingDatabase, Provisioning) => true,
            (Provisioning, Provisioned) | (Provisioning, PendingDatabase) => true,
            (Provisioned, Active) | (Provisioned, Demo) | (Provisioned, Inactive) => true,
            (Active, Demo) | (Active, Suspended) | (Active, Inactive) => true,
            (Demo, Active) | (Demo, Suspended) | (Demo, Inactive) => true,
            (Suspended, Active) | (Suspended, Inactive) => true,
            (Inactive, PendingDatabase) => true,
            _ => false,
        }
    }
}

impl fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreStatus {
    type Err = FailureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending_database" => StoreStatus::PendingDatabase,
            "provisioning" => StoreStatus::Provisioning,
            "provisioned" => StoreStatus::Provisioned,
            "active" => StoreStatus::Active,
            "demo" => StoreStatus::Demo,
            "suspended" => StoreStatus::Suspended,
            "inactive" => StoreStatus::Inactive,
            other => return Err(format_err!("Unrecognized store status: {}", other)),
        })
    }
}

varchar_enum_sql!(StoreStatus);

/// Payload for querying stores
#[derive(Debug, Serialize, Deserialize, Queryable, Clone, PartialEq)]
pub struct Store {
    pub id: StoreId,
    pub slug: String,
    pub name: String,
    pub status: StoreStatus,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

/// Payload for creating stores
#[derive(Serialize, Deserialize, Validate, Clone, Debug)]
pub struct NewStore {
    #[validate(custom = "validate_slug")]
    pub slug: String,
    #[validate(length(min = "1", max = "255"), custom = "validate_not_blank")]
    pub name: String,
}

/// Row inserted for a freshly registered store
#[derive(Insertable, Clone, Debug)]
#[table_name = "stores"]
pub struct InsertStore {
    pub id: StoreId,
    pub slug: String,
    pub name: String,
    pub status: StoreStatus,
}

impl From<NewStore> for InsertStore {
    fn from(payload: NewStore) -> Self {
        Self {
            id: StoreId::new(),
            slug: payload.slug,
            name: payload.name,
            status: StoreStatus::PendingDatabase,
        }
    }
}
