//! Models contains all structures that are used in different
//! modules of the app

pub mod connection_params;
pub mod job;
pub mod migration;
pub mod store;
pub mod store_database;
pub mod store_identifier;
pub mod store_identity;
pub mod validation_rules;

pub use self::connection_params::*;
pub use self::job::*;
pub use self::migration::*;
pub use self::store::*;
pub use self::store_database::*;
pub use self::store_identifier::*;
pub use self::store_identity::*;
pub use self::validation_rules::*;
