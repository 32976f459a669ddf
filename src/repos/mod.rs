//! Repos is a module responsible for interacting with postgres db
pub mod jobs;
pub mod migrations;
pub mod repo_factory;
pub mod store_databases;
pub mod store_identity;
pub mod stores;
pub mod types;

pub use self::jobs::*;
pub use self::migrations::*;
pub use self::repo_factory::*;
pub use self::store_databases::*;
pub use self::store_identity::*;
pub use self::stores::*;
pub use self::types::*;
