//! Services is a core layer for the app business logic like
//! validation, store lifecycle and job submission.

pub mod jobs;
pub mod stores;
pub mod tenants;
pub mod types;

pub use self::jobs::*;
pub use self::stores::*;
pub use self::tenants::*;
pub use self::types::*;
