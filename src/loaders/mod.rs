//! Background processing of the job queue
pub mod jobs_worker;
pub mod tenant_migrate;

pub use self::jobs_worker::*;
pub use self::tenant_migrate::*;
