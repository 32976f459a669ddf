use diesel::pg::PgConnection;
use diesel::r2d2::ConnectionManager;
use failure::Error as FailureError;
use r2d2::Pool;

pub type RepoResult<T> = Result<T, FailureError>;

/// Pool of the master database
pub type DbPool = Pool<ConnectionManager<PgConnection>>;
