//! Tenants is a module responsible for reaching the database of a single store:
//! credential encryption, the per store pool cache and the resolver handing out
//! store scoped handles.

pub mod cache;
pub mod cipher;
pub mod handle;
pub mod manager;
pub mod resolver;

pub use self::cache::TenantPoolCache;
pub use self::cipher::CredentialCipher;
pub use self::handle::TenantHandle;
pub use self::manager::{PgTenantConnectionFactory, TenantConnectionFactory};
pub use self::resolver::TenantResolver;
