use diesel::pg::PgConnection;
use diesel::r2d2::ConnectionManager;
use r2d2::ManageConnection;

use models::ConnectionParams;

/// Builds r2d2 connection managers for store databases
pub trait TenantConnectionFactory: Clone + Send + Sync + 'static {
    type Manager: ManageConnection;

    fn manager(&self, params: &ConnectionParams) -> Self::Manager;
}

/// Postgres store databases reached with the decrypted connection parameters
#[derive(Clone, Copy, Debug, Default)]
pub struct PgTenantConnectionFactory;

impl TenantConnectionFactory for PgTenantConnectionFactory {
    type Manager = ConnectionManager<PgConnection>;

    fn manager(&self, params: &ConnectionParams) -> Self::Manager {
        ConnectionManager::new(params.to_conninfo())
    }
}
