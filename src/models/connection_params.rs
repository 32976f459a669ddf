//! Connection parameters of a store database. Stored only in encrypted form.
use std::fmt;

use validator::Validate;

use models::validation_rules::*;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ConnectionParams {
    #[validate(custom = "validate_not_blank")]
    pub host: String,
    #[validate(range(min = "1", max = "65535"))]
    pub port: u16,
    #[validate(custom = "validate_not_blank")]
    pub database: String,
    #[validate(custom = "validate_not_blank")]
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub ssl_mode: Option<String>,
}

impl ConnectionParams {
    /// libpq keyword/value connection string
    pub fn to_conninfo(&self) -> String {
        let mut conninfo = format!(
            "host={} port={} dbname={} user={} password={}",
            quote(&self.host),
            self.port,
            quote(&self.database),
            quote(&self.username),
            quote(&self.password)
        );
        if let Some(ref ssl_mode) = self.ssl_mode {
            conninfo.push_str(&format!(" sslmode={}", quote(ssl_mode)));
        }
        conninfo
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}
