//! Error reporting to Sentry, enabled when the `sentry` section is configured
use sentry;
use sentry::internals::ClientInitGuard;

#[derive(Debug, Deserialize, Clone)]
pub struct SentryConfig {
    pub dsn: String,
}

/// Installs the client and the panic handler. Reporting stops when the guard is dropped.
pub fn init(sentry_config: Option<&SentryConfig>) -> Option<ClientInitGuard> {
    sentry_config.map(|config| {
        info!("Initializing sentry integration.");
        let guard = sentry::init((
            config.dsn.clone(),
            sentry::ClientOptions {
                release: sentry_crate_release!(),
                ..Default::default()
            },
        ));
        sentry::integrations::panic::register_panic_handler();
        guard
    })
}
