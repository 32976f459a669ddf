#[macro_use]
extern crate log;
extern crate tenancy_lib;

use std::process;

fn main() {
    let config = tenancy_lib::config::Config::new().expect("Can't load app config!");

    // Prepare sentry integration
    let _sentry = tenancy_lib::sentry_integration::init(config.sentry.as_ref());

    // Prepare logger
    tenancy_lib::init_logging(&config);

    match tenancy_lib::run_migrations(&config) {
        Ok((applied, queued)) => {
            info!(
                "Master database is up to date, applied {:?}. Queued migration of {} store databases.",
                applied,
                queued.len()
            );
        }
        Err(err) => {
            let chain = err.iter_chain().map(|cause| cause.to_string()).collect::<Vec<_>>();
            error!("Migration failed: {}", chain.join(": "));
            process::exit(1);
        }
    }
}
