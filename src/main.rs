//! Tenancy job worker, processes the queued jobs of every store database.
//! This crate is for running the worker from `tenancy_lib`. See `tenancy_lib` for details.

extern crate tenancy_lib;

fn main() {
    let config = tenancy_lib::config::Config::new().expect("Can't load app config!");

    // Prepare sentry integration
    let _sentry = tenancy_lib::sentry_integration::init(config.sentry.as_ref());

    // Prepare logger
    tenancy_lib::init_logging(&config);

    tenancy_lib::start_worker(config);
}
