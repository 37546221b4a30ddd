mod dates_tests;
mod driver_tests;
mod ledger_tests;
mod resolver_tests;
mod session_tests;

// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_test_writer()
        .try_init();
}
