//! Shared test-only tracing setup. Grounded on teacher's `crdt/src/doc.rs`
//! `memory()` constructor, which wires a `FmtSubscriber` the same way for
//! its own tests.

use tracing_subscriber::EnvFilter;

pub fn init() {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "warn".to_owned());
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(env))
        .with_writer(std::io::stderr)
        .with_test_writer()
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}
