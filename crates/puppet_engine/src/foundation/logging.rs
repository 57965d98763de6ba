//! Logging utilities
//!
//! Every module logs through the `log` facade; `env_logger` is the backend.
//! Both initialisers are safe to call more than once, which lets tests and
//! the demo share the same setup path.

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system from `RUST_LOG`
pub fn init() {
    let _ = env_logger::Builder::from_default_env().try_init();
}

/// Initialize the logging system with a default filter.
///
/// `RUST_LOG` still takes precedence when it is set.
pub fn init_with_filter(filter: &str) {
    let env = env_logger::Env::default().default_filter_or(filter);
    if env_logger::Builder::from_env(env).try_init().is_ok() {
        log::debug!("Logging initialized (default filter: {})", filter);
    }
}

/// Initialize logging for unit tests: captured output, everything enabled.
#[cfg(test)]
pub fn init_for_tests() {
    let _ = env_logger::Builder::from_default_env()
        .is_test(true)
        .filter_level(log::LevelFilter::Trace)
        .try_init();
}
