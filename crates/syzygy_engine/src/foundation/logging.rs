//! Logging utilities and structured logging support

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system from `RUST_LOG`, defaulting to `info`
pub fn init() {
    init_with_level("info");
}

/// Initialize the logging system with `level` as the default filter
///
/// `RUST_LOG` still takes precedence. Calling this more than once keeps the first logger.
pub fn init_with_level(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    if env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init()
        .is_err()
    {
        log::debug!("Logger already initialized");
    }
}
