//! Centralized logging configuration for the ce-solver binary and benches
//!
//! Provides a consistent `tracing` subscriber setup with a default INFO level.

use tracing::Level;

/// Initialize the tracing subscriber with ce-solver's standard configuration
///
/// Default log level: INFO (overrideable via RUST_LOG environment variable)
///
/// # Example
/// ```no_run
/// use ce_solver::init_logger;
///
/// fn main() {
///     init_logger();
///     tracing::info!("Factorization started");
/// }
/// ```
///
/// # Environment Variables
/// ```bash
/// RUST_LOG=debug cargo run --bin ce_demo
/// RUST_LOG=ce_solver=trace cargo run --bin ce_demo
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Initialize the tracing subscriber with a custom default level
///
/// Calling this more than once is harmless: `try_init` fails when a global
/// subscriber is already installed (a second call from a test or bench), and
/// that error is ignored so the first subscriber stays in place.
///
/// # Arguments
/// * `default_level` - The default log level (overrideable via RUST_LOG)
pub fn init_logger_with_level(default_level: Level) {
    use tracing_subscriber::fmt::time::SystemTime;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_timer(SystemTime)
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}
