//! Process startup utilities: logging and shutdown.

mod logging;
mod shutdown;

pub use logging::{LogRotation, LoggingConfig, LoggingGuard, init_logging};
pub use shutdown::{run_with_shutdown, wait_for_shutdown_signal};
