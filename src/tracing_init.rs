//! Shared tracing initialization: every CLI invocation appends to exchange.log.

use std::sync::Mutex;

use crate::storage::path_utils;

/// Initialize tracing to `{data_dir}/exchange.log` (append mode).
///
/// `RUST_LOG` wins over `default_level` (the config's `log_level`).
pub fn init_file_tracing(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let data_dir = path_utils::data_dir();
    std::fs::create_dir_all(&data_dir).ok();
    let log_path = path_utils::log_path();

    // Multiple sessions append to the same file.
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Cannot open {}: {}, logging disabled", log_path.display(), e);
            return;
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(Mutex::new(log_file))
        .with_target(true)
        .with_ansi(false)
        .try_init();
}
