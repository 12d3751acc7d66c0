//! Debug log file for plugin libraries.
//!
//! 7-Zip gives a plugin no console, so with the `debug` feature the
//! library's `tracing` events go to a file: `$SEVENZIP_PLUGIN_LOG`, or
//! `7zip-plugin-debug.log` in the temp directory. `RUST_LOG` filters as
//! usual and defaults to `debug`. Without the feature nothing is installed.

/// Environment variable naming the log file.
pub const LOG_ENV: &str = "SEVENZIP_PLUGIN_LOG";

/// Default log file name, placed in the temp directory.
pub const LOG_FILE: &str = "7zip-plugin-debug.log";

/// Where the debug log goes.
pub fn log_path() -> std::path::PathBuf {
    std::env::var_os(LOG_ENV)
        .filter(|p| !p.is_empty())
        .map(Into::into)
        .unwrap_or_else(|| std::env::temp_dir().join(LOG_FILE))
}

/// Install the file subscriber. Called once, when the registry is built.
#[cfg(feature = "debug")]
pub fn init() {
    use std::fs::OpenOptions;
    use std::sync::{Mutex, Once};
    use tracing_subscriber::EnvFilter;

    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let Ok(file) = OpenOptions::new().create(true).append(true).open(log_path()) else {
            return;
        };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        // Fails if the host process already installed a subscriber; keep theirs.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_thread_ids(true)
            .try_init();
    });
}

#[cfg(not(feature = "debug"))]
pub fn init() {}
