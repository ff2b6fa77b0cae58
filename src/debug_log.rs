//! Debug logging for tracing scans and cache decisions.
//!
//! Enable by setting environment variable: REVIEWTRENDS_DEBUG_LOG=1
//! Logs are written to reviewtrends-debug.log in the system temp directory.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

const ENV_VAR: &str = "REVIEWTRENDS_DEBUG_LOG";

static ENABLED: AtomicBool = AtomicBool::new(false);
static START_TIME: OnceLock<Instant> = OnceLock::new();
static LOG_FILE: OnceLock<Mutex<std::fs::File>> = OnceLock::new();

pub fn log_path() -> PathBuf {
    std::env::temp_dir().join("reviewtrends-debug.log")
}

/// Initialize debug logging. Call once at startup.
pub fn init() {
    if std::env::var_os(ENV_VAR).is_none() {
        return;
    }

    let path = log_path();
    let file = match OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("⚠️  Cannot open debug log {}: {e}", path.display());
            return;
        }
    };

    START_TIME.get_or_init(Instant::now);
    LOG_FILE.get_or_init(|| Mutex::new(file));
    ENABLED.store(true, Ordering::SeqCst);
    log("DEBUG", "init", "Debug logging initialized");
}

/// Check if debug logging is enabled.
#[inline]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Log a debug message with elapsed time since `init`.
pub fn log(category: &str, action: &str, detail: &str) {
    if !is_enabled() {
        return;
    }

    let elapsed = START_TIME
        .get()
        .map(|s| s.elapsed().as_millis())
        .unwrap_or(0);

    let msg = format!("[{elapsed:>8}ms] [{category}] {action} - {detail}\n");

    if let Some(file) = LOG_FILE.get() {
        let mut file = file.lock();
        let _ = file.write_all(msg.as_bytes());
        let _ = file.flush();
    }
}
