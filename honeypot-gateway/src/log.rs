//! Logging initialization: a thin concretization of `honeypot_log`'s generic rolling-file setup
//! for this binary, plus the `RUST_LOG`-driven `EnvFilter` fallback documented in the deployment
//! surface.

use camino::Utf8Path;
use honeypot_log::{LoggerGuard, StaticLogConfig};

pub struct HoneypotLogConfig;

impl StaticLogConfig for HoneypotLogConfig {
    const MAX_BYTES_PER_LOG_FILE: u64 = 10 * 1024 * 1024;
    const MAX_LOG_FILES: usize = 10;
    const LOG_FILE_PREFIX: &'static str = "honeypot-gateway";
}

const DEFAULT_DIRECTIVES: &str = "info";

/// Initializes structured logging to both stdout and a rolling file under `log_path`. `RUST_LOG`,
/// when set, is layered on top of the built-in default filter rather than replacing it outright.
pub fn init(log_path: &Utf8Path) -> anyhow::Result<LoggerGuard> {
    let debug_directives = std::env::var("RUST_LOG").ok();
    honeypot_log::init::<HoneypotLogConfig>(log_path, DEFAULT_DIRECTIVES, debug_directives.as_deref())
}
