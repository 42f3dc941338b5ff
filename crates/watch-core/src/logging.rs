use tracing_subscriber::{fmt, EnvFilter};

use crate::Result;

/// Initialize tracing for a watch process.
///
/// Precedence: `RUST_LOG`, then `LOG_LEVEL`, then `info` (`debug` when `debug` is set).
pub fn init(service_name: &str, debug: bool) -> Result<()> {
    let filter = EnvFilter::new(filter_directive(
        service_name,
        debug,
        std::env::var("RUST_LOG").ok(),
        std::env::var("LOG_LEVEL").ok(),
    ));

    // A second init (tests, embedded use) keeps the first subscriber.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(true)
        .try_init();

    Ok(())
}

fn filter_directive(
    service_name: &str,
    debug: bool,
    rust_log: Option<String>,
    log_level: Option<String>,
) -> String {
    if let Some(directive) = rust_log.filter(|s| !s.trim().is_empty()) {
        return directive;
    }
    let level = if debug {
        "debug".to_string()
    } else {
        log_level
            .as_deref()
            .and_then(normalize_level)
            .unwrap_or("info")
            .to_string()
    };
    // Dependencies stay at warn; our crates follow the chosen level.
    format!(
        "warn,{service_name}={level},watch_core={level},watch_gemini={level},\
watch_listener={level},watch_telegram={level}"
    )
}

/// Accept Python-style level names (`WARNING`, `CRITICAL`) alongside tracing's.
fn normalize_level(raw: &str) -> Option<&'static str> {
    match raw.trim().to_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" | "critical" | "fatal" => Some("error"),
        "off" => Some("off"),
        _ => None,
    }
}
