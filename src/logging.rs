//! Tracing subscriber setup.
//!
//! `RUST_LOG` selects the filter (default `info`). Setting
//! `EVIDENCE_INTAKE_LOG_JSON=1` switches to JSON lines on stderr.

use tracing_subscriber::EnvFilter;

const JSON_ENV: &str = "EVIDENCE_INTAKE_LOG_JSON";

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(JSON_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    // A subscriber may already be installed (tests, embedding); keep it.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
