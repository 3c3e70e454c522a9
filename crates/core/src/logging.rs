//! Structured logging.
//!
//! The engine logs through `tracing`; nothing is printed unless the host
//! installs a subscriber. These helpers install a `tracing-subscriber`
//! formatter filtered by the `EPOCHGRAPH_LOG` environment variable:
//!
//! - `EPOCHGRAPH_LOG=info` - commits, opens and diffs
//! - `EPOCHGRAPH_LOG=debug` - per-transaction and schema detail
//! - `EPOCHGRAPH_LOG=warn,epochgraph::diff=debug` - combined filters

use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "EPOCHGRAPH_LOG";

/// Install the default subscriber at `info`. Later calls are ignored.
pub fn init() {
    init_with_default("info");
}

/// Install the default subscriber, using `default_level` when
/// `EPOCHGRAPH_LOG` is unset.
pub fn init_with_default(default_level: &str) {
    let subscriber = fmt()
        .with_env_filter(filter(default_level))
        .with_target(true)
        .with_thread_names(false)
        .compact();
    let _ = subscriber.try_init();
}

/// JSON lines, for log aggregation.
pub fn init_json() {
    let subscriber = fmt()
        .with_env_filter(filter("info"))
        .with_target(true)
        .json();
    let _ = subscriber.try_init();
}

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level))
}
