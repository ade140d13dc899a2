//! Tracing initialization.

use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

pub const LOG_ENV: &str = "GITSTAT_LOG";

/// Default filter for a given number of `-v` flags.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "gitstat=warn",
        1 => "gitstat=info",
        2 => "gitstat=debug",
        _ => "gitstat=trace",
    }
}

/// Installs a stderr subscriber. `GITSTAT_LOG` overrides the verbosity
/// (e.g. `GITSTAT_LOG=gitstat::stats=debug`). Safe to call more than once.
pub fn init_tracing(verbosity: u8) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(verbosity > 1))
            .with(filter)
            .init();
    });
}
