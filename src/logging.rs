use crate::error::{Error, Result};
use std::time::{Duration, Instant};
use tracing::{error, trace, warn, Level};
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

/// Queries slower than this are reported at `warn`.
pub const SLOW_QUERY_THRESHOLD: Duration = Duration::from_millis(100);

/// Installs the global subscriber. `RUST_LOG` overrides `level` when set.
pub fn init_logging(level: Level, json_output: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lightning_query={},warn", level)));

    let installed = if json_output {
        let fmt_layer = fmt::layer()
            .json()
            .with_timer(SystemTime)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true);
        Registry::default().with(env_filter).with(fmt_layer).try_init()
    } else {
        let fmt_layer = fmt::layer()
            .with_timer(SystemTime)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(true);
        Registry::default().with(env_filter).with(fmt_layer).try_init()
    };
    installed.map_err(|e| Error::Config(format!("logging already initialised: {}", e)))
}

/// Times one query round-trip through the script runner.
pub struct QueryTimer {
    start: Instant,
    query: &'static str,
}

impl QueryTimer {
    pub fn new(query: &'static str) -> Self {
        Self {
            start: Instant::now(),
            query,
        }
    }

    pub fn complete<T>(self, result: &Result<T>) {
        let duration = self.start.elapsed();

        match result {
            Ok(_) if duration > SLOW_QUERY_THRESHOLD => {
                warn!(
                    query = self.query,
                    duration_ms = duration.as_millis() as u64,
                    "Slow query"
                );
            }
            Ok(_) => {
                trace!(
                    query = self.query,
                    duration_us = duration.as_micros() as u64,
                    "Query answered"
                );
            }
            Err(e) if e.is_fatal() => {
                error!(
                    query = self.query,
                    error = %e,
                    code = e.error_code(),
                    "Query aborted the request"
                );
            }
            Err(e) => {
                trace!(query = self.query, error = %e, "Query failed");
            }
        }
    }
}
