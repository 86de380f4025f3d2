//! Diagnostic logging bootstrap, shared by all four binaries (spec §6.2).
//! Grounded on `kumo-server-common::diagnostic_logging`, trimmed of the
//! Lua-config-engine and Prometheus-metrics layering that crate carries
//! for `kumod` specifically — this pipeline has no embedded scripting
//! engine and no metrics Non-goal to serve.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, EnvFilter};

pub struct LoggingConfig<'a> {
    /// Directory to roll hourly log files into. `None` logs to stderr.
    pub log_dir: Option<PathBuf>,
    /// Environment variable consulted for the filter string, e.g.
    /// `SP_WRAPPER_LOG`.
    pub filter_env_var: &'a str,
    /// Filter used when `filter_env_var` is unset.
    pub default_filter: &'a str,
}

/// Initializes the global `tracing` subscriber. Returns a guard that must
/// be held for the lifetime of the process when logging to a file —
/// dropping it early truncates in-flight log writes.
impl LoggingConfig<'_> {
    pub fn init(&self) -> anyhow::Result<Option<WorkerGuard>> {
        let (writer, guard) = match &self.log_dir {
            Some(dir) => {
                let file_appender = tracing_appender::rolling::hourly(dir, "log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                (BoxMakeWriter::new(non_blocking), Some(guard))
            }
            None => (BoxMakeWriter::new(std::io::stderr), None),
        };

        let filter = EnvFilter::try_new(
            std::env::var(self.filter_env_var)
                .as_deref()
                .unwrap_or(self.default_filter),
        )?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_thread_names(true)
            .init();

        Ok(guard)
    }
}
