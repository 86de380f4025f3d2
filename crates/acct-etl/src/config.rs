//! Accounting ETL configuration (spec §6): a single-pass CSV job, run
//! once per delivery-pipe rotation rather than as a long-lived server,
//! so its CLI carries an input source and store connection only.
//! Grounded on the teacher's `clap::Parser` CLI shape.

use clap::Parser;

/// Accounting ETL: reads a PowerMTA-style accounting CSV stream from a
/// file or stdin and persists header mappings and per-message
/// enrichment records to the store.
#[derive(Debug, Parser)]
#[command(about, version)]
pub struct Opt {
    /// Path to the accounting CSV file. Reads stdin if omitted (spec
    /// §4.5: "a single pass over one CSV-formatted input stream").
    pub input: Option<std::path::PathBuf>,

    /// Redis-compatible store URL backing `acct_headers` and
    /// `msgID_*`.
    #[arg(long)]
    pub store_url: String,

    #[arg(long, default_value_t = 8)]
    pub store_pool_size: usize,

    /// Directory for rolled diagnostic log files; stderr if omitted.
    #[arg(long)]
    pub diag_log_dir: Option<std::path::PathBuf>,
}
