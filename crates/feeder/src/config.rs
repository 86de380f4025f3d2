//! Feeder configuration (spec §6's process configuration table): the
//! ingest host/API-key pair plus the batching knobs spec §4.7 names.
//! Grounded on the teacher's `clap::Parser` CLI shape, with the ingest
//! API key also accepted from an environment variable the way
//! `original_source/cmd/feeder/feeder.go` reads
//! `SPARKPOST_API_KEY_INGEST` — a missing key is fatal at startup either
//! way (spec §6: "required; missing -> fatal at startup").

use clap::Parser;
use std::time::Duration;

/// The Feeder: pops Tracking Events off the queue, enriches them from the
/// accounting ETL's per-message records, batches them, and POSTs NDJSON
/// to the remote ingest API.
#[derive(Debug, Parser)]
#[command(about, version)]
pub struct Opt {
    /// Redis-compatible store URL backing `trk_queue` and `msgID_*`.
    #[arg(long)]
    pub store_url: String,

    #[arg(long, default_value_t = 16)]
    pub store_pool_size: usize,

    /// Ingest API host, canonicalized at startup (spec §6: forced to
    /// `https://`, trailing `/api/v1` stripped).
    #[arg(long, env = "SPARKPOST_HOST_INGEST", default_value = "api.sparkpost.com")]
    pub ingest_host: String,

    /// Ingest API key, sent verbatim as the `Authorization` header.
    #[arg(long, env = "SPARKPOST_API_KEY_INGEST")]
    pub ingest_api_key: String,

    /// Absolute ceiling on a batch's raw (pre-gzip) NDJSON size before a
    /// flush is forced (spec §4.7: "O(MB)").
    #[arg(long, default_value_t = 3 * 1024 * 1024)]
    pub max_payload_bytes: usize,

    /// Oldest line in a non-empty buffer older than this triggers a flush
    /// (spec §4.7, §5: "production default O(minutes)").
    #[arg(long, default_value = "3m", value_parser = humantime::parse_duration)]
    pub max_age: Duration,

    /// Non-blocking queue-pop polling interval when the queue is empty
    /// (spec §5: "queue polling 1s").
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    pub poll_interval: Duration,

    /// Request timeout for the ingest POST (spec §5: "HTTP-ingest round
    /// trip 300s").
    #[arg(long, default_value = "300s", value_parser = humantime::parse_duration)]
    pub ingest_timeout: Duration,

    /// Directory for rolled diagnostic log files; stderr if omitted.
    #[arg(long)]
    pub diag_log_dir: Option<std::path::PathBuf>,

    /// Optional TOML file overriding `max_age`/`max_payload_bytes` without
    /// redeploying, mirroring `wrapper`'s `--config` override file.
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct BatchOverrideFile {
    #[serde(default)]
    batch: BatchOverrides,
}

#[derive(Debug, Default, serde::Deserialize)]
struct BatchOverrides {
    #[serde(default, with = "duration_serde")]
    max_age: Option<Duration>,
    max_payload_bytes: Option<usize>,
}

impl Opt {
    /// Applies `--config` file overrides (if given) on top of the CLI's
    /// `--max-age`/`--max-payload-bytes` flags.
    pub fn batching(&self) -> anyhow::Result<(Duration, usize)> {
        let mut max_age = self.max_age;
        let mut max_payload_bytes = self.max_payload_bytes;

        if let Some(path) = &self.config {
            let text = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
            let parsed: BatchOverrideFile = toml::from_str(&text)
                .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
            if let Some(v) = parsed.batch.max_age {
                max_age = v;
            }
            if let Some(v) = parsed.batch.max_payload_bytes {
                max_payload_bytes = v;
            }
        }

        Ok((max_age, max_payload_bytes))
    }
}

/// Canonicalizes an ingest host into `scheme://host` form with no
/// trailing `/api/v1` or slash, matching
/// `original_source/common.go`'s `HostCleanup` exactly: add `https://` if
/// no scheme is present, strip one trailing slash, strip a trailing
/// `/api/v1`, strip one more trailing slash.
pub fn host_cleanup(host: &str) -> String {
    let mut host = if host.starts_with("https://") || host.starts_with("http://") {
        host.to_string()
    } else {
        format!("https://{host}")
    };
    host = host.strip_suffix('/').unwrap_or(&host).to_string();
    host = host.strip_suffix("/api/v1").unwrap_or(&host).to_string();
    host = host.strip_suffix('/').unwrap_or(&host).to_string();
    host
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn adds_scheme_when_missing() {
        assert_eq!(host_cleanup("api.sparkpost.com"), "https://api.sparkpost.com");
    }

    #[test]
    fn keeps_existing_scheme() {
        assert_eq!(host_cleanup("http://localhost:8888"), "http://localhost:8888");
    }

    #[test]
    fn strips_trailing_slash() {
        assert_eq!(host_cleanup("https://api.sparkpost.com/"), "https://api.sparkpost.com");
    }

    #[test]
    fn strips_trailing_api_v1() {
        assert_eq!(
            host_cleanup("https://api.sparkpost.com/api/v1"),
            "https://api.sparkpost.com"
        );
    }

    #[test]
    fn strips_trailing_api_v1_with_slash() {
        assert_eq!(
            host_cleanup("https://api.sparkpost.com/api/v1/"),
            "https://api.sparkpost.com"
        );
    }
}
