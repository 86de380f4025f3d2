//! Wrapper configuration (spec §6's process configuration table, §6.1):
//! a `clap::Parser` struct for the CLI-visible options, with the three
//! tracking-feature toggles optionally overridden from a small TOML file
//! so an operator can flip them without redeploying the service —
//! grounded on the teacher's "CLI overrides file" precedence seen in
//! `proxy-server::Opt` (legacy CLI vs. `--proxy-config`), simplified
//! because this service has no embedded scripting engine to hand a whole
//! policy file to.

use clap::Parser;
use serde::Deserialize;
use sp_mime::RewriteConfig;
use std::path::PathBuf;
use std::time::Duration;

/// The Wrapping SMTP Proxy.
///
/// Streams SMTP sessions through to an upstream MTA, rewriting HTML
/// bodies for engagement tracking as they pass through DATA.
#[derive(Debug, Parser)]
#[command(about, version)]
pub struct Opt {
    /// Address to listen for downstream SMTP clients on, e.g. "0.0.0.0:2525".
    #[arg(long)]
    pub listen: String,

    /// Upstream MTA address to relay sessions to, e.g. "127.0.0.1:25".
    #[arg(long)]
    pub upstream: String,

    /// PEM certificate chain for downstream STARTTLS. Omitting this
    /// (along with `--key-file`) disables STARTTLS advertisement.
    #[arg(long)]
    pub cert_file: Option<PathBuf>,

    /// PEM private key matching `--cert-file`.
    #[arg(long)]
    pub key_file: Option<PathBuf>,

    /// Base URL engagement tracking links are minted under. Omitting this
    /// disables wrapping entirely: DATA bodies are copied through
    /// byte-for-byte (spec §4.3).
    #[arg(long)]
    pub tracking_base: Option<String>,

    /// Disable the trailing open-tracking pixel.
    #[arg(long)]
    pub no_track_open: bool,

    /// Disable the initial-open-tracking pixel.
    #[arg(long)]
    pub no_track_initial_open: bool,

    /// Disable click (href) rewriting.
    #[arg(long)]
    pub no_track_click: bool,

    /// Optional TOML file that can override the three tracking toggles
    /// above without redeploying (spec §6.1).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Skip upstream TLS certificate validation (lab/test deployments).
    #[arg(long)]
    pub insecure_skip_verify: bool,

    /// Speak STARTTLS to the upstream MTA immediately after connecting.
    #[arg(long)]
    pub upstream_starttls: bool,

    /// Hostname this proxy identifies itself as in EHLO/HELO and in its
    /// self-signed fallback certificate.
    #[arg(long, default_value = "localhost")]
    pub hostname: String,

    /// Directory for rolled diagnostic log files; stderr if omitted.
    #[arg(long)]
    pub diag_log_dir: Option<PathBuf>,

    /// Read/write timeout applied to every downstream and upstream I/O
    /// operation (spec §5: 60s default).
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
    pub io_timeout: Duration,
}

#[derive(Debug, Default, Deserialize)]
struct TrackingOverrideFile {
    #[serde(default)]
    tracking: TrackingOverrides,
}

#[derive(Debug, Default, Deserialize)]
struct TrackingOverrides {
    track_open: Option<bool>,
    track_initial_open: Option<bool>,
    track_click: Option<bool>,
}

impl Opt {
    /// Resolves the three tracking toggles, applying `--config` file
    /// overrides (if given) on top of the CLI's `--no-track-*` flags.
    pub fn rewrite_config(&self) -> anyhow::Result<RewriteConfig> {
        let mut cfg = RewriteConfig {
            wrap_click: !self.no_track_click,
            initial_open_pixel: !self.no_track_initial_open,
            open_pixel: !self.no_track_open,
        };

        if let Some(path) = &self.config {
            let text = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
            let parsed: TrackingOverrideFile = toml::from_str(&text)
                .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
            if let Some(v) = parsed.tracking.track_open {
                cfg.open_pixel = v;
            }
            if let Some(v) = parsed.tracking.track_initial_open {
                cfg.initial_open_pixel = v;
            }
            if let Some(v) = parsed.tracking.track_click {
                cfg.wrap_click = v;
            }
        }

        Ok(cfg)
    }
}
