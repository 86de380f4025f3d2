//! One-shot link encode/decode CLI (spec §10 Supplemented Features),
//! for operators to mint or inspect tracking URLs by hand without
//! standing up the tracking HTTP server. Grounded on
//! `original_source/cmd/linktool/linktool.go`'s `encode`/`decode`
//! subcommands, reshaped onto `clap::Parser`/`clap::Subcommand` the way
//! `wrapper` and `tracker` use derive-based CLIs rather than `flag`'s
//! imperative `FlagSet` construction.

use anyhow::Context;
use clap::{Parser, Subcommand};
use sp_linkcodec::CodecError;
use sp_protocol::{Action, TrackingPayload};

/// Encode or decode a tracking URL's path segment.
#[derive(Debug, Parser)]
#[command(about, version)]
struct Opt {
    /// Directory for rolled diagnostic log files; stderr if omitted.
    #[arg(long, global = true)]
    diag_log_dir: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build a tracking URL for a given action/message/recipient.
    Encode {
        #[arg(long, value_enum)]
        action: ActionArg,

        /// The original link; required for `click`, ignored otherwise.
        #[arg(long, default_value = "https://example.com")]
        target: String,

        #[arg(long, default_value = "0000123456789abcdef0")]
        message_id: String,

        #[arg(long, default_value = "any@example.com")]
        recipient: String,

        /// Tracking server base URL the encoded segment is appended to.
        #[arg(long, default_value = "http://localhost:8888")]
        base: String,
    },
    /// Decode a tracking URL (or a bare encoded path segment) and print
    /// its fields plus the equivalent `encode` invocation.
    Decode {
        /// A full tracking URL, or just the encoded path segment.
        url_or_segment: String,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ActionArg {
    Open,
    InitialOpen,
    Click,
}

impl From<ActionArg> for Action {
    fn from(a: ActionArg) -> Action {
        match a {
            ActionArg::Open => Action::Open,
            ActionArg::InitialOpen => Action::InitialOpen,
            ActionArg::Click => Action::Click,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();

    sp_runtime::register_panic_hook();
    let _log_guard = sp_runtime::LoggingConfig {
        log_dir: opt.diag_log_dir.clone(),
        filter_env_var: "SP_LINKTOOL_LOG",
        default_filter: "linktool=info",
    }
    .init()
    .context("initializing logging")?;

    match opt.command {
        Command::Encode {
            action,
            target,
            message_id,
            recipient,
            base,
        } => {
            let url = sp_linkcodec::build_url(
                &base,
                Action::from(action).type_name(),
                &message_id,
                &recipient,
                &target,
            )?;
            println!("{url}");
        }
        Command::Decode { url_or_segment } => {
            let (payload, base) = decode_input(&url_or_segment)?;
            let json = serde_json::to_string(&payload)?;
            println!("JSON: {json}");
            println!(
                "Equivalent to encode --base {base} --recipient {} --action {} --target {} --message-id {}",
                payload.recipient,
                payload.action.type_name(),
                payload.target_link_url,
                payload.message_id,
            );
        }
    }

    Ok(())
}

/// Accepts either a full tracking URL or a bare encoded path segment —
/// the original `linktool decode` takes a URL, but operators often copy
/// just the segment out of a log line, so a segment that doesn't parse
/// as a URL is retried as a raw path segment.
fn decode_input(url_or_segment: &str) -> Result<(TrackingPayload, String), CodecError> {
    match sp_linkcodec::parse_url(url_or_segment) {
        Ok(parsed) => Ok(parsed),
        Err(_) => {
            let payload = sp_linkcodec::decode(url_or_segment)?;
            Ok((payload, String::new()))
        }
    }
}
