//! Wrapping SMTP Proxy binary (spec §4.3): accepts downstream SMTP
//! connections, relays each to the configured upstream MTA, and rewrites
//! outbound HTML bodies for engagement tracking as they pass through
//! `DATA`.
//!
//! Grounded on `proxy-server::main`'s bootstrap shape (clap parse, rlimit
//! bump, panic hook, tracing init, accept loop), trimmed of the
//! mail-sending-queue machinery that binary carries and doesn't need
//! here.

mod config;
mod session;
mod smtp_io;
mod tls;

use anyhow::Context;
use clap::Parser;
use config::Opt;
use session::SessionConfig;
use sp_mime::TrackingConfig;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();

    sp_runtime::register_panic_hook();
    sp_runtime::raise_nofile_limit().context("raising RLIMIT_NOFILE")?;
    let _log_guard = sp_runtime::LoggingConfig {
        log_dir: opt.diag_log_dir.clone(),
        filter_env_var: "SP_WRAPPER_LOG",
        default_filter: "wrapper=info,sp_mime=info",
    }
    .init()
    .context("initializing logging")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(run(opt))
}

async fn run(opt: Opt) -> anyhow::Result<()> {
    let rewrite = opt.rewrite_config()?;
    let tracking = opt.tracking_base.clone().map(|tracking_base| TrackingConfig {
        tracking_base,
        rewrite,
    });

    let server_tls = match (&opt.cert_file, &opt.key_file) {
        (Some(cert), Some(key)) => Some(tls::make_server_config(cert, key)?),
        (None, None) => None,
        _ => anyhow::bail!("--cert-file and --key-file must be given together"),
    };

    let client_tls = if opt.upstream_starttls {
        Some(tls::make_client_config(opt.insecure_skip_verify)?)
    } else {
        None
    };

    let cfg = Arc::new(SessionConfig {
        hostname: opt.hostname.clone(),
        upstream_addr: opt.upstream.clone(),
        upstream_starttls: opt.upstream_starttls,
        tracking,
        server_tls,
        client_tls,
        io_timeout: opt.io_timeout,
    });

    let listener = TcpListener::bind(&opt.listen)
        .await
        .with_context(|| format!("binding {}", opt.listen))?;
    info!(listen = %opt.listen, upstream = %opt.upstream, "wrapper listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "accept failed");
                continue;
            }
        };
        let cfg = Arc::clone(&cfg);
        tokio::spawn(async move {
            session::handle_session(stream, peer, cfg).await;
        });
    }
}
