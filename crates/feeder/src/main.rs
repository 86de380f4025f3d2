//! Feeder (spec §4.7): pops Tracking Events off `trk_queue`, enriches
//! them from the accounting ETL's `msgID_<id>` records, batches the
//! resulting NDJSON by size and age, and POSTs gzipped batches to the
//! remote ingest API.
//!
//! Grounded on `original_source/feed_sparkpost.go`'s `FeedForever` loop
//! shape, restructured onto an async `tokio::time::sleep` poll instead
//! of a blocking `time.Sleep`, the way `wrapper`/`tracker` structure
//! their own main loops.
//!
//! A store-level error returns from `run` with `Err`, which `main`
//! propagates as a non-zero exit; spec §4.7/§9's "supervisor loop
//! restarts the feeder" is an external process-manager concern (systemd,
//! a shell `while true` wrapper), not something this binary does to
//! itself.

mod batch;
mod config;
mod enrich;

use anyhow::Context;
use batch::TimedBuffer;
use clap::Parser;
use config::Opt;
use sp_protocol::{message_id_key, EnrichmentRecord, TrackingEvent, TRK_QUEUE};
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();

    sp_runtime::register_panic_hook();
    let _log_guard = sp_runtime::LoggingConfig {
        log_dir: opt.diag_log_dir.clone(),
        filter_env_var: "SP_FEEDER_LOG",
        default_filter: "feeder=info",
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
    let host = config::host_cleanup(&opt.ingest_host);
    let (max_age, max_payload_bytes) = opt.batching()?;

    let store = sp_store::Store::connect(&opt.store_url, opt.store_pool_size)
        .context("connecting to store")?;
    let http = reqwest::Client::builder()
        .build()
        .context("building ingest http client")?;

    info!(ingest_host = %host, %max_payload_bytes, max_age = ?max_age, "feeder starting");

    let mut buffer = TimedBuffer::new(max_age, max_payload_bytes);

    loop {
        let popped = store
            .lpop_raw(TRK_QUEUE)
            .await
            .context("popping from trk_queue")?;

        let Some(raw) = popped else {
            if buffer.is_mature() {
                let ndjson = buffer.take();
                if let Err(e) = batch::flush(&http, &host, &opt.ingest_api_key, &ndjson, opt.ingest_timeout).await {
                    warn!(error = %e, "ingest flush (aged batch) failed");
                }
            }
            tokio::time::sleep(opt.poll_interval).await;
            continue;
        };

        // A malformed queue entry is `MalformedInput` (spec §7), not a
        // store failure: log and skip it rather than crashing the feeder
        // (the original `sparkPostEventNDJSON`/`makeSparkPostEvent` logs
        // the unmarshal error and moves on to the next item).
        let event: TrackingEvent = match serde_json::from_slice(&raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping malformed tracking event from trk_queue");
                continue;
            }
        };

        let message_id = event.payload.message_id.clone();
        let enrichment: Option<EnrichmentRecord> = store
            .get_json(&message_id_key(&message_id))
            .await
            .context("looking up enrichment record")?;
        if enrichment.is_none() {
            warn!(%message_id, target = %event.payload.target_link_url, "no enrichment record found, proceeding without it");
        }

        let outbound = enrich::compose(event, enrichment.as_ref());
        let mut line = serde_json::to_vec(&outbound).context("serializing outbound ingest event")?;
        line.push(b'\n');

        if buffer.would_overflow(&line) && !buffer.is_empty() {
            let ndjson = buffer.take();
            if let Err(e) = batch::flush(&http, &host, &opt.ingest_api_key, &ndjson, opt.ingest_timeout).await {
                warn!(error = %e, "ingest flush (payload cap) failed");
            }
        }
        buffer.push(&line);
    }
}
