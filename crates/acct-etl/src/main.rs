//! Accounting ETL binary (spec §4.5): a single-pass reader over a
//! PowerMTA-style accounting CSV stream. The first record naming a
//! column layout (`type`) is persisted as the header mapping; every
//! `d` record after it is projected through that mapping into a
//! per-message Enrichment Record.
//!
//! Grounded on `original_source/do_acct_etl.go`'s `AccountETL` loop,
//! restructured around the `csv` crate's `StringRecord` iterator
//! instead of a hand-rolled line splitter, the way `sp-mime`'s walker
//! leans on `mailparsing` rather than hand-rolling MIME structure.
//! Unlike the original, any malformed record aborts the whole run
//! rather than being skipped with a logged warning (spec §4.5, §7:
//! "any error in one record is fatal for the whole run").

mod config;
mod fields;

use anyhow::Context;
use clap::Parser;
use config::Opt;
use fields::{AcctHeaders, EtlError, DELIVERY_TYPE, REQUIRED_FIELDS, TYPE_FIELD};
use sp_protocol::{message_id_key, ACCT_HEADERS_KEY, ENRICHMENT_TTL_SECS};
use sp_store::Store;
use std::io::Read;
use std::time::Duration;
use tracing::info;

fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();

    sp_runtime::register_panic_hook();
    let _log_guard = sp_runtime::LoggingConfig {
        log_dir: opt.diag_log_dir.clone(),
        filter_env_var: "SP_ACCT_ETL_LOG",
        default_filter: "acct_etl=info",
    }
    .init()
    .context("initializing logging")?;

    // A single bounded pass over one input stream has no use for a
    // multi-threaded reactor (spec §6: "single-threaded over its input
    // stream").
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(run(opt))
}

async fn run(opt: Opt) -> anyhow::Result<()> {
    let store = Store::connect(&opt.store_url, opt.store_pool_size)
        .context("connecting to store")?;

    let mut raw = String::new();
    match &opt.input {
        Some(path) => {
            std::fs::File::open(path)
                .with_context(|| format!("opening {}", path.display()))?
                .read_to_string(&mut raw)
                .with_context(|| format!("reading {}", path.display()))?;
        }
        None => {
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("reading stdin")?;
        }
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(raw.as_bytes());

    let mut headers: Option<AcctHeaders> = None;
    let mut headers_seen = 0usize;
    let mut events_seen = 0usize;

    for result in reader.records() {
        let record = result.context("reading accounting record")?;
        let fields: Vec<String> = record.iter().map(str::to_string).collect();

        if fields.len() < REQUIRED_FIELDS.len() {
            return Err(EtlError::InsufficientData(fields.clone()))
                .context("record has fewer fields than the required set");
        }

        match fields.first().map(String::as_str) {
            Some(TYPE_FIELD) => {
                let mapping = fields::parse_header_row(&fields)?;
                store
                    .set_json(ACCT_HEADERS_KEY, &mapping, None)
                    .await
                    .context("persisting acct_headers")?;
                headers_seen += 1;
                info!(columns = mapping.len(), "accounting headers stored");
                headers = Some(mapping);
            }
            Some(DELIVERY_TYPE) => {
                // A header row earlier in *this* stream takes precedence,
                // but when this run is delivery-only the mapping has to
                // come from the store: `acct_headers` is persisted with
                // no TTL precisely so a later, separate invocation can
                // decode `d` rows without having seen a `type` row itself
                // (spec §4.5, §6: "look up acct_headers. Missing ->
                // fatal"). Once fetched it's cached in-memory for the
                // rest of this run.
                if headers.is_none() {
                    headers = store
                        .get_json(ACCT_HEADERS_KEY)
                        .await
                        .context("loading acct_headers")?;
                }
                let mapping = headers
                    .as_ref()
                    .ok_or(EtlError::HeadersNotLoaded)
                    .context("processing delivery record")?;
                let (message_id, enrichment) = fields::parse_delivery_row(&fields, mapping)
                    .context("processing delivery record")?;
                store
                    .set_json(
                        &message_id_key(&message_id),
                        &enrichment,
                        Some(Duration::from_secs(ENRICHMENT_TTL_SECS)),
                    )
                    .await
                    .context("persisting enrichment record")?;
                events_seen += 1;
            }
            Some(other) => {
                return Err(EtlError::UnexpectedRecordType(fields.clone()))
                    .with_context(|| format!("record type {other:?} is not recognized"));
            }
            None => unreachable!("checked above: fields.len() >= REQUIRED_FIELDS.len()"),
        }
    }

    info!(headers_seen, events_seen, "accounting ETL pass complete");
    Ok(())
}
