//! Tracking HTTP Server (spec §4.6): a single handler mounted at `/` that
//! decodes a tracking URL's path segment, stamps the Tracking Event, and
//! pushes it onto the queue, replying with either the 1x1 transparent GIF
//! (opens) or a redirect (clicks).
//!
//! Grounded on `original_source/track_srv.go`'s handler shape (one
//! function, `Server: msys-http` set unconditionally, method/path/codec
//! checks each short-circuiting to a status code) ported onto axum's
//! extractor/handler idiom, the way `kumod::http_server` structures its
//! routes.

use anyhow::Context;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use sp_protocol::TrackingEvent;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{info, warn};

/// The well-known 43-byte transparent GIF served for `o`/`i` actions
/// (spec §8), byte-for-byte identical to the reference tracker's literal.
const TRANSPARENT_GIF: &[u8] = b"GIF89a\x01\x00\x01\x00\x80\x00\x00\xff\xff\xff\xff\xff\xff\x21\xf9\x04\x01\x0a\x00\x01\x00\x2c\x00\x00\x00\x00\x01\x00\x01\x00\x00\x02\x02\x4c\x01\x00\x3b\x00";

/// The Tracking HTTP Server.
#[derive(Debug, Parser)]
#[command(about, version)]
struct Opt {
    /// Address to listen for HTTP tracking requests on.
    #[arg(long)]
    listen: String,

    /// Redis-compatible store URL backing `trk_queue`.
    #[arg(long)]
    store_url: String,

    #[arg(long, default_value_t = 16)]
    store_pool_size: usize,

    #[arg(long)]
    diag_log_dir: Option<std::path::PathBuf>,
}

struct AppState {
    store: sp_store::Store,
}

// Non-GET methods never reach `handle` at all: only `get(handle)` is
// registered for these routes, so axum's router itself replies 405 for
// any other method (spec §4.6 step 1), through the same
// `set_server_header` middleware layered below.
#[derive(Debug, Error)]
enum TrackError {
    #[error("malformed tracking path: {0}")]
    BadPath(#[from] sp_linkcodec::CodecError),
    #[error("store error: {0}")]
    Store(#[from] sp_store::StoreError),
}

impl IntoResponse for TrackError {
    fn into_response(self) -> Response {
        let status = match &self {
            TrackError::BadPath(_) => StatusCode::BAD_REQUEST,
            TrackError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(error = %self, %status, "tracking request failed");
        (status, self.to_string()).into_response()
    }
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();

    sp_runtime::register_panic_hook();
    sp_runtime::raise_nofile_limit().context("raising RLIMIT_NOFILE")?;
    let _log_guard = sp_runtime::LoggingConfig {
        log_dir: opt.diag_log_dir.clone(),
        filter_env_var: "SP_TRACKER_LOG",
        default_filter: "tracker=info",
    }
    .init()
    .context("initializing logging")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(run(opt))
}

/// Sets `Server: msys-http` on every response, including the 404/405s
/// axum's router generates itself for unmatched paths/methods, so the
/// header is present unconditionally (spec §4.6: "interoperability with
/// the reference ingest ecosystem").
async fn set_server_header(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    resp.headers_mut()
        .insert(header::SERVER, HeaderValue::from_static("msys-http"));
    resp
}

async fn run(opt: Opt) -> anyhow::Result<()> {
    let store = sp_store::Store::connect(&opt.store_url, opt.store_pool_size)
        .context("connecting to store")?;
    let state = Arc::new(AppState { store });

    let app = Router::new()
        .route("/", get(handle))
        .route("/{*path}", get(handle))
        .layer(middleware::from_fn(set_server_header))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&opt.listen)
        .await
        .with_context(|| format!("binding {}", opt.listen))?;
    info!(listen = %opt.listen, "tracker listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("serving")
}

/// Splits a request path into the single non-empty segment spec §4.6 step
/// 2 requires, rejecting an empty path or one with more than one segment.
fn single_segment(path: &str) -> Result<&str, sp_linkcodec::CodecError> {
    let mut segments = path.trim_start_matches('/').split('/');
    let segment = segments
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| sp_linkcodec::CodecError::MalformedPath("no path segment".to_string()))?;
    if segments.next().is_some() {
        return Err(sp_linkcodec::CodecError::MalformedPath(
            "more than one path segment".to_string(),
        ));
    }
    Ok(segment)
}

async fn handle(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: axum::http::HeaderMap,
) -> Result<Response, TrackError> {
    let segment = single_segment(uri.path())?;
    let payload = sp_linkcodec::decode(segment)?;

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .to_string();

    let action = payload.action;
    let target = payload.target_link_url.clone();

    let event = TrackingEvent {
        payload,
        timestamp,
        user_agent,
        ip_address: peer.ip().to_string(),
    };

    state.store.rpush_json(sp_protocol::TRK_QUEUE, &event).await?;

    let resp = match action {
        sp_protocol::Action::Open | sp_protocol::Action::InitialOpen => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, HeaderValue::from_static("image/gif")),
                (
                    header::CACHE_CONTROL,
                    HeaderValue::from_static("no-cache, max-age=0"),
                ),
            ],
            TRANSPARENT_GIF,
        )
            .into_response(),
        sp_protocol::Action::Click => {
            let location = HeaderValue::try_from(target)
                .map_err(|_| sp_linkcodec::CodecError::MalformedPath("target link url not a valid header value".to_string()))?;
            let mut r = (StatusCode::FOUND, "").into_response();
            r.headers_mut().insert(header::LOCATION, location);
            r.headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            r
        }
    };

    Ok(resp)
}
