//! Shared data model for the engagement-tracking pipeline: the structs that
//! cross process boundaries (through a URL, through the queue, through the
//! KV store, or over the wire to the remote ingest API), the well-known
//! store key constants all four services agree on, and the pipeline-wide
//! error taxonomy.
//!
//! Nothing in this crate talks to the network or the store directly; it is
//! the vocabulary the other crates share.

mod error;
mod event;
mod keys;
mod payload;

pub use error::Error;
pub use event::{
    EnrichmentRecord, IngestEnvelope, OutboundIngestEvent, TrackEventGrouping, TrackingEvent,
    DELIVERY_METHOD, ENRICHMENT_TTL_SECS,
};
pub use keys::{acct_headers_key, message_id_key, ACCT_HEADERS_KEY, TRACKING_PREFIX, TRK_QUEUE};
pub use payload::{Action, TrackingPayload};
