//! Well-known keys in the external KV/queue store. These are part of the
//! wire protocol between `acct-etl`, `tracker`, and `feeder` and must not
//! change independently in any one of them.

/// FIFO list of JSON-encoded [`crate::TrackingEvent`]s, written by `tracker`
/// and drained by `feeder`.
pub const TRK_QUEUE: &str = "trk_queue";

/// Holds the column-index mapping discovered from the accounting pipe's
/// most recent header row. No TTL; overwritten on every header row.
pub const ACCT_HEADERS_KEY: &str = "acct_headers";

/// Prefix for per-message enrichment keys; the full key is
/// `msgID_<20-hex message_id>`.
pub const TRACKING_PREFIX: &str = "msgID_";

/// Returns the literal key used to store the accounting header mapping.
/// Provided as a function alongside the constant so callers that prefer
/// functions over raw constants (e.g. when threading through a generic
/// store trait) have a consistent spelling.
pub fn acct_headers_key() -> &'static str {
    ACCT_HEADERS_KEY
}

/// Returns the per-message enrichment key for a given `message_id`.
pub fn message_id_key(message_id: &str) -> String {
    format!("{TRACKING_PREFIX}{message_id}")
}
