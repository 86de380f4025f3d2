use crate::payload::TrackingPayload;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What the HTTP server produces and the feeder consumes (spec §3). The
/// tracking payload is flattened into this struct's JSON so a queued event
/// is a single flat object, matching the shape the original accounting
/// pipeline used on its Redis queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    #[serde(flatten)]
    pub payload: TrackingPayload,
    /// Decimal string, seconds since epoch, stamped at HTTP receive.
    #[serde(rename = "ts")]
    pub timestamp: String,
    /// Verbatim from the request's `User-Agent` header.
    #[serde(rename = "ua")]
    pub user_agent: String,
    /// Host portion only of the request's peer address.
    #[serde(rename = "ip")]
    pub ip_address: String,
}

/// Per-message join data the accounting ETL writes and the feeder reads,
/// keyed by `msgID_<message_id>` with a 10-day TTL. Deliberately an open,
/// dynamically-keyed string map (spec §9 Design Notes) rather than a
/// struct with named fields, because the set of optional accounting
/// columns that actually show up is a deployment-time choice.
pub type EnrichmentRecord = BTreeMap<String, String>;

/// The TTL enrichment records are stored with.
pub const ENRICHMENT_TTL_SECS: u64 = 10 * 24 * 60 * 60;

/// The remote-API shape the feeder POSTs, one per NDJSON line (spec §3,
/// §6): a nested object carrying the tracking event's fields, a delivery
/// method constant, a fresh event id, the resolved event type name, and
/// whatever enrichment fields were merged in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundIngestEvent {
    pub msys: IngestEnvelope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEnvelope {
    pub track_event: TrackEventGrouping,
}

/// The delivery method the feeder always reports: the wrapper only
/// handles ESMTP-relayed mail, so this is a constant rather than a field
/// threaded through from anywhere upstream.
pub const DELIVERY_METHOD: &str = "esmtp";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackEventGrouping {
    #[serde(rename = "type")]
    pub event_type: String,
    pub delv_method: String,
    pub event_id: String,
    pub ip_address: String,
    pub message_id: String,
    pub rcpt_to: String,
    pub timestamp: String,
    pub target_link_url: String,
    pub user_agent: String,
    pub subaccount_id: i64,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::payload::Action;

    #[test]
    fn tracking_event_flattens_payload() {
        let e = TrackingEvent {
            payload: TrackingPayload {
                action: Action::Open,
                target_link_url: String::new(),
                message_id: "f00dbeef".to_string(),
                recipient: "mary@example.net".to_string(),
            },
            timestamp: "1700000000".to_string(),
            user_agent: "curl/8.0".to_string(),
            ip_address: "203.0.113.9".to_string(),
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["act"], "o");
        assert_eq!(v["msg_id"], "f00dbeef");
        assert_eq!(v["ts"], "1700000000");
        assert_eq!(v["ua"], "curl/8.0");
        assert_eq!(v["ip"], "203.0.113.9");

        let back: TrackingEvent = serde_json::from_value(v).unwrap();
        assert_eq!(back, e);
    }
}
