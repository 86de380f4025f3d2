//! Composes an [`OutboundIngestEvent`] from a popped [`TrackingEvent`]
//! plus whatever [`EnrichmentRecord`] the accounting ETL wrote for that
//! message id (spec §4.7 step 3). Grounded on
//! `original_source/feed_sparkpost.go`'s `makeSparkPostEvent`.

use sp_protocol::{
    EnrichmentRecord, IngestEnvelope, OutboundIngestEvent, TrackEventGrouping, TrackingEvent,
    DELIVERY_METHOD,
};

/// Builds the outbound event, projecting `rcpt` -> `rcpt_to` and
/// `header_x-sp-subaccount-id` -> numeric `subaccount_id` (spec §4.7,
/// §9: safe-parse, empty/unparseable => 0) from `enrichment` when
/// present. A `None` enrichment (missing `msgID_<id>` key) still
/// produces an event, with those two fields left at their zero values
/// (spec §8 scenario 3).
pub fn compose(event: TrackingEvent, enrichment: Option<&EnrichmentRecord>) -> OutboundIngestEvent {
    let rcpt_to = enrichment
        .and_then(|m| m.get("rcpt"))
        .cloned()
        .unwrap_or_default();
    let subaccount_id = enrichment
        .and_then(|m| m.get("header_x-sp-subaccount-id"))
        .map(|s| safe_parse_i64(s))
        .unwrap_or(0);

    OutboundIngestEvent {
        msys: IngestEnvelope {
            track_event: TrackEventGrouping {
                event_type: event.payload.action.type_name().to_string(),
                delv_method: DELIVERY_METHOD.to_string(),
                event_id: sp_idgen::new_event_id(),
                ip_address: event.ip_address,
                message_id: event.payload.message_id,
                rcpt_to,
                timestamp: event.timestamp,
                target_link_url: event.payload.target_link_url,
                user_agent: event.user_agent,
                subaccount_id,
            },
        },
    }
}

/// Parses `s` as a decimal integer, returning `0` for an empty or
/// unparseable string rather than failing the whole event (spec §4.7:
/// "safe-parse, where empty/unparseable => 0").
fn safe_parse_i64(s: &str) -> i64 {
    s.trim().parse().unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;
    use sp_protocol::{Action, TrackingPayload};
    use std::collections::BTreeMap;

    fn event() -> TrackingEvent {
        TrackingEvent {
            payload: TrackingPayload {
                action: Action::Click,
                target_link_url: "https://example.com/x".to_string(),
                message_id: "f00dbeef00000000dead".to_string(),
                recipient: "mary@example.net".to_string(),
            },
            timestamp: "1700000000".to_string(),
            user_agent: "curl/8.0".to_string(),
            ip_address: "203.0.113.9".to_string(),
        }
    }

    #[test]
    fn composes_with_enrichment() {
        let mut enrichment = BTreeMap::new();
        enrichment.insert("rcpt".to_string(), "mary@example.net".to_string());
        enrichment.insert("header_x-sp-subaccount-id".to_string(), "42".to_string());

        let out = compose(event(), Some(&enrichment));
        assert_eq!(out.msys.track_event.event_type, "click");
        assert_eq!(out.msys.track_event.delv_method, "esmtp");
        assert_eq!(out.msys.track_event.rcpt_to, "mary@example.net");
        assert_eq!(out.msys.track_event.subaccount_id, 42);
        assert_eq!(out.msys.track_event.target_link_url, "https://example.com/x");
        let event_id: u64 = out.msys.track_event.event_id.parse().unwrap();
        assert!(event_id < (1u64 << 63));
    }

    #[test]
    fn missing_enrichment_yields_empty_rcpt_and_zero_subaccount() {
        let out = compose(event(), None);
        assert_eq!(out.msys.track_event.rcpt_to, "");
        assert_eq!(out.msys.track_event.subaccount_id, 0);
    }

    #[test]
    fn unparseable_subaccount_id_is_zero() {
        let mut enrichment = BTreeMap::new();
        enrichment.insert("header_x-sp-subaccount-id".to_string(), "".to_string());
        let out = compose(event(), Some(&enrichment));
        assert_eq!(out.msys.track_event.subaccount_id, 0);
    }
}
