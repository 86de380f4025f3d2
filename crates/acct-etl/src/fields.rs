//! The accounting record field contract (spec §4.5, §6): which CSV
//! columns are required, which are optional, and the pure row-parsing
//! logic that turns a header row or a delivery row into the shapes
//! `sp-store` persists. Grounded on
//! `original_source/do_acct_etl.go`'s `storeHeaders`/`storeEvent`, with
//! the optional field set widened to spec.md's Open-Questions superset
//! (`rcpt`, `vmtaPool`, `header_x-sp-subaccount-id`, `orig`, `jobId`,
//! `dlvSourceIp`) instead of the two fields any single retrieved
//! snapshot hard-coded.

use sp_protocol::EnrichmentRecord;
use std::collections::BTreeMap;
use thiserror::Error;

/// First field of a header row, identifying it as the column-name
/// record PowerMTA emits once at startup.
pub const TYPE_FIELD: &str = "type";
/// The column name carrying the message id in both header and delivery
/// rows.
pub const MSG_ID_FIELD: &str = "header_x-sp-message-id";
/// First-field value identifying a delivery record.
pub const DELIVERY_TYPE: &str = "d";

/// Columns every header row must name (spec §4.5: "Missing required
/// field -> fatal error for that input stream").
pub const REQUIRED_FIELDS: &[&str] = &[TYPE_FIELD, MSG_ID_FIELD];

/// Columns that, when present, are projected into the Enrichment Record
/// (spec.md's Open Questions: "this specification uses the superset of
/// recognized optional fields").
pub const OPTIONAL_FIELDS: &[&str] = &[
    "rcpt",
    "vmtaPool",
    "header_x-sp-subaccount-id",
    "orig",
    "jobId",
    "dlvSourceIp",
];

/// The discovered column-index mapping, persisted under `acct_headers`
/// (spec §4.5, §6). A plain string-keyed map of field name -> column
/// index, same open-key-set design as the Enrichment Record itself.
pub type AcctHeaders = BTreeMap<String, usize>;

#[derive(Debug, Error)]
pub enum EtlError {
    #[error("required field {0:?} is not present in accounting headers")]
    RequiredFieldMissing(String),
    #[error("accounting record not of expected type: {0:?}")]
    UnexpectedRecordType(Vec<String>),
    #[error("insufficient data fields {0:?}")]
    InsufficientData(Vec<String>),
    #[error("accounting headers not yet loaded (no header row seen)")]
    HeadersNotLoaded,
    #[error("accounting headers do not contain a mapping for {MSG_ID_FIELD:?}")]
    HeadersMissingMessageId,
}

/// Finds the column-index mapping for the required and optional field
/// sets in a header row (spec §4.5 record type `type`). Fails if any
/// required field is absent.
pub fn parse_header_row(record: &[String]) -> Result<AcctHeaders, EtlError> {
    let mut headers = AcctHeaders::new();

    for &field in REQUIRED_FIELDS {
        match position_of(record, field) {
            Some(idx) => {
                headers.insert(field.to_string(), idx);
            }
            None => return Err(EtlError::RequiredFieldMissing(field.to_string())),
        }
    }
    for &field in OPTIONAL_FIELDS {
        if let Some(idx) = position_of(record, field) {
            headers.insert(field.to_string(), idx);
        }
    }

    Ok(headers)
}

/// Projects a delivery row (record type `d`) into its message id and
/// Enrichment Record, using a previously-discovered header mapping
/// (spec §4.5 record type `d`). Skips `type` and the message-id column
/// itself when building the enrichment map (spec §3: "the optional
/// fields that were present...skipping type and message_id").
pub fn parse_delivery_row(
    record: &[String],
    headers: &AcctHeaders,
) -> Result<(String, EnrichmentRecord), EtlError> {
    let msg_idx = *headers
        .get(MSG_ID_FIELD)
        .ok_or(EtlError::HeadersMissingMessageId)?;
    if msg_idx >= record.len() {
        return Err(EtlError::InsufficientData(record.to_vec()));
    }
    let message_id = record[msg_idx].clone();

    let mut enrichment = EnrichmentRecord::new();
    for (field, &idx) in headers {
        if field == TYPE_FIELD || field == MSG_ID_FIELD {
            continue;
        }
        if idx >= record.len() {
            return Err(EtlError::InsufficientData(record.to_vec()));
        }
        enrichment.insert(field.clone(), record[idx].clone());
    }

    Ok((message_id, enrichment))
}

fn position_of(record: &[String], field: &str) -> Option<usize> {
    record.iter().position(|f| f == field)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_row_discovers_required_and_optional_columns() {
        let row = vec![
            "type".to_string(),
            "rcpt".to_string(),
            "header_x-sp-message-id".to_string(),
        ];
        let headers = parse_header_row(&row).unwrap();
        assert_eq!(headers[TYPE_FIELD], 0);
        assert_eq!(headers["rcpt"], 1);
        assert_eq!(headers[MSG_ID_FIELD], 2);
        assert!(!headers.contains_key("vmtaPool"));
    }

    #[test]
    fn header_row_missing_required_field_is_fatal() {
        let row = vec!["type".to_string(), "rcpt".to_string()];
        let err = parse_header_row(&row).unwrap_err();
        assert!(matches!(err, EtlError::RequiredFieldMissing(f) if f == MSG_ID_FIELD));
    }

    #[test]
    fn delivery_row_projects_optional_fields_skipping_type_and_message_id() {
        let row = vec![
            "type".to_string(),
            "rcpt".to_string(),
            "header_x-sp-message-id".to_string(),
        ];
        let headers = parse_header_row(&row).unwrap();

        let delivery = vec![
            "d".to_string(),
            "mary@example.net".to_string(),
            "f00dbeef00000000dead".to_string(),
        ];
        let (message_id, enrichment) = parse_delivery_row(&delivery, &headers).unwrap();
        assert_eq!(message_id, "f00dbeef00000000dead");
        assert_eq!(enrichment.len(), 1);
        assert_eq!(enrichment["rcpt"], "mary@example.net");
    }

    #[test]
    fn delivery_row_shorter_than_header_indices_is_insufficient_data() {
        let row = vec![
            "type".to_string(),
            "rcpt".to_string(),
            "header_x-sp-message-id".to_string(),
        ];
        let headers = parse_header_row(&row).unwrap();

        let short_delivery = vec!["d".to_string(), "mary@example.net".to_string()];
        let err = parse_delivery_row(&short_delivery, &headers).unwrap_err();
        assert!(matches!(err, EtlError::InsufficientData(_)));
    }

    #[test]
    fn delivery_row_without_loaded_headers_is_fatal() {
        let headers = AcctHeaders::new();
        let delivery = vec!["d".to_string(), "x".to_string()];
        let err = parse_delivery_row(&delivery, &headers).unwrap_err();
        assert!(matches!(err, EtlError::HeadersMissingMessageId));
    }
}
