//! The MIME walker (spec §4.3 steps 2-6): walks the parsed message,
//! enforces the single-recipient constraint, stamps `X-Sp-Message-Id`,
//! and rewrites every `text/html` part it finds — recursing through
//! `multipart/*` and `message/rfc822` — while leaving anything else
//! byte-for-byte untouched.

use crate::html::rewrite_html;
use crate::wrap::{LinkWrapper, TrackingConfig};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use mailparsing::{Address, DecodedBody, MailParsingError, MimePart};
use sp_idgen::new_message_id;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MimeError {
    /// More than one `To` recipient, or any `Cc`/`Bcc` (spec §4.3 step 3).
    #[error("this tracking implementation only supports single-recipient messages")]
    MultiRecipientUnsupported,
    #[error("mail parsing error: {0}")]
    Parse(#[from] MailParsingError),
    #[error("malformed message: {0}")]
    Malformed(String),
}

pub const X_SP_MESSAGE_ID_HEADER: &str = "X-Sp-Message-Id";

/// Result of processing one outbound message.
pub struct ProcessedMessage {
    pub bytes: Vec<u8>,
    pub message_id: String,
    pub recipient: String,
}

/// Parses `raw` as an RFC 5322 message, enforces the single-recipient
/// rule, ensures an `X-Sp-Message-Id` header, and — when `tracking` is
/// `Some` — rewrites every HTML part for engagement tracking. Returns the
/// re-serialized message plus the message id and recipient the caller
/// needs for SMTP-session bookkeeping (spec §4.3 step 3 feeds into the
/// accounting/tracking pipeline via exactly these two values).
///
/// When `tracking` is `None` (wrapping disabled for this deployment), the
/// body is still parsed only far enough to find/stamp the message id and
/// recipient — HTML parts are left untouched.
pub fn process_message(
    raw: &[u8],
    tracking: Option<&TrackingConfig>,
) -> Result<ProcessedMessage, MimeError> {
    let mut part = MimePart::parse(raw)?;

    let (message_id, recipient) = stamp_message_id_and_recipient(&mut part)?;

    if let Some(cfg) = tracking {
        let wrapper = LinkWrapper::new(cfg.clone(), message_id.clone(), recipient.clone());
        rewrite_part(&mut part, &wrapper)?;
    }

    let mut out = Vec::new();
    part.write_message(&mut out)
        .map_err(|e| MimeError::Malformed(format!("failed to re-serialize message: {e}")))?;

    Ok(ProcessedMessage {
        bytes: out,
        message_id,
        recipient,
    })
}

/// Extracts the sole recipient, enforcing spec §4.3's "exactly one `To`
/// address and zero `Cc`/`Bcc` addresses", and ensures the part carries
/// an `X-Sp-Message-Id` header, generating one if absent.
fn stamp_message_id_and_recipient(part: &mut MimePart) -> Result<(String, String), MimeError> {
    let to = part.headers().to().map_err(MimeError::from)?;
    let cc = part.headers().cc().map_err(MimeError::from)?;
    let bcc = part.headers().bcc().map_err(MimeError::from)?;

    let to_count = to.as_ref().map(|l| count_addresses(&l.0)).unwrap_or(0);
    let cc_count = cc.as_ref().map(|l| count_addresses(&l.0)).unwrap_or(0);
    let bcc_count = bcc.as_ref().map(|l| count_addresses(&l.0)).unwrap_or(0);

    if to_count != 1 || cc_count != 0 || bcc_count != 0 {
        return Err(MimeError::MultiRecipientUnsupported);
    }

    let recipient = match &to.unwrap().0[0] {
        Address::Mailbox(mbox) => addr_spec_to_string(&mbox.address),
        Address::Group { entries, .. } => addr_spec_to_string(&entries.0[0].address),
    };

    let existing = part
        .headers()
        .get_first(X_SP_MESSAGE_ID_HEADER)
        .map(|h| h.as_unstructured().unwrap_or_default())
        .filter(|s| !s.is_empty());

    let message_id = match existing {
        Some(id) => id,
        None => {
            let id = new_message_id();
            part.headers_mut().prepend(X_SP_MESSAGE_ID_HEADER, id.clone());
            id
        }
    };

    Ok((message_id, recipient))
}

fn count_addresses(addrs: &[Address]) -> usize {
    addrs
        .iter()
        .map(|a| match a {
            Address::Mailbox(_) => 1,
            Address::Group { entries, .. } => entries.0.len(),
        })
        .sum()
}

fn rewrite_part(part: &mut MimePart, wrapper: &LinkWrapper) -> Result<(), MimeError> {
    if !part.child_parts().is_empty() {
        for child in part.child_parts_mut() {
            rewrite_part(child, wrapper)?;
        }
        return Ok(());
    }

    let content_type = part
        .headers()
        .content_type()
        .map_err(MimeError::from)?
        .map(|ct| ct.value.to_ascii_lowercase())
        .unwrap_or_else(|| "text/plain".to_string());

    if content_type == "message/rfc822" {
        rewrite_nested_message(part, wrapper)?;
        return Ok(());
    }

    if content_type == "text/html" {
        rewrite_html_part(part, wrapper)?;
    }

    // Any other media type: byte-for-byte passthrough, nothing to do.
    Ok(())
}

fn rewrite_nested_message(part: &mut MimePart, wrapper: &LinkWrapper) -> Result<(), MimeError> {
    let raw = part.raw_body();
    let mut inner = MimePart::parse(raw.as_bytes()).map_err(MimeError::from)?;

    // The single-recipient rule is enforced again at this nested level
    // (spec §8 "Nested message/rfc822 ... still enforces the
    // single-recipient rule at each level"), but the outer message's
    // recipient/message-id are what drive tracking URLs for any nested
    // HTML, since the nested message is still part of the same outbound
    // transaction.
    stamp_message_id_and_recipient(&mut inner)?;
    rewrite_part(&mut inner, wrapper)?;

    let mut buf = Vec::new();
    inner
        .write_message(&mut buf)
        .map_err(|e| MimeError::Malformed(format!("failed to re-serialize nested message: {e}")))?;
    let encoded = String::from_utf8(buf)
        .map_err(|_| MimeError::Malformed("nested message is not utf8 after rewrite".to_string()))?;
    part.set_raw_body_preserving_encoding(encoded);
    Ok(())
}

fn rewrite_html_part(part: &mut MimePart, wrapper: &LinkWrapper) -> Result<(), MimeError> {
    let cte = part
        .headers()
        .content_transfer_encoding()
        .map_err(MimeError::from)?
        .map(|cte| cte.value.to_ascii_lowercase());

    let text = match part.body().map_err(MimeError::from)? {
        DecodedBody::Text(t) => t.to_string(),
        DecodedBody::Binary(b) => String::from_utf8_lossy(&b).to_string(),
    };

    let mut rewritten = Vec::new();
    rewrite_html(
        &text,
        &mut rewritten,
        &wrapper.rewrite_config(),
        |href| wrapper.wrap_click(href),
        || wrapper.wrap_initial_open(),
        || wrapper.wrap_open(),
    )
    .map_err(|e| MimeError::Malformed(format!("html rewrite failed: {e}")))?;
    let rewritten_text =
        String::from_utf8(rewritten).expect("rewriter only ever copies/emits valid utf8");

    match cte.as_deref() {
        Some("base64") => {
            let encoded = wrap_base64_76col(rewritten_text.as_bytes());
            part.set_raw_body(encoded, "base64");
        }
        // quoted-printable (and everything else, including absent):
        // the reader already yielded decoded text, and the rewritten
        // text is emitted as-is (spec §4.3 step 5) rather than
        // re-encoded — the transfer-encoding header is left exactly as
        // it was.
        _ => {
            part.set_raw_body_preserving_encoding(rewritten_text);
        }
    }
    Ok(())
}

/// Base64-encodes `data` and splits it into CRLF-delimited 76-character
/// lines (spec §4.3 step 5, §9: "not optional").
fn wrap_base64_76col(data: &[u8]) -> String {
    let flat = BASE64_STANDARD.encode(data);
    let mut out = String::with_capacity(flat.len() + flat.len() / 76 * 2 + 2);
    for chunk in flat.as_bytes().chunks(76) {
        out.push_str(std::str::from_utf8(chunk).expect("base64 alphabet is ascii"));
        out.push_str("\r\n");
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::html::RewriteConfig;

    fn config() -> TrackingConfig {
        TrackingConfig {
            tracking_base: "https://track.example.com/t".to_string(),
            rewrite: RewriteConfig::default(),
        }
    }

    #[test]
    fn simple_html_message_gets_wrapped_and_stamped() {
        let raw = b"From: a@example.com\r\nTo: mary@example.net\r\nSubject: hi\r\nContent-Type: text/html\r\n\r\n<html><body><a href=\"https://example.com/x\">click</a></body></html>";
        let result = process_message(raw, Some(&config())).unwrap();
        assert_eq!(result.recipient, "mary@example.net");
        assert_eq!(result.message_id.len(), 20);
        let out = String::from_utf8(result.bytes).unwrap();
        assert!(out.contains("X-Sp-Message-Id"));
        assert!(out.contains("track.example.com/t/"));
        assert!(!out.contains("https://example.com/x\""));
    }

    #[test]
    fn preserves_existing_message_id() {
        let raw = b"From: a@example.com\r\nTo: mary@example.net\r\nX-Sp-Message-Id: abcdefabcdefabcdefab\r\nContent-Type: text/plain\r\n\r\nhello";
        let result = process_message(raw, Some(&config())).unwrap();
        assert_eq!(result.message_id, "abcdefabcdefabcdefab");
    }

    #[test]
    fn multi_recipient_is_rejected() {
        let raw = b"From: a@example.com\r\nTo: mary@example.net\r\nCc: bob@example.net\r\nContent-Type: text/plain\r\n\r\nhello";
        let err = process_message(raw, Some(&config())).unwrap_err();
        assert!(matches!(err, MimeError::MultiRecipientUnsupported));
    }

    #[test]
    fn unknown_media_type_passes_through_byte_identical() {
        let raw: &[u8] = b"From: a@example.com\r\nTo: mary@example.net\r\nContent-Type: application/octet-stream\r\nContent-Transfer-Encoding: base64\r\n\r\naGVsbG8gd29ybGQ=\r\n";
        let result = process_message(raw, Some(&config())).unwrap();
        let out = String::from_utf8(result.bytes).unwrap();
        assert!(out.contains("aGVsbG8gd29ybGQ="));
    }

    #[test]
    fn base64_html_is_rewrapped_at_76_columns() {
        let long_link = "https://example.com/".to_string() + &"x".repeat(200);
        let html = format!("<html><body><a href=\"{long_link}\">click</a></body></html>");
        let encoded = wrap_base64_76col(html.as_bytes());
        let raw = format!(
            "From: a@example.com\r\nTo: mary@example.net\r\nContent-Type: text/html\r\nContent-Transfer-Encoding: base64\r\n\r\n{encoded}"
        );
        let result = process_message(raw.as_bytes(), Some(&config())).unwrap();
        let out = String::from_utf8(result.bytes).unwrap();
        for line in out.lines() {
            if line.trim_end_matches('\r').chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=') && !line.is_empty() && line.trim() == line.trim_end_matches('\r') {
                assert!(line.trim_end_matches('\r').len() <= 76);
            }
        }
    }

    #[test]
    fn no_tracking_config_is_straight_passthrough_of_html() {
        let raw = b"From: a@example.com\r\nTo: mary@example.net\r\nContent-Type: text/html\r\n\r\n<html><body><a href=\"https://example.com/x\">click</a></body></html>";
        let result = process_message(raw, None).unwrap();
        let out = String::from_utf8(result.bytes).unwrap();
        assert!(out.contains("https://example.com/x"));
    }
}
