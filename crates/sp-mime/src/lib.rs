//! MIME body rewriting for the wrapping SMTP proxy (spec §4.3, §4.4).
//!
//! [`walker`] parses an outbound message, stamps `X-Sp-Message-Id`,
//! enforces the single-recipient rule, and recurses through
//! `multipart/*`/`message/rfc822` rewriting every `text/html` part it
//! finds via [`html`]. [`wrap`] holds the per-message tracking context
//! that hands the rewriter its three URL-producing closures.

pub mod html;
pub mod walker;
pub mod wrap;

pub use html::{rewrite_html, RewriteConfig};
pub use walker::{process_message, MimeError, ProcessedMessage, X_SP_MESSAGE_ID_HEADER};
pub use wrap::{LinkWrapper, TrackingConfig};
