//! Per-message tracking context: bundles the tracking base URL, the three
//! independent toggle booleans (spec §4.4), and the message id/recipient
//! pair established once per message (spec §4.3 step 2-3), then hands out
//! the three URL-producing closures the HTML rewriter needs.

use crate::html::RewriteConfig;
use sp_protocol::Action;

/// Configuration for engagement tracking on the wrapper. `None` disables
/// wrapping entirely (spec §4.3: "If wrapping is disabled ... the entire
/// DATA body is a straight byte copy").
#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub tracking_base: String,
    pub rewrite: RewriteConfig,
}

/// Per-message state: the message id (existing or freshly generated) and
/// the sole recipient, set once the headers have been processed.
#[derive(Debug, Clone)]
pub struct LinkWrapper {
    config: TrackingConfig,
    message_id: String,
    recipient: String,
}

impl LinkWrapper {
    pub fn new(config: TrackingConfig, message_id: String, recipient: String) -> Self {
        Self {
            config,
            message_id,
            recipient,
        }
    }

    pub fn rewrite_config(&self) -> RewriteConfig {
        self.config.rewrite
    }

    /// Wraps a link target for click tracking.
    pub fn wrap_click(&self, target: &str) -> String {
        self.wrap(Action::Click, target)
    }

    /// Produces the `src` for the initial-open pixel.
    pub fn wrap_initial_open(&self) -> String {
        self.wrap(Action::InitialOpen, "")
    }

    /// Produces the `src` for the trailing open pixel.
    pub fn wrap_open(&self) -> String {
        self.wrap(Action::Open, "")
    }

    fn wrap(&self, action: Action, target: &str) -> String {
        sp_linkcodec::build_url(
            &self.config.tracking_base,
            action.type_name(),
            &self.message_id,
            &self.recipient,
            target,
        )
        // A valid tracking base was already checked when the wrapper
        // started up; if it somehow fails now the original link is
        // returned unwrapped, matching the reference implementation's
        // "if can't wrap, return unchanged" fallback.
        .unwrap_or_else(|_| target.to_string())
    }
}
