use thiserror::Error;

/// The pipeline-wide error taxonomy (spec §7). Each binary maps this onto
/// whatever protocol it speaks: an SMTP reply code, an HTTP status, or a
/// process exit code. Library crates layer their own narrower error enums
/// underneath and convert into this one at the boundary where a component
/// needs to decide protocol-visible behavior.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad CSV, bad tracking-path encoding, bad JSON on a queue item,
    /// syntactically broken HTML. Always handled locally by the component
    /// that observed it.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// A policy violation the submitter could have avoided: a
    /// multi-recipient message through the wrapper, a missing required
    /// accounting header.
    #[error("policy violation: {0}")]
    Policy(String),

    /// The KV/queue store did not respond, or responded with an error.
    #[error("store unavailable: {0}")]
    TransientStore(String),

    /// The SMTP upstream or the remote ingest API failed at the transport
    /// level (connection reset, timeout, TLS failure, non-2xx).
    #[error("upstream transport error: {0}")]
    TransientUpstream(String),

    /// A fatal condition discovered at startup: missing API key, unusable
    /// listen address, unreadable certificate.
    #[error("fatal configuration error: {0}")]
    FatalConfig(String),
}

impl Error {
    /// The SMTP reply code a wrapper session should synthesize for this
    /// error, when the error originates from the wrapper's own processing
    /// rather than a genuine upstream transport failure (which gets the
    /// synthesized 599 instead, see `sp-mime`/`wrapper`).
    pub fn smtp_code(&self) -> u16 {
        match self {
            Error::MalformedInput(_) | Error::Policy(_) => 550,
            Error::TransientStore(_) | Error::TransientUpstream(_) => 451,
            Error::FatalConfig(_) => 554,
        }
    }

    /// The HTTP status the tracking server should return for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::MalformedInput(_) => 400,
            Error::Policy(_) => 400,
            Error::TransientStore(_) => 500,
            Error::TransientUpstream(_) => 502,
            Error::FatalConfig(_) => 500,
        }
    }
}
