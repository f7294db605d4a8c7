//! Error taxonomy for the IPC boundary.
//!
//! Internal code propagates `anyhow::Error`; once a request handler result
//! crosses into a `response` frame it is converted through `MuxError` so the
//! client always sees one of a small, stable set of error kinds.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MuxError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("Client is detached")]
    Revoked,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("lifecycle error: {0}")]
    Lifecycle(String),
}

impl MuxError {
    /// The stable string sent in `{ok:false, error}` response frames.
    pub fn wire_message(&self) -> String {
        match self {
            MuxError::Revoked => "Client is detached".to_string(),
            other => other.to_string(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        MuxError::NotFound(what.into())
    }

    pub fn protocol(what: impl Into<String>) -> Self {
        MuxError::Protocol(what.into())
    }

    pub fn parse(what: impl Into<String>) -> Self {
        MuxError::Parse(what.into())
    }

    pub fn transport(what: impl Into<String>) -> Self {
        MuxError::Transport(what.into())
    }
}

/// Converts an arbitrary internal failure (`anyhow::Error`) into the wire
/// taxonomy at the single point where a handler result becomes a frame.
pub fn classify(err: &anyhow::Error) -> MuxError {
    if let Some(mux_err) = err.downcast_ref::<MuxError>() {
        return mux_err.clone();
    }
    MuxError::Protocol(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revoked_wire_message_matches_spec_string() {
        assert_eq!(MuxError::Revoked.wire_message(), "Client is detached");
    }

    #[test]
    fn classify_passes_through_mux_error() {
        let err: anyhow::Error = MuxError::not_found("pty-1").into();
        assert_eq!(classify(&err), MuxError::NotFound("pty-1".to_string()));
    }

    #[test]
    fn classify_wraps_unknown_error_as_protocol() {
        let err = anyhow::anyhow!("boom");
        assert!(matches!(classify(&err), MuxError::Protocol(_)));
    }
}
