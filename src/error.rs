//! Error types for SMTP sessions

use thiserror::Error;

/// Fatal, session-ending errors.
///
/// Protocol violations (bad syntax, out-of-sequence commands, oversized
/// messages) are not errors at this level - they are answered on the wire
/// with a 5xx reply and the session continues. Everything here tears the
/// connection down.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timeout exceeded waiting for input")]
    Timeout,

    #[error("line longer than {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("unexpected EOF during mail data")]
    UnexpectedEof,

    #[error("cannot send to client: '{reply}': {source}")]
    Reply {
        reply: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Hook(#[from] anyhow::Error),
}

impl SessionError {
    /// True when the peer went away (or never answered) rather than the
    /// session failing on this side. Hosts usually log these quietly.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            SessionError::Timeout | SessionError::UnexpectedEof | SessionError::Reply { .. }
        )
    }
}
