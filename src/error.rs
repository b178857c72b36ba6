//! The error type shared by every protocol component.

use bstr::BString;

use crate::{capabilities, pktline};

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable high-level classification of [`Error`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// A failure from the transport call.
    Transport,
    /// Malformed pkt-line traffic.
    Framing,
    /// Structurally invalid data beyond the framing layer.
    Malformed,
    /// An invalid ref name or object id.
    BadRef,
    /// A malformed or unsupported capability.
    BadCap,
    /// The server offered neither side-band variant.
    NoSideBand,
    /// An unknown acknowledgement directive or status.
    BadAck,
    /// A fatal condition reported by the remote.
    Remote,
    /// A commit emission precondition was violated.
    InvalidUser,
    /// A GPG signature emission precondition was violated.
    UnterminatedSignature,
    /// An operation on a closed stream.
    Closed,
    /// A cancellation flag fired.
    Cancelled,
    /// Anything else.
    Other,
}

/// The error type for every operation provided by this crate.
///
/// Nothing is retried internally; all errors surface to the caller, and
/// resources are released on every failure path.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Any failure from the transport call.
    #[error("transport: {source}")]
    Transport {
        /// The transport's own error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed pkt-line traffic.
    #[error("{context}: {source}")]
    Framing {
        /// What was being read.
        context: &'static str,
        /// The framing failure.
        #[source]
        source: pktline::decode::Error,
    },

    /// A payload too large for a single pkt-line frame.
    #[error("{context}: {source}")]
    Overflow {
        /// What was being written.
        context: &'static str,
        /// The encoding failure.
        #[source]
        source: pktline::encode::Error,
    },

    /// Data that violates structural rules beyond the framing layer.
    #[error("{0}")]
    Malformed(String),

    /// An invalid ref name on the wire.
    #[error("{context}: invalid ref name {name:?}")]
    BadRefName {
        /// Where the name appeared.
        context: String,
        /// The rejected name.
        name: BString,
    },

    /// An invalid object id on the wire.
    #[error("{context}: invalid object id {hex:?}")]
    BadObjectId {
        /// Where the id appeared.
        context: String,
        /// The rejected text.
        hex: BString,
    },

    /// A malformed capability token.
    #[error("{context}: {source}")]
    BadCap {
        /// Where the token appeared.
        context: &'static str,
        /// The token failure.
        #[source]
        source: capabilities::Error,
    },

    /// The server does not support a capability this operation requires.
    #[error("remote does not support {capability}")]
    UnsupportedCapability {
        /// The missing capability name.
        capability: &'static str,
    },

    /// The server offered neither `side-band` nor `side-band-64k`.
    #[error("remote does not support side-band")]
    NoSideBand,

    /// An unknown acknowledgement directive or status.
    #[error("parse response: acknowledgements: {message}")]
    BadAck {
        /// What was unrecognized.
        message: String,
    },

    /// A fatal condition reported by the remote on side-band channel 3 or in
    /// a push report.
    #[error("remote error: {message}")]
    Remote {
        /// The remote's message.
        message: BString,
    },

    /// The remote rejected one pushed ref update.
    #[error("push rejected for {name:?}: {reason}")]
    PushRejected {
        /// The ref that was rejected.
        name: BString,
        /// The server's reason.
        reason: BString,
    },

    /// A commit whose author or committer contains a newline.
    #[error("emit commit: {field} {value:?} contains newline")]
    InvalidUser {
        /// Which of the two user fields.
        field: &'static str,
        /// The offending value.
        value: BString,
    },

    /// A GPG signature whose final line is not LF-terminated.
    #[error("emit commit: gpg signature has an unterminated line")]
    UnterminatedSignature,

    /// A commit object that does not follow the header grammar.
    #[error("parse commit: {message}")]
    MalformedCommit {
        /// Which rule was violated.
        message: String,
    },

    /// A failure that was followed by a second failure while releasing the
    /// response body.
    #[error("{primary} (releasing the response body also failed: {close})")]
    CloseAfterError {
        /// The failure that triggered the release.
        primary: Box<Error>,
        /// The release failure.
        close: std::io::Error,
    },

    /// An operation on a closed stream.
    #[error("stream is closed")]
    Closed,

    /// The cancellation flag fired before an I/O operation.
    #[error("operation cancelled")]
    Cancelled,

    /// A fetch request without any wanted id.
    #[error("fetch request contains no wanted ids")]
    EmptyWant,
}

impl Error {
    /// Attach a failure to release a response body to this earlier error, so
    /// neither is lost.
    pub(crate) fn with_close_failure(self, close: std::io::Error) -> Self {
        Error::CloseAfterError {
            primary: Box::new(self),
            close,
        }
    }

    /// Fast classification returning a stable error kind.
    pub fn kind(&self) -> Kind {
        match self {
            Error::Transport { .. } => Kind::Transport,
            Error::Framing { .. } | Error::Overflow { .. } => Kind::Framing,
            Error::Malformed(_) | Error::MalformedCommit { .. } => Kind::Malformed,
            Error::BadRefName { .. } | Error::BadObjectId { .. } => Kind::BadRef,
            Error::BadCap { .. } | Error::UnsupportedCapability { .. } => Kind::BadCap,
            Error::NoSideBand => Kind::NoSideBand,
            Error::BadAck { .. } => Kind::BadAck,
            Error::Remote { .. } | Error::PushRejected { .. } => Kind::Remote,
            Error::InvalidUser { .. } => Kind::InvalidUser,
            Error::UnterminatedSignature => Kind::UnterminatedSignature,
            Error::CloseAfterError { primary, .. } => primary.kind(),
            Error::Closed => Kind::Closed,
            Error::Cancelled => Kind::Cancelled,
            Error::EmptyWant => Kind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_prefix_is_bounded_and_stable() {
        let err = Error::BadAck {
            message: "unknown status \" resume\"".into(),
        };
        assert_eq!(
            err.to_string(),
            "parse response: acknowledgements: unknown status \" resume\""
        );
        assert_eq!(err.kind(), Kind::BadAck);
    }

    #[test]
    fn compound_close_failure_keeps_the_primary_kind() {
        let close = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "connection reset");
        let err = Error::NoSideBand.with_close_failure(close);
        assert_eq!(err.kind(), Kind::NoSideBand);
        assert_eq!(
            err.to_string(),
            "remote does not support side-band (releasing the response body also failed: connection reset)"
        );
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(Error::NoSideBand.kind(), Kind::NoSideBand);
        assert_eq!(Error::Closed.kind(), Kind::Closed);
        assert_eq!(Error::Cancelled.kind(), Kind::Cancelled);
        assert_eq!(
            Error::Malformed("read refs: expected flush after no-refs".into()).kind(),
            Kind::Malformed
        );
    }
}
