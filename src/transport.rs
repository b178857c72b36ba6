//! The transport seam.
//!
//! Transport selection (local process, SSH subprocess, smart HTTP) lives
//! outside this crate; the engine only needs one stateless round trip per
//! service call. A request body is posted in full and a readable response
//! body comes back. Responses are consumed strictly forward; the engine never
//! seeks.

use std::io::{self, Read};

use crate::interrupt::CancellationFlag;

/// A response body: a byte stream that must be released exactly once.
///
/// `close` may be called more than once; implementations treat repeated calls
/// as a no-op. Dropping a body releases it as if closed.
pub trait ReadClose: Read {
    /// Release the underlying connection or process.
    fn close(&mut self) -> io::Result<()>;
}

/// A stateless Git smart-protocol transport bound to one remote repository.
///
/// The engine checks the cancellation flag before invoking either operation;
/// implementations are expected to honor it during blocking reads of the
/// returned body.
pub trait Transport {
    /// One `upload-pack` round trip: post `request`, return the response body.
    ///
    /// `extra_params` is passed verbatim; a transport delivers it as the
    /// `Git-Protocol` header over HTTP or the `GIT_PROTOCOL` environment
    /// variable for SSH and local processes. An empty request body yields the
    /// ref advertisement.
    fn upload_pack(
        &self,
        cancel: &CancellationFlag,
        extra_params: &str,
        request: &mut dyn Read,
    ) -> io::Result<Box<dyn ReadClose>>;

    /// One `receive-pack` round trip, used by the push engine. An empty
    /// request body yields the ref advertisement.
    fn receive_pack(
        &self,
        cancel: &CancellationFlag,
        request: &mut dyn Read,
    ) -> io::Result<Box<dyn ReadClose>>;
}

pub(crate) type Body = Box<dyn ReadClose>;
