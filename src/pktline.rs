//! pkt-line framing, the length-prefixed packet format all of Git's
//! smart-protocol traffic is built on.
//!
//! A packet is either a data frame whose first four ASCII hex digits give the
//! total length including the prefix itself, or one of three four-byte
//! sentinels: `0000` (flush), `0001` (delimiter) and `0002` (response end).

use std::io::Read;

/// The number of payload bytes a single data frame can carry at most.
pub const MAX_DATA_LEN: usize = 65516;

const PREFIX_LEN: usize = 4;

/// A single pkt-line frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketLineRef<'a> {
    /// A data frame. The payload excludes the 4-byte length prefix.
    Data(&'a [u8]),
    /// A `0000` packet, ending a section of the stream.
    Flush,
    /// A `0001` packet, separating sections within a response.
    Delimiter,
    /// A `0002` packet, ending the entire response.
    ResponseEnd,
}

impl<'a> PacketLineRef<'a> {
    /// The payload of a data frame, or `None` for sentinels.
    pub fn as_slice(&self) -> Option<&'a [u8]> {
        match *self {
            PacketLineRef::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Like [`as_slice`](Self::as_slice), with one optional trailing newline
    /// removed. Protocol text lines are conventionally LF-terminated.
    pub fn as_text(&self) -> Option<&'a [u8]> {
        self.as_slice()
            .map(|data| data.strip_suffix(b"\n").unwrap_or(data))
    }
}

/// Writing frames into a growable buffer.
pub mod encode {
    use super::{MAX_DATA_LEN, PREFIX_LEN};

    /// The error returned when a frame cannot be encoded.
    #[derive(Debug, thiserror::Error)]
    pub enum Error {
        /// The payload does not fit into a single data frame.
        #[error("payload of {length} bytes exceeds the 65516-byte frame limit")]
        DataLengthLimitExceeded {
            /// Length of the rejected payload.
            length: usize,
        },
    }

    /// Append `data` as one length-prefixed frame.
    pub fn append_data(out: &mut Vec<u8>, data: &[u8]) -> Result<(), Error> {
        if data.len() > MAX_DATA_LEN {
            return Err(Error::DataLengthLimitExceeded { length: data.len() });
        }
        let prefix = format!("{:04x}", data.len() + PREFIX_LEN);
        out.extend_from_slice(prefix.as_bytes());
        out.extend_from_slice(data);
        Ok(())
    }

    /// Append a flush packet.
    pub fn append_flush(out: &mut Vec<u8>) {
        out.extend_from_slice(b"0000");
    }

    /// Append a delimiter packet.
    pub fn append_delim(out: &mut Vec<u8>) {
        out.extend_from_slice(b"0001");
    }

    /// Append a response-end packet.
    pub fn append_response_end(out: &mut Vec<u8>) {
        out.extend_from_slice(b"0002");
    }
}

/// Errors raised while decoding frames from a byte stream.
pub mod decode {
    /// The error returned when the stream does not frame correctly.
    #[derive(Debug, thiserror::Error)]
    pub enum Error {
        /// Reading from the underlying stream failed.
        #[error(transparent)]
        Io(#[from] std::io::Error),
        /// The stream ended inside a length prefix.
        #[error("stream ended inside a packet length prefix")]
        ShortRead,
        /// The length prefix is not hexadecimal or names an impossible length.
        #[error("invalid packet length prefix {:?}", String::from_utf8_lossy(.prefix))]
        BadLength {
            /// The offending prefix bytes.
            prefix: [u8; 4],
        },
        /// The stream ended inside a packet's payload.
        #[error("packet payload of {expected} bytes was cut short")]
        Truncated {
            /// The payload length announced by the prefix.
            expected: usize,
        },
    }
}

/// Reads pkt-line frames off any byte stream.
///
/// There is no hidden state beyond the stream position; the payload slice
/// returned by [`read_line`](Reader::read_line) stays valid until the next
/// call.
pub struct Reader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: Read> Reader<R> {
    /// Create a reader positioned at the start of a frame.
    pub fn new(inner: R) -> Self {
        Reader {
            inner,
            buf: Vec::new(),
        }
    }

    /// Give back the underlying stream.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Advance to the next frame. Returns `None` at a clean end of stream.
    pub fn read_line(&mut self) -> Result<Option<PacketLineRef<'_>>, decode::Error> {
        let mut prefix = [0u8; PREFIX_LEN];
        let n = read_until_full(&mut self.inner, &mut prefix)?;
        if n == 0 {
            return Ok(None);
        }
        if n < PREFIX_LEN {
            return Err(decode::Error::ShortRead);
        }
        let length = parse_prefix(&prefix)?;
        match length {
            0 => Ok(Some(PacketLineRef::Flush)),
            1 => Ok(Some(PacketLineRef::Delimiter)),
            2 => Ok(Some(PacketLineRef::ResponseEnd)),
            3 => Err(decode::Error::BadLength { prefix }),
            _ => {
                let payload = length - PREFIX_LEN;
                self.buf.resize(payload, 0);
                let n = read_until_full(&mut self.inner, &mut self.buf)?;
                if n < payload {
                    return Err(decode::Error::Truncated { expected: payload });
                }
                Ok(Some(PacketLineRef::Data(&self.buf)))
            }
        }
    }

    /// The payload of the most recently read data frame.
    pub(crate) fn payload(&self) -> &[u8] {
        &self.buf
    }
}

fn parse_prefix(prefix: &[u8; 4]) -> Result<usize, decode::Error> {
    let mut length = 0usize;
    for &b in prefix {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => return Err(decode::Error::BadLength { prefix: *prefix }),
        };
        length = length * 16 + usize::from(digit);
    }
    Ok(length)
}

/// Fill `buf` as far as the stream allows, returning the number of bytes read.
fn read_until_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
