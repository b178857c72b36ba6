//! Side-band demultiplexing of the pack stream.
//!
//! Once negotiation concludes, the response body carries pkt-line frames
//! whose first payload byte names a channel: 1 is pack data, 2 is textual
//! progress, 3 is a fatal message from the remote. The same demuxer serves
//! `side-band` and `side-band-64k`; they differ only in frame size.

use std::fmt;
use std::io::{self, Read, Write};

use crate::pktline::{self, PacketLineRef};
use crate::transport::Body;
use crate::{Error, Result};

const CHANNEL_PACK: u8 = 1;
const CHANNEL_PROGRESS: u8 = 2;
const CHANNEL_ERROR: u8 = 3;

/// The packfile half of a fetch response: a reader yielding pack bytes with
/// side-band framing stripped, in strict server order.
///
/// Owns the response body; [`close`](Packfile::close) releases it. Progress
/// frames are forwarded to the sink taken from the request as they arrive,
/// interleaved with the pack bytes already emitted.
pub struct Packfile {
    reader: pktline::Reader<Body>,
    progress: Option<Box<dyn Write>>,
    /// Bytes of the current channel-1 frame already handed out.
    frame_pos: usize,
    /// Payload length of the current channel-1 frame, channel byte excluded.
    frame_len: usize,
    done: bool,
}

impl Packfile {
    pub(crate) fn new(reader: pktline::Reader<Body>, progress: Option<Box<dyn Write>>) -> Self {
        Packfile {
            reader,
            progress,
            frame_pos: 0,
            frame_len: 0,
            done: false,
        }
    }

    /// Release the response body. Consumes the reader, so a closed packfile
    /// cannot be read again.
    pub fn close(self) -> Result<()> {
        self.reader
            .into_inner()
            .close()
            .map_err(|source| Error::Transport { source })
    }
}

impl Read for Packfile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.frame_pos < self.frame_len {
                let payload = &self.reader.payload()[1 + self.frame_pos..1 + self.frame_len];
                let n = payload.len().min(buf.len());
                buf[..n].copy_from_slice(&payload[..n]);
                self.frame_pos += n;
                return Ok(n);
            }
            if self.done {
                return Ok(0);
            }
            match self.reader.read_line() {
                Err(source) => {
                    return Err(into_io(Error::Framing {
                        context: "read pack",
                        source,
                    }))
                }
                Ok(None) | Ok(Some(PacketLineRef::Flush)) => {
                    self.done = true;
                    return Ok(0);
                }
                Ok(Some(PacketLineRef::Data(data))) => {
                    let Some((&channel, message)) = data.split_first() else {
                        return Err(into_io(Error::Malformed(
                            "read pack: empty side-band packet".into(),
                        )));
                    };
                    match channel {
                        CHANNEL_PACK => {
                            self.frame_pos = 0;
                            self.frame_len = data.len() - 1;
                        }
                        CHANNEL_PROGRESS => {
                            if let Some(sink) = &mut self.progress {
                                sink.write_all(message)?;
                            }
                        }
                        CHANNEL_ERROR => {
                            return Err(into_io(Error::Remote {
                                message: message.into(),
                            }))
                        }
                        other => {
                            return Err(into_io(Error::Malformed(format!(
                                "read pack: invalid side-band channel {other}"
                            ))))
                        }
                    }
                }
                Ok(Some(_)) => {
                    return Err(into_io(Error::Malformed(
                        "read pack: unexpected non-data packet".into(),
                    )))
                }
            }
        }
    }
}

impl fmt::Debug for Packfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packfile")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

fn into_io(err: Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}
