//! The want/have negotiation engine for fetching.
//!
//! A fetch is one stateless round trip: the client posts a command buffer
//! naming the objects it wants and the objects it already has, and parses the
//! server's acknowledgements. When negotiation has converged (or the client
//! declared it is done), the same response body continues with the
//! side-band-multiplexed packfile.

use std::collections::HashSet;
use std::fmt;
use std::io::Write;

use bstr::ByteSlice;

use crate::advertisement::Advertisement;
use crate::capabilities::{
    CapabilitySet, MULTI_ACK, NO_PROGRESS, OFS_DELTA, SIDE_BAND, SIDE_BAND_64K,
};
use crate::interrupt::CancellationFlag;
use crate::object::ObjectId;
use crate::pktline::{self, encode, PacketLineRef};
use crate::refs::Ref;
use crate::sideband::Packfile;
use crate::transport::{Body, Transport};
use crate::{Error, Result};

/// The extra parameter pinning the wire dialect, delivered out of band by the
/// transport.
pub(crate) const V1_EXTRA_PARAMS: &str = "version=1";

/// One round of want/have negotiation.
pub struct FetchRequest {
    /// The object ids the client needs. Must not be empty.
    pub want: Vec<ObjectId>,
    /// The object ids the client already has.
    pub have: Vec<ObjectId>,
    /// Whether the client could send further `have`s in another round. When
    /// `false`, `done` is sent and the server must produce a pack.
    pub have_more: bool,
    /// Where side-band progress messages are forwarded. When absent,
    /// `no-progress` is requested and any progress that still arrives is
    /// discarded.
    pub progress: Option<Box<dyn Write>>,
}

impl FetchRequest {
    /// A single-round request for `want`, with no common objects declared.
    pub fn wants(want: Vec<ObjectId>) -> Self {
        FetchRequest {
            want,
            have: Vec::new(),
            have_more: false,
            progress: None,
        }
    }
}

impl fmt::Debug for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchRequest")
            .field("want", &self.want)
            .field("have", &self.have)
            .field("have_more", &self.have_more)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// The server's answer to one negotiation round.
#[derive(Debug)]
pub struct FetchResponse {
    /// Object ids the server acknowledged as common.
    pub acks: HashSet<ObjectId>,
    /// The packfile stream, present when negotiation has concluded. The
    /// caller must close it; it owns the response body.
    pub packfile: Option<Packfile>,
}

impl FetchResponse {
    /// Release the packfile stream, if any. Responses without one own no
    /// resources.
    pub fn close(mut self) -> Result<()> {
        match self.packfile.take() {
            Some(packfile) => packfile.close(),
            None => Ok(()),
        }
    }
}

/// An open fetch stream over one remote.
///
/// Created by [`Remote::start_fetch`](crate::Remote::start_fetch), which
/// performs the advertisement round trip.
pub struct FetchStream<'a> {
    transport: &'a dyn Transport,
    advertisement: Advertisement,
    closed: bool,
}

impl<'a> FetchStream<'a> {
    pub(crate) fn new(transport: &'a dyn Transport, advertisement: Advertisement) -> Self {
        FetchStream {
            transport,
            advertisement,
            closed: false,
        }
    }

    /// The capability set the server advertised.
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.advertisement.caps
    }

    /// List advertised refs whose names start with any of `prefixes`; an
    /// empty slice lists everything. Server order is preserved.
    ///
    /// The first call reads the remainder of the advertisement and releases
    /// its body.
    pub fn list_refs(&mut self, cancel: &CancellationFlag, prefixes: &[&str]) -> Result<Vec<Ref>> {
        if self.closed {
            return Err(Error::Closed);
        }
        if self.advertisement.needs_drain() {
            cancel.check()?;
        }
        self.advertisement.list_refs(prefixes)
    }

    /// Run one negotiation round.
    ///
    /// Issues a single `upload-pack` round trip. The returned response
    /// carries a packfile exactly when the server found a common base or the
    /// request was final (`have_more == false`).
    pub fn negotiate(
        &mut self,
        cancel: &CancellationFlag,
        mut request: FetchRequest,
    ) -> Result<FetchResponse> {
        if self.closed {
            return Err(Error::Closed);
        }
        if request.want.is_empty() {
            return Err(Error::EmptyWant);
        }

        let use_caps = self.select_capabilities(&request)?;
        let command = build_command(&request, &use_caps)?;

        cancel.check()?;
        let body = self
            .transport
            .upload_pack(cancel, V1_EXTRA_PARAMS, &mut command.as_slice())
            .map_err(|source| Error::Transport { source })?;

        parse_response(body, &mut request)
    }

    /// Close the stream, discarding any unread advertisement. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.advertisement.close()
    }

    /// Pick the capabilities for this round: `multi_ack` and `ofs-delta` when
    /// the server has them, `no-progress` when nobody listens for progress,
    /// and exactly one side-band variant, preferring `side-band-64k`.
    fn select_capabilities(&self, request: &FetchRequest) -> Result<CapabilitySet> {
        let server = &self.advertisement.caps;
        let mut use_caps = CapabilitySet::default();
        use_caps.add(MULTI_ACK);
        use_caps.add(OFS_DELTA);
        if request.progress.is_none() {
            use_caps.add(NO_PROGRESS);
        }
        use_caps.intersect(server);
        if server.supports(SIDE_BAND_64K) {
            use_caps.add(SIDE_BAND_64K);
        } else if server.supports(SIDE_BAND) {
            use_caps.add(SIDE_BAND);
        } else {
            return Err(Error::NoSideBand);
        }
        Ok(use_caps)
    }
}

impl fmt::Debug for FetchStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchStream")
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Assemble the command buffer: the capability-bearing first `want`, further
/// `want`s, a flush, the `have`s, and `done` or a flush depending on whether
/// the client may negotiate further.
fn build_command(request: &FetchRequest, use_caps: &CapabilitySet) -> Result<Vec<u8>> {
    let overflow = |source| Error::Overflow {
        context: "build request",
        source,
    };
    let mut command = Vec::new();
    let first = format!("want {} {use_caps}\n", request.want[0]);
    encode::append_data(&mut command, first.as_bytes()).map_err(overflow)?;
    for want in &request.want[1..] {
        encode::append_data(&mut command, format!("want {want}\n").as_bytes()).map_err(overflow)?;
    }
    encode::append_flush(&mut command);
    for have in &request.have {
        encode::append_data(&mut command, format!("have {have}\n").as_bytes()).map_err(overflow)?;
    }
    if !request.have_more {
        encode::append_data(&mut command, b"done").map_err(overflow)?;
    } else {
        encode::append_flush(&mut command);
    }
    Ok(command)
}

/// Parse acknowledgements and decide whether the body carries a pack.
fn parse_response(body: Body, request: &mut FetchRequest) -> Result<FetchResponse> {
    let mut reader = pktline::Reader::new(body);
    match parse_acks(&mut reader) {
        Err(err) => {
            let mut body = reader.into_inner();
            Err(match body.close() {
                Ok(()) => err,
                Err(close) => err.with_close_failure(close),
            })
        }
        Ok((acks, found_common_base)) => {
            if found_common_base || !request.have_more {
                Ok(FetchResponse {
                    acks,
                    packfile: Some(Packfile::new(reader, request.progress.take())),
                })
            } else {
                reader
                    .into_inner()
                    .close()
                    .map_err(|source| Error::Transport { source })?;
                Ok(FetchResponse {
                    acks,
                    packfile: None,
                })
            }
        }
    }
}

/// Read `ACK`/`NAK` lines. Returns the acknowledged ids and whether a
/// terminal (statusless) `ACK` concluded the negotiation.
fn parse_acks(reader: &mut pktline::Reader<Body>) -> Result<(HashSet<ObjectId>, bool)> {
    let mut acks = HashSet::new();
    let mut found_common_base = false;
    loop {
        let line = match reader.read_line().map_err(|source| Error::Framing {
            context: "parse response",
            source,
        })? {
            Some(line @ PacketLineRef::Data(_)) => line.as_text().unwrap_or_default(),
            // The ack section ends with the stream or at the first sentinel.
            Some(_) | None => break,
        };
        if let Some(rest) = line.strip_prefix(b"ACK ") {
            if rest.len() < 40 {
                return Err(Error::BadAck {
                    message: "ack too short".into(),
                });
            }
            let id = ObjectId::from_hex(&rest[..40]).map_err(|source| Error::BadObjectId {
                context: "parse response: acknowledgements".into(),
                hex: source.hex,
            })?;
            acks.insert(id);
            let status = &rest[40..];
            if status.is_empty() {
                found_common_base = true;
                break;
            }
            if status != b" continue" {
                return Err(Error::BadAck {
                    message: format!("unknown status {:?}", status.as_bstr()),
                });
            }
        } else if line == b"NAK" {
            break;
        } else {
            return Err(Error::BadAck {
                message: format!("unrecognized directive {:?}", line.as_bstr()),
            });
        }
    }
    Ok((acks, found_common_base))
}
