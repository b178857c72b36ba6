//! The push half of the negotiation engine.
//!
//! A push over a stateless transport is one `receive-pack` round trip for the
//! ref advertisement and one more for the update: the command section
//! (pkt-lines, capability tokens after a NUL on the first line, terminated by
//! a flush) followed by the raw packfile bytes. The commands and the pack are
//! buffered and posted when the stream is closed, and the server's
//! report-status answer is parsed from the response.

use std::fmt;
use std::io::{self, Write};

use bstr::{BStr, BString, ByteSlice};

use crate::advertisement::Advertisement;
use crate::capabilities::{CapabilitySet, DELETE_REFS, OFS_DELTA, REPORT_STATUS};
use crate::interrupt::CancellationFlag;
use crate::object::ObjectId;
use crate::pktline::{self, encode, PacketLineRef};
use crate::refs::{Ref, RefName};
use crate::transport::{Body, Transport};
use crate::{Error, Result};

/// One requested ref update.
///
/// The all-zero id means "does not exist": a null `old` creates the ref, a
/// null `new` deletes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushCommand {
    /// The ref to update.
    pub name: RefName,
    /// The id the client believes the ref currently has.
    pub old: ObjectId,
    /// The id the ref should point at afterwards.
    pub new: ObjectId,
}

impl PushCommand {
    /// A command creating `name` at `new`.
    pub fn create(name: RefName, new: ObjectId) -> Self {
        PushCommand {
            name,
            old: ObjectId::null(),
            new,
        }
    }

    /// A command deleting `name`, currently at `old`.
    pub fn delete(name: RefName, old: ObjectId) -> Self {
        PushCommand {
            name,
            old,
            new: ObjectId::null(),
        }
    }
}

/// An open push stream over one remote.
///
/// Created by [`Remote::start_push`](crate::Remote::start_push). Write the
/// update commands once, stream the packfile bytes through [`Write`], then
/// [`close`](PushStream::close) to post the request and read the server's
/// report.
pub struct PushStream<'a> {
    transport: &'a dyn Transport,
    advertisement: Advertisement,
    request: Vec<u8>,
    wrote_commands: bool,
    report_status: bool,
    closed: bool,
}

impl<'a> PushStream<'a> {
    pub(crate) fn new(transport: &'a dyn Transport, advertisement: Advertisement) -> Self {
        PushStream {
            transport,
            advertisement,
            request: Vec::new(),
            wrote_commands: false,
            report_status: false,
            closed: false,
        }
    }

    /// The capability set the server advertised.
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.advertisement.caps
    }

    /// List advertised refs, exactly as on a fetch stream.
    pub fn list_refs(&mut self, cancel: &CancellationFlag, prefixes: &[&str]) -> Result<Vec<Ref>> {
        if self.closed {
            return Err(Error::Closed);
        }
        if self.advertisement.needs_drain() {
            cancel.check()?;
        }
        self.advertisement.list_refs(prefixes)
    }

    /// Queue the update commands. Must be called exactly once, before any
    /// packfile bytes are written.
    ///
    /// Fails before any I/O when a command is contradictory (both ids null)
    /// or requires a capability the server did not advertise.
    pub fn write_commands(&mut self, commands: &[PushCommand]) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        if self.wrote_commands {
            return Err(Error::Malformed("push: commands already written".into()));
        }
        if commands.is_empty() {
            return Err(Error::Malformed("push: no commands".into()));
        }
        for command in commands {
            if command.old.is_null() && command.new.is_null() {
                return Err(Error::Malformed(format!(
                    "push: command for {} has neither old nor new id",
                    command.name
                )));
            }
            if command.new.is_null() && !self.advertisement.caps.supports(DELETE_REFS) {
                return Err(Error::UnsupportedCapability {
                    capability: DELETE_REFS,
                });
            }
        }

        let mut use_caps = CapabilitySet::default();
        use_caps.add(REPORT_STATUS);
        use_caps.add(OFS_DELTA);
        use_caps.intersect(&self.advertisement.caps);
        self.report_status = use_caps.supports(REPORT_STATUS);

        let overflow = |source| Error::Overflow {
            context: "build push request",
            source,
        };
        for (i, command) in commands.iter().enumerate() {
            let line = if i == 0 {
                format!(
                    "{} {} {}\0{use_caps}\n",
                    command.old, command.new, command.name
                )
            } else {
                format!("{} {} {}\n", command.old, command.new, command.name)
            };
            encode::append_data(&mut self.request, line.as_bytes()).map_err(overflow)?;
        }
        encode::append_flush(&mut self.request);
        self.wrote_commands = true;
        Ok(())
    }

    /// Post the buffered commands and pack, then parse the server's report.
    /// Idempotent; closing without commands sends nothing.
    pub fn close(&mut self, cancel: &CancellationFlag) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.advertisement.close()?;
        if !self.wrote_commands {
            return Ok(());
        }

        cancel.check()?;
        let mut request = self.request.as_slice();
        let body = self
            .transport
            .receive_pack(cancel, &mut request)
            .map_err(|source| Error::Transport { source })?;

        let mut reader = pktline::Reader::new(body);
        let report = if self.report_status {
            parse_report(&mut reader)
        } else {
            Ok(())
        };
        let close_result = reader.into_inner().close();
        match (report, close_result) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(source)) => Err(Error::Transport { source }),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close)) => Err(err.with_close_failure(close)),
        }
    }
}

impl Write for PushStream<'_> {
    /// Append raw packfile bytes to the pending request.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, Error::Closed));
        }
        if !self.wrote_commands {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "push: commands must be written before pack data",
            ));
        }
        self.request.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for PushStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushStream")
            .field("wrote_commands", &self.wrote_commands)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Parse the report-status section: an `unpack` line, then one `ok`/`ng`
/// line per pushed ref, terminated by a flush or the end of the stream.
fn parse_report(reader: &mut pktline::Reader<Body>) -> Result<()> {
    let unpack: BString = match next_report_line(reader)? {
        Some(line) => line,
        None => {
            return Err(Error::Malformed(
                "parse report: missing unpack status".into(),
            ))
        }
    };
    match unpack.strip_prefix(b"unpack ") {
        Some(b"ok") => {}
        Some(reason) => {
            return Err(Error::Remote {
                message: format!("unpack failed: {}", reason.as_bstr()).into(),
            })
        }
        None => {
            return Err(Error::Malformed(format!(
                "parse report: unexpected line {:?}",
                unpack
            )))
        }
    }
    while let Some(line) = next_report_line(reader)? {
        if line.strip_prefix(b"ok ").is_some() {
            continue;
        }
        if let Some(rest) = line.strip_prefix(b"ng ") {
            let (name, reason) = match rest.find_byte(b' ') {
                Some(at) => (&rest[..at], rest[at + 1..].as_bstr()),
                None => (rest, BStr::new("rejected")),
            };
            return Err(Error::PushRejected {
                name: name.into(),
                reason: reason.into(),
            });
        }
        return Err(Error::Malformed(format!(
            "parse report: unexpected line {:?}",
            line
        )));
    }
    Ok(())
}

fn next_report_line(reader: &mut pktline::Reader<Body>) -> Result<Option<BString>> {
    match reader.read_line().map_err(|source| Error::Framing {
        context: "parse report",
        source,
    })? {
        Some(line @ PacketLineRef::Data(_)) => {
            Ok(Some(line.as_text().unwrap_or_default().into()))
        }
        Some(PacketLineRef::Flush) | None => Ok(None),
        Some(_) => Err(Error::Malformed(
            "parse report: unexpected non-data packet".into(),
        )),
    }
}
