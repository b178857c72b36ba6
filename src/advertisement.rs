//! Parser for the version 1 ref advertisement.
//!
//! The advertisement is the first thing a server sends on either service: an
//! optional `version 1` packet, a first ref line carrying the capability list
//! after a NUL byte, further plain ref lines, and a terminating flush. An
//! empty repository advertises the literal ref name `capabilities^{}` with
//! the all-zero id instead.
//!
//! Only the first ref is read when the advertisement is opened; the remainder
//! is drained on the first ref listing or discarded on close.

use bstr::{BStr, BString, ByteSlice};

use crate::capabilities::CapabilitySet;
use crate::object::ObjectId;
use crate::pktline::{self, PacketLineRef};
use crate::refs::{Ref, RefName};
use crate::transport::Body;
use crate::{Error, Result};

pub(crate) type RefsReader = pktline::Reader<Body>;

/// A ref advertisement in the process of being read.
///
/// The two states of the underlying stream are `advertising` (the response
/// body is live, refs after the first are still unread) and `drained` (the
/// body has been released).
pub(crate) struct Advertisement {
    pub(crate) caps: CapabilitySet,
    refs: Vec<Ref>,
    reader: Option<RefsReader>,
}

impl std::fmt::Debug for Advertisement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Advertisement")
            .field("caps", &self.caps)
            .field("refs", &self.refs)
            .field("reader", &self.reader.is_some())
            .finish()
    }
}

impl Advertisement {
    /// Read the advertisement up to and including the first ref, taking
    /// ownership of the response body. The body is released on every error
    /// path, and eagerly when the server advertises no refs.
    pub(crate) fn read_first(body: Body) -> Result<Self> {
        let mut reader = pktline::Reader::new(body);
        match read_first_ref(&mut reader) {
            Ok((Some(first), caps)) => Ok(Advertisement {
                caps,
                refs: vec![first],
                reader: Some(reader),
            }),
            Ok((None, caps)) => {
                // No refs: nothing further to read, release the body now.
                close_reader(reader)?;
                Ok(Advertisement {
                    caps,
                    refs: Vec::new(),
                    reader: None,
                })
            }
            Err(err) => {
                let mut body = reader.into_inner();
                Err(match body.close() {
                    Ok(()) => err,
                    Err(close) => err.with_close_failure(close),
                })
            }
        }
    }

    /// Whether listing refs would still perform I/O.
    pub(crate) fn needs_drain(&self) -> bool {
        self.reader.is_some()
    }

    /// Return advertised refs, reading the remainder of the advertisement if
    /// it has not been read yet.
    ///
    /// Refs are filtered to names starting with any of `prefixes`; an empty
    /// slice selects all refs. Server order is preserved.
    pub(crate) fn list_refs(&mut self, prefixes: &[&str]) -> Result<Vec<Ref>> {
        if let Some(mut reader) = self.reader.take() {
            let result = read_other_refs(&mut self.refs, &self.caps, &mut reader);
            let close_result = reader.into_inner().close();
            match (result, close_result) {
                (Ok(()), Ok(())) => {}
                (Ok(()), Err(source)) => return Err(Error::Transport { source }),
                (Err(err), Ok(())) => return Err(err),
                (Err(err), Err(close)) => return Err(err.with_close_failure(close)),
            }
        }
        if prefixes.is_empty() {
            return Ok(self.refs.clone());
        }
        Ok(self
            .refs
            .iter()
            .filter(|r| {
                prefixes
                    .iter()
                    .any(|prefix| r.name.as_bstr().starts_with_str(prefix))
            })
            .cloned()
            .collect())
    }

    /// Release the response body, discarding any unread refs.
    pub(crate) fn close(&mut self) -> Result<()> {
        match self.reader.take() {
            Some(reader) => close_reader(reader),
            None => Ok(()),
        }
    }
}

impl Drop for Advertisement {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            let mut body = reader.into_inner();
            let _ = body.close();
        }
    }
}

fn close_reader(reader: RefsReader) -> Result<()> {
    reader
        .into_inner()
        .close()
        .map_err(|source| Error::Transport { source })
}

/// Read one data frame as text, in a context where nothing else is valid.
fn read_text_frame<'a>(reader: &'a mut RefsReader, context: &'static str) -> Result<&'a [u8]> {
    match reader
        .read_line()
        .map_err(|source| Error::Framing { context, source })?
    {
        Some(line @ PacketLineRef::Data(_)) => Ok(line.as_text().unwrap_or_default()),
        Some(_) => Err(Error::Malformed(format!(
            "{context}: unexpected non-data packet"
        ))),
        None => Err(Error::Malformed(format!(
            "{context}: unexpected end of stream"
        ))),
    }
}

/// Read the first ref of the advertisement, skipping the optional `version 1`
/// packet. Returns `None` for the no-refs form, after insisting on the flush
/// that must follow it.
fn read_first_ref(reader: &mut RefsReader) -> Result<(Option<Ref>, CapabilitySet)> {
    let mut line: BString = read_text_frame(reader, "read refs: first ref")?.into();
    if line == "version 1" {
        line = read_text_frame(reader, "read refs: first ref")?.into();
    }
    let (first, caps) = parse_first_ref(line.as_bstr())?;
    if first.is_none() {
        match reader.read_line().map_err(|source| Error::Framing {
            context: "read refs",
            source,
        })? {
            Some(PacketLineRef::Flush) => {}
            _ => {
                return Err(Error::Malformed(
                    "read refs: expected flush after no-refs".into(),
                ))
            }
        }
    }
    Ok((first, caps))
}

/// Parse the capabilities-bearing first ref line,
/// `<hex-id> SP <ref-name> NUL <cap-tokens>`.
fn parse_first_ref(line: &BStr) -> Result<(Option<Ref>, CapabilitySet)> {
    let ref_end = line
        .find_byte(0)
        .ok_or_else(|| Error::Malformed("read refs: first ref: missing nul".into()))?;
    let id_end = line[..ref_end]
        .find_byte(b' ')
        .ok_or_else(|| Error::Malformed("read refs: first ref: missing space".into()))?;
    let id = ObjectId::from_hex(&line[..id_end]).map_err(|source| Error::BadObjectId {
        context: "read refs: first ref".into(),
        hex: source.hex,
    })?;
    let name = line[id_end + 1..ref_end].as_bstr();
    let caps = CapabilitySet::from_bytes(&line[ref_end + 1..]).map_err(|source| Error::BadCap {
        context: "read refs: first ref",
        source,
    })?;

    if name == "capabilities^{}" {
        if !id.is_null() {
            return Err(Error::Malformed(
                "read refs: first ref: non-zero id in no-refs response".into(),
            ));
        }
        return Ok((None, caps));
    }
    let name = RefName::new(name).map_err(|source| Error::BadRefName {
        context: "read refs: first ref".into(),
        name: source.name,
    })?;
    let symref_target = lookup_symref(&caps, &name)?;
    Ok((
        Some(Ref {
            name,
            id,
            symref_target,
        }),
        caps,
    ))
}

/// Read the second and subsequent refs until the terminating flush.
fn read_other_refs(
    refs: &mut Vec<Ref>,
    caps: &CapabilitySet,
    reader: &mut RefsReader,
) -> Result<()> {
    loop {
        let line: BString = match reader.read_line().map_err(|source| Error::Framing {
            context: "read refs",
            source,
        })? {
            None | Some(PacketLineRef::Flush) => return Ok(()),
            Some(line @ PacketLineRef::Data(_)) => line.as_text().unwrap_or_default().into(),
            Some(_) => {
                return Err(Error::Malformed(
                    "read refs: unexpected non-data packet".into(),
                ))
            }
        };
        refs.push(parse_other_ref(line.as_bstr(), caps)?);
    }
}

/// Parse a plain ref line, `<hex-id> SP <ref-name>`.
fn parse_other_ref(line: &BStr, caps: &CapabilitySet) -> Result<Ref> {
    let id_end = line
        .find_byte(b' ')
        .ok_or_else(|| Error::Malformed("read refs: ref: missing space".into()))?;
    let name = line[id_end + 1..].as_bstr();
    let name = RefName::new(name).map_err(|source| Error::BadRefName {
        context: "read refs: ref".into(),
        name: source.name,
    })?;
    let id = ObjectId::from_hex(&line[..id_end]).map_err(|source| Error::BadObjectId {
        context: format!("read refs: ref {name}"),
        hex: source.hex,
    })?;
    let symref_target = lookup_symref(caps, &name)?;
    Ok(Ref {
        name,
        id,
        symref_target,
    })
}

fn lookup_symref(caps: &CapabilitySet, name: &RefName) -> Result<Option<RefName>> {
    match caps.symref_target(name.as_bstr()) {
        Some(target) => {
            let target = RefName::new(target).map_err(|source| Error::BadRefName {
                context: format!("read refs: symref target of {name}"),
                name: source.name,
            })?;
            Ok(Some(target))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pktline::encode;
    use std::io::{self, Read};

    struct BufBody(io::Cursor<Vec<u8>>);

    impl Read for BufBody {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl crate::transport::ReadClose for BufBody {
        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn body_of(frames: &[&[u8]], flush: bool) -> Body {
        let mut bytes = Vec::new();
        for frame in frames {
            encode::append_data(&mut bytes, frame).unwrap();
        }
        if flush {
            encode::append_flush(&mut bytes);
        }
        Box::new(BufBody(io::Cursor::new(bytes)))
    }

    const ID_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[test]
    fn reads_lazily_then_drains() {
        let first = format!("{ID_A} HEAD\0multi_ack symref=HEAD:refs/heads/main\n");
        let second = format!("{ID_A} refs/heads/main\n");
        let body = body_of(&[first.as_bytes(), second.as_bytes()], true);
        let mut ad = Advertisement::read_first(body).unwrap();
        assert!(ad.needs_drain());
        assert_eq!(ad.refs.len(), 1);

        let refs = ad.list_refs(&[]).unwrap();
        assert!(!ad.needs_drain());
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].name.as_bstr(), "HEAD");
        assert_eq!(
            refs[0].symref_target.as_ref().map(RefName::as_bstr),
            Some(bstr::BStr::new("refs/heads/main"))
        );
        assert_eq!(refs[1].name.as_bstr(), "refs/heads/main");
        assert_eq!(refs[1].symref_target, None);
    }

    #[test]
    fn version_line_is_skipped() {
        let first = format!("{ID_A} refs/heads/main\0multi_ack\n");
        let body = body_of(&[b"version 1\n", first.as_bytes()], true);
        let mut ad = Advertisement::read_first(body).unwrap();
        let refs = ad.list_refs(&[]).unwrap();
        assert_eq!(refs.len(), 1);
        assert!(ad.caps.supports(crate::capabilities::MULTI_ACK));
    }

    #[test]
    fn no_refs_form_requires_zero_id_and_flush() {
        let zero = "0".repeat(40);
        let line = format!("{zero} capabilities^{{}}\0multi_ack side-band-64k\n");
        let mut ad = Advertisement::read_first(body_of(&[line.as_bytes()], true)).unwrap();
        assert!(!ad.needs_drain());
        assert!(ad.list_refs(&[]).unwrap().is_empty());

        let bad = format!("{ID_A} capabilities^{{}}\0multi_ack\n");
        let err = Advertisement::read_first(body_of(&[bad.as_bytes()], true)).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));

        // Flush after the no-refs line is mandatory.
        let next = format!("{ID_A} refs/heads/main\n");
        let err =
            Advertisement::read_first(body_of(&[line.as_bytes(), next.as_bytes()], true))
                .unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn invalid_ref_name_fails() {
        let first = format!("{ID_A} refs/heads/ok\0\n");
        let second = format!("{ID_A} refs/heads/bad..name\n");
        let mut ad =
            Advertisement::read_first(body_of(&[first.as_bytes(), second.as_bytes()], true))
                .unwrap();
        assert!(matches!(
            ad.list_refs(&[]).unwrap_err(),
            Error::BadRefName { .. }
        ));
    }

    #[test]
    fn missing_nul_fails() {
        let first = format!("{ID_A} refs/heads/main\n");
        let err = Advertisement::read_first(body_of(&[first.as_bytes()], true)).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn prefix_filter_is_a_union() {
        let first = format!("{ID_A} HEAD\0\n");
        let heads = format!("{ID_A} refs/heads/main\n");
        let tags = format!("{ID_A} refs/tags/v1\n");
        let notes = format!("{ID_A} refs/notes/commits\n");
        let mut ad = Advertisement::read_first(body_of(
            &[
                first.as_bytes(),
                heads.as_bytes(),
                tags.as_bytes(),
                notes.as_bytes(),
            ],
            true,
        ))
        .unwrap();
        let filtered = ad.list_refs(&["refs/heads/", "refs/tags/"]).unwrap();
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].name.as_bstr(), "refs/heads/main");
        assert_eq!(filtered[1].name.as_bstr(), "refs/tags/v1");
        assert_eq!(ad.list_refs(&[]).unwrap().len(), 4);
    }
}
