//! Capability advertisement parsing and the client-side selection set.
//!
//! Capabilities travel as space-separated `key` or `key=value` tokens after
//! the NUL byte of the first advertised ref. `symref` is special: it may
//! appear any number of times and each occurrence contributes one entry to a
//! separate symbolic-ref map.

use std::collections::BTreeMap;
use std::fmt;

use bstr::{BStr, BString, ByteSlice};

/// Ack lines may carry a `continue` status during negotiation.
pub const MULTI_ACK: &str = "multi_ack";
/// The server may use offset deltas in the pack it sends.
pub const OFS_DELTA: &str = "ofs-delta";
/// The server should not emit side-band progress messages.
pub const NO_PROGRESS: &str = "no-progress";
/// The pack stream is multiplexed with 1000-byte frames.
pub const SIDE_BAND: &str = "side-band";
/// The pack stream is multiplexed with 64k frames; preferred when offered.
pub const SIDE_BAND_64K: &str = "side-band-64k";
/// Advertisement payload for symbolic refs, `symref=<from>:<to>`.
pub const SYMREF: &str = "symref";
/// The server reports per-ref status after a push.
pub const REPORT_STATUS: &str = "report-status";
/// The server accepts ref deletions.
pub const DELETE_REFS: &str = "delete-refs";

/// The error returned for a token that does not follow the capability grammar.
#[derive(Debug, thiserror::Error)]
#[error("malformed capability token {token:?}")]
pub struct Error {
    /// The rejected token.
    pub token: BString,
}

/// A set of protocol capabilities, mapping names to optional values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    caps: BTreeMap<BString, BString>,
    symrefs: BTreeMap<BString, BString>,
}

impl CapabilitySet {
    /// Parse a whitespace-separated token list as sent by the server.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        let mut set = CapabilitySet::default();
        for token in data.fields() {
            set.insert(token)?;
        }
        Ok(set)
    }

    /// Add a single `key` or `key=value` token.
    ///
    /// Repeated `symref` tokens accumulate in the symref map; other repeated
    /// keys overwrite the previous value.
    pub fn insert(&mut self, token: &[u8]) -> Result<(), Error> {
        let (key, value) = match token.find_byte(b'=') {
            Some(at) => (&token[..at], &token[at + 1..]),
            None => (token, &token[token.len()..]),
        };
        if key.is_empty() || !key.iter().all(is_key_byte) {
            return Err(Error {
                token: token.into(),
            });
        }
        if key == SYMREF.as_bytes() {
            let colon = value.find_byte(b':').ok_or_else(|| Error {
                token: token.into(),
            })?;
            self.symrefs
                .insert(value[..colon].into(), value[colon + 1..].into());
        } else {
            self.caps.insert(key.into(), value.into());
        }
        Ok(())
    }

    /// Add a valueless capability, as used when building the client selection.
    pub fn add(&mut self, name: &str) {
        self.caps.insert(name.into(), BString::default());
    }

    /// Whether `name` is present.
    pub fn supports(&self, name: &str) -> bool {
        self.caps.contains_key(BStr::new(name))
    }

    /// The value advertised for `name`, if any.
    pub fn value(&self, name: &str) -> Option<&BStr> {
        self.caps.get(BStr::new(name)).map(|v| v.as_bstr())
    }

    /// Keep only the capabilities that `other` also has, preserving the
    /// values on this side.
    pub fn intersect(&mut self, other: &CapabilitySet) {
        self.caps.retain(|key, _| other.caps.contains_key(key));
    }

    /// The symbolic-ref map accumulated from `symref` tokens.
    pub fn symrefs(&self) -> &BTreeMap<BString, BString> {
        &self.symrefs
    }

    /// The target advertised for the symbolic ref `name`, if any.
    pub fn symref_target(&self, name: &BStr) -> Option<&BStr> {
        self.symrefs.get(name).map(|v| v.as_bstr())
    }

    /// Whether no capability is present.
    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }
}

fn is_key_byte(b: &u8) -> bool {
    b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-'
}

impl fmt::Display for CapabilitySet {
    /// The wire form used on the first `want` line: tokens sorted by name,
    /// separated by single spaces.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.caps.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{key}")?;
            if !value.is_empty() {
                write!(f, "={value}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_values() {
        let caps =
            CapabilitySet::from_bytes(b"multi_ack side-band-64k agent=git/2.44.0").unwrap();
        assert!(caps.supports(MULTI_ACK));
        assert!(caps.supports(SIDE_BAND_64K));
        assert_eq!(caps.value("agent"), Some(BStr::new("git/2.44.0")));
        assert_eq!(caps.value(MULTI_ACK), Some(BStr::new("")));
        assert!(!caps.supports(SIDE_BAND));
    }

    #[test]
    fn symrefs_accumulate() {
        let caps = CapabilitySet::from_bytes(
            b"symref=HEAD:refs/heads/main symref=refs/remotes/origin/HEAD:refs/remotes/origin/main",
        )
        .unwrap();
        assert!(!caps.supports(SYMREF));
        assert_eq!(
            caps.symref_target(BStr::new("HEAD")),
            Some(BStr::new("refs/heads/main"))
        );
        assert_eq!(caps.symrefs().len(), 2);
    }

    #[test]
    fn duplicate_keys_overwrite() {
        let caps = CapabilitySet::from_bytes(b"agent=one agent=two").unwrap();
        assert_eq!(caps.value("agent"), Some(BStr::new("two")));
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(CapabilitySet::from_bytes(b"ok =value").is_err());
        assert!(CapabilitySet::from_bytes(b"sp{ce").is_err());
        assert!(CapabilitySet::from_bytes(b"symref=nocolon").is_err());
    }

    #[test]
    fn intersection_is_key_restriction() {
        let mut left = CapabilitySet::from_bytes(b"agent=left multi_ack ofs-delta").unwrap();
        let right = CapabilitySet::from_bytes(b"agent=right multi_ack").unwrap();
        left.intersect(&right);
        assert!(left.supports(MULTI_ACK));
        assert!(!left.supports(OFS_DELTA));
        // The left-hand value wins.
        assert_eq!(left.value("agent"), Some(BStr::new("left")));
    }

    #[test]
    fn intersection_with_self_is_identity() {
        let mut caps = CapabilitySet::from_bytes(b"multi_ack side-band agent=x").unwrap();
        let copy = caps.clone();
        caps.intersect(&copy);
        assert_eq!(caps, copy);
    }

    #[test]
    fn display_is_sorted_and_spaced() {
        let mut caps = CapabilitySet::default();
        caps.add(SIDE_BAND_64K);
        caps.add(MULTI_ACK);
        caps.insert(b"agent=probe/1").unwrap();
        assert_eq!(caps.to_string(), "agent=probe/1 multi_ack side-band-64k");
    }
}
