//! Git object identity and the commit codec.
//!
//! Objects are content-addressed: the identity of an object is the SHA-1 of
//! its canonical serialization prefixed by `"<kind> <length>\0"`.

use std::fmt;

use bstr::BString;
use sha1::{Digest, Sha1};

mod commit;
pub use commit::{Commit, Sign, Timestamp, TzOffset, User};

/// The error returned for text that is not a 40-digit hex object id.
#[derive(Debug, thiserror::Error)]
#[error("invalid object id {hex:?}")]
pub struct ParseObjectIdError {
    /// The rejected input.
    pub hex: BString,
}

/// A 20-byte SHA-1 object identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    /// Wrap raw digest bytes.
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        ObjectId(bytes)
    }

    /// The all-zero id, used on the wire to mean "no object".
    pub const fn null() -> Self {
        ObjectId([0; 20])
    }

    /// Whether this is the all-zero id.
    pub fn is_null(&self) -> bool {
        self.0 == [0; 20]
    }

    /// Parse the 40-digit hexadecimal form.
    pub fn from_hex(hex: &[u8]) -> Result<Self, ParseObjectIdError> {
        let mut bytes = [0u8; 20];
        if hex.len() != 40 || hex::decode_to_slice(hex, &mut bytes).is_err() {
            return Err(ParseObjectIdError { hex: hex.into() });
        }
        Ok(ObjectId(bytes))
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// The lowercase hexadecimal form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

/// The four kinds of Git objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// File content.
    Blob,
    /// A directory listing.
    Tree,
    /// A commit.
    Commit,
    /// An annotated tag.
    Tag,
}

impl Kind {
    /// The type tag used in object headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Blob => "blob",
            Kind::Tree => "tree",
            Kind::Commit => "commit",
            Kind::Tag => "tag",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `"<kind> <size>\0"` prefix that frames every object serialization.
pub fn loose_header(kind: Kind, size: usize) -> Vec<u8> {
    let mut header = Vec::with_capacity(16);
    header.extend_from_slice(kind.as_str().as_bytes());
    header.push(b' ');
    header.extend_from_slice(size.to_string().as_bytes());
    header.push(0);
    header
}

/// Compute the content-addressed identity of a serialized object.
pub fn hash_object(kind: Kind, data: &[u8]) -> ObjectId {
    let mut hasher = Sha1::new();
    hasher.update(loose_header(kind, data.len()));
    hasher.update(data);
    let digest = hasher.finalize();
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest);
    ObjectId(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let hex = "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3";
        let id = ObjectId::from_hex(hex.as_bytes()).unwrap();
        assert_eq!(id.to_hex(), hex);
        assert_eq!(id.to_string(), hex);
    }

    #[test]
    fn rejects_bad_hex() {
        assert!(ObjectId::from_hex(b"abc").is_err());
        assert!(ObjectId::from_hex(&[b'a'; 41]).is_err());
        assert!(ObjectId::from_hex(&[b'z'; 40]).is_err());
    }

    #[test]
    fn null_id() {
        assert!(ObjectId::null().is_null());
        assert_eq!(ObjectId::null().to_hex(), "0".repeat(40));
        assert!(!ObjectId::from_bytes([1; 20]).is_null());
    }

    #[test]
    fn blob_identity_matches_git() {
        // Well-known hashes straight out of `git hash-object`.
        assert_eq!(
            hash_object(Kind::Blob, b"hello\n").to_hex(),
            "ce013625030ba8dba906f756967f9e9ca394464a"
        );
        assert_eq!(
            hash_object(Kind::Blob, b"").to_hex(),
            "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"
        );
    }

    #[test]
    fn loose_header_form() {
        assert_eq!(loose_header(Kind::Commit, 123), b"commit 123\0");
        assert_eq!(loose_header(Kind::Blob, 0), b"blob 0\0");
    }
}
