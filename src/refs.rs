//! Reference names and the records produced by the ref advertisement.

use std::fmt;

use bstr::{BStr, BString, ByteSlice};

use crate::object::ObjectId;

/// The error returned for a name that violates Git's ref-name rules.
#[derive(Debug, thiserror::Error)]
#[error("invalid ref name {name:?}")]
pub struct InvalidRefName {
    /// The rejected name.
    pub name: BString,
}

/// A validated reference name such as `refs/heads/main` or `HEAD`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefName(BString);

impl RefName {
    /// Validate `name` against Git's ref-name rules.
    pub fn new(name: impl Into<BString>) -> Result<Self, InvalidRefName> {
        let name = name.into();
        if is_valid_name(name.as_bstr()) {
            Ok(RefName(name))
        } else {
            Err(InvalidRefName { name })
        }
    }

    /// The name as a byte string.
    pub fn as_bstr(&self) -> &BStr {
        self.0.as_bstr()
    }

    /// The name as raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl AsRef<BStr> for RefName {
    fn as_ref(&self) -> &BStr {
        self.as_bstr()
    }
}

/// One reference advertised by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    /// The full reference name.
    pub name: RefName,
    /// The object the reference points at.
    pub id: ObjectId,
    /// The target this ref points at symbolically, populated only from a
    /// `symref` capability. The v1 dialect gives the client no other way to
    /// learn it, so this stays `None` when the server is silent.
    pub symref_target: Option<RefName>,
}

fn is_valid_name(name: &BStr) -> bool {
    if name.is_empty() || name == "@" {
        return false;
    }
    if name.first() == Some(&b'/') || name.last() == Some(&b'/') || name.last() == Some(&b'.') {
        return false;
    }
    if name.contains_str("..") || name.contains_str("//") || name.contains_str("@{") {
        return false;
    }
    for &b in name.iter() {
        if b < 0x20 || b == 0x7f {
            return false;
        }
        if matches!(b, b' ' | b'~' | b'^' | b':' | b'?' | b'*' | b'[' | b'\\') {
            return false;
        }
    }
    name.split_str("/")
        .all(|component| !component.starts_with(b".") && !component.ends_with_str(".lock"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_names() {
        for name in [
            "HEAD",
            "refs/heads/main",
            "refs/tags/v1.0.0",
            "refs/remotes/origin/feature/nested",
        ] {
            assert!(RefName::new(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_rule_violations() {
        for name in [
            "",
            "@",
            "/refs/heads/main",
            "refs/heads/main/",
            "refs/heads//main",
            "refs/heads/ma..in",
            "refs/heads/.hidden",
            "refs/heads/main.lock",
            "refs/heads/main.",
            "refs/heads/ma in",
            "refs/heads/ma~in",
            "refs/heads/ma^in",
            "refs/heads/ma:in",
            "refs/heads/ma?in",
            "refs/heads/ma*in",
            "refs/heads/ma[in",
            "refs/heads/ma\\in",
            "refs/heads/ma\x01in",
            "refs/heads/ma@{in",
        ] {
            assert!(RefName::new(name).is_err(), "{name:?} should be invalid");
        }
    }
}
