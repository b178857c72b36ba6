//! The commit object codec.
//!
//! Commits use a textual header block terminated by a blank line, followed by
//! the free-form message. Parsing is strict; emission is its exact inverse,
//! so any commit produced by the emitter round-trips byte for byte.

use std::fmt;

use bstr::{BStr, BString, ByteSlice};
use smallvec::SmallVec;

use super::{hash_object, Kind, ObjectId};
use crate::{Error, Result};

/// Identifies an author or committer.
///
/// The field is free-form on the wire, conventionally `Name <email>`. It is
/// kept verbatim; the only invariant is that it contains no newline, which is
/// enforced when a commit is emitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct User(BString);

impl User {
    /// Wrap a raw user field.
    pub fn new(raw: impl Into<BString>) -> Self {
        User(raw.into())
    }

    /// The raw field as a byte string.
    pub fn as_bstr(&self) -> &BStr {
        self.0.as_bstr()
    }

    /// The raw field as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn split(&self) -> (&BStr, Option<&BStr>) {
        let raw = self.0.as_bstr();
        if !raw.ends_with_str(">") {
            return (raw.trim().as_bstr(), None);
        }
        match raw.rfind_byte(b'<') {
            Some(open) => (
                raw[..open].trim().as_bstr(),
                Some(raw[open + 1..raw.len() - 1].as_bstr()),
            ),
            None => (raw.trim().as_bstr(), None),
        }
    }

    /// The display-name portion of the field.
    pub fn name(&self) -> &BStr {
        self.split().0
    }

    /// The email portion of the field, if the conventional `<...>` is present.
    pub fn email(&self) -> Option<&BStr> {
        self.split().1
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<&str> for User {
    fn from(raw: &str) -> Self {
        User::new(raw)
    }
}

/// Sign of a UTC offset. Kept separately so that `-0000` survives a
/// round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sign {
    /// East of or at UTC.
    Plus,
    /// West of UTC.
    Minus,
}

/// A `±HHMM` UTC offset, kept digit for digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TzOffset {
    /// The sign the offset was written with.
    pub sign: Sign,
    /// The two hour digits.
    pub hours: u8,
    /// The two minute digits.
    pub minutes: u8,
}

impl TzOffset {
    /// The `+0000` offset.
    pub const UTC: TzOffset = TzOffset {
        sign: Sign::Plus,
        hours: 0,
        minutes: 0,
    };

    /// Parse the five-byte wire form.
    pub fn from_bytes(src: &[u8]) -> Result<Self> {
        let malformed = || Error::MalformedCommit {
            message: format!("parse UTC offset {:?}: expected sign and 4 digits", src.as_bstr()),
        };
        let [sign, digits @ ..] = src else {
            return Err(malformed());
        };
        let sign = match sign {
            b'+' => Sign::Plus,
            b'-' => Sign::Minus,
            _ => return Err(malformed()),
        };
        if digits.len() != 4 || !digits.iter().all(u8::is_ascii_digit) {
            return Err(malformed());
        }
        Ok(TzOffset {
            sign,
            hours: (digits[0] - b'0') * 10 + (digits[1] - b'0'),
            minutes: (digits[2] - b'0') * 10 + (digits[3] - b'0'),
        })
    }

    /// The offset in seconds east of UTC.
    pub fn seconds(&self) -> i32 {
        let magnitude = i32::from(self.hours) * 3600 + i32::from(self.minutes) * 60;
        match self.sign {
            Sign::Plus => magnitude,
            Sign::Minus => -magnitude,
        }
    }
}

impl fmt::Display for TzOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.sign {
            Sign::Plus => '+',
            Sign::Minus => '-',
        };
        write!(f, "{sign}{:02}{:02}", self.hours, self.minutes)
    }
}

/// A point in time with the fixed UTC offset it was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub seconds: i64,
    /// The recorded UTC offset.
    pub offset: TzOffset,
}

impl Timestamp {
    /// Combine epoch seconds with an offset.
    pub fn new(seconds: i64, offset: TzOffset) -> Self {
        Timestamp { seconds, offset }
    }
}

/// A parsed Git commit object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// The hash of the commit's tree object.
    pub tree: ObjectId,
    /// The hashes of the commit's parents, in order.
    pub parents: SmallVec<[ObjectId; 1]>,
    /// The person who wrote the change.
    pub author: User,
    /// When the change was written.
    pub author_time: Timestamp,
    /// The person who committed the change.
    pub committer: User,
    /// When the change was committed.
    pub commit_time: Timestamp,
    /// The ASCII-armored signature of the commit, if it carries one. Every
    /// line of the armor is LF-terminated.
    pub gpg_signature: Option<BString>,
    /// The commit message, verbatim.
    pub message: BString,
}

impl Commit {
    /// Deserialize a commit from the Git object format.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let data = data
            .strip_prefix(b"tree ")
            .ok_or_else(|| malformed("tree: missing"))?;
        let (tree, data) = consume_id(data, "tree")?;
        let mut data = data
            .strip_prefix(b"\n")
            .ok_or_else(|| malformed("tree: trailing data"))?;

        let mut parents = SmallVec::new();
        while let Some(rest) = data.strip_prefix(b"parent ") {
            let (parent, rest) = consume_id(rest, "parent")?;
            parents.push(parent);
            data = rest
                .strip_prefix(b"\n")
                .ok_or_else(|| malformed("parent: trailing data"))?;
        }

        let data = data
            .strip_prefix(b"author ")
            .ok_or_else(|| malformed("author: missing line"))?;
        let (author, author_time, data) = consume_user_line(data, "author")?;
        let data = data
            .strip_prefix(b"committer ")
            .ok_or_else(|| malformed("committer: missing line"))?;
        let (committer, commit_time, data) = consume_user_line(data, "committer")?;

        let (gpg_signature, data) = match data.strip_prefix(b"gpgsig ") {
            Some(rest) => {
                let (signature, rest) = consume_signature(rest)?;
                (Some(signature), rest)
            }
            None => (None, data),
        };

        let message = data
            .strip_prefix(b"\n")
            .ok_or_else(|| malformed("message: expected blank line after header"))?;

        Ok(Commit {
            tree,
            parents,
            author,
            author_time,
            committer,
            commit_time,
            gpg_signature,
            message: message.into(),
        })
    }

    /// Serialize the commit into the Git object format.
    ///
    /// Fails if author or committer contains a newline, or if the GPG
    /// signature is not a sequence of LF-terminated lines.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        for (field, user) in [("author", &self.author), ("committer", &self.committer)] {
            if user.as_bytes().contains(&b'\n') {
                return Err(Error::InvalidUser {
                    field,
                    value: user.as_bstr().into(),
                });
            }
        }

        let mut out = Vec::new();
        out.extend_from_slice(b"tree ");
        out.extend_from_slice(self.tree.to_hex().as_bytes());
        out.push(b'\n');
        for parent in &self.parents {
            out.extend_from_slice(b"parent ");
            out.extend_from_slice(parent.to_hex().as_bytes());
            out.push(b'\n');
        }
        append_user_line(&mut out, "author", &self.author, self.author_time);
        append_user_line(&mut out, "committer", &self.committer, self.commit_time);
        match &self.gpg_signature {
            Some(signature) if !signature.is_empty() => {
                out.extend_from_slice(b"gpgsig");
                let mut rest: &[u8] = signature;
                while !rest.is_empty() {
                    let eol = rest
                        .find_byte(b'\n')
                        .ok_or(Error::UnterminatedSignature)?;
                    out.push(b' ');
                    out.extend_from_slice(&rest[..eol + 1]);
                    rest = &rest[eol + 1..];
                }
            }
            _ => {}
        }
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        Ok(out)
    }

    /// The content-addressed identity of the commit.
    pub fn id(&self) -> Result<ObjectId> {
        Ok(hash_object(Kind::Commit, &self.to_vec()?))
    }

    /// The first line of the message.
    pub fn summary(&self) -> &BStr {
        match self.message.find_byte(b'\n') {
            Some(eol) => self.message[..eol].as_bstr(),
            None => self.message.as_bstr(),
        }
    }
}

fn malformed(message: impl Into<String>) -> Error {
    Error::MalformedCommit {
        message: message.into(),
    }
}

fn append_user_line(out: &mut Vec<u8>, field: &str, user: &User, time: Timestamp) {
    out.extend_from_slice(field.as_bytes());
    out.push(b' ');
    out.extend_from_slice(user.as_bytes());
    out.push(b' ');
    out.extend_from_slice(time.seconds.to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(time.offset.to_string().as_bytes());
    out.push(b'\n');
}

fn consume_id<'a>(data: &'a [u8], field: &str) -> Result<(ObjectId, &'a [u8])> {
    if data.len() < 40 {
        return Err(malformed(format!("{field}: unexpected end of input")));
    }
    let id = ObjectId::from_hex(&data[..40]).map_err(|source| Error::BadObjectId {
        context: format!("parse commit: {field}"),
        hex: source.hex,
    })?;
    Ok((id, &data[40..]))
}

/// Parse `<user> SP <unix-seconds> SP <tz-offset> LF`.
///
/// Landmarks are located from the right so no assumption is made about the
/// user field; it may contain any byte but a newline, including spaces.
fn consume_user_line<'a>(data: &'a [u8], field: &str) -> Result<(User, Timestamp, &'a [u8])> {
    let eol = data
        .find_byte(b'\n')
        .ok_or_else(|| malformed(format!("{field}: unexpected end of input")))?;
    let line = &data[..eol];
    let tail = &data[eol + 1..];

    let timestamp_end = line
        .rfind_byte(b' ')
        .ok_or_else(|| malformed(format!("{field}: invalid format")))?;
    let user_end = line[..timestamp_end]
        .rfind_byte(b' ')
        .ok_or_else(|| malformed(format!("{field}: invalid format")))?;

    let seconds = std::str::from_utf8(&line[user_end + 1..timestamp_end])
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            malformed(format!(
                "{field}: parse timestamp {:?}",
                line[user_end + 1..timestamp_end].as_bstr()
            ))
        })?;
    let offset = TzOffset::from_bytes(&line[timestamp_end + 1..])?;

    Ok((
        User::new(&line[..user_end]),
        Timestamp::new(seconds, offset),
        tail,
    ))
}

/// Consume a folded signature: the remainder of the `gpgsig ` line plus every
/// following line that starts with a space, unfolded into the stored armor.
fn consume_signature(data: &[u8]) -> Result<(BString, &[u8])> {
    let eol = data
        .find_byte(b'\n')
        .ok_or_else(|| malformed("gpg signature: unexpected end of input"))?;
    let mut signature = BString::from(&data[..eol + 1]);
    let mut tail = &data[eol + 1..];
    while let Some(rest) = tail.strip_prefix(b" ") {
        let eol = rest
            .find_byte(b'\n')
            .ok_or_else(|| malformed("gpg signature: unexpected end of input"))?;
        signature.extend_from_slice(&rest[..eol + 1]);
        tail = &rest[eol + 1..];
    }
    Ok((signature, tail))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_of(byte: u8) -> ObjectId {
        ObjectId::from_bytes([byte; 20])
    }

    fn basic_commit() -> Commit {
        Commit {
            tree: id_of(0xaa),
            parents: SmallVec::from_vec(vec![id_of(0xbb)]),
            author: "Alice <a@e>".into(),
            author_time: Timestamp::new(
                1578610200,
                TzOffset {
                    sign: Sign::Minus,
                    hours: 8,
                    minutes: 0,
                },
            ),
            committer: "Alice <a@e>".into(),
            commit_time: Timestamp::new(
                1578610200,
                TzOffset {
                    sign: Sign::Minus,
                    hours: 8,
                    minutes: 0,
                },
            ),
            gpg_signature: None,
            message: "hi\n".into(),
        }
    }

    #[test]
    fn emits_exact_bytes() {
        let expected = format!(
            "tree {}\nparent {}\nauthor Alice <a@e> 1578610200 -0800\ncommitter Alice <a@e> 1578610200 -0800\n\nhi\n",
            "a".repeat(40),
            "b".repeat(40),
        );
        assert_eq!(basic_commit().to_vec().unwrap(), expected.as_bytes());
    }

    #[test]
    fn roundtrips() {
        let commit = basic_commit();
        let bytes = commit.to_vec().unwrap();
        assert_eq!(Commit::from_bytes(&bytes).unwrap(), commit);
    }

    #[test]
    fn parent_counts() {
        for parents in [0usize, 1, 3] {
            let mut commit = basic_commit();
            commit.parents = (0..parents).map(|i| id_of(i as u8 + 1)).collect();
            let bytes = commit.to_vec().unwrap();
            let reparsed = Commit::from_bytes(&bytes).unwrap();
            assert_eq!(reparsed.parents.len(), parents);
            assert_eq!(reparsed, commit);
        }
    }

    #[test]
    fn user_field_may_contain_extra_spaces() {
        let mut commit = basic_commit();
        commit.author = User::new("Alice  B.  <a@e> ");
        commit.committer = commit.author.clone();
        let bytes = commit.to_vec().unwrap();
        let reparsed = Commit::from_bytes(&bytes).unwrap();
        assert_eq!(reparsed.author.as_bstr(), "Alice  B.  <a@e> ");
        assert_eq!(reparsed, commit);
    }

    #[test]
    fn negative_zero_offset_roundtrips() {
        let mut commit = basic_commit();
        commit.author_time.offset = TzOffset {
            sign: Sign::Minus,
            hours: 0,
            minutes: 0,
        };
        let bytes = commit.to_vec().unwrap();
        assert!(bytes.windows(6).any(|w| w == b"-0000\n".as_slice()));
        let reparsed = Commit::from_bytes(&bytes).unwrap();
        assert_eq!(reparsed.author_time.offset.sign, Sign::Minus);
        assert_eq!(reparsed.author_time.offset.seconds(), 0);
    }

    #[test]
    fn newline_in_user_is_rejected() {
        let mut commit = basic_commit();
        commit.author = User::new("Alice\n<a@e>");
        assert!(matches!(
            commit.to_vec().unwrap_err(),
            Error::InvalidUser { field: "author", .. }
        ));
        let mut commit = basic_commit();
        commit.committer = User::new("Bob\n<b@e>");
        assert!(matches!(
            commit.to_vec().unwrap_err(),
            Error::InvalidUser {
                field: "committer",
                ..
            }
        ));
    }

    #[test]
    fn gpg_signature_folds_and_roundtrips() {
        let armor = "-----BEGIN PGP SIGNATURE-----\n\nwsBcBAABCAAQ\n-----END PGP SIGNATURE-----\n";
        let mut commit = basic_commit();
        commit.gpg_signature = Some(armor.into());
        let bytes = commit.to_vec().unwrap();
        let text = bytes.to_str().unwrap();
        assert!(text.contains("gpgsig -----BEGIN PGP SIGNATURE-----\n \n wsBcBAABCAAQ\n -----END PGP SIGNATURE-----\n"));
        let reparsed = Commit::from_bytes(&bytes).unwrap();
        assert_eq!(reparsed.gpg_signature, Some(BString::from(armor)));
        assert_eq!(reparsed, commit);
    }

    #[test]
    fn unterminated_signature_is_rejected() {
        let mut commit = basic_commit();
        commit.gpg_signature = Some("-----BEGIN PGP SIGNATURE-----\ntruncated".into());
        assert!(matches!(
            commit.to_vec().unwrap_err(),
            Error::UnterminatedSignature
        ));
    }

    #[test]
    fn identity_digest_is_stable() {
        // Digest pinned from this fixture's canonical serialization; guards
        // the header framing and the emitted byte layout.
        let commit = Commit {
            tree: ObjectId::from_hex(b"2b5bfdf7798569e0b59b16e8998e36aa23cb6a2c").unwrap(),
            parents: SmallVec::new(),
            author: "Linus Torvalds <torvalds@ppc970.osdl.org>".into(),
            author_time: Timestamp::new(
                1112911993,
                TzOffset {
                    sign: Sign::Minus,
                    hours: 7,
                    minutes: 0,
                },
            ),
            committer: "Linus Torvalds <torvalds@ppc970.osdl.org>".into(),
            commit_time: Timestamp::new(
                1112911993,
                TzOffset {
                    sign: Sign::Minus,
                    hours: 7,
                    minutes: 0,
                },
            ),
            gpg_signature: None,
            message: "Initial revision of \"git\", the information manager from hell\n".into(),
        };
        assert_eq!(
            commit.id().unwrap().to_hex(),
            "d5b5227258e1b9d7097bf7f4e13205649b5a36e3"
        );
    }

    #[test]
    fn identity_consistent_with_manual_framing() {
        let commit = basic_commit();
        let bytes = commit.to_vec().unwrap();
        assert_eq!(
            commit.id().unwrap(),
            hash_object(Kind::Commit, &bytes)
        );
    }

    #[test]
    fn summary_is_first_line() {
        let mut commit = basic_commit();
        commit.message = "subject line\n\nbody text\n".into();
        assert_eq!(commit.summary(), "subject line");
        commit.message = "no newline at all".into();
        assert_eq!(commit.summary(), "no newline at all");
    }

    #[test]
    fn parse_rejects_missing_headers() {
        assert!(Commit::from_bytes(b"").is_err());
        assert!(Commit::from_bytes(b"tree short\n").is_err());
        let no_author = format!("tree {}\n\nmsg", "a".repeat(40));
        assert!(Commit::from_bytes(no_author.as_bytes()).is_err());
        let no_blank = format!(
            "tree {t}\nauthor A <a@e> 0 +0000\ncommitter A <a@e> 0 +0000\nmsg",
            t = "a".repeat(40)
        );
        assert!(Commit::from_bytes(no_blank.as_bytes()).is_err());
    }

    #[test]
    fn user_accessors() {
        let user = User::new("Octocat <octocat@example.com>");
        assert_eq!(user.name(), "Octocat");
        assert_eq!(user.email(), Some(BStr::new("octocat@example.com")));
        let bare = User::new("anonymous");
        assert_eq!(bare.name(), "anonymous");
        assert_eq!(bare.email(), None);
    }
}
