//! Author and committer identity lines on commit objects.
//!
//! A signature line has the shape
//! `author NAME <USER-ID> TIMESTAMP +0000` where NAME is a display name that
//! may contain spaces, USER-ID is the opaque account id, and TIMESTAMP is
//! seconds since the epoch in UTC. Commits always record a fixed `+0000`
//! offset; wall-clock presentation is a client concern.

use std::fmt::Display;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::VcsError;

/// Which header line this signature occupies.
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    Author,
    Committer,
}

impl SignatureKind {
    pub fn to_data(self) -> &'static [u8] {
        match self {
            SignatureKind::Author => b"author",
            SignatureKind::Committer => b"committer",
        }
    }

    pub fn from_data(data: &[u8]) -> Result<SignatureKind, VcsError> {
        match data {
            b"author" => Ok(SignatureKind::Author),
            b"committer" => Ok(SignatureKind::Committer),
            _ => Err(VcsError::InvalidObject(format!(
                "`{}` is not a valid signature kind",
                String::from_utf8_lossy(data)
            ))),
        }
    }
}

/// One identity line of a commit header.
#[derive(PartialEq, Eq, Debug, Hash, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub kind: SignatureKind,
    pub name: String,
    pub user_id: String,
    /// Seconds since the epoch, UTC.
    pub timestamp: i64,
}

impl Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} <{}> {} +0000", self.name, self.user_id, self.timestamp)
    }
}

impl Signature {
    pub fn new(kind: SignatureKind, name: &str, user_id: &str, timestamp: i64) -> Signature {
        Signature {
            kind,
            name: name.to_string(),
            user_id: user_id.to_string(),
            timestamp,
        }
    }

    /// Parse one header line, e.g.
    /// `author Jane Doe <u-1138> 1712345678 +0000`.
    pub fn from_data(data: Vec<u8>) -> Result<Signature, VcsError> {
        let invalid =
            |msg: &str| VcsError::InvalidObject(format!("invalid signature line: {msg}"));

        let kind_end = data.find_byte(b' ').ok_or_else(|| invalid("no kind"))?;
        let kind = SignatureKind::from_data(&data[..kind_end])?;
        let rest = &data[kind_end + 1..];

        let id_open = rest.find_byte(b'<').ok_or_else(|| invalid("no user id"))?;
        let id_close = rest.find_byte(b'>').ok_or_else(|| invalid("no user id"))?;
        if id_close < id_open || id_open == 0 {
            return Err(invalid("malformed user id"));
        }

        let name = rest[..id_open - 1]
            .to_str()
            .map_err(|_| invalid("name is not UTF-8"))?
            .to_string();
        let user_id = rest[id_open + 1..id_close]
            .to_str()
            .map_err(|_| invalid("user id is not UTF-8"))?
            .to_string();

        // `TIMESTAMP +0000` after the closing bracket.
        let tail = rest[id_close + 1..]
            .to_str()
            .map_err(|_| invalid("timestamp is not UTF-8"))?
            .trim();
        let timestamp_str = tail.split(' ').next().ok_or_else(|| invalid("no timestamp"))?;
        let timestamp = timestamp_str
            .parse::<i64>()
            .map_err(|_| invalid("timestamp is not a number"))?;

        Ok(Signature {
            kind,
            name,
            user_id,
            timestamp,
        })
    }

    /// Serialize to the header line form, kind token included.
    pub fn to_data(&self) -> Result<Vec<u8>, VcsError> {
        let mut sign = Vec::new();
        sign.extend_from_slice(self.kind.to_data());
        sign.extend_from_slice(b" ");
        sign.extend_from_slice(self.name.as_bytes());
        sign.extend_from_slice(b" <");
        sign.extend_from_slice(self.user_id.as_bytes());
        sign.extend_from_slice(b"> ");
        sign.extend_from_slice(self.timestamp.to_string().as_bytes());
        sign.extend_from_slice(b" +0000");
        Ok(sign)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parse an author line with a spaced display name.
    #[test]
    fn test_parse_author() {
        let line = b"author Jane Doe <u-1138> 1712345678 +0000".to_vec();
        let sig = Signature::from_data(line).unwrap();
        assert_eq!(sig.kind, SignatureKind::Author);
        assert_eq!(sig.name, "Jane Doe");
        assert_eq!(sig.user_id, "u-1138");
        assert_eq!(sig.timestamp, 1712345678);
    }

    /// Serialization must round-trip through parsing.
    #[test]
    fn test_round_trip() {
        let sig = Signature::new(SignatureKind::Committer, "Build Bot", "svc-ci", 1700000000);
        let data = sig.to_data().unwrap();
        assert_eq!(data, b"committer Build Bot <svc-ci> 1700000000 +0000");
        let back = Signature::from_data(data).unwrap();
        assert_eq!(back, sig);
    }

    /// Lines without an id bracket are rejected.
    #[test]
    fn test_missing_id() {
        assert!(Signature::from_data(b"author Jane 1712345678 +0000".to_vec()).is_err());
    }

    /// Unknown kind tokens are rejected.
    #[test]
    fn test_bad_kind() {
        assert!(Signature::from_data(b"tagger Jane <u1> 1 +0000".to_vec()).is_err());
    }
}
