//! Content hash type for asset-vcs objects.
//!
//! Every object is addressed by the SHA-256 digest of its canonical envelope
//! `<kind> <size>\0<payload>`, hex-encoded to 64 characters for paths and
//! wire identifiers. The on-disk and wire formats pin SHA-256, so unlike
//! repositories that negotiate an object format there is no algorithm
//! selector here.

use std::{fmt::Display, io, str::FromStr};

use colored::Colorize;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::internal::object::types::ObjectType;

/// Byte length of an object hash.
pub const HASH_SIZE: usize = 32;
/// Hex string length of an object hash.
pub const HASH_HEX_LEN: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
/// Concrete object ID: a 32-byte SHA-256 digest over the canonical envelope.
/// Supports conversion to/from hex strings, byte slices, and stream reading.
pub struct ObjectHash(#[serde(with = "hex_bytes")] pub [u8; HASH_SIZE]);

impl Default for ObjectHash {
    fn default() -> Self {
        ObjectHash([0u8; HASH_SIZE])
    }
}

impl Display for ObjectHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for ObjectHash {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

/// Parse a 64-character hex string into an `ObjectHash`.
impl FromStr for ObjectHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HASH_HEX_LEN {
            return Err(format!(
                "Invalid hash length: got {}, expected {HASH_HEX_LEN}",
                s.len()
            ));
        }
        let bytes = hex::decode(s).map_err(|e| e.to_string())?;
        let mut h = [0u8; HASH_SIZE];
        h.copy_from_slice(bytes.as_slice());
        Ok(ObjectHash(h))
    }
}

impl ObjectHash {
    /// Zero-filled hash, used as the null parent and for absent refs.
    pub fn zero() -> ObjectHash {
        ObjectHash::default()
    }

    /// Zero-filled hex string.
    pub fn zero_str() -> String {
        "0".repeat(HASH_HEX_LEN)
    }

    /// Compute the hash of raw data.
    pub fn new(data: &[u8]) -> ObjectHash {
        let digest = Sha256::digest(data);
        let mut bytes = [0u8; HASH_SIZE];
        bytes.copy_from_slice(digest.as_ref());
        ObjectHash(bytes)
    }

    /// Compute the hash of an object payload under its canonical envelope
    /// `<kind> <size>\0<payload>`.
    pub fn from_type_and_data(object_type: ObjectType, data: &[u8]) -> ObjectHash {
        let mut hasher = Sha256::new();
        hasher.update(object_type.to_bytes());
        hasher.update(b" ");
        hasher.update(data.len().to_string().as_bytes());
        hasher.update(b"\x00");
        hasher.update(data);
        let digest = hasher.finalize();
        let mut bytes = [0u8; HASH_SIZE];
        bytes.copy_from_slice(digest.as_ref());
        ObjectHash(bytes)
    }

    /// Create an `ObjectHash` from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<ObjectHash, String> {
        if bytes.len() != HASH_SIZE {
            return Err(format!(
                "Invalid byte length: got {}, expected {HASH_SIZE}",
                bytes.len()
            ));
        }
        let mut h = [0u8; HASH_SIZE];
        h.copy_from_slice(bytes);
        Ok(ObjectHash(h))
    }

    /// Read hash bytes from a stream.
    pub fn from_stream(data: &mut impl io::Read) -> io::Result<ObjectHash> {
        let mut h = [0u8; HASH_SIZE];
        data.read_exact(&mut h)?;
        Ok(ObjectHash(h))
    }

    /// Two-character directory shard plus 62-character file name, the
    /// object store's fanout layout.
    pub fn to_fanout(&self) -> (String, String) {
        let hex = hex::encode(self.0);
        (hex[..2].to_string(), hex[2..].to_string())
    }

    /// Format hash as colored string (for terminal display).
    pub fn to_color_str(self) -> String {
        self.to_string().red().bold().to_string()
    }

    /// Return raw bytes of the hash.
    pub fn to_data(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

/// Serde adapter storing hashes as hex strings on the wire while keeping
/// raw bytes in memory.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use super::HASH_SIZE;

    pub fn serialize<S: Serializer>(bytes: &[u8; HASH_SIZE], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<[u8; HASH_SIZE], D::Error> {
        let s = String::deserialize(de)?;
        let raw = hex::decode(&s).map_err(D::Error::custom)?;
        raw.try_into()
            .map_err(|_| D::Error::custom("invalid hash length"))
    }
}
