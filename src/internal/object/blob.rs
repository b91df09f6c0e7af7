//! The Blob object stores the raw content of one asset file. Blobs carry no
//! name, mode, or history; trees attach that context. Two files with equal
//! bytes share one blob, which is what makes the store deduplicate across
//! branches and workspaces.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::errors::VcsError;
use crate::hash::ObjectHash;
use crate::internal::object::ObjectTrait;
use crate::internal::object::types::ObjectType;

/// An opaque file payload under the envelope prefix `blob <size>\0`.
#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    pub id: ObjectHash,
    pub data: Vec<u8>,
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Type: Blob")?;
        writeln!(f, "Size: {}", self.data.len())
    }
}

impl Blob {
    /// Build a blob from file content, computing its envelope hash.
    pub fn from_content_bytes(content: Vec<u8>) -> Blob {
        let id = ObjectHash::from_type_and_data(ObjectType::Blob, &content);
        Blob { id, data: content }
    }
}

impl ObjectTrait for Blob {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, VcsError>
    where
        Self: Sized,
    {
        Ok(Blob {
            id: hash,
            data: data.to_vec(),
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Blob
    }

    fn get_size(&self) -> usize {
        self.data.len()
    }

    fn to_data(&self) -> Result<Vec<u8>, VcsError> {
        Ok(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The e2e scenario value: `blob 6\0hello\n` must hash stably.
    #[test]
    fn test_hello_blob_hash() {
        let blob = Blob::from_content_bytes(b"hello\n".to_vec());
        assert_eq!(blob.id, ObjectHash::new(b"blob 6\x00hello\n"));
        assert_eq!(blob.object_hash().unwrap(), blob.id);
    }

    /// Empty blobs are storable and have a stable well-known hash.
    #[test]
    fn test_empty_blob() {
        let blob = Blob::from_content_bytes(Vec::new());
        assert_eq!(blob.get_size(), 0);
        assert_eq!(blob.id, ObjectHash::new(b"blob 0\x00"));
    }

    /// from_bytes + to_data round-trips the payload exactly.
    #[test]
    fn test_round_trip() {
        let payload = vec![0u8, 159, 146, 150, 255];
        let id = ObjectHash::from_type_and_data(ObjectType::Blob, &payload);
        let blob = Blob::from_bytes(&payload, id).unwrap();
        assert_eq!(blob.to_data().unwrap(), payload);
        assert_eq!(blob.id, id);
    }

    /// from_buf_read inflates a compressed payload and takes the id from
    /// the stream digest.
    #[test]
    fn test_from_buf_read() {
        use std::io::Write;

        use flate2::{Compression, write::ZlibEncoder};

        use crate::internal::zlib::stream::inflate::ReadBoxed;

        let payload = b"streamed texture bytes";
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(payload).unwrap();
        let compressed = enc.finish().unwrap();

        let cursor = std::io::Cursor::new(compressed);
        let mut reader = ReadBoxed::new(cursor, ObjectType::Blob, payload.len());
        let blob = Blob::from_buf_read(&mut reader, payload.len()).unwrap();
        assert_eq!(blob.data, payload);
        assert_eq!(
            blob.id,
            ObjectHash::from_type_and_data(ObjectType::Blob, payload)
        );
    }
}
