//! Object model definitions for blobs, trees and commits, plus the trait
//! that lets the storage and zlib layers create strongly typed values from
//! raw payload bytes.

pub mod blob;
pub mod commit;
pub mod signature;
pub mod tree;
pub mod types;

use std::{
    fmt::Display,
    io::{BufRead, Read},
};

use crate::{
    errors::VcsError,
    hash::ObjectHash,
    internal::{object::types::ObjectType, zlib::stream::inflate::ReadBoxed},
};

/// **The Object Trait**
/// Defines the common interface for all object kinds: blobs, trees and
/// commits.
pub trait ObjectTrait: Send + Sync + Display {
    /// Creates a new object from a payload byte slice and its known hash.
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, VcsError>
    where
        Self: Sized;

    /// Generate a new object from a `ReadBoxed<BufRead>` inflate stream.
    /// The input size is only used to preallocate the payload buffer; the
    /// hash is taken from the digest the stream accumulated while inflating.
    fn from_buf_read<R: BufRead>(read: &mut ReadBoxed<R>, size: usize) -> Result<Self, VcsError>
    where
        Self: Sized,
    {
        let mut content: Vec<u8> = Vec::with_capacity(size);
        read.read_to_end(&mut content)?;
        let hash = read.hash.clone().finalize();
        Self::from_bytes(&content, hash)
    }

    /// Returns the kind of the object.
    fn get_type(&self) -> ObjectType;

    /// Payload size in bytes.
    fn get_size(&self) -> usize;

    /// Serialize to the canonical payload (without the envelope header).
    fn to_data(&self) -> Result<Vec<u8>, VcsError>;

    /// Computes the object hash from serialized data.
    ///
    /// Default implementation serializes the object and hashes the canonical
    /// envelope. Override only if you need caching.
    fn object_hash(&self) -> Result<ObjectHash, VcsError> {
        let data = self.to_data()?;
        Ok(ObjectHash::from_type_and_data(self.get_type(), &data))
    }
}
