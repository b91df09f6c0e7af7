//! Zlib stream helpers for the object store's compressed envelopes.

pub mod stream;
