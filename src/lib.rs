//! asset-vcs is a content-addressable version control engine for large
//! binary game assets: a zlib object store, a stat-cached working index,
//! tree/commit objects with branch refs, a batched sync protocol, and
//! distributed exclusive locks for conflict-free binary editing.

pub mod config;
pub mod coordination;
pub mod errors;
pub mod hash;
pub mod internal;
pub mod protocol;
pub mod storage;
pub mod utils;
pub mod workspace;
