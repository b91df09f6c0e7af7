use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Object store tuning. `fsync_objects` trades durability for write latency
/// on spinning-disk build farms.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoreConfig {
    pub fsync_objects: bool,
    pub sweep_temp_on_startup: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            fsync_objects: true,
            sweep_temp_on_startup: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LockConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionConfig {
    pub idle_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: 8 * 3600,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound on the decompressed bytes of one upload batch.
    pub upload_batch_bytes: usize,
    /// Deadline applied to every network round-trip.
    pub request_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            upload_batch_bytes: 64 * 1024 * 1024,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientConfig {
    /// Worker threads for hashing and upload. Zero means one per CPU,
    /// capped at eight.
    pub worker_threads: usize,
    pub cache_path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            cache_path: PathBuf::from(".vcs"),
        }
    }
}

impl ClientConfig {
    /// Resolve the configured thread count against the machine.
    pub fn effective_workers(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            num_cpus::get().min(8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Defaults must match the documented policy values.
    #[test]
    fn test_defaults() {
        assert_eq!(LockConfig::default().ttl_secs, 3600);
        assert!(StoreConfig::default().fsync_objects);
        assert!(ClientConfig::default().effective_workers() >= 1);
    }

    /// Config structs round-trip through JSON for deployment files.
    #[test]
    fn test_serde_round_trip() {
        let cfg = SyncConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: SyncConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.upload_batch_bytes, cfg.upload_batch_bytes);
    }
}
