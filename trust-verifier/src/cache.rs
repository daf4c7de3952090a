// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: BUSL-1.1

//! Trust cache
//!
//! A bounded LRU from host ID to the last computed report, keyed by a
//! digest of the verification inputs. The cache is a fast-path skip only:
//! eviction or staleness causes at most one redundant verification, never
//! a wrong skip, and correctness never depends on it.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use serde_json::Error as JsonError;
use sha2::{Digest, Sha256};
use tracing::debug;
use trust_types::{HostManifest, TrustReport};
use uuid::Uuid;

use crate::verifier::FlavorGroupEvidence;

/// Digest of everything a verification outcome depends on: the manifest
/// snapshot and the flavor-group state (group definitions and flavors).
pub fn input_marker(
    manifest: &HostManifest,
    groups: &[FlavorGroupEvidence],
) -> Result<Vec<u8>, JsonError> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(manifest)?);
    for evidence in groups {
        hasher.update(serde_json::to_vec(&evidence.group)?);
        for (part, flavors) in &evidence.flavors {
            hasher.update(part.as_str().as_bytes());
            hasher.update(serde_json::to_vec(flavors)?);
        }
    }
    Ok(hasher.finalize().to_vec())
}

struct CachedVerdict {
    marker: Vec<u8>,
    report: TrustReport,
}

pub struct TrustCache {
    inner: Mutex<LruCache<Uuid, CachedVerdict>>,
}

impl TrustCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Return the cached report for a host iff it was computed from the
    /// same inputs.
    pub fn lookup(&self, host_id: Uuid, marker: &[u8]) -> Option<TrustReport> {
        let mut cache = self.inner.lock().expect("trust cache poisoned");
        match cache.get(&host_id) {
            Some(cached) if cached.marker == marker => {
                debug!(host = %host_id, "trust cache hit");
                Some(cached.report.clone())
            }
            _ => None,
        }
    }

    /// Record a freshly computed report under its input marker.
    pub fn store(&self, report: &TrustReport) {
        let mut cache = self.inner.lock().expect("trust cache poisoned");
        cache.put(
            report.host_id,
            CachedVerdict {
                marker: report.input_marker.clone(),
                report: report.clone(),
            },
        );
    }

    /// Drop a host's cached verdict (e.g. its flavor group membership
    /// changed).
    pub fn invalidate(&self, host_id: Uuid) {
        let mut cache = self.inner.lock().expect("trust cache poisoned");
        cache.pop(&host_id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("trust cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(host_id: Uuid, marker: Vec<u8>) -> TrustReport {
        TrustReport::new(host_id, true, vec![], marker)
    }

    #[test]
    fn test_lookup_requires_matching_marker() {
        let cache = TrustCache::new(NonZeroUsize::new(4).unwrap());
        let host = Uuid::new_v4();
        let r = report(host, vec![1u8; 32]);
        cache.store(&r);

        assert_eq!(cache.lookup(host, &[1u8; 32]).unwrap().id, r.id);
        assert!(cache.lookup(host, &[2u8; 32]).is_none());
        assert!(cache.lookup(Uuid::new_v4(), &[1u8; 32]).is_none());
    }

    #[test]
    fn test_invalidate_drops_entry() {
        let cache = TrustCache::new(NonZeroUsize::new(4).unwrap());
        let host = Uuid::new_v4();
        cache.store(&report(host, vec![1u8; 32]));
        cache.invalidate(host);
        assert!(cache.lookup(host, &[1u8; 32]).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction_only_loses_oldest() {
        let cache = TrustCache::new(NonZeroUsize::new(2).unwrap());
        let hosts: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for host in &hosts {
            cache.store(&report(*host, vec![1u8; 32]));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(hosts[0], &[1u8; 32]).is_none());
        assert!(cache.lookup(hosts[2], &[1u8; 32]).is_some());
    }

    #[test]
    fn test_marker_tracks_manifest_changes() {
        let manifest = trust_types::HostManifest {
            host_info: Default::default(),
            pcrs: vec![],
            event_log: vec![],
            measurements: vec![],
            asset_tag: None,
        };
        let a = input_marker(&manifest, &[]).unwrap();

        let mut changed = manifest.clone();
        changed.pcrs.push(trust_types::PcrValue {
            index: 0,
            bank: trust_types::DigestBank::Sha256,
            value: vec![0u8; 32],
        });
        let b = input_marker(&changed, &[]).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, input_marker(&manifest, &[]).unwrap());
    }
}
