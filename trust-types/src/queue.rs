// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Verification work queue entries
//!
//! A queue entry is the durable record of pending asynchronous verification
//! work for one host. The queue is the source of truth for outstanding
//! work: worker pool state must be reconstructable from it after a restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    New,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub host_id: Uuid,

    /// Re-fetch the manifest from the host before verifying
    pub fetch_host_data: bool,

    /// Bypass the trust cache even when the input marker is unchanged
    pub force_update_cache: bool,

    pub status: QueueStatus,

    /// Number of failed attempts so far
    pub retry_count: u32,

    /// Earliest time the entry may be claimed again after a retryable
    /// failure
    pub not_before: DateTime<Utc>,

    /// A failed entry past the retry ceiling is terminal and never
    /// claimed again
    pub terminal: bool,

    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(host_id: Uuid, fetch_host_data: bool, force_update_cache: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            host_id,
            fetch_host_data,
            force_update_cache,
            status: QueueStatus::New,
            retry_count: 0,
            not_before: now,
            terminal: false,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a worker may claim this entry at `now`
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            QueueStatus::New => true,
            QueueStatus::Failed => !self.terminal && self.not_before <= now,
            QueueStatus::InProgress | QueueStatus::Completed => false,
        }
    }

    /// OR the request flags of a repeated submission into this entry
    pub fn merge_flags(&mut self, fetch_host_data: bool, force_update_cache: bool) {
        self.fetch_host_data |= fetch_host_data;
        self.force_update_cache |= force_update_cache;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_claimable_states() {
        let now = Utc::now();
        let mut entry = QueueEntry::new(Uuid::new_v4(), true, false);
        assert!(entry.is_claimable(now));

        entry.status = QueueStatus::InProgress;
        assert!(!entry.is_claimable(now));

        entry.status = QueueStatus::Failed;
        entry.not_before = now + Duration::seconds(60);
        assert!(!entry.is_claimable(now));
        assert!(entry.is_claimable(now + Duration::seconds(61)));

        entry.terminal = true;
        assert!(!entry.is_claimable(now + Duration::seconds(61)));
    }

    #[test]
    fn test_merge_flags_ors() {
        let mut entry = QueueEntry::new(Uuid::new_v4(), false, false);
        entry.merge_flags(true, false);
        entry.merge_flags(false, true);
        assert!(entry.fetch_host_data);
        assert!(entry.force_update_cache);
    }
}
