// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Manager configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Number of queue workers
    pub workers: usize,

    /// Upper bound on one manifest fetch
    pub fetch_timeout_secs: u64,

    /// Backoff before a failed entry becomes claimable again
    pub retry_interval_secs: u64,

    /// Failed attempts after which an entry turns terminal
    pub max_retries: u32,

    /// Trust cache capacity (hosts)
    pub trust_cache_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            fetch_timeout_secs: 60,
            retry_interval_secs: 300,
            max_retries: 3,
            trust_cache_capacity: 256,
        }
    }
}

impl ManagerConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn retry_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retry_interval_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_deserialize_from_empty_object() {
        let config: ManagerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_partial_override() {
        let config: ManagerConfig =
            serde_json::from_str(r#"{"workers": 1, "retry_interval_secs": 0}"#).unwrap();
        assert_eq!(config.workers, 1);
        assert_eq!(config.retry_interval(), chrono::Duration::zero());
        assert_eq!(config.fetch_timeout(), Duration::from_secs(60));
    }
}
