// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the connection manager and the operation dispatcher.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resolver::DEFAULT_ROOT;

/// Default number of read-validate-commit rounds before an operation fails with a conflict.
pub const DEFAULT_MAX_ATTEMPTS: usize = 8;

/// Default number of records fetched from the store per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 64;

/// Configuration parameters for the connection manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// How often an operation is re-attempted from a fresh read when concurrent changes
    /// invalidated it. Includes the first attempt, values below 1 are treated as 1.
    pub max_attempts: usize,

    /// Number of records fetched from the store per page when listing connections.
    pub page_size: usize,

    /// Key prefix all connection records are stored under.
    pub root: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            page_size: DEFAULT_PAGE_SIZE,
            root: DEFAULT_ROOT.to_string(),
        }
    }
}

/// Configuration parameters for retrying transient failures in the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Retries after the first failed attempt. Set to `0` to disable retries.
    pub max_retries: usize,

    /// Delay before the first retry, doubled with every following one.
    pub initial_backoff: Duration,

    /// Upper bound for the delay between retries.
    pub max_backoff: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DispatchConfig, ManagerConfig};

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: ManagerConfig = serde_json::from_str(r#"{ "max_attempts": 3 }"#).unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.page_size, ManagerConfig::default().page_size);
        assert_eq!(config.root, "contacts");

        let config: DispatchConfig = serde_json::from_str(r#"{ "max_retries": 0 }"#).unwrap();
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.max_backoff, DispatchConfig::default().max_backoff);
    }
}
