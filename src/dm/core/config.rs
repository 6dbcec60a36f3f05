//! Configuration for the messaging subsystem.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::dm::core::errors::{DmError, DmResult};

/// Top-level configuration for the messaging service.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DmConfig {
    /// Storage settings.
    pub storage: StorageConfig,
    /// Input and throttling limits.
    pub limits: LimitsConfig,
}

impl DmConfig {
    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> DmResult<()> {
        if self.limits.max_message_chars == 0 {
            return Err(DmError::InvalidConfig(
                "limits.max_message_chars must be > 0".to_string(),
            ));
        }
        if self.limits.start_rate_max == 0 {
            return Err(DmError::InvalidConfig(
                "limits.start_rate_max must be > 0".to_string(),
            ));
        }
        if self.limits.start_rate_window_seconds == 0 {
            return Err(DmError::InvalidConfig(
                "limits.start_rate_window_seconds must be > 0".to_string(),
            ));
        }
        if self.storage.conversations_table.is_empty() || self.storage.messages_table.is_empty() {
            return Err(DmError::InvalidConfig(
                "storage table names must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Storage configuration for conversation data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
    /// Conversations table name.
    pub conversations_table: String,
    /// Messages table name.
    pub messages_table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("campus_dm.sqlite"),
            conversations_table: "dm_conversations".to_string(),
            messages_table: "dm_messages".to_string(),
        }
    }
}

/// Input and throttling limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum message length in characters.
    pub max_message_chars: usize,
    /// How many new conversations one party may start per window.
    pub start_rate_max: u32,
    /// Rate-limit window for starting conversations, in seconds.
    pub start_rate_window_seconds: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 2000,
            start_rate_max: 10,
            start_rate_window_seconds: 60 * 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(DmConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_limits() {
        let mut config = DmConfig::default();
        config.limits.max_message_chars = 0;
        assert!(config.validate().is_err());
    }
}
