use serde::{Deserialize, Serialize};

use ogr_types::TransactionAuthor;

use crate::error::{RepoResult, RepositoryError};

/// Configuration for a [`Repository`](crate::Repository).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Capacity of each change observer's channel. Observers that fall
    /// further behind lag and recompute.
    pub change_channel_capacity: usize,
    /// Number of values a live stream buffers before the engine waits on
    /// the consumer.
    pub subscription_buffer: usize,
    /// Author tag applied to mutations that do not name one.
    pub default_author: Option<TransactionAuthor>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            change_channel_capacity: 1024,
            subscription_buffer: 32,
            default_author: None,
        }
    }
}

impl RepositoryConfig {
    /// Tag every mutation with `author` unless the call names its own.
    pub fn with_author(mut self, author: impl Into<TransactionAuthor>) -> Self {
        self.default_author = Some(author.into());
        self
    }

    pub fn with_subscription_buffer(mut self, buffer: usize) -> Self {
        self.subscription_buffer = buffer.max(1);
        self
    }

    pub fn with_change_channel_capacity(mut self, capacity: usize) -> Self {
        self.change_channel_capacity = capacity.max(1);
        self
    }

    /// Parse a configuration from TOML. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> RepoResult<Self> {
        toml::from_str(text).map_err(|e| RepositoryError::unknown("config", e))
    }
}
