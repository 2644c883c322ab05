//! Coordinator configuration.
//!
//! [`VaultConfig`] is plain serde data so hosts can keep it next to their own
//! settings. Every field has a default; an empty JSON object is a valid config.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    Result,
    constants::{DEFAULT_API_TIMEOUT_SECS, DEFAULT_GRACE_PERIOD_MS},
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// How long pipelines keep running after their last observer detaches.
    pub grace_period_ms: u64,

    /// Whether `unlock_and_sync` follows a successful unlock with a sync.
    pub sync_on_unlock: bool,

    /// Settings for the HTTP remote, when one is used.
    pub api: Option<ApiConfig>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            sync_on_unlock: true,
            api: None,
        }
    }
}

impl VaultConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period_ms = grace.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a config file. A missing file yields the default config.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: Url,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Sent as a bearer token on every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_API_TIMEOUT_SECS
}

impl ApiConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout_secs: DEFAULT_API_TIMEOUT_SECS,
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Build the reqwest-backed remote for this config.
    #[cfg(feature = "http")]
    pub fn connect(&self) -> Result<crate::remote::HttpRemoteApi> {
        crate::remote::HttpRemoteApi::new(self)
    }
}
