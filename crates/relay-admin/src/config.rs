//! `relay-admin` configuration file.
//!
//! A JSON document with optional `session` and `sampler` sections:
//!
//! ```json
//! { "session": { "requestTimeoutMs": 3000 }, "sampler": { "intervalMs": 500 } }
//! ```

use anyhow::{Context, Result};
use nostr_client::{SamplerConfig, SessionConfig};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub session: SessionConfig,
    pub sampler: SamplerConfig,
}

impl AdminConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("invalid relay-admin config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.sampler.interval_ms > 0,
            "sampler.intervalMs must be greater than zero"
        );
        Ok(())
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json)
                .with_context(|| format!("failed to parse {}", path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
        }
    }
}
