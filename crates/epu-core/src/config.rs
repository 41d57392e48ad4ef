//! Daemon configuration, parsed from TOML (spec §10.2).

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::EngineSpec;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("serializing config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpumSection {
    pub store_path: String,
    pub decide_tick_secs: u64,
}

impl Default for EpumSection {
    fn default() -> Self {
        Self {
            store_path: "epum.redb".to_string(),
            decide_tick_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdcSection {
    pub store_path: String,
}

impl Default for PdcSection {
    fn default() -> Self {
        Self {
            store_path: "pdc.redb".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSection {
    pub bind_address: String,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8088".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSection {
    pub snapshot_interval_secs: u64,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            snapshot_interval_secs: 60,
        }
    }
}

/// Top-level daemon configuration: `[epum]`, `[pdc]`, `[ee_registry]`,
/// `[api]`, `[metrics]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub epum: EpumSection,
    #[serde(default)]
    pub pdc: PdcSection,
    #[serde(default)]
    pub ee_registry: Vec<EngineSpec>,
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub metrics: MetricsSection,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            epum: EpumSection::default(),
            pdc: PdcSection::default(),
            ee_registry: Vec::new(),
            api: ApiSection::default(),
            metrics: MetricsSection::default(),
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// A minimal single-domain scaffold, useful for `epuctl init`-style flows.
    pub fn scaffold() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_through_toml() {
        let cfg = DaemonConfig::default();
        let text = cfg.to_toml_string().unwrap();
        let parsed: DaemonConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.epum.decide_tick_secs, cfg.epum.decide_tick_secs);
        assert_eq!(parsed.api.bind_address, cfg.api.bind_address);
    }

    #[test]
    fn ee_registry_parses_multiple_entries() {
        let text = r#"
            [epum]
            store_path = "epum.redb"
            decide_tick_secs = 5

            [[ee_registry]]
            deployable_type = "worker"
            engine_id = "worker-ee"
            slots = 4
            base_need = 1

            [[ee_registry]]
            deployable_type = "gpu-worker"
            engine_id = "gpu-ee"
            slots = 1
            base_need = 0
        "#;
        let cfg: DaemonConfig = toml::from_str(text).unwrap();
        assert_eq!(cfg.ee_registry.len(), 2);
        assert_eq!(cfg.ee_registry[0].slots, 4);
    }
}
