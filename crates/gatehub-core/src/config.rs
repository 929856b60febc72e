use std::time::Duration;

use anyhow::Result;
use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_state_dir() -> String {
    "state".to_string()
}

fn default_sweep_secs() -> u64 {
    12 * 60 * 60
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct HubConfig {
    /// Root directory for records, files, logs, and the cache snapshot.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    /// Background cache sweep cadence in seconds.
    #[serde(default = "default_sweep_secs")]
    pub cache_sweep_secs: u64,
    /// Whether a non-admin editing an admin's permissions silently keeps the
    /// `admin` grant in place (see `users.permissions.update`).
    #[serde(default = "default_true")]
    pub preserve_admin_on_edit: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            cache_sweep_secs: default_sweep_secs(),
            preserve_admin_on_edit: true,
        }
    }
}

impl HubConfig {
    /// Defaults overridden by `GATEHUB_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(dir) = std::env::var("GATEHUB_STATE_DIR") {
            if !dir.trim().is_empty() {
                cfg.state_dir = dir;
            }
        }
        if let Some(secs) = std::env::var("GATEHUB_CACHE_SWEEP_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            cfg.cache_sweep_secs = secs;
        }
        cfg
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_secs.max(1))
    }
}

static CONFIG_SCHEMA: Lazy<Validator> = Lazy::new(|| {
    let schema = schemars::schema_for!(HubConfig);
    let schema_value = serde_json::to_value(&schema).expect("schema value");
    validator_for(&schema_value).expect("valid schema")
});

/// JSON schema describing the configuration structure.
///
/// # Panics
///
/// Panics if schema generation fails; this indicates a programming error.
pub fn config_schema_json() -> serde_json::Value {
    let schema = schemars::schema_for!(HubConfig);
    serde_json::to_value(&schema).expect("schema json")
}

/// Load a TOML config file, validating it against the generated schema so
/// typos fail loudly instead of silently falling back to defaults.
pub fn load_config(path: &str) -> Result<HubConfig> {
    let content = std::fs::read_to_string(path)?;
    let raw: toml::Value = toml::from_str(&content)?;
    let json_value = serde_json::to_value(&raw)?;
    let validation_errors: Vec<_> = CONFIG_SCHEMA
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(anyhow::anyhow!(validation_errors.join(", ")));
    }
    let cfg: HubConfig = toml::from_str(&content)?;
    Ok(cfg)
}
