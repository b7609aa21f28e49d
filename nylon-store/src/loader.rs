//! Reads `RuntimeConfig` from the `-c` file and `ProxyConfig` fragments from
//! `config_dir`, merging the latter in filename order so deployments can
//! split routes/services/plugins across files and still get deterministic
//! precedence on key collisions.

use nylon_core::config::{ProxyConfig, RuntimeConfig};
use nylon_core::error::NylonError;
use std::path::Path;

pub fn load_runtime(path: &Path) -> Result<RuntimeConfig, NylonError> {
    let raw = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&raw).map_err(|e| NylonError::ConfigError(format!("{}: {e}", path.display())))
}

/// Loads and shallow-merges every `*.yaml`/`*.yml` file directly under
/// `config_dir`. Returns an empty, already-valid `ProxyConfig` when no
/// directory is configured.
pub fn load_proxy_config(config_dir: Option<&Path>) -> Result<ProxyConfig, NylonError> {
    let Some(dir) = config_dir else {
        return Ok(ProxyConfig::default());
    };

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml")))
        .collect();
    entries.sort();

    let mut merged = ProxyConfig::default();
    for path in entries {
        let raw = std::fs::read_to_string(&path)?;
        let fragment: ProxyConfig = serde_yaml::from_str(&raw)
            .map_err(|e| NylonError::ConfigError(format!("{}: {e}", path.display())))?;
        merged.merge(fragment);
    }

    merged.validate().map_err(NylonError::ConfigError)?;
    Ok(merged)
}
