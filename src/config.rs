use serde::{Deserialize, Serialize};
use std::fs;

use crate::error::Result;
use crate::fossil_calibrations::DEFAULT_FOSSIL_CACHE_DIR;
use crate::outlier_pruner::DEFAULT_DEVIATION_MULTIPLIER;

/// Batch configuration, loadable from a JSON file with every field
/// optional. Without a service URL the fossil store runs cache-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub fossil_cache_dir: String,
    pub fossil_service_url: Option<String>,
    pub tool_command: String,
    pub tool_args: Vec<String>,
    pub tool_template_path: Option<String>,
    pub tool_timeout_secs: Option<u64>,
    pub deviation_multiplier: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            fossil_cache_dir: DEFAULT_FOSSIL_CACHE_DIR.to_string(),
            fossil_service_url: None,
            tool_command: "r8s".to_string(),
            tool_args: vec!["-b".to_string(), "-f".to_string()],
            tool_template_path: None,
            tool_timeout_secs: None,
            deviation_multiplier: DEFAULT_DEVIATION_MULTIPLIER,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &str) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = PipelineConfig::default();
        assert_eq!(config.tool_command, "r8s");
        assert_eq!(config.deviation_multiplier, 8.0);
        assert!(config.fossil_service_url.is_none());
        assert!(config.tool_timeout_secs.is_none());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "fossil_cache_dir": "/tmp/fossils", "tool_timeout_secs": 600 }"#,
        )
        .unwrap();
        let config = PipelineConfig::from_json_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.fossil_cache_dir, "/tmp/fossils");
        assert_eq!(config.tool_timeout_secs, Some(600));
        assert_eq!(config.tool_command, "r8s");
        assert_eq!(config.deviation_multiplier, 8.0);
    }
}
