use crate::error::{FormError, Result};
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub default_debounce_ms: Option<u64>,
    pub strict_visibility: Option<bool>,
    pub debug_mode: Option<bool>,
    pub output_format: Option<String>,
}

pub fn load(config_path: &str) -> Result<ConfigFile> {
    let config_content = fs::read_to_string(config_path).map_err(|e| FormError::FileNotFound {
        path: format!("Config file {}: {}", config_path, e),
    })?;

    let config = if config_path.ends_with(".json") {
        serde_json::from_str(&config_content).map_err(|e| FormError::InvalidFormat {
            message: format!("Invalid JSON config: {}", e),
        })?
    } else if config_path.ends_with(".toml") {
        toml::from_str(&config_content).map_err(|e| FormError::InvalidFormat {
            message: format!("Invalid TOML config: {}", e),
        })?
    } else {
        return Err(FormError::InvalidFormat {
            message: "Config file must be .json or .toml format".to_string(),
        });
    };

    log::info!("Loaded configuration from {}", config_path);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_toml_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("fieldflow.toml");
        fs::write(&path, "default_debounce_ms = 250\nstrict_visibility = true\n").unwrap();

        let config = load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.default_debounce_ms, Some(250));
        assert_eq!(config.strict_visibility, Some(true));
        assert_eq!(config.output_format, None);
    }

    #[test]
    fn test_load_json_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("fieldflow.json");
        fs::write(&path, r#"{ "output_format": "json", "debug_mode": true }"#).unwrap();

        let config = load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.output_format.as_deref(), Some("json"));
        assert_eq!(config.debug_mode, Some(true));
    }

    #[test]
    fn test_rejects_other_extensions() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("fieldflow.ini");
        fs::write(&path, "x=1").unwrap();

        assert!(matches!(load(path.to_str().unwrap()), Err(FormError::InvalidFormat { .. })));
    }
}
