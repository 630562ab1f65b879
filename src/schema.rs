//! Form schema documents (JSON or TOML)

use crate::error::{FormError, Result};
use crate::types::FieldDescriptor;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormSchema {
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}

impl FormSchema {
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        Self { fields }
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| FormError::InvalidFormat {
            message: format!("Invalid JSON schema: {}", e),
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| FormError::InvalidFormat {
            message: format!("Invalid TOML schema: {}", e),
        })
    }

    /// Load a schema file, picking the format from its extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| FormError::FileNotFound {
            path: format!("{}: {}", path.display(), e),
        })?;

        let schema = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content)?,
            Some("toml") => Self::from_toml_str(&content)?,
            _ => {
                return Err(FormError::InvalidFormat {
                    message: format!("Schema file {} must be .json or .toml format", path.display()),
                })
            }
        };

        log::info!("Loaded schema from {} ({} fields)", path.display(), schema.fields.len());
        Ok(schema)
    }

    pub fn field(&self, field_id: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.id == field_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExpressionMode, Value};
    use std::fs;
    use tempfile::TempDir;

    const JSON_SCHEMA: &str = r#"{
        "fields": [
            { "id": "x", "initialValue": 3 },
            { "id": "y", "expression": { "expression": "x * 2", "mode": "value", "dependencies": ["x"] } }
        ]
    }"#;

    #[test]
    fn test_load_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("form.json");
        fs::write(&path, JSON_SCHEMA).unwrap();

        let schema = FormSchema::load(&path).unwrap();
        assert_eq!(schema.fields.len(), 2);
        assert_eq!(schema.field("x").unwrap().initial_value, Some(Value::Number(3.0)));
        assert!(schema.field("y").unwrap().is_derived());
    }

    #[test]
    fn test_load_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("form.toml");
        fs::write(
            &path,
            r#"
[[fields]]
id = "age"
required = true

[[fields]]
id = "adult_section"

[fields.expression]
expression = "age >= 18"
mode = "visibility"
dependencies = ["age"]
debounceMs = 200
"#,
        )
        .unwrap();

        let schema = FormSchema::load(&path).unwrap();
        assert!(schema.field("age").unwrap().required);
        let spec = schema.field("adult_section").unwrap().expression.as_ref().unwrap();
        assert_eq!(spec.mode, ExpressionMode::Visibility);
        assert_eq!(spec.debounce_ms, Some(200));
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("form.yaml");
        fs::write(&path, "fields: []").unwrap();

        assert!(matches!(FormSchema::load(&path), Err(FormError::InvalidFormat { .. })));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            FormSchema::load("/definitely/not/here.json"),
            Err(FormError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            FormSchema::from_json_str("{ \"fields\": [ { \"id\": } ] }"),
            Err(FormError::InvalidFormat { .. })
        ));
    }
}
