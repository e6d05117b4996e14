//! Read-only view over a project configuration document.
//!
//! The document is YAML. Only the keys consumed by the engine are looked at;
//! everything else is carried along untouched and never validated.

use crate::error::{BidsError, Result};
use serde_yaml::Value;
use std::path::{Path, PathBuf};

pub const DEFAULT_SEGMENT_TYPE: &str = "segment";
pub const DEFAULT_CUSTOM_PATTERN: &str = "{segment_key}_{field}";
pub const DEFAULT_RAW_DATA_PATH_PATTERN: &str = "{segment_key}_datafile_path";
pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone)]
pub struct ProjectConfig {
    source: Option<PathBuf>,
    global: Value,
}

impl ProjectConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let global: Value = serde_yaml::from_str(content)?;
        Self::from_value(global)
    }

    pub fn from_value(global: Value) -> Result<Self> {
        if !global.is_mapping() {
            return Err(BidsError::InvalidConfig(
                "project configuration must be a mapping".to_string(),
            ));
        }
        Ok(Self {
            source: None,
            global,
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BidsError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| BidsError::io(path, e))?;
        let mut config = Self::from_yaml_str(&content)?;
        config.source = Some(path.to_path_buf());
        log::debug!("Loaded project configuration from {}", path.display());
        Ok(config)
    }

    /// Path the configuration was loaded from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Top-level value for `key`
    pub fn global(&self, key: &str) -> Option<&Value> {
        self.global.get(key)
    }

    pub fn global_str(&self, key: &str) -> Option<&str> {
        self.global(key).and_then(Value::as_str)
    }

    /// Value under `fields.<key>`
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.global.get("fields").and_then(|fields| fields.get(key))
    }

    pub fn project_name(&self) -> &str {
        self.global_str("PROJECT_NAME").unwrap_or(UNKNOWN)
    }

    pub fn modalities(&self) -> Vec<String> {
        string_or_list(self.global("modality"))
    }

    /// First declared modality, `"unknown"` when none is declared
    pub fn modality(&self) -> String {
        self.modalities()
            .into_iter()
            .next()
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    pub fn data_types(&self) -> Result<Vec<String>> {
        let types = string_or_list(self.global("data_types"));
        if types.is_empty() {
            return Err(BidsError::InvalidConfig(
                "No data types defined in the project configuration.".to_string(),
            ));
        }
        Ok(types)
    }

    pub fn segment_type(&self) -> String {
        self.field("segment")
            .and_then(|v| v.get("value").or(Some(v)))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_SEGMENT_TYPE)
            .to_string()
    }

    /// Attribute name the segment identity is mirrored under.
    ///
    /// `fields.segment_id` may be given as a string or as `{value: ...}` and
    /// may reference `{segment}`. Falls back to `fallback`, then to
    /// `{segment}_id`.
    pub fn segment_id_attr(&self, fallback: Option<&str>) -> Result<String> {
        let segment_type = self.segment_type();
        let pattern = self
            .field("segment_id")
            .and_then(|v| v.get("value").or(Some(v)))
            .and_then(Value::as_str);

        match (pattern, fallback) {
            (Some(pattern), _) => crate::template::Template::parse(pattern)?
                .render_with(|name| (name == "segment").then(|| segment_type.clone())),
            (None, Some(name)) => Ok(name.to_string()),
            (None, None) => Ok(format!("{segment_type}_id")),
        }
    }

    pub fn segment_list(&self) -> Vec<String> {
        string_or_list(self.field("segment_list").and_then(|v| v.get("value")))
    }

    pub fn datafile_fields(&self) -> Vec<String> {
        string_or_list(self.field("datafilepaths_list").and_then(|v| v.get("value")))
    }

    pub fn is_session_required(&self) -> bool {
        self.field("session_id")
            .and_then(|v| v.get("required"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn data_file_format(&self) -> Result<&str> {
        self.field("output_filename_format")
            .and_then(|v| v.get("default"))
            .and_then(Value::as_str)
            .ok_or_else(|| BidsError::MissingConfigKey("fields.output_filename_format.default".to_string()))
    }

    pub fn custom_pattern(&self) -> &str {
        self.field("custom_pattern")
            .and_then(|v| v.get("pattern"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_CUSTOM_PATTERN)
    }

    pub fn raw_data_path_pattern(&self) -> &str {
        self.field("datafilepaths_list")
            .and_then(|v| v.get("raw_data_path_pattern"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_RAW_DATA_PATH_PATTERN)
    }

    /// Explicit `field -> stored key template` rows from `fields.field_aliases`
    pub fn field_aliases(&self) -> Vec<(String, String)> {
        let Some(mapping) = self.field("field_aliases").and_then(Value::as_mapping) else {
            return Vec::new();
        };
        mapping
            .iter()
            .filter_map(|(k, v)| Some((k.as_str()?.to_string(), v.as_str()?.to_string())))
            .collect()
    }
}

fn string_or_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Sequence(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
