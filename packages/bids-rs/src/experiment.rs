//! Per subject/session metadata records.

use crate::error::{BidsError, Result};
use crate::fields::{AttrValue, Fields};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Named attribute values of one subject/session.
///
/// Attribute names are either flat (`participant_id`) or segment-scoped
/// (`run01_datafile_path`). The record is built once, may receive derived
/// attributes from customization steps, and is only read by resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperimentRecord {
    attributes: Fields,
}

impl ExperimentRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(attributes: Fields) -> Self {
        Self { attributes }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        self.attributes.insert(name, value);
    }

    /// Attribute value; `None` when the attribute does not exist
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.attributes.get_str(name)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Full key-value export
    pub fn to_fields(&self) -> Fields {
        self.attributes.clone()
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.attributes.to_yaml_mapping())?)
    }

    pub fn from_json_value(value: &serde_json::Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            BidsError::InvalidConfig("experiment record must be a JSON object".to_string())
        })?;
        Ok(Self::from_fields(
            object
                .iter()
                .map(|(k, v)| (k.clone(), AttrValue::from_json(v)))
                .collect(),
        ))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Self::from_json_value(&serde_json::from_str(content)?)
    }

    /// One record per row of the CSV file at `path`
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Vec<Self>> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| BidsError::io(path, e))?;
        experiments_from_csv(file)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(content)?;
        let mapping = value.as_mapping().ok_or_else(|| {
            BidsError::InvalidConfig("experiment record must be a YAML mapping".to_string())
        })?;
        let mut record = Self::new();
        for (key, value) in mapping {
            if let Some(key) = key.as_str() {
                record.set(key, AttrValue::from_yaml(value));
            }
        }
        Ok(record)
    }

    /// Rename attributes and fill defaults according to a source config
    pub fn apply_source_config(&mut self, source: &SourceConfig) {
        if !source.fields.is_empty() {
            let renamed: Fields = self
                .attributes
                .iter()
                .map(|(name, value)| {
                    let name = source.fields.get(name).map(String::as_str).unwrap_or(name);
                    (name.to_string(), value.clone())
                })
                .collect();
            self.attributes = renamed;
        }
        for (name, value) in &source.defaults {
            let missing = self.get(name).map(AttrValue::is_null).unwrap_or(true);
            if missing {
                self.set(name.as_str(), AttrValue::from_json(value));
            }
        }
    }
}

/// Source-side description of the metadata export.
///
/// `fields` renames metadata columns to attribute names, `defaults` fills
/// attributes that are absent or empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub fields: HashMap<String, String>,
    #[serde(default)]
    pub defaults: HashMap<String, serde_json::Value>,
}

impl SourceConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BidsError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| BidsError::io(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Read one experiment per CSV row. Empty cells become null.
pub fn experiments_from_csv<R: std::io::Read>(reader: R) -> Result<Vec<ExperimentRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();

    let mut experiments = Vec::new();
    for row in csv_reader.records() {
        let row = row?;
        let mut record = ExperimentRecord::new();
        for (name, cell) in headers.iter().zip(row.iter()) {
            let value = if cell.is_empty() {
                AttrValue::Null
            } else {
                AttrValue::Text(cell.to_string())
            };
            record.set(name, value);
        }
        experiments.push(record);
    }
    Ok(experiments)
}

/// Load experiments from a CSV, JSON or YAML metadata file, chosen by extension.
pub fn load_experiments<P: AsRef<Path>>(path: P) -> Result<Vec<ExperimentRecord>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(BidsError::FileNotFound(path.to_path_buf()));
    }
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let experiments = match extension.as_str() {
        "csv" => ExperimentRecord::from_csv_path(path)?,
        "json" => {
            let content = std::fs::read_to_string(path).map_err(|e| BidsError::io(path, e))?;
            let value: serde_json::Value = serde_json::from_str(&content)?;
            match value {
                serde_json::Value::Array(items) => items
                    .iter()
                    .map(ExperimentRecord::from_json_value)
                    .collect::<Result<Vec<_>>>()?,
                other => vec![ExperimentRecord::from_json_value(&other)?],
            }
        }
        "yml" | "yaml" => {
            let content = std::fs::read_to_string(path).map_err(|e| BidsError::io(path, e))?;
            vec![ExperimentRecord::from_yaml_str(&content)?]
        }
        other => return Err(BidsError::UnknownFileExtension(other.to_string())),
    };

    log::info!("Loaded {} experiment(s) from {}", experiments.len(), path.display());
    Ok(experiments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builder_keeps_insertion_order() {
        let exp = ExperimentRecord::new()
            .with("participant_id", "01")
            .with("run01_id", "01")
            .with("run01_datafile_path", "/data/a.edf");
        assert_eq!(
            exp.attribute_names().collect::<Vec<_>>(),
            vec!["participant_id", "run01_id", "run01_datafile_path"]
        );
        assert_eq!(exp.get_str("run01_id"), Some("01"));
        assert!(exp.get("run02_id").is_none());
    }

    #[test]
    fn test_to_fields_is_a_copy() {
        let exp = ExperimentRecord::new().with("participant_id", "01");
        let mut fields = exp.to_fields();
        fields.insert("session_id", "02");
        assert_eq!(fields.len(), 2);
        assert_eq!(exp.len(), 1);
    }

    #[test]
    fn test_csv_rows_become_experiments() {
        let csv = "participant_id,session_id,run01_id,run02_id\n01,01,01,\n02,01,01,02\n";
        let experiments = experiments_from_csv(csv.as_bytes()).unwrap();
        assert_eq!(experiments.len(), 2);
        assert_eq!(experiments[0].get("run02_id"), Some(&AttrValue::Null));
        assert_eq!(experiments[1].get_str("run02_id"), Some("02"));
    }

    #[test]
    fn test_yaml_round_trip_keeps_values() {
        let exp = ExperimentRecord::new()
            .with("participant_id", "01")
            .with("task", AttrValue::Null);
        let yaml = exp.to_yaml().unwrap();
        let back = ExperimentRecord::from_yaml_str(&yaml).unwrap();
        assert_eq!(back.get_str("participant_id"), Some("01"));
        assert_eq!(back.get("task"), Some(&AttrValue::Null));
    }

    #[test]
    fn test_source_config_renames_and_fills() {
        let source: SourceConfig = serde_json::from_str(
            r#"{"fields": {"Subject": "participant_id"}, "defaults": {"session_id": "01"}}"#,
        )
        .unwrap();
        let mut exp = ExperimentRecord::new().with("Subject", "07").with("task", "rest");
        exp.apply_source_config(&source);

        assert_eq!(exp.get_str("participant_id"), Some("07"));
        assert!(exp.get("Subject").is_none());
        assert_eq!(exp.get_str("session_id"), Some("01"));
        assert_eq!(exp.get_str("task"), Some("rest"));
    }

    #[test]
    fn test_load_experiments_by_extension() {
        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(json, r#"[{{"participant_id": "01"}}, {{"participant_id": 2}}]"#).unwrap();
        let experiments = load_experiments(json.path()).unwrap();
        assert_eq!(experiments.len(), 2);
        assert_eq!(experiments[1].get_str("participant_id"), Some("2"));

        let other = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        assert!(matches!(
            load_experiments(other.path()),
            Err(BidsError::UnknownFileExtension(_))
        ));
    }
}
