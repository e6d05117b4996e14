//! Sidecar and tabular descriptors written next to the data.
//!
//! Tables are tab separated with a header row. Cells without a value are
//! written as `n/a`. Dataset-level tables are appended to across subjects;
//! per-recording tables are rewritten.

use crate::config::ProjectConfig;
use crate::error::{BidsError, Result};
use crate::experiment::ExperimentRecord;
use crate::fields::{AttrValue, Fields};
use crate::organize::{DatasetUnit, PathMode};
use crate::sink::EventSink;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const NOT_AVAILABLE: &str = "n/a";
pub const BIDS_VERSION: &str = "1.6.0";

pub const PARTICIPANT_COLUMNS: &[&str] = &["participant_id", "species", "age", "sex", "birthday"];
pub const SAMPLE_COLUMNS: &[&str] = &["sample_id", "sample_type", "participant_id"];
pub const SESSION_COLUMNS: &[&str] = &["session_id", "acq_time"];
pub const RUN_COLUMNS: &[&str] = &["run_id", "acq_time"];
pub const PROBE_COLUMNS: &[&str] = &[
    "probe_id",
    "type",
    "coordinate_space",
    "material",
    "x",
    "y",
    "z",
    "shape",
    "contact_size",
];
pub const CONTACT_COLUMNS: &[&str] = &[
    "contact_id",
    "probe_id",
    "shank_id",
    "impedance",
    "material",
    "x",
    "y",
    "z",
    "shape",
    "contact_size",
];
pub const CHANNEL_COLUMNS: &[&str] = &[
    "channel_id",
    "contact_id",
    "type",
    "units",
    "sampling_frequency",
    "gain",
    "status",
];

/// Contents of `dataset_description.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DatasetDescription {
    pub name: String,
    #[serde(rename = "BIDSVersion")]
    pub bids_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledgements: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub how_to_acknowledge: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub funding: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub references_and_links: Vec<String>,
}

impl Default for DatasetDescription {
    fn default() -> Self {
        Self {
            name: String::new(),
            bids_version: BIDS_VERSION.to_string(),
            license: None,
            authors: Vec::new(),
            acknowledgements: None,
            how_to_acknowledge: None,
            funding: Vec::new(),
            references_and_links: Vec::new(),
        }
    }
}

impl DatasetDescription {
    /// From the optional `dataset_description` mapping of the project
    /// configuration; the name falls back to the project name.
    pub fn from_config(config: &ProjectConfig) -> Result<Self> {
        let mut description: Self = match config.global("dataset_description") {
            Some(value) if !value.is_null() => serde_yaml::from_value(value.clone())?,
            _ => Self::default(),
        };
        if description.name.is_empty() {
            description.name = config.project_name().to_string();
        }
        Ok(description)
    }
}

/// Per-recording descriptors of a [`DatasetUnit`]
#[derive(Debug, Clone, Default)]
pub struct UnitMetadata {
    pub probes: Vec<Fields>,
    pub contacts: Vec<Fields>,
    pub channels: Vec<Fields>,
    /// Written verbatim as the `_ephys.json` sidecar
    pub ephys: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct MetadataEmitter {
    root: PathBuf,
}

impl MetadataEmitter {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `dataset_description.json` unless it already exists
    pub fn write_dataset_description(&self, description: &DatasetDescription, sink: &dyn EventSink) -> Result<bool> {
        let path = self.root.join("dataset_description.json");
        if path.exists() {
            sink.debug(&format!("{} exists, keeping it", path.display()));
            return Ok(false);
        }
        write_json(&path, description)?;
        Ok(true)
    }

    /// Participant row of an experiment, `participant_id` carrying the `sub-` prefix
    pub fn participant_row(experiment: &ExperimentRecord) -> Fields {
        PARTICIPANT_COLUMNS
            .iter()
            .map(|column| {
                let value = match (*column, experiment.get_str(column)) {
                    ("participant_id", Some(id)) => AttrValue::from(with_prefix("sub-", id)),
                    _ => experiment.get(column).cloned().unwrap_or(AttrValue::Null),
                };
                (*column, value)
            })
            .collect()
    }

    /// Append a participant unless its id is already listed. Returns whether a row was added.
    pub fn add_participant(&self, row: &Fields, sink: &dyn EventSink) -> Result<bool> {
        let path = self.root.join("participants.tsv");
        let added = append_rows(&path, PARTICIPANT_COLUMNS, std::slice::from_ref(row), Some("participant_id"), sink)?;
        Ok(added > 0)
    }

    pub fn add_samples(&self, rows: &[Fields], sink: &dyn EventSink) -> Result<usize> {
        append_rows(&self.root.join("samples.tsv"), SAMPLE_COLUMNS, rows, Some("sample_id"), sink)
    }

    /// Append rows to `sub-<id>/sub-<id>_sessions.tsv`
    pub fn add_sessions(&self, sub_id: &str, rows: &[Fields], sink: &dyn EventSink) -> Result<usize> {
        let subject = with_prefix("sub-", sub_id);
        let path = self.root.join(&subject).join(format!("{subject}_sessions.tsv"));
        let rows: Vec<Fields> = rows
            .iter()
            .map(|row| {
                let mut row = row.clone();
                if let Some(id) = row.get_str("session_id").map(|id| with_prefix("ses-", id)) {
                    row.insert("session_id", id);
                }
                row
            })
            .collect();
        append_rows(&path, SESSION_COLUMNS, &rows, Some("session_id"), sink)
    }

    /// Probes, contacts, channels and ephys sidecars for every registered
    /// key, plus a runs table for keys with a `run-<n>` entity.
    pub fn write_unit_sidecars(
        &self,
        unit: &DatasetUnit,
        metadata: &UnitMetadata,
        sink: &dyn EventSink,
    ) -> Result<Vec<PathBuf>> {
        let folder = unit.data_folder(PathMode::Absolute)?;
        let stem = unit
            .filename_stem()
            .ok_or_else(|| BidsError::InvalidConfig("no filename stem set, generate the directory structure first".to_string()))?;
        std::fs::create_dir_all(&folder).map_err(|e| BidsError::io(&folder, e))?;

        let mut written = Vec::new();
        for (key, _) in unit.data() {
            let prefix = if key.is_empty() { stem.to_string() } else { format!("{stem}_{key}") };

            for (name, columns, rows) in [
                ("probes", PROBE_COLUMNS, &metadata.probes),
                ("contacts", CONTACT_COLUMNS, &metadata.contacts),
                ("channels", CHANNEL_COLUMNS, &metadata.channels),
            ] {
                let path = folder.join(format!("{prefix}_{name}.tsv"));
                write_table(&path, columns, rows)?;
                written.push(path);
            }

            let ephys = folder.join(format!("{prefix}_ephys.json"));
            write_json(&ephys, &metadata.ephys)?;
            written.push(ephys);

            if let Some(run) = run_entity(key) {
                let runs_stem = prefix.split("run-").next().unwrap_or(&prefix);
                let path = folder.join(format!("{runs_stem}runs.tsv"));
                let row: Fields = [("run_id", format!("run-{run}"))].into_iter().collect();
                append_rows(&path, RUN_COLUMNS, &[row], Some("run_id"), sink)?;
                if !written.contains(&path) {
                    written.push(path);
                }
            }
        }
        sink.info(&format!("Wrote {} descriptor file(s) under {}", written.len(), folder.display()));
        Ok(written)
    }
}

pub(crate) fn with_prefix(prefix: &str, id: &str) -> String {
    if id.starts_with(prefix) {
        id.to_string()
    } else {
        format!("{prefix}{id}")
    }
}

fn run_entity(key: &str) -> Option<&str> {
    static RUN: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RUN.get_or_init(|| Regex::new(r"run-(\d+)").ok()).as_ref()?;
    re.captures(key).and_then(|c| c.get(1)).map(|m| m.as_str())
}

fn cell(row: &Fields, column: &str) -> String {
    match row.get(column) {
        Some(value) if !value.is_null() => value.to_string(),
        _ => NOT_AVAILABLE.to_string(),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = std::fs::File::create(path).map_err(|e| BidsError::io(path, e))?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

fn write_table(path: &Path, columns: &[&str], rows: &[Fields]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(columns)?;
    for row in rows {
        writer.write_record(columns.iter().map(|c| cell(row, c)))?;
    }
    writer.flush()?;
    Ok(())
}

/// Append `rows`, creating the table with `columns` as header when missing.
///
/// An existing table keeps its own header. Rows whose `unique` column value
/// is already present are skipped. Returns the number of rows added.
fn append_rows(
    path: &Path,
    columns: &[&str],
    rows: &[Fields],
    unique: Option<&str>,
    sink: &dyn EventSink,
) -> Result<usize> {
    let mut header: Option<Vec<String>> = None;
    let mut seen = HashSet::new();

    if path.exists() {
        let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_path(path)?;
        let existing: Vec<String> = reader.headers()?.iter().map(String::from).collect();
        if let Some(index) = unique.and_then(|u| existing.iter().position(|h| h == u)) {
            for record in reader.records() {
                if let Some(value) = record?.get(index) {
                    seen.insert(value.to_string());
                }
            }
        }
        header = Some(existing);
    } else if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| BidsError::io(parent, e))?;
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| BidsError::io(path, e))?;
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(file);
    let header = match header {
        Some(header) => header,
        None => {
            writer.write_record(columns)?;
            columns.iter().map(|c| c.to_string()).collect()
        }
    };

    let mut added = 0;
    for row in rows {
        if let Some(value) = unique.and_then(|u| row.get_str(u)) {
            if !seen.insert(value.to_string()) {
                sink.debug(&format!("{}: '{}' already listed", path.display(), value));
                continue;
            }
        }
        writer.write_record(header.iter().map(|c| cell(row, c)))?;
        added += 1;
    }
    writer.flush()?;
    Ok(added)
}
