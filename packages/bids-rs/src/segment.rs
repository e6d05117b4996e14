//! Segment resolution.
//!
//! For every configured segment key the resolver collects the experiment
//! attributes named `{segment_key}_{field}`, reads each field through the
//! alias table, and requires the resulting bundle to carry an `id`.

use crate::config::ProjectConfig;
use crate::error::{BidsError, Result};
use crate::experiment::ExperimentRecord;
use crate::fields::{AttrValue, Fields};
use crate::modality::ModalityDescriptor;
use crate::sink::EventSink;
use crate::template::Template;
use std::path::PathBuf;

/// Field every segment must provide
pub const ID_FIELD: &str = "id";

/// Resolved fields of one segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentBundle {
    pub segment_key: String,
    pub segment_id: String,
    /// Prefix-stripped fields plus the segment type and id attribute
    pub fields: Fields,
    pub raw_data_path: Option<PathBuf>,
    /// Rendered output path, set by the path template engine
    pub final_path: Option<String>,
    /// Location of the materialized raw file
    pub final_raw_data_path: Option<PathBuf>,
    /// Converter picked for this bundle, if any
    pub converter: Option<String>,
}

impl SegmentBundle {
    pub fn get(&self, field: &str) -> Option<&AttrValue> {
        self.fields.get(field)
    }

    /// Everything the bundle knows, as one flat record
    pub fn to_fields(&self) -> Fields {
        let mut all = self.fields.clone();
        all.insert("raw_data_path", self.raw_data_path.clone());
        all.insert("segment_id", self.segment_id.clone());
        if let Some(ref final_path) = self.final_path {
            all.insert("final_path", final_path.clone());
        }
        if let Some(ref path) = self.final_raw_data_path {
            all.insert("final_raw_data_path", path.clone());
        }
        all
    }
}

/// Resolved bundles in segment list order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    bundles: Vec<SegmentBundle>,
}

impl Resolution {
    pub fn get(&self, segment_key: &str) -> Option<&SegmentBundle> {
        self.bundles.iter().find(|b| b.segment_key == segment_key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.bundles.iter().map(|b| b.segment_key.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SegmentBundle> {
        self.bundles.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, SegmentBundle> {
        self.bundles.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

impl IntoIterator for Resolution {
    type Item = SegmentBundle;
    type IntoIter = std::vec::IntoIter<SegmentBundle>;

    fn into_iter(self) -> Self::IntoIter {
        self.bundles.into_iter()
    }
}

/// Maps a segment field to the attribute it is stored under.
///
/// Fields without an explicit row use the default pattern. Patterns may use
/// `{segment_key}`, `{field}` and `{<segment_type>_key}`.
#[derive(Debug, Clone)]
pub struct AliasTable {
    default: Template,
    rows: Vec<(String, Template)>,
}

impl AliasTable {
    pub fn new(default_pattern: &str) -> Result<Self> {
        Ok(Self {
            default: Template::parse(default_pattern)?,
            rows: Vec::new(),
        })
    }

    pub fn with_alias(mut self, field: impl Into<String>, pattern: &str) -> Result<Self> {
        let field = field.into();
        let template = Template::parse(pattern)?;
        self.rows.retain(|(name, _)| *name != field);
        self.rows.push((field, template));
        Ok(self)
    }

    pub fn from_config(config: &ProjectConfig) -> Result<Self> {
        let mut table = Self::new(config.custom_pattern())?;
        for (field, pattern) in config.field_aliases() {
            table = table.with_alias(field, &pattern)?;
        }
        Ok(table)
    }

    pub fn stored_key(&self, segment_type: &str, segment_key: &str, field: &str) -> Result<String> {
        let template = self
            .rows
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, t)| t)
            .unwrap_or(&self.default);
        let alias = format!("{segment_type}_key");
        template.render_with(|name| match name {
            "segment_key" => Some(segment_key.to_string()),
            "field" => Some(field.to_string()),
            n if n == alias => Some(segment_key.to_string()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SegmentResolver {
    segment_type: String,
    segment_id_attr: String,
    segment_list: Vec<String>,
    aliases: AliasTable,
    raw_data_path_pattern: Template,
}

impl SegmentResolver {
    pub fn from_config(config: &ProjectConfig, descriptor: Option<&ModalityDescriptor>) -> Result<Self> {
        let fallback = descriptor.and_then(|d| d.id_field_name.as_deref());
        Ok(Self {
            segment_type: config.segment_type(),
            segment_id_attr: config.segment_id_attr(fallback)?,
            segment_list: config.segment_list(),
            aliases: AliasTable::from_config(config)?,
            raw_data_path_pattern: Template::parse(config.raw_data_path_pattern())?,
        })
    }

    pub fn segment_type(&self) -> &str {
        &self.segment_type
    }

    pub fn segment_id_attr(&self) -> &str {
        &self.segment_id_attr
    }

    pub fn segment_list(&self) -> &[String] {
        &self.segment_list
    }

    /// Resolve every configured segment of `experiment`.
    ///
    /// Fails on the first segment without an id; no partial result is returned.
    pub fn resolve(&self, experiment: &ExperimentRecord, sink: &dyn EventSink) -> Result<Resolution> {
        let mut bundles = Vec::with_capacity(self.segment_list.len());
        for segment_key in &self.segment_list {
            bundles.push(self.resolve_segment(segment_key, experiment, sink)?);
        }
        Ok(Resolution { bundles })
    }

    fn resolve_segment(
        &self,
        segment_key: &str,
        experiment: &ExperimentRecord,
        sink: &dyn EventSink,
    ) -> Result<SegmentBundle> {
        let prefix = format!("{segment_key}_");
        let mut fields = Fields::new();

        for name in experiment.attribute_names() {
            let Some(field) = name.strip_prefix(&prefix) else {
                continue;
            };
            if field.is_empty() {
                continue;
            }
            let stored = self.aliases.stored_key(&self.segment_type, segment_key, field)?;
            let value = experiment.get(&stored).cloned().unwrap_or(AttrValue::Null);
            fields.insert(field, value);
        }
        sink.debug(&format!(
            "{}: fields [{}]",
            segment_key,
            fields.keys().collect::<Vec<_>>().join(", ")
        ));

        fields.insert(self.segment_type.as_str(), segment_key);

        let alias = format!("{}_key", self.segment_type);
        let raw_key = self.raw_data_path_pattern.render_with(|name| {
            (name == "segment_key" || name == alias).then(|| segment_key.to_string())
        })?;
        // an empty path counts as absent
        let raw_data_path = experiment
            .get(&raw_key)
            .and_then(AttrValue::as_path)
            .filter(|path| !path.as_os_str().is_empty())
            .map(PathBuf::from);

        let segment_id = fields
            .get_str(ID_FIELD)
            .map(str::to_string)
            .ok_or_else(|| BidsError::MissingSegmentIdentifier(segment_key.to_string()))?;
        fields.insert(self.segment_id_attr.as_str(), segment_id.clone());

        Ok(SegmentBundle {
            segment_key: segment_key.to_string(),
            segment_id,
            fields,
            raw_data_path,
            final_path: None,
            final_raw_data_path: None,
            converter: None,
        })
    }
}

/// Resolve `experiment` against `config` without a modality descriptor.
pub fn resolve(config: &ProjectConfig, experiment: &ExperimentRecord, sink: &dyn EventSink) -> Result<Resolution> {
    SegmentResolver::from_config(config, None)?.resolve(experiment, sink)
}
