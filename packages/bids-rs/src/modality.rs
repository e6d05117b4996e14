//! Per-project modality descriptors.
//!
//! A descriptor is plain data: which attribute carries the segment id, which
//! type tag the experiment receives and which global configuration keys are
//! copied onto the experiment before segments are resolved. Descriptors are
//! selected by project name.

use crate::config::ProjectConfig;
use crate::error::{BidsError, Result};
use crate::experiment::ExperimentRecord;
use crate::fields::AttrValue;
use crate::sink::EventSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalityDescriptor {
    /// Project name this descriptor is selected by
    pub project: String,
    /// Attribute the segment id is mirrored under when the
    /// configuration does not name one
    pub id_field_name: Option<String>,
    /// Experiment attribute receiving the type tag
    pub type_field: Option<String>,
    /// Tag used when the configuration does not set `type_field`
    pub default_type_tag: String,
    /// Global configuration keys copied onto the experiment when present
    pub extra_context_fields: Vec<String>,
}

impl ModalityDescriptor {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            id_field_name: None,
            type_field: None,
            default_type_tag: String::new(),
            extra_context_fields: Vec::new(),
        }
    }

    pub fn with_id_field(mut self, name: impl Into<String>) -> Self {
        self.id_field_name = Some(name.into());
        self
    }

    pub fn with_type(mut self, field: impl Into<String>, default_tag: impl Into<String>) -> Self {
        self.type_field = Some(field.into());
        self.default_type_tag = default_tag.into();
        self
    }

    pub fn with_extra_field(mut self, key: impl Into<String>) -> Self {
        self.extra_context_fields.push(key.into());
        self
    }

    pub fn microscopy_confocal() -> Self {
        Self::new("microscopy_confocal").with_type("microscope_type", "CONF")
    }

    pub fn eyetracking() -> Self {
        Self::new("eyetracking")
            .with_id_field("run_id")
            .with_extra_field("eyetracking_type")
    }

    /// Add the derived attributes this modality needs before resolution.
    pub fn apply(&self, config: &ProjectConfig, experiment: &mut ExperimentRecord, sink: &dyn EventSink) {
        if let Some(ref field) = self.type_field {
            let tag = config
                .global_str(field)
                .unwrap_or(&self.default_type_tag)
                .to_string();
            sink.debug(&format!("{}: {} = {}", self.project, field, tag));
            experiment.set(field.as_str(), tag);
        }

        for key in &self.extra_context_fields {
            if let Some(value) = config.global(key) {
                let value = AttrValue::from_yaml(value);
                if !value.is_null() {
                    experiment.set(key.as_str(), value);
                }
            }
        }
    }
}

/// Project name -> descriptor table
#[derive(Debug, Clone, Default)]
pub struct ModalityRegistry {
    descriptors: Vec<ModalityDescriptor>,
}

impl ModalityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the microscopy and eyetracking descriptors
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(ModalityDescriptor::microscopy_confocal());
        registry.register(ModalityDescriptor::eyetracking());
        registry
    }

    /// Add a descriptor, replacing any previous one for the same project
    pub fn register(&mut self, descriptor: ModalityDescriptor) {
        self.descriptors.retain(|d| d.project != descriptor.project);
        self.descriptors.push(descriptor);
    }

    pub fn select(&self, project: &str) -> Result<&ModalityDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.project == project)
            .ok_or_else(|| BidsError::UnknownProject(project.to_string()))
    }

    pub fn projects(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.project.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    #[test]
    fn test_builtin_selection() {
        let registry = ModalityRegistry::builtin();
        assert_eq!(registry.select("eyetracking").unwrap().id_field_name.as_deref(), Some("run_id"));
        assert!(registry.select("microscopy_confocal").is_ok());
        assert!(matches!(
            registry.select("fmri"),
            Err(BidsError::UnknownProject(name)) if name == "fmri"
        ));
    }

    #[test]
    fn test_microscope_type_defaults_to_tag() {
        let config = ProjectConfig::from_yaml_str("PROJECT_NAME: microscopy_confocal\n").unwrap();
        let mut exp = ExperimentRecord::new().with("participant_id", "01");
        ModalityDescriptor::microscopy_confocal().apply(&config, &mut exp, &MemorySink::new());
        assert_eq!(exp.get_str("microscope_type"), Some("CONF"));
    }

    #[test]
    fn test_microscope_type_from_config() {
        let config = ProjectConfig::from_yaml_str(
            "PROJECT_NAME: microscopy_confocal\nmicroscope_type: 2PE\nobjective: 40x\n",
        )
        .unwrap();
        let descriptor = ModalityDescriptor::microscopy_confocal().with_extra_field("objective");
        let mut exp = ExperimentRecord::new();
        descriptor.apply(&config, &mut exp, &MemorySink::new());
        assert_eq!(exp.get_str("microscope_type"), Some("2PE"));
        assert_eq!(exp.get_str("objective"), Some("40x"));
    }

    #[test]
    fn test_eyetracking_type_only_from_config() {
        let descriptor = ModalityDescriptor::eyetracking();
        let config = ProjectConfig::from_yaml_str("PROJECT_NAME: eyetracking\n").unwrap();
        let mut exp = ExperimentRecord::new().with("participant_id", "01");
        descriptor.apply(&config, &mut exp, &MemorySink::new());
        assert!(exp.get("eyetracking_type").is_none());
        assert_eq!(exp.len(), 1);

        let config = ProjectConfig::from_yaml_str("PROJECT_NAME: eyetracking\neyetracking_type: EyeLink\n").unwrap();
        descriptor.apply(&config, &mut exp, &MemorySink::new());
        assert_eq!(exp.get_str("eyetracking_type"), Some("EyeLink"));
    }

    #[test]
    fn test_register_replaces_same_project() {
        let mut registry = ModalityRegistry::builtin();
        registry.register(ModalityDescriptor::new("eyetracking").with_id_field("trial_id"));
        assert_eq!(registry.projects().count(), 2);
        assert_eq!(
            registry.select("eyetracking").unwrap().id_field_name.as_deref(),
            Some("trial_id")
        );
    }
}
