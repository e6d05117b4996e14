use crate::config::ProjectConfig;
use crate::error::Result;
use crate::experiment::ExperimentRecord;
use crate::fields::Fields;
use crate::segment::SegmentBundle;
use crate::template::Template;

/// Renders the canonical output filename of a segment
#[derive(Debug, Clone)]
pub struct PathTemplateEngine {
    template: Template,
    modality: String,
}

impl PathTemplateEngine {
    pub fn new(data_file_format: &str, modality: impl Into<String>) -> Result<Self> {
        Ok(Self {
            template: Template::parse(data_file_format)?,
            modality: modality.into(),
        })
    }

    pub fn from_config(config: &ProjectConfig) -> Result<Self> {
        Self::new(config.data_file_format()?, config.modality())
    }

    pub fn template(&self) -> &str {
        self.template.source()
    }

    /// Experiment attributes, overlaid by the bundle, plus `modality`
    pub fn context(&self, bundle: &SegmentBundle, experiment: &ExperimentRecord) -> Fields {
        let mut context = experiment.to_fields();
        context.overlay(&bundle.to_fields());
        context.insert("modality", self.modality.clone());
        context
    }

    /// Set `bundle.final_path`; nothing is touched on failure
    pub fn render(&self, bundle: &mut SegmentBundle, experiment: &ExperimentRecord) -> Result<()> {
        let final_path = self.template.render(&self.context(bundle, experiment))?;
        bundle.final_path = Some(final_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BidsError;
    use crate::fields::AttrValue;

    fn bundle() -> SegmentBundle {
        let fields: Fields = [("id", "01"), ("task", "reading"), ("run", "run01"), ("run_id", "01")]
            .into_iter()
            .collect();
        SegmentBundle {
            segment_key: "run01".to_string(),
            segment_id: "01".to_string(),
            fields,
            raw_data_path: None,
            final_path: None,
            final_raw_data_path: None,
            converter: None,
        }
    }

    #[test]
    fn test_render_uses_experiment_and_bundle() {
        let engine = PathTemplateEngine::new("sub-{participant_id}_task-{task}_run-{run_id}_{modality}.edf", "eyetrack").unwrap();
        let exp = ExperimentRecord::new().with("participant_id", "01").with("task", "rest");
        let mut bundle = bundle();
        engine.render(&mut bundle, &exp).unwrap();
        assert_eq!(
            bundle.final_path.as_deref(),
            Some("sub-01_task-reading_run-01_eyetrack.edf")
        );
    }

    #[test]
    fn test_modality_defaults_to_unknown() {
        let config = ProjectConfig::from_yaml_str(
            "fields:\n  output_filename_format: {default: \"{segment_id}_{modality}\"}\n",
        )
        .unwrap();
        let engine = PathTemplateEngine::from_config(&config).unwrap();
        let mut bundle = bundle();
        engine.render(&mut bundle, &ExperimentRecord::new()).unwrap();
        assert_eq!(bundle.final_path.as_deref(), Some("01_unknown"));
    }

    #[test]
    fn test_missing_field_leaves_bundle_untouched() {
        let engine = PathTemplateEngine::new("sub-{participant_id}_ses-{session_id}.edf", "eyetrack").unwrap();
        let exp = ExperimentRecord::new().with("participant_id", "01");
        let mut bundle = bundle();
        let err = engine.render(&mut bundle, &exp).unwrap_err();
        assert!(matches!(err, BidsError::MissingTemplateField(name) if name == "session_id"));
        assert!(bundle.final_path.is_none());
    }

    #[test]
    fn test_modality_wins_over_experiment() {
        let engine = PathTemplateEngine::new("{modality}", "micr").unwrap();
        let exp = ExperimentRecord::new().with("modality", AttrValue::from("anat"));
        let mut bundle = bundle();
        engine.render(&mut bundle, &exp).unwrap();
        assert_eq!(bundle.final_path.as_deref(), Some("micr"));
    }
}
