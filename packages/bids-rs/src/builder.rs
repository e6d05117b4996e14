//! Per-experiment dataset pipeline.
//!
//! Experiments are processed one after the other, segments in configured
//! order. Nothing is rolled back: files written before a failure stay on
//! disk and the first error ends the build.

use crate::config::ProjectConfig;
use crate::convert::ConverterDispatch;
use crate::error::{BidsError, Result};
use crate::experiment::ExperimentRecord;
use crate::fields::Fields;
use crate::materialize::FileMaterializer;
use crate::metadata::{with_prefix, DatasetDescription, MetadataEmitter};
use crate::modality::{ModalityDescriptor, ModalityRegistry};
use crate::paths::PathTemplateEngine;
use crate::segment::{Resolution, SegmentResolver};
use crate::sink::EventSink;
use std::path::{Path, PathBuf};

/// What was produced for one experiment
#[derive(Debug, Clone)]
pub struct ExperimentReport {
    pub participant_id: String,
    pub session_id: Option<String>,
    pub data_dir: PathBuf,
    pub resolution: Resolution,
    /// Files written by converters
    pub converted: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub root: PathBuf,
    pub experiments: Vec<ExperimentReport>,
}

impl BuildReport {
    pub fn bundle_count(&self) -> usize {
        self.experiments.iter().map(|e| e.resolution.len()).sum()
    }

    /// Raw files copied into the dataset
    pub fn materialized(&self) -> Vec<&Path> {
        self.experiments
            .iter()
            .flat_map(|e| e.resolution.iter())
            .filter_map(|b| b.final_raw_data_path.as_deref())
            .collect()
    }
}

pub struct DatasetBuilder<'a> {
    config: ProjectConfig,
    descriptor: ModalityDescriptor,
    resolver: SegmentResolver,
    engine: PathTemplateEngine,
    dispatch: ConverterDispatch,
    sink: &'a dyn EventSink,
}

impl<'a> DatasetBuilder<'a> {
    /// Wire the pipeline for `config`.
    ///
    /// The project name must select a registered descriptor, otherwise
    /// `UnknownProject` is returned.
    pub fn new(
        config: ProjectConfig,
        registry: &ModalityRegistry,
        dispatch: ConverterDispatch,
        sink: &'a dyn EventSink,
    ) -> Result<Self> {
        let descriptor = registry.select(config.project_name())?.clone();
        sink.debug(&format!("Using the {} modality descriptor", descriptor.project));
        let resolver = SegmentResolver::from_config(&config, Some(&descriptor))?;
        let engine = PathTemplateEngine::from_config(&config)?;

        Ok(Self {
            config,
            descriptor,
            resolver,
            engine,
            dispatch,
            sink,
        })
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn descriptor(&self) -> &ModalityDescriptor {
        &self.descriptor
    }

    pub fn build<P: AsRef<Path>>(&self, root: P, experiments: &[ExperimentRecord]) -> Result<BuildReport> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| BidsError::io(root, e))?;
        let root = std::path::absolute(root).map_err(|e| BidsError::io(root, e))?;

        let emitter = MetadataEmitter::new(&root);
        if emitter.write_dataset_description(&DatasetDescription::from_config(&self.config)?, self.sink)? {
            self.sink.info(&format!("Wrote dataset description under {}", root.display()));
        }

        let mut reports = Vec::with_capacity(experiments.len());
        for (index, experiment) in experiments.iter().enumerate() {
            self.sink.info(&format!("Experiment {}/{}", index + 1, experiments.len()));
            reports.push(self.build_experiment(&root, &emitter, experiment)?);
        }

        Ok(BuildReport {
            root,
            experiments: reports,
        })
    }

    fn build_experiment(
        &self,
        root: &Path,
        emitter: &MetadataEmitter,
        experiment: &ExperimentRecord,
    ) -> Result<ExperimentReport> {
        let mut experiment = experiment.clone();
        self.descriptor.apply(&self.config, &mut experiment, self.sink);

        let mut resolution = self.resolver.resolve(&experiment, self.sink)?;

        let participant_id = required(&experiment, "participant_id")?;
        let session_id = if self.config.is_session_required() {
            Some(required(&experiment, "session_id")?)
        } else {
            None
        };
        let data_type = self
            .config
            .data_types()?
            .into_iter()
            .next()
            .ok_or_else(|| BidsError::InvalidConfig("no data type".to_string()))?;

        let mut data_dir = root.join(with_prefix("sub-", &participant_id));
        if let Some(ref session_id) = session_id {
            data_dir.push(with_prefix("ses-", session_id));
        }
        data_dir.push(&data_type);

        let materializer = FileMaterializer::new(&data_dir);
        let mut converted = Vec::new();
        for bundle in resolution.iter_mut() {
            self.engine.render(bundle, &experiment)?;
            materializer.materialize(bundle, self.sink)?;
            if let Some(produced) = self.dispatch.select_and_run(bundle, &experiment, &data_dir, self.sink)? {
                converted.extend(produced);
            }
        }

        emitter.add_participant(&MetadataEmitter::participant_row(&experiment), self.sink)?;
        if let Some(ref session_id) = session_id {
            let row: Fields = [("session_id", session_id.as_str())].into_iter().collect();
            emitter.add_sessions(&participant_id, &[row], self.sink)?;
        }

        self.sink.info(&format!(
            "sub-{}: {} segment(s) in {}",
            participant_id.trim_start_matches("sub-"),
            resolution.len(),
            data_dir.display()
        ));

        Ok(ExperimentReport {
            participant_id,
            session_id,
            data_dir,
            resolution,
            converted,
        })
    }
}

fn required(experiment: &ExperimentRecord, name: &str) -> Result<String> {
    experiment
        .get_str(name)
        .map(str::to_string)
        .ok_or_else(|| BidsError::MissingTemplateField(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
PROJECT_NAME: microscopy_confocal
modality: micr
data_types: micr
fields:
  segment: {value: chunk}
  segment_list: {value: [chunk01]}
  session_id: {required: true}
  output_filename_format: {default: "sub-{participant_id}_ses-{session_id}_chunk-{id}_{microscope_type}.tif"}
"#;

    #[test]
    fn test_session_level_directory() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("stack.tif");
        std::fs::write(&source, b"tiff").unwrap();

        let config = ProjectConfig::from_yaml_str(CONFIG).unwrap();
        let sink = MemorySink::new();
        let builder = DatasetBuilder::new(config, &ModalityRegistry::builtin(), ConverterDispatch::new("micr"), &sink).unwrap();
        assert_eq!(builder.descriptor().project, "microscopy_confocal");

        let experiment = ExperimentRecord::new()
            .with("participant_id", "01")
            .with("session_id", "02")
            .with("chunk01_id", "1")
            .with("chunk01_datafile_path", source);
        let report = builder.build(tmp.path().join("ds"), &[experiment]).unwrap();

        let expected = report.root.join("sub-01").join("ses-02").join("micr").join("sub-01_ses-02_chunk-1_CONF.tif");
        assert_eq!(report.materialized(), vec![expected.as_path()]);
        assert!(report.root.join("sub-01").join("sub-01_sessions.tsv").is_file());
        assert!(report.root.join("participants.tsv").is_file());
        assert!(sink.contains("has no converter"));
    }

    #[test]
    fn test_missing_session_id() {
        let tmp = TempDir::new().unwrap();
        let config = ProjectConfig::from_yaml_str(CONFIG).unwrap();
        let sink = MemorySink::new();
        let builder = DatasetBuilder::new(config, &ModalityRegistry::builtin(), ConverterDispatch::new("micr"), &sink).unwrap();
        let experiment = ExperimentRecord::new().with("participant_id", "01").with("chunk01_id", "1");

        let err = builder.build(tmp.path(), &[experiment]).unwrap_err();
        assert!(matches!(err, BidsError::MissingTemplateField(name) if name == "session_id"));
    }

    #[test]
    fn test_unknown_project_is_rejected() {
        let config = ProjectConfig::from_yaml_str(&CONFIG.replace("microscopy_confocal", "microscopy_confocl")).unwrap();
        let sink = MemorySink::new();
        let result = DatasetBuilder::new(config, &ModalityRegistry::builtin(), ConverterDispatch::new("micr"), &sink);
        assert!(matches!(result, Err(BidsError::UnknownProject(name)) if name == "microscopy_confocl"));
    }
}
