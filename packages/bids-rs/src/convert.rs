//! Format converter dispatch.
//!
//! Converters are looked up by the extension of the materialized raw file.
//! The conversion itself is performed by an external routine; this module
//! only prepares its inputs, runs it and collects what it produced.

use crate::error::{BidsError, Result};
use crate::experiment::ExperimentRecord;
use crate::fields::Fields;
use crate::segment::SegmentBundle;
use crate::sink::EventSink;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

/// Eye-tracking conversion program name
pub const PROGRAM_NAME: &str = "eye2bids";

/// Environment variable holding the full program path
pub const PROGRAM_ENV_VAR: &str = "EYE2BIDS_PATH";

/// Environment variable holding an install prefix (`$EYE2BIDS_HOME/bin/eye2bids`)
pub const PROGRAM_HOME_ENV_VAR: &str = "EYE2BIDS_HOME";

pub const DEFAULT_PROGRAM_PATHS: &[&str] = &["~/.local/bin", "/usr/local/bin", "/usr/bin", "/opt/eye2bids/bin"];

/// Extension the eye-tracking converter is registered for
pub const EDF_EXTENSION: &str = "edf";

/// Locate the conversion program.
///
/// Search order: explicit path, `$EYE2BIDS_PATH`, `$EYE2BIDS_HOME/bin`,
/// `$PATH`, then [`DEFAULT_PROGRAM_PATHS`].
pub fn find_program(explicit_path: Option<&str>) -> Option<PathBuf> {
    fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                return PathBuf::from(home).join(rest);
            }
        }
        PathBuf::from(path)
    }

    if let Some(path) = explicit_path {
        let p = expand_path(path);
        return p.exists().then_some(p);
    }

    if let Ok(env_path) = std::env::var(PROGRAM_ENV_VAR) {
        let p = expand_path(&env_path);
        if p.exists() {
            return Some(p);
        }
    }

    if let Ok(home_path) = std::env::var(PROGRAM_HOME_ENV_VAR) {
        let p = expand_path(&home_path).join("bin").join(PROGRAM_NAME);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            let p = dir.join(PROGRAM_NAME);
            if p.is_file() {
                return Some(p);
            }
        }
    }

    DEFAULT_PROGRAM_PATHS
        .iter()
        .map(|dir| expand_path(dir).join(PROGRAM_NAME))
        .find(|p| p.exists())
}

/// An external conversion routine: (source, metadata document, output directory)
pub trait ConversionRoutine {
    fn name(&self) -> &str;

    fn run(&self, input: &Path, metadata: &Path, output_dir: &Path, sink: &dyn EventSink) -> Result<()>;
}

/// Runs the conversion program as a child process and waits for it
#[derive(Debug, Clone)]
pub struct ExternalProgram {
    program: Option<PathBuf>,
}

impl ExternalProgram {
    pub fn new(program: Option<PathBuf>) -> Self {
        Self { program }
    }

    /// Use whatever [`find_program`] discovers
    pub fn discover() -> Self {
        Self::new(find_program(None))
    }

    pub fn program(&self) -> Option<&Path> {
        self.program.as_deref()
    }
}

impl ConversionRoutine for ExternalProgram {
    fn name(&self) -> &str {
        PROGRAM_NAME
    }

    fn run(&self, input: &Path, metadata: &Path, output_dir: &Path, sink: &dyn EventSink) -> Result<()> {
        let program = self.program.as_ref().ok_or_else(|| {
            BidsError::ProgramNotFound(format!(
                "'{}' not found. Set ${} or ${}, or install to one of: {:?}",
                PROGRAM_NAME, PROGRAM_ENV_VAR, PROGRAM_HOME_ENV_VAR, DEFAULT_PROGRAM_PATHS
            ))
        })?;

        let mut command = Command::new(program);
        command
            .arg("--input_file")
            .arg(input)
            .arg("--metadata_file")
            .arg(metadata)
            .arg("--output_dir")
            .arg(output_dir);

        sink.info(&format!("Executing conversion command: {:?}", command));
        let start_time = std::time::Instant::now();
        let output = command
            .output()
            .map_err(|e| BidsError::ConversionFailed(format!("Failed to execute {}: {}", program.display(), e)))?;
        sink.info(&format!("Conversion completed in {:.2}s", start_time.elapsed().as_secs_f64()));

        if !output.status.success() {
            let stderr_str = String::from_utf8_lossy(&output.stderr);
            sink.error(&format!("{} failed with status: {}", PROGRAM_NAME, output.status));
            sink.error(&format!("stderr: {}", stderr_str));
            return Err(BidsError::ConversionFailed(format!(
                "{} failed with status: {}. stderr: {}",
                PROGRAM_NAME, output.status, stderr_str
            )));
        }
        Ok(())
    }
}

/// Inputs of one converter instance
#[derive(Debug, Clone)]
pub struct ConverterParams {
    pub raw_file: PathBuf,
    /// Externally supplied metadata document; an ephemeral one is written
    /// from `context` when absent
    pub metadata_document: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub context: Fields,
}

pub trait Converter {
    /// Convert and return the files placed in the output directory
    fn convert(&self, sink: &dyn EventSink) -> Result<Vec<PathBuf>>;
}

pub trait ConverterFactory {
    fn name(&self) -> &str;

    fn create(&self, params: ConverterParams) -> Result<Box<dyn Converter>>;
}

/// Eye-tracking EDF converter backed by a [`ConversionRoutine`]
pub struct EdfConverter {
    params: ConverterParams,
    routine: Arc<dyn ConversionRoutine>,
}

impl EdfConverter {
    pub fn new(params: ConverterParams, routine: Arc<dyn ConversionRoutine>) -> Result<Self> {
        if let Some(ref document) = params.metadata_document {
            let is_yml = document
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("yml"))
                .unwrap_or(false);
            if !is_yml {
                return Err(BidsError::InvalidMetadataDocument(document.clone()));
            }
        }
        Ok(Self { params, routine })
    }
}

impl Converter for EdfConverter {
    fn convert(&self, sink: &dyn EventSink) -> Result<Vec<PathBuf>> {
        // Lives until the end of this call, removed on drop whatever the outcome
        let mut ephemeral = None;
        let metadata = match self.params.metadata_document {
            Some(ref document) => document.clone(),
            None => {
                let mut file = tempfile::Builder::new()
                    .prefix("bids-metadata-")
                    .suffix(".yml")
                    .tempfile()?;
                serde_yaml::to_writer(&mut file, &self.params.context.to_yaml_mapping())?;
                file.flush()?;
                let path = file.path().to_path_buf();
                ephemeral = Some(file);
                path
            }
        };

        let staging = tempfile::Builder::new().prefix("bids-convert-").tempdir()?;
        self.routine
            .run(&self.params.raw_file, &metadata, staging.path(), sink)?;

        std::fs::create_dir_all(&self.params.output_dir)
            .map_err(|e| BidsError::io(&self.params.output_dir, e))?;
        let mut produced = Vec::new();
        for entry in std::fs::read_dir(staging.path()).map_err(|e| BidsError::io(staging.path(), e))? {
            let entry = entry?;
            let destination = self.params.output_dir.join(entry.file_name());
            move_entry(&entry.path(), &destination)?;
            produced.push(destination);
        }
        produced.sort();

        drop(ephemeral);
        Ok(produced)
    }
}

fn move_entry(source: &Path, destination: &Path) -> Result<()> {
    if std::fs::rename(source, destination).is_ok() {
        return Ok(());
    }
    // rename fails across file systems
    if source.is_dir() {
        std::fs::create_dir_all(destination).map_err(|e| BidsError::io(destination, e))?;
        for entry in std::fs::read_dir(source).map_err(|e| BidsError::io(source, e))? {
            let entry = entry?;
            move_entry(&entry.path(), &destination.join(entry.file_name()))?;
        }
        std::fs::remove_dir_all(source).map_err(|e| BidsError::io(source, e))
    } else {
        std::fs::copy(source, destination).map_err(|e| BidsError::io(destination, e))?;
        std::fs::remove_file(source).map_err(|e| BidsError::io(source, e))
    }
}

pub struct EdfConverterFactory {
    routine: Arc<dyn ConversionRoutine>,
}

impl EdfConverterFactory {
    pub fn new(routine: Arc<dyn ConversionRoutine>) -> Self {
        Self { routine }
    }
}

impl ConverterFactory for EdfConverterFactory {
    fn name(&self) -> &str {
        EDF_EXTENSION
    }

    fn create(&self, params: ConverterParams) -> Result<Box<dyn Converter>> {
        Ok(Box::new(EdfConverter::new(params, Arc::clone(&self.routine))?))
    }
}

/// Extension -> converter factory table
pub struct ConverterDispatch {
    modality: String,
    metadata_document: Option<PathBuf>,
    factories: HashMap<String, Box<dyn ConverterFactory>>,
}

impl ConverterDispatch {
    /// Dispatch with no converters registered
    pub fn new(modality: impl Into<String>) -> Self {
        Self {
            modality: modality.into(),
            metadata_document: None,
            factories: HashMap::new(),
        }
    }

    /// Dispatch with the `.edf` eye-tracking converter
    pub fn with_defaults(modality: impl Into<String>, routine: Arc<dyn ConversionRoutine>) -> Self {
        let mut dispatch = Self::new(modality);
        dispatch.register(EDF_EXTENSION, Box::new(EdfConverterFactory::new(routine)));
        dispatch
    }

    /// Hand every converter this document instead of an ephemeral one
    pub fn with_metadata_document(mut self, document: impl Into<PathBuf>) -> Self {
        self.metadata_document = Some(document.into());
        self
    }

    pub fn register(&mut self, extension: &str, factory: Box<dyn ConverterFactory>) {
        self.factories.insert(normalize_extension(extension), factory);
    }

    pub fn factory_for(&self, extension: &str) -> Option<&dyn ConverterFactory> {
        self.factories
            .get(&normalize_extension(extension))
            .map(|f| f.as_ref())
    }

    pub fn extensions(&self) -> Vec<&str> {
        let mut extensions: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        extensions.sort_unstable();
        extensions
    }

    /// Pick a converter from the extension of `final_raw_data_path` and run it.
    ///
    /// An unregistered extension is logged and leaves `bundle.converter`
    /// unset; it is not an error. Returns the produced files when a
    /// converter ran.
    pub fn select_and_run(
        &self,
        bundle: &mut SegmentBundle,
        experiment: &ExperimentRecord,
        output_dir: &Path,
        sink: &dyn EventSink,
    ) -> Result<Option<Vec<PathBuf>>> {
        bundle.converter = None;
        let Some(raw_file) = bundle.final_raw_data_path.clone() else {
            sink.debug(&format!("{}: nothing materialized, skipping conversion", bundle.segment_key));
            return Ok(None);
        };

        let extension = raw_file
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string();
        let Some(factory) = self.factory_for(&extension) else {
            let reason = BidsError::UnknownFileExtension(format!(".{extension}"));
            sink.info(&format!("Modality {} has no converter: {}", self.modality, reason));
            return Ok(None);
        };

        let mut context = experiment.to_fields();
        context.overlay(&bundle.to_fields());
        let converter = factory.create(ConverterParams {
            raw_file,
            metadata_document: self.metadata_document.clone(),
            output_dir: output_dir.to_path_buf(),
            context,
        })?;
        bundle.converter = Some(factory.name().to_string());

        sink.info(&format!("{}: converting with '{}'", bundle.segment_key, factory.name()));
        let produced = converter.convert(sink)?;
        sink.info(&format!("{}: {} converted file(s)", bundle.segment_key, produced.len()));
        Ok(Some(produced))
    }
}

fn normalize_extension(extension: &str) -> String {
    extension.trim_start_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Writes one file per invocation and remembers the metadata it saw
    #[derive(Default)]
    struct FakeRoutine {
        seen_metadata: RefCell<Vec<(PathBuf, String)>>,
        fail: bool,
    }

    impl ConversionRoutine for FakeRoutine {
        fn name(&self) -> &str {
            "fake"
        }

        fn run(&self, input: &Path, metadata: &Path, output_dir: &Path, _sink: &dyn EventSink) -> Result<()> {
            let content = std::fs::read_to_string(metadata)?;
            self.seen_metadata
                .borrow_mut()
                .push((metadata.to_path_buf(), content));
            if self.fail {
                return Err(BidsError::ConversionFailed("boom".to_string()));
            }
            let stem = input.file_stem().unwrap().to_string_lossy();
            std::fs::write(output_dir.join(format!("{stem}_eyetrack.tsv")), b"samples")?;
            Ok(())
        }
    }

    fn bundle_with(raw: &Path) -> SegmentBundle {
        SegmentBundle {
            segment_key: "run01".to_string(),
            segment_id: "01".to_string(),
            fields: [("id", "01"), ("task", "reading")].into_iter().collect(),
            raw_data_path: Some(raw.to_path_buf()),
            final_path: None,
            final_raw_data_path: Some(raw.to_path_buf()),
            converter: None,
        }
    }

    #[test]
    fn test_unknown_extension_is_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let raw = tmp.path().join("sub-01_run-01.xyz");
        std::fs::write(&raw, b"x").unwrap();

        let dispatch = ConverterDispatch::with_defaults("eyetrack", Arc::new(FakeRoutine::default()));
        let sink = MemorySink::new();
        let mut bundle = bundle_with(&raw);
        let result = dispatch
            .select_and_run(&mut bundle, &ExperimentRecord::new(), tmp.path(), &sink)
            .unwrap();

        assert!(result.is_none());
        assert!(bundle.converter.is_none());
        assert!(sink.contains("has no converter"));
        assert!(sink.contains(".xyz"));
    }

    #[test]
    fn test_edf_converter_runs_and_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let raw = tmp.path().join("sub-01_run-01.EDF");
        std::fs::write(&raw, b"edf").unwrap();
        let out = tmp.path().join("beh");

        let routine = Arc::new(FakeRoutine::default());
        let dispatch = ConverterDispatch::with_defaults("eyetrack", routine.clone());
        let exp = ExperimentRecord::new().with("participant_id", "P7").with("task", "rest");
        let mut bundle = bundle_with(&raw);

        let produced = dispatch
            .select_and_run(&mut bundle, &exp, &out, &MemorySink::new())
            .unwrap()
            .unwrap();

        assert_eq!(bundle.converter.as_deref(), Some(EDF_EXTENSION));
        assert_eq!(produced, vec![out.join("sub-01_run-01_eyetrack.tsv")]);
        assert!(produced[0].is_file());

        let seen = routine.seen_metadata.borrow();
        let (metadata_path, content) = &seen[0];
        assert!(!metadata_path.exists(), "ephemeral metadata document must be removed");
        assert!(content.contains("participant_id: P7"));
        // bundle values win over experiment values
        assert!(content.contains("task: reading"));
    }

    #[test]
    fn test_ephemeral_document_removed_on_failure() {
        let tmp = TempDir::new().unwrap();
        let raw = tmp.path().join("a.edf");
        std::fs::write(&raw, b"edf").unwrap();

        let routine = Arc::new(FakeRoutine {
            fail: true,
            ..Default::default()
        });
        let dispatch = ConverterDispatch::with_defaults("eyetrack", routine.clone());
        let mut bundle = bundle_with(&raw);
        let err = dispatch
            .select_and_run(&mut bundle, &ExperimentRecord::new(), tmp.path(), &MemorySink::new())
            .unwrap_err();

        assert!(matches!(err, BidsError::ConversionFailed(_)));
        let seen = routine.seen_metadata.borrow();
        assert!(!seen[0].0.exists());
    }

    #[test]
    fn test_external_metadata_document_is_kept() {
        let tmp = TempDir::new().unwrap();
        let raw = tmp.path().join("a.edf");
        std::fs::write(&raw, b"edf").unwrap();
        let document = tmp.path().join("metadata.yml");
        std::fs::write(&document, "Manufacturer: SR-Research\n").unwrap();

        let routine = Arc::new(FakeRoutine::default());
        let dispatch = ConverterDispatch::with_defaults("eyetrack", routine.clone())
            .with_metadata_document(&document);
        let mut bundle = bundle_with(&raw);
        dispatch
            .select_and_run(&mut bundle, &ExperimentRecord::new(), tmp.path(), &MemorySink::new())
            .unwrap();

        assert!(document.exists());
        assert_eq!(routine.seen_metadata.borrow()[0].0, document);
    }

    #[test]
    fn test_metadata_document_must_be_yml() {
        let params = ConverterParams {
            raw_file: PathBuf::from("a.edf"),
            metadata_document: Some(PathBuf::from("metadata.json")),
            output_dir: PathBuf::from("out"),
            context: Fields::new(),
        };
        let result = EdfConverter::new(params, Arc::new(FakeRoutine::default()));
        assert!(matches!(result, Err(BidsError::InvalidMetadataDocument(_))));
    }

    #[test]
    fn test_external_program_without_binary() {
        let routine = ExternalProgram::new(None);
        let err = routine
            .run(Path::new("a.edf"), Path::new("m.yml"), Path::new("out"), &MemorySink::new())
            .unwrap_err();
        assert!(matches!(err, BidsError::ProgramNotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_external_program_reports_through_sink() {
        let sink = MemorySink::new();
        ExternalProgram::new(Some(PathBuf::from("/bin/true")))
            .run(Path::new("a.edf"), Path::new("m.yml"), Path::new("out"), &sink)
            .unwrap();
        assert!(sink.contains("--input_file"));
        assert!(sink.contains("Conversion completed"));

        let sink = MemorySink::new();
        let err = ExternalProgram::new(Some(PathBuf::from("/bin/false")))
            .run(Path::new("a.edf"), Path::new("m.yml"), Path::new("out"), &sink)
            .unwrap_err();
        assert!(matches!(err, BidsError::ConversionFailed(_)));
        assert!(sink
            .events()
            .iter()
            .any(|(level, message)| *level == crate::sink::Level::Error && message.contains("failed with status")));
    }

    #[test]
    fn test_find_program_explicit_missing() {
        assert!(find_program(Some("/nonexistent/eye2bids")).is_none());
    }

    #[test]
    fn test_extension_normalization() {
        let dispatch = ConverterDispatch::with_defaults("eyetrack", Arc::new(FakeRoutine::default()));
        assert!(dispatch.factory_for(".EDF").is_some());
        assert!(dispatch.factory_for("edf").is_some());
        assert!(dispatch.factory_for("czi").is_none());
        assert_eq!(dispatch.extensions(), vec!["edf"]);
    }
}
