//! Electrophysiology dataset units.
//!
//! A [`DatasetUnit`] collects the raw files of one subject/session under
//! composite `task-X_run-Y` keys and places them into the dataset tree.
//! Registration order is kept: it decides the split index of each file.

use crate::error::{BidsError, Result};
use crate::sink::EventSink;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How a raw file ends up at its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Copy,
    Link,
    Move,
    Convert,
}

impl FromStr for FileMode {
    type Err = BidsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "copy" => Ok(FileMode::Copy),
            "link" => Ok(FileMode::Link),
            "move" => Ok(FileMode::Move),
            "convert" => Ok(FileMode::Convert),
            _ => Err(BidsError::InvalidFileMode(s.to_string())),
        }
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileMode::Copy => "copy",
            FileMode::Link => "link",
            FileMode::Move => "move",
            FileMode::Convert => "convert",
        };
        f.write_str(name)
    }
}

/// Target format of [`FileMode::Convert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Nwb,
    Nix,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Nwb => ".nwb",
            OutputFormat::Nix => ".nix",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = BidsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim_start_matches('.').to_lowercase().as_str() {
            "nwb" => Ok(OutputFormat::Nwb),
            "nix" => Ok(OutputFormat::Nix),
            _ => Err(BidsError::InvalidOutputFormat(s.to_string())),
        }
    }
}

/// Whether the modality stores data under a session directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLevel {
    /// `sub-X/ses-Y/<modality>` (extracellular recordings)
    WithSession,
    /// `sub-X/<modality>` (intracellular recordings)
    WithoutSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    Absolute,
    Local,
}

/// Converts one raw file into `destination` in the requested format
pub trait FormatConverter {
    fn convert(&self, source: &Path, destination: &Path, format: OutputFormat) -> Result<()>;
}

pub struct DatasetUnit {
    sub_id: String,
    ses_id: String,
    modality: String,
    level: SessionLevel,
    basedir: Option<PathBuf>,
    filename_stem: Option<String>,
    data: Vec<(String, Vec<PathBuf>)>,
    exist_ok: bool,
    postfix: String,
    converter: Option<Box<dyn FormatConverter>>,
}

impl fmt::Debug for DatasetUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetUnit")
            .field("sub_id", &self.sub_id)
            .field("ses_id", &self.ses_id)
            .field("modality", &self.modality)
            .field("level", &self.level)
            .field("basedir", &self.basedir)
            .field("data", &self.data)
            .field("exist_ok", &self.exist_ok)
            .finish_non_exhaustive()
    }
}

impl DatasetUnit {
    pub fn new(
        sub_id: impl Into<String>,
        ses_id: impl Into<String>,
        modality: impl Into<String>,
        level: SessionLevel,
    ) -> Self {
        let modality = modality.into();
        Self {
            sub_id: sub_id.into(),
            ses_id: ses_id.into(),
            postfix: format!("_{modality}"),
            modality,
            level,
            basedir: None,
            filename_stem: None,
            data: Vec::new(),
            exist_ok: true,
            converter: None,
        }
    }

    /// Replace the `_<modality>` postfix appended before the suffix
    pub fn with_postfix(mut self, postfix: impl Into<String>) -> Self {
        self.postfix = postfix.into();
        self
    }

    /// Fail on existing destinations instead of replacing identical ones
    pub fn with_exist_ok(mut self, exist_ok: bool) -> Self {
        self.exist_ok = exist_ok;
        self
    }

    pub fn with_converter(mut self, converter: Box<dyn FormatConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn sub_id(&self) -> &str {
        &self.sub_id
    }

    pub fn ses_id(&self) -> &str {
        &self.ses_id
    }

    pub fn modality(&self) -> &str {
        &self.modality
    }

    pub fn level(&self) -> SessionLevel {
        self.level
    }

    pub fn basedir(&self) -> Option<&Path> {
        self.basedir.as_deref()
    }

    pub fn set_basedir<P: AsRef<Path>>(&mut self, basedir: P) -> Result<()> {
        let basedir = basedir.as_ref();
        if !basedir.exists() {
            return Err(BidsError::BaseDirectoryNotFound(basedir.to_path_buf()));
        }
        self.basedir = Some(basedir.to_path_buf());
        Ok(())
    }

    /// Registered files, in registration order
    pub fn data(&self) -> &[(String, Vec<PathBuf>)] {
        &self.data
    }

    pub fn files(&self, key: &str) -> Option<&[PathBuf]> {
        self.data
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, files)| files.as_slice())
    }

    /// Append `files` under the key built from `task` and `run`.
    ///
    /// Several files under one key are splits of a single recording.
    /// Returns the key.
    pub fn register<I, P>(&mut self, files: I, task: Option<&str>, run: Option<&str>) -> String
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let key = composite_key(task, run);
        let files = files.into_iter().map(Into::into);
        match self.data.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => existing.extend(files),
            None => self.data.push((key.clone(), files.collect())),
        }
        key
    }

    /// Register every file matching `pattern`, in sorted path order
    pub fn register_glob(
        &mut self,
        pattern: &str,
        task: Option<&str>,
        run: Option<&str>,
        sink: &dyn EventSink,
    ) -> Result<String> {
        let mut matches = Vec::new();
        for entry in glob::glob(pattern).map_err(|e| BidsError::Glob(e.to_string()))? {
            matches.push(entry.map_err(|e| BidsError::Glob(e.to_string()))?);
        }
        matches.sort();
        sink.debug(&format!("{} file(s) match '{}'", matches.len(), pattern));
        Ok(self.register(matches, task, run))
    }

    pub fn data_folder(&self, mode: PathMode) -> Result<PathBuf> {
        let mut path = PathBuf::from(format!("sub-{}", self.sub_id));
        if self.level == SessionLevel::WithSession {
            path.push(format!("ses-{}", self.ses_id));
        }
        path.push(&self.modality);

        match mode {
            PathMode::Local => Ok(path),
            PathMode::Absolute => {
                let basedir = self.basedir.as_ref().ok_or(BidsError::MissingBaseDirectory)?;
                Ok(basedir.join(path))
            }
        }
    }

    pub fn filename_stem(&self) -> Option<&str> {
        self.filename_stem.as_deref()
    }

    /// Create the data folder and fix the filename stem
    pub fn generate_directory_structure(&mut self) -> Result<PathBuf> {
        let data_folder = self.data_folder(PathMode::Absolute)?;
        std::fs::create_dir_all(&data_folder).map_err(|e| BidsError::io(&data_folder, e))?;

        self.filename_stem = Some(match self.level {
            SessionLevel::WithSession => format!("sub-{}_ses-{}", self.sub_id, self.ses_id),
            SessionLevel::WithoutSession => format!("sub-{}", self.sub_id),
        });
        Ok(data_folder)
    }

    /// Destination of every registered file, in registration order
    pub fn destinations(&self, mode: FileMode, output_format: OutputFormat) -> Result<Vec<(PathBuf, PathBuf)>> {
        let data_folder = self.data_folder(PathMode::Absolute)?;
        let stem = self
            .filename_stem
            .as_deref()
            .ok_or_else(|| BidsError::InvalidConfig("no filename stem set, generate the directory structure first".to_string()))?;

        let mut planned = Vec::new();
        for (key, files) in &self.data {
            let key = if key.is_empty() { String::new() } else { format!("_{key}") };
            for (i, file) in files.iter().enumerate() {
                let split = if files.len() > 1 { format!("_split-{i}") } else { String::new() };
                let suffix = match mode {
                    FileMode::Convert => output_format.extension().to_string(),
                    _ => file
                        .extension()
                        .map(|e| format!(".{}", e.to_string_lossy()))
                        .unwrap_or_default(),
                };
                let filename = format!("{stem}{key}{split}{}{suffix}", self.postfix);
                planned.push((file.clone(), data_folder.join(filename)));
            }
        }
        Ok(planned)
    }

    /// Place every registered file into the data folder. Returns the destinations.
    pub fn organize(&self, mode: FileMode, output_format: OutputFormat, sink: &dyn EventSink) -> Result<Vec<PathBuf>> {
        let planned = self.destinations(mode, output_format)?;
        let mut written = Vec::with_capacity(planned.len());
        for (source, destination) in planned {
            match mode {
                FileMode::Convert => self.convert_file(&source, &destination, output_format)?,
                _ => create_file(&source, &destination, mode, self.exist_ok)?,
            }
            sink.debug(&format!("{} {} -> {}", mode, source.display(), destination.display()));
            written.push(destination);
        }
        sink.info(&format!("Organized {} file(s) for sub-{}", written.len(), self.sub_id));
        Ok(written)
    }

    fn convert_file(&self, source: &Path, destination: &Path, format: OutputFormat) -> Result<()> {
        let converter = self.converter.as_ref().ok_or_else(|| {
            BidsError::ConversionFailed(format!("no converter available for {}", source.display()))
        })?;
        // converted bytes never match the raw source, so a tolerated
        // destination is simply replaced
        if destination.exists() {
            if !self.exist_ok {
                return Err(BidsError::DestinationExists(destination.to_path_buf()));
            }
            std::fs::remove_file(destination).map_err(|e| BidsError::io(destination, e))?;
        }
        converter.convert(source, destination, format)
    }
}

/// `task-X_run-Y`, either part omitted when absent
pub fn composite_key(task: Option<&str>, run: Option<&str>) -> String {
    let mut parts = Vec::new();
    if let Some(task) = task {
        parts.push(format!("task-{task}"));
    }
    if let Some(run) = run {
        parts.push(format!("run-{run}"));
    }
    parts.join("_")
}

/// Create `destination` from `source` with `mode`.
///
/// An existing destination fails with `DestinationExists` unless
/// `exist_ok`; when tolerated its content must equal the source's.
pub fn create_file(source: &Path, destination: &Path, mode: FileMode, exist_ok: bool) -> Result<()> {
    if destination.exists() {
        if !exist_ok {
            return Err(BidsError::DestinationExists(destination.to_path_buf()));
        }
        if !same_content(source, destination)? {
            return Err(BidsError::ContentMismatch {
                origin: source.to_path_buf(),
                destination: destination.to_path_buf(),
            });
        }
        std::fs::remove_file(destination).map_err(|e| BidsError::io(destination, e))?;
    }

    match mode {
        FileMode::Copy => {
            std::fs::copy(source, destination).map_err(|e| BidsError::io(destination, e))?;
        }
        FileMode::Link => {
            std::fs::hard_link(source, destination).map_err(|e| BidsError::io(destination, e))?;
        }
        FileMode::Move => {
            if std::fs::rename(source, destination).is_err() {
                std::fs::copy(source, destination).map_err(|e| BidsError::io(destination, e))?;
                std::fs::remove_file(source).map_err(|e| BidsError::io(source, e))?;
            }
        }
        FileMode::Convert => return Err(BidsError::InvalidFileMode(mode.to_string())),
    }
    Ok(())
}

fn same_content(a: &Path, b: &Path) -> Result<bool> {
    let meta_a = std::fs::metadata(a).map_err(|e| BidsError::io(a, e))?;
    let meta_b = std::fs::metadata(b).map_err(|e| BidsError::io(b, e))?;
    if meta_a.len() != meta_b.len() {
        return Ok(false);
    }

    let mut file_a = std::fs::File::open(a).map_err(|e| BidsError::io(a, e))?;
    let mut file_b = std::fs::File::open(b).map_err(|e| BidsError::io(b, e))?;
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];
    loop {
        let n = file_a.read(&mut buf_a)?;
        if n == 0 {
            return Ok(true);
        }
        file_b.read_exact(&mut buf_b[..n])?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}
