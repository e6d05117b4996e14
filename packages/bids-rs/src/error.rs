use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BidsError {
    #[error("Segment ID not found for {0}")]
    MissingSegmentIdentifier(String),

    #[error("Template references missing field: {0}")]
    MissingTemplateField(String),

    #[error("Malformed template '{template}': {reason}")]
    TemplateSyntax { template: String, reason: String },

    #[error("Unknown file format: {0}")]
    UnknownFileExtension(String),

    #[error("Destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("File content of source ({}) and destination ({}) differs", .origin.display(), .destination.display())]
    ContentMismatch { origin: PathBuf, destination: PathBuf },

    #[error("Invalid file creation mode \"{0}\"")]
    InvalidFileMode(String),

    #[error("Invalid output data format \"{0}\"")]
    InvalidOutputFormat(String),

    #[error("No base directory set")]
    MissingBaseDirectory,

    #[error("Base directory does not exist: {}", .0.display())]
    BaseDirectoryNotFound(PathBuf),

    #[error("Unknown project config: {0}, perhaps check your config file?")]
    UnknownProject(String),

    #[error("Missing configuration key: {0}")]
    MissingConfigKey(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Input file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Check the metadata file extension; it must be '.yml': {}", .0.display())]
    InvalidMetadataDocument(PathBuf),

    #[error("Conversion failed: {0}")]
    ConversionFailed(String),

    #[error("Conversion program not found: {0}")]
    ProgramNotFound(String),

    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid glob pattern: {0}")]
    Glob(String),
}

impl BidsError {
    /// Attach the offending path to an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BidsError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, BidsError>;
