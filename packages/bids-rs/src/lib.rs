pub mod builder;
pub mod config;
pub mod convert;
pub mod error;
pub mod experiment;
pub mod fields;
pub mod materialize;
pub mod metadata;
pub mod modality;
pub mod organize;
pub mod paths;
pub mod segment;
pub mod sink;
pub mod template;

pub use builder::{BuildReport, DatasetBuilder, ExperimentReport};
pub use config::ProjectConfig;
pub use convert::{find_program, ConversionRoutine, ConverterDispatch, ExternalProgram};
pub use error::{BidsError, Result};
pub use experiment::{load_experiments, ExperimentRecord, SourceConfig};
pub use fields::{AttrValue, Fields};
pub use materialize::FileMaterializer;
pub use metadata::{DatasetDescription, MetadataEmitter};
pub use modality::{ModalityDescriptor, ModalityRegistry};
pub use organize::{DatasetUnit, FileMode, OutputFormat, SessionLevel};
pub use paths::PathTemplateEngine;
pub use segment::{resolve, Resolution, SegmentBundle, SegmentResolver};
pub use sink::{EventSink, LogSink, MemorySink};
