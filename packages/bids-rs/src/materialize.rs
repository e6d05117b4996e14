//! Places raw segment files at their canonical location.
//!
//! The destination file name is the basename of the rendered `final_path`,
//! not the raw file's own name. The source extension is therefore whatever
//! the output filename template produces.

use crate::error::{BidsError, Result};
use crate::segment::SegmentBundle;
use crate::sink::EventSink;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FileMaterializer {
    destination_dir: PathBuf,
}

impl FileMaterializer {
    pub fn new<P: AsRef<Path>>(destination_dir: P) -> Self {
        Self {
            destination_dir: destination_dir.as_ref().to_path_buf(),
        }
    }

    pub fn destination_dir(&self) -> &Path {
        &self.destination_dir
    }

    /// Create the destination directory; an existing directory is fine
    pub fn ensure_destination(&self) -> Result<()> {
        std::fs::create_dir_all(&self.destination_dir)
            .map_err(|e| BidsError::io(&self.destination_dir, e))
    }

    /// Where a rendered bundle's raw file ends up
    pub fn destination_for(&self, final_path: &str) -> Result<PathBuf> {
        let basename = Path::new(final_path)
            .file_name()
            .ok_or_else(|| BidsError::InvalidConfig(format!("rendered path has no file name: '{final_path}'")))?;
        let destination = self.destination_dir.join(basename);
        std::path::absolute(&destination).map_err(|e| BidsError::io(&destination, e))
    }

    /// Copy the bundle's raw file into place and record `final_raw_data_path`.
    ///
    /// Returns `None` without writing anything when the bundle has no raw
    /// data path.
    pub fn materialize(&self, bundle: &mut SegmentBundle, sink: &dyn EventSink) -> Result<Option<PathBuf>> {
        self.ensure_destination()?;

        let Some(ref raw_data_path) = bundle.raw_data_path else {
            sink.info(&format!("{}: no raw data path, nothing to copy", bundle.segment_key));
            return Ok(None);
        };
        if !raw_data_path.is_file() {
            return Err(BidsError::FileNotFound(raw_data_path.clone()));
        }

        let final_path = bundle
            .final_path
            .as_deref()
            .ok_or_else(|| BidsError::MissingTemplateField("final_path".to_string()))?;
        let destination = self.destination_for(final_path)?;

        std::fs::copy(raw_data_path, &destination).map_err(|e| BidsError::io(&destination, e))?;
        sink.info(&format!(
            "{}: copied {} -> {}",
            bundle.segment_key,
            raw_data_path.display(),
            destination.display()
        ));

        bundle.final_raw_data_path = Some(destination.clone());
        Ok(Some(destination))
    }
}
