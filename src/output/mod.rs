//! Writing synced records to disk

use crate::Record;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Write `records` to `path` as a pretty-printed JSON array.
///
/// Parent directories are created as needed and an existing file is replaced.
///
/// # Errors
/// [`OutputError::IoError`] if the file can't be created or written,
/// [`OutputError::SerializationError`] if a record can't be encoded.
pub fn write_records(path: &Path, records: &[Record]) -> OutputResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            OutputError::IoError(format!("Failed to create directory {}: {e}", parent.display()))
        })?;
    }

    let file = File::create(path)
        .map_err(|e| OutputError::IoError(format!("Failed to create {}: {e}", path.display())))?;
    let mut writer = BufWriter::new(file);

    serde_json::to_writer_pretty(&mut writer, records)
        .map_err(|e| OutputError::SerializationError(e.to_string()))?;
    writer
        .write_all(b"\n")
        .and_then(|_| writer.flush())
        .map_err(|e| OutputError::IoError(format!("Failed to flush {}: {e}", path.display())))?;

    info!(
        path = %path.display(),
        records = records.len(),
        "Wrote records"
    );
    Ok(())
}
