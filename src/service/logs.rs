//! Read-only access to the service's rolling log files.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{RequestError, Result};

/// Extension of every file written by the rolling appender.
pub const LOG_EXTENSION: &str = "txt";

/// One log file and its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogFile {
    pub filename: String,
    pub content: String,
}

/// Log directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogListing {
    pub log_files: Vec<String>,
}

/// The configured log directory. With no directory there are no files.
#[derive(Debug, Clone, Default)]
pub struct LogDirectory {
    root: Option<PathBuf>,
}

impl LogDirectory {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    /// Names of all `.txt` files directly inside the directory, sorted.
    ///
    /// A directory that does not exist yet is empty.
    pub async fn list(&self) -> Result<LogListing> {
        let Some(root) = &self.root else {
            return Ok(LogListing { log_files: Vec::new() });
        };

        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LogListing { log_files: Vec::new() });
            }
            Err(e) => return Err(e.into()),
        };

        let mut log_files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && has_log_extension(name)
            {
                log_files.push(name.to_string());
            }
        }
        log_files.sort();
        Ok(LogListing { log_files })
    }

    /// Content of one log file.
    ///
    /// The name must be a bare `.txt` file name; anything that could reach
    /// outside the directory is rejected before touching the filesystem.
    pub async fn read(&self, filename: &str) -> Result<LogFile> {
        validate_name(filename)?;
        let not_found = || RequestError::UnknownLogFile {
            name: filename.to_string(),
        };
        let root = self.root.as_ref().ok_or_else(not_found)?;

        match tokio::fs::read_to_string(root.join(filename)).await {
            Ok(content) => Ok(LogFile {
                filename: filename.to_string(),
                content,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found().into()),
            Err(e) => {
                tracing::error!(file = %filename, error = %e, "Could not read log file");
                Err(e.into())
            }
        }
    }
}

fn has_log_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext == LOG_EXTENSION)
}

fn validate_name(name: &str) -> std::result::Result<(), RequestError> {
    let bare = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && !name.contains("..");
    if !bare {
        return Err(RequestError::InvalidLogFile(name.to_string()));
    }
    if !has_log_extension(name) {
        return Err(RequestError::InvalidLogFile(format!(
            "{name}: only .{LOG_EXTENSION} files are supported"
        )));
    }
    Ok(())
}
