//! Job file loading.

use std::path::{Path, PathBuf};

use thiserror::Error;

use taskfan_core::{CoreError, TaskList};

#[derive(Debug, Error)]
pub enum JobFileError {
    #[error("Failed to read job file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Invalid(#[from] CoreError),
}

/// A parsed and validated job file, with the bytes it was parsed from.
#[derive(Debug, Clone)]
pub struct JobFile {
    pub list: TaskList,
    pub raw: Vec<u8>,
}

impl JobFile {
    pub async fn load(path: &Path) -> Result<Self, JobFileError> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|source| JobFileError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_bytes(raw)
    }

    pub fn from_bytes(raw: Vec<u8>) -> Result<Self, JobFileError> {
        let contents = std::str::from_utf8(&raw)
            .map_err(|e| CoreError::InvalidJobFile(format!("not UTF-8: {}", e)))?;
        let list = TaskList::parse(contents)?;
        Ok(Self { list, raw })
    }
}
