use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::ExecutionResult;

const FORGE_DIR_NAME: &str = ".testforge";
const RUNS_DIR_NAME: &str = "runs";

/// Errors that can occur while storing execution results.
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Suite identifier unusable as a file name.
    #[error("Invalid suite ID: {0:?}")]
    InvalidId(String),
}

/// Result type for result store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Stores execution results as JSON snapshots on disk.
#[derive(Debug, Clone)]
pub struct ResultStore {
    runs_dir: PathBuf,
}

impl ResultStore {
    /// Create a store rooted at `<base_dir>/.testforge/runs`.
    pub fn new(base_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let runs_dir = base_dir.into().join(FORGE_DIR_NAME).join(RUNS_DIR_NAME);
        fs::create_dir_all(&runs_dir)?;
        Ok(Self { runs_dir })
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    fn path_for(&self, suite_id: &str) -> StoreResult<PathBuf> {
        let valid = !suite_id.trim().is_empty()
            && !suite_id.contains(['/', '\\'])
            && suite_id != "."
            && suite_id != "..";
        if !valid {
            return Err(StoreError::InvalidId(suite_id.to_string()));
        }
        Ok(self.runs_dir.join(format!("{}.json", suite_id)))
    }

    /// Save an execution result, replacing any previous snapshot atomically.
    pub fn save(&self, result: &ExecutionResult) -> StoreResult<PathBuf> {
        let path = self.path_for(result.suite_id())?;
        let temp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(result)?;
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, &path)?;
        Ok(path)
    }

    /// Load a stored execution result, `None` if it was never saved.
    pub fn load(&self, suite_id: &str) -> StoreResult<Option<ExecutionResult>> {
        let path = self.path_for(suite_id)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Io(err)),
        }
    }
}
