use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FileOperationError;

/// Snapshot of a filesystem entry at the time it was listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub is_dir: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl FileInfo {
    pub fn new(path: impl Into<String>, is_dir: bool) -> Self {
        Self {
            path: path.into(),
            is_dir,
            size: None,
            modified_at: None,
        }
    }
}

/// Terminal outcome of one command execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    /// stdout followed by stderr
    pub output: String,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    #[serde(default)]
    pub truncated: bool,
}

impl ExecuteResponse {
    pub fn new(output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            output: output.into(),
            exit_code,
            signal: None,
            truncated: false,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.signal.is_none()
    }
}

/// Outcome of creating a new file. Exactly one of `path` and `error` is set.
///
/// `files_update` is always `None`: storage lives outside the process, so there is
/// no in-memory file state to hand back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    pub path: Option<String>,
    pub error: Option<String>,
    pub files_update: Option<()>,
}

impl WriteResult {
    pub fn ok(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            error: None,
            files_update: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            path: None,
            error: Some(error.into()),
            files_update: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of a string-replacement edit. `occurrences` is only set on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditResult {
    pub path: Option<String>,
    pub error: Option<String>,
    pub occurrences: Option<u64>,
    pub files_update: Option<()>,
}

impl EditResult {
    pub fn ok(path: impl Into<String>, occurrences: u64) -> Self {
        Self {
            path: Some(path.into()),
            error: None,
            occurrences: Some(occurrences),
            files_update: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            path: None,
            error: Some(error.into()),
            occurrences: None,
            files_update: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// One matching line from a literal search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepMatch {
    pub path: String,
    /// 1-based
    pub line: u64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUploadResponse {
    pub path: String,
    pub error: Option<FileOperationError>,
}

impl FileUploadResponse {
    pub fn ok(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            error: None,
        }
    }

    pub fn err(path: impl Into<String>, error: FileOperationError) -> Self {
        Self {
            path: path.into(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDownloadResponse {
    pub path: String,
    pub content: Option<Vec<u8>>,
    pub error: Option<FileOperationError>,
}

impl FileDownloadResponse {
    pub fn ok(path: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            content: Some(content),
            error: None,
        }
    }

    pub fn err(path: impl Into<String>, error: FileOperationError) -> Self {
        Self {
            path: path.into(),
            content: None,
            error: Some(error),
        }
    }
}
