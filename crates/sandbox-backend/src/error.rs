use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Faults that are not part of a backend's value-level contract, such as a
/// malformed endpoint or a missing working directory. Expected failures (missing
/// files, ambiguous edits, transport errors) never surface through this type.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum SandboxError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub type Result<T> = std::result::Result<T, SandboxError>;

impl From<std::io::Error> for SandboxError {
    fn from(err: std::io::Error) -> Self {
        SandboxError::Io(err.to_string())
    }
}

/// Per-file failure code reported by batch upload and download.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum FileOperationError {
    FileNotFound,
    PermissionDenied,
    IsDirectory,
    InvalidPath,
    /// A code reported by a remote peer that this side does not know.
    Other(String),
}

impl FileOperationError {
    pub fn as_str(&self) -> &str {
        match self {
            FileOperationError::FileNotFound => "file_not_found",
            FileOperationError::PermissionDenied => "permission_denied",
            FileOperationError::IsDirectory => "is_directory",
            FileOperationError::InvalidPath => "invalid_path",
            FileOperationError::Other(code) => code,
        }
    }
}

impl fmt::Display for FileOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileOperationError {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "file_not_found" => FileOperationError::FileNotFound,
            "permission_denied" => FileOperationError::PermissionDenied,
            "is_directory" => FileOperationError::IsDirectory,
            "invalid_path" => FileOperationError::InvalidPath,
            other => FileOperationError::Other(other.to_string()),
        })
    }
}

impl From<String> for FileOperationError {
    fn from(code: String) -> Self {
        let Ok(parsed) = code.parse::<FileOperationError>();
        parsed
    }
}

impl From<FileOperationError> for String {
    fn from(err: FileOperationError) -> Self {
        err.as_str().to_string()
    }
}

impl From<&std::io::Error> for FileOperationError {
    fn from(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => FileOperationError::FileNotFound,
            std::io::ErrorKind::PermissionDenied => FileOperationError::PermissionDenied,
            std::io::ErrorKind::IsADirectory => FileOperationError::IsDirectory,
            std::io::ErrorKind::InvalidInput | std::io::ErrorKind::NotADirectory => {
                FileOperationError::InvalidPath
            }
            _ => FileOperationError::PermissionDenied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_strings() {
        for err in [
            FileOperationError::FileNotFound,
            FileOperationError::PermissionDenied,
            FileOperationError::IsDirectory,
            FileOperationError::InvalidPath,
        ] {
            assert_eq!(FileOperationError::from(err.to_string()), err);
        }
        assert_eq!(
            FileOperationError::from("quota_exceeded".to_string()),
            FileOperationError::Other("quota_exceeded".to_string())
        );
    }

    #[test]
    fn io_errors_map_to_codes() {
        let not_found = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert_eq!(
            FileOperationError::from(&not_found),
            FileOperationError::FileNotFound
        );
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(
            FileOperationError::from(&denied),
            FileOperationError::PermissionDenied
        );
    }

    #[test]
    fn serializes_as_plain_code() {
        let json = serde_json::to_value(FileOperationError::IsDirectory).unwrap();
        assert_eq!(json, serde_json::json!("is_directory"));
    }
}
