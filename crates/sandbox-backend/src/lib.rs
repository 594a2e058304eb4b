pub mod config;
pub mod error;
pub mod format;
pub mod local;
pub mod result;
pub mod shell;
pub mod tools;

// Re-export main types
pub use config::SandboxConfig;
pub use error::{FileOperationError, Result, SandboxError};
pub use local::{DEFAULT_MAX_OUTPUT_BYTES, LocalExecutor};
pub use result::{
    EditResult, ExecuteResponse, FileDownloadResponse, FileInfo, FileUploadResponse, GrepMatch,
    WriteResult,
};
pub use shell::{CommandExecutor, ShellSandbox};
pub use tools::{ToolError, ToolSchema, dispatch_tool, tool_schemas};

use async_trait::async_trait;

/// File and command operations against an isolated environment.
///
/// Every operation reports failure as a value: an error string, an
/// error-populated result, or an empty listing. Nothing here returns a transport
/// fault to the caller; implementations log those and convert them.
#[async_trait]
pub trait SandboxBackend: Send + Sync + std::fmt::Debug {
    /// Stable identifier of the sandbox instance.
    async fn id(&self) -> String;

    /// Read up to `limit` lines starting at 0-based line `offset`, formatted as
    /// right-aligned 6-wide line numbers, a tab, then the line text.
    ///
    /// Returns the empty-file notice for an existing empty file and
    /// `Error: File '<path>' not found` when the file cannot be read.
    async fn read(&self, file_path: &str, offset: u64, limit: u64) -> String;

    /// Create a new file. Never overwrites an existing one.
    async fn write(&self, file_path: &str, content: &str) -> WriteResult;

    /// Replace `old_string` with `new_string`. Without `replace_all` the string
    /// must occur exactly once.
    async fn edit(
        &self,
        file_path: &str,
        old_string: &str,
        new_string: &str,
        replace_all: bool,
    ) -> EditResult;

    /// Immediate children of a directory. Empty when the path is not a directory.
    async fn ls_info(&self, path: &str) -> Vec<FileInfo>;

    /// Literal (non-regex) search. `Err` carries a displayable message.
    async fn grep_raw(
        &self,
        pattern: &str,
        path: Option<&str>,
        glob: Option<&str>,
    ) -> std::result::Result<Vec<GrepMatch>, String>;

    /// Files matching `pattern` under `path`, with size and modification time.
    async fn glob_info(&self, pattern: &str, path: &str) -> Vec<FileInfo>;

    /// Run a shell command inside the sandbox.
    async fn execute(&self, command: &str) -> ExecuteResponse;

    /// Upload files. Results are positional and each carries its own outcome.
    async fn upload_files(&self, files: &[(String, Vec<u8>)]) -> Vec<FileUploadResponse>;

    /// Download files. Results are positional and each carries its own outcome.
    async fn download_files(&self, paths: &[String]) -> Vec<FileDownloadResponse>;
}

#[async_trait]
impl<T: SandboxBackend + ?Sized> SandboxBackend for std::sync::Arc<T> {
    async fn id(&self) -> String {
        (**self).id().await
    }

    async fn read(&self, file_path: &str, offset: u64, limit: u64) -> String {
        (**self).read(file_path, offset, limit).await
    }

    async fn write(&self, file_path: &str, content: &str) -> WriteResult {
        (**self).write(file_path, content).await
    }

    async fn edit(
        &self,
        file_path: &str,
        old_string: &str,
        new_string: &str,
        replace_all: bool,
    ) -> EditResult {
        (**self)
            .edit(file_path, old_string, new_string, replace_all)
            .await
    }

    async fn ls_info(&self, path: &str) -> Vec<FileInfo> {
        (**self).ls_info(path).await
    }

    async fn grep_raw(
        &self,
        pattern: &str,
        path: Option<&str>,
        glob: Option<&str>,
    ) -> std::result::Result<Vec<GrepMatch>, String> {
        (**self).grep_raw(pattern, path, glob).await
    }

    async fn glob_info(&self, pattern: &str, path: &str) -> Vec<FileInfo> {
        (**self).glob_info(pattern, path).await
    }

    async fn execute(&self, command: &str) -> ExecuteResponse {
        (**self).execute(command).await
    }

    async fn upload_files(&self, files: &[(String, Vec<u8>)]) -> Vec<FileUploadResponse> {
        (**self).upload_files(files).await
    }

    async fn download_files(&self, paths: &[String]) -> Vec<FileDownloadResponse> {
        (**self).download_files(paths).await
    }
}
