use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{FileOperationError, Result, SandboxError};
use crate::result::{ExecuteResponse, FileDownloadResponse, FileUploadResponse};
use crate::shell::CommandExecutor;

pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 100_000;
const DEFAULT_SHELL: &str = "/bin/sh";
/// Conventional "command not found" status, used when the shell cannot be spawned.
const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Runs commands as subprocesses of the current host, rooted at a directory.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    root: PathBuf,
    shell: PathBuf,
    max_output_bytes: usize,
}

impl LocalExecutor {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(SandboxError::InvalidConfiguration(format!(
                "sandbox root '{}' is not a directory",
                root.display()
            )));
        }
        Ok(Self {
            root,
            shell: PathBuf::from(DEFAULT_SHELL),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        })
    }

    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> std::result::Result<PathBuf, FileOperationError> {
        if path.is_empty() || path.contains('\0') {
            return Err(FileOperationError::InvalidPath);
        }
        let path = Path::new(path);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(self.root.join(path))
        }
    }

    /// Feed `command` to the shell on stdin, so its size is not bound by the
    /// per-argument limit of `exec`. Output beyond `max_output_bytes` is cut.
    async fn run(&self, command: &str, max_output_bytes: Option<usize>) -> ExecuteResponse {
        debug!(target: "sandbox.local.execute", root = %self.root.display(), bytes = command.len(), "running command");

        let child = Command::new(&self.shell)
            .arg("-s")
            .current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(target: "sandbox.local.execute", error = %e, "failed to spawn shell");
                return ExecuteResponse::new(
                    format!("Error: failed to spawn {}: {e}", self.shell.display()),
                    SPAWN_FAILURE_EXIT_CODE,
                );
            }
        };

        // Written concurrently with draining output; the pipe closes when `stdin` drops.
        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return;
            };
            let mut written = stdin.write_all(command.as_bytes()).await;
            if written.is_ok() && !command.ends_with('\n') {
                written = stdin.write_all(b"\n").await;
            }
            if let Err(e) = written {
                debug!(target: "sandbox.local.execute", error = %e, "shell stopped reading its input");
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!(target: "sandbox.local.execute", error = %e, "failed to collect shell output");
                return ExecuteResponse::new(
                    format!("Error: failed to run {}: {e}", self.shell.display()),
                    SPAWN_FAILURE_EXIT_CODE,
                );
            }
        };

        let mut merged = String::from_utf8_lossy(&output.stdout).into_owned();
        merged.push_str(&String::from_utf8_lossy(&output.stderr));
        let truncated = max_output_bytes.is_some_and(|max| truncate_output(&mut merged, max));

        let signal = termination_signal(&output.status);
        let exit_code = match (output.status.code(), signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => -1,
        };

        ExecuteResponse {
            output: merged,
            exit_code,
            signal,
            truncated,
        }
    }

    async fn upload_one(&self, path: &str, content: &[u8]) -> FileUploadResponse {
        let target = match self.resolve(path) {
            Ok(target) => target,
            Err(e) => return FileUploadResponse::err(path, e),
        };
        if target.is_dir() {
            return FileUploadResponse::err(path, FileOperationError::IsDirectory);
        }
        if let Some(parent) = target.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return FileUploadResponse::err(path, FileOperationError::from(&e));
            }
        }
        match tokio::fs::write(&target, content).await {
            Ok(()) => FileUploadResponse::ok(path),
            Err(e) => {
                debug!(target: "sandbox.local.upload", path, error = %e, "upload failed");
                FileUploadResponse::err(path, FileOperationError::from(&e))
            }
        }
    }

    async fn download_one(&self, path: &str) -> FileDownloadResponse {
        let target = match self.resolve(path) {
            Ok(target) => target,
            Err(e) => return FileDownloadResponse::err(path, e),
        };
        if target.is_dir() {
            return FileDownloadResponse::err(path, FileOperationError::IsDirectory);
        }
        match tokio::fs::read(&target).await {
            Ok(content) => FileDownloadResponse::ok(path, content),
            Err(e) => {
                debug!(target: "sandbox.local.download", path, error = %e, "download failed");
                FileDownloadResponse::err(path, FileOperationError::from(&e))
            }
        }
    }
}

/// Cut `output` to at most `max_bytes`, backing off to a char boundary.
fn truncate_output(output: &mut String, max_bytes: usize) -> bool {
    if output.len() <= max_bytes {
        return false;
    }
    let mut cut = max_bytes;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    true
}

#[cfg(unix)]
fn termination_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn termination_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

#[async_trait]
impl CommandExecutor for LocalExecutor {
    async fn execute(&self, command: &str) -> ExecuteResponse {
        self.run(command, Some(self.max_output_bytes)).await
    }

    async fn run_script(&self, script: &str) -> ExecuteResponse {
        self.run(script, None).await
    }

    async fn id(&self) -> String {
        format!("local:{}", self.root.display())
    }

    async fn upload_files(&self, files: &[(String, Vec<u8>)]) -> Vec<FileUploadResponse> {
        let mut responses = Vec::with_capacity(files.len());
        for (path, content) in files {
            responses.push(self.upload_one(path, content).await);
        }
        responses
    }

    async fn download_files(&self, paths: &[String]) -> Vec<FileDownloadResponse> {
        let mut responses = Vec::with_capacity(paths.len());
        for path in paths {
            responses.push(self.download_one(path).await);
        }
        responses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn executor() -> (TempDir, LocalExecutor) {
        let dir = TempDir::new().unwrap();
        let executor = LocalExecutor::new(dir.path()).unwrap();
        (dir, executor)
    }

    #[test]
    fn rejects_missing_root() {
        let err = LocalExecutor::new("/definitely/not/a/real/dir").unwrap_err();
        assert!(matches!(err, SandboxError::InvalidConfiguration(_)));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut output = "aé".to_string();
        assert!(truncate_output(&mut output, 2));
        assert_eq!(output, "a");

        let mut short = "abc".to_string();
        assert!(!truncate_output(&mut short, 10));
        assert_eq!(short, "abc");
    }

    #[tokio::test]
    async fn execute_merges_stdout_then_stderr() {
        let (_dir, executor) = executor();
        let result = executor.execute("echo out; echo err >&2; exit 3").await;
        assert_eq!(result.output, "out\nerr\n");
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.signal, None);
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn execute_runs_in_root() {
        let (dir, executor) = executor();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let result = executor.execute("cat marker.txt").await;
        assert!(result.success());
        assert_eq!(result.output, "here");
    }

    #[tokio::test]
    async fn execute_caps_output() {
        let (_dir, executor) = executor();
        let executor = executor.with_max_output_bytes(10);
        let result = executor.execute("printf '%s' 0123456789abcdef").await;
        assert_eq!(result.output, "0123456789");
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn scripts_bypass_the_output_cap() {
        let (_dir, executor) = executor();
        let executor = executor.with_max_output_bytes(10);
        let result = executor.run_script("printf '%s' 0123456789abcdef").await;
        assert_eq!(result.output, "0123456789abcdef");
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn commands_larger_than_an_argument_run() {
        let (_dir, executor) = executor();
        let payload = "x".repeat(300_000);
        let result = executor
            .execute(&format!("printf '%s' '{payload}' | wc -c"))
            .await;
        assert!(result.success(), "{}", result.output);
        assert_eq!(result.output.trim(), "300000");
    }

    #[tokio::test]
    async fn commands_see_end_of_input() {
        let (_dir, executor) = executor();
        let result = executor.execute("cat; echo done").await;
        assert_eq!(result.output, "done\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_reports_signal() {
        let (_dir, executor) = executor();
        let result = executor.execute("kill -9 $$").await;
        assert_eq!(result.signal, Some(9));
        assert_eq!(result.exit_code, 137);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn spawn_failure_is_a_value() {
        let (_dir, executor) = executor();
        let executor = executor.with_shell("/no/such/shell");
        let result = executor.execute("true").await;
        assert_eq!(result.exit_code, SPAWN_FAILURE_EXIT_CODE);
        assert!(result.output.starts_with("Error:"));
    }

    #[tokio::test]
    async fn batch_transfers_report_per_file() {
        let (dir, executor) = executor();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let uploads = executor
            .upload_files(&[
                ("nested/a.bin".to_string(), vec![0, 159, 146, 150]),
                ("sub".to_string(), b"x".to_vec()),
                (String::new(), b"x".to_vec()),
            ])
            .await;
        assert_eq!(uploads[0], FileUploadResponse::ok("nested/a.bin"));
        assert_eq!(uploads[1].error, Some(FileOperationError::IsDirectory));
        assert_eq!(uploads[2].error, Some(FileOperationError::InvalidPath));

        let downloads = executor
            .download_files(&[
                "nested/a.bin".to_string(),
                "missing.txt".to_string(),
                "sub".to_string(),
            ])
            .await;
        assert_eq!(downloads[0].content.as_deref(), Some(&[0, 159, 146, 150][..]));
        assert_eq!(downloads[1].error, Some(FileOperationError::FileNotFound));
        assert_eq!(downloads[2].error, Some(FileOperationError::IsDirectory));
    }

    #[tokio::test]
    async fn id_names_the_root() {
        let (dir, executor) = executor();
        assert_eq!(executor.id().await, format!("local:{}", dir.path().display()));
    }
}
