//! Backend that implements every operation as a generated script run through a
//! single `execute` primitive.

mod scripts;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::SandboxBackend;
use crate::format;
use crate::result::{
    EditResult, ExecuteResponse, FileDownloadResponse, FileInfo, FileUploadResponse, GrepMatch,
    WriteResult,
};

/// The environment-specific half of a [`ShellSandbox`]: anything that can run an
/// arbitrary command (a local subprocess, a container exec, a remote shell)
/// can host the full backend by implementing this trait.
#[async_trait]
pub trait CommandExecutor: Send + Sync + std::fmt::Debug {
    /// Run `command` in the sandbox and report its merged output.
    async fn execute(&self, command: &str) -> ExecuteResponse;

    /// Run a generated script whose output is parsed rather than shown.
    /// Executors that cap `execute` output must not cap it here; a truncated
    /// reply is treated as a failed operation.
    async fn run_script(&self, script: &str) -> ExecuteResponse {
        self.execute(script).await
    }

    /// Stable identifier for the sandbox this executor talks to.
    async fn id(&self) -> String;

    /// Upload files. One file's failure must not affect its siblings.
    async fn upload_files(&self, files: &[(String, Vec<u8>)]) -> Vec<FileUploadResponse>;

    /// Download files. One file's failure must not affect its siblings.
    async fn download_files(&self, paths: &[String]) -> Vec<FileDownloadResponse>;
}

/// [`SandboxBackend`] built from a [`CommandExecutor`].
#[derive(Debug)]
pub struct ShellSandbox<E> {
    executor: E,
}

impl<E: CommandExecutor> ShellSandbox<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn into_inner(self) -> E {
        self.executor
    }
}

#[derive(Deserialize)]
struct ListedEntry {
    path: String,
    is_dir: bool,
}

#[derive(Deserialize)]
struct GlobbedEntry {
    path: String,
    is_dir: bool,
    size: u64,
    mtime: f64,
}

fn timestamp_from_secs(mtime: f64) -> Option<DateTime<Utc>> {
    if !mtime.is_finite() {
        return None;
    }
    let secs = mtime.floor();
    let nanos = ((mtime - secs) * 1e9) as u32;
    DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
}

fn parse_json_lines<T: for<'de> Deserialize<'de>>(output: &str) -> Vec<T> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

/// Parse `path:line:text` records as printed by `grep -Hn`.
pub(crate) fn parse_grep_output(output: &str) -> Vec<GrepMatch> {
    output
        .lines()
        .filter_map(|record| {
            let mut parts = record.splitn(3, ':');
            let path = parts.next()?;
            let line = parts.next()?.parse().ok()?;
            let text = parts.next()?;
            Some(GrepMatch {
                path: path.to_string(),
                line,
                text: text.to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl<E: CommandExecutor> SandboxBackend for ShellSandbox<E> {
    async fn id(&self) -> String {
        self.executor.id().await
    }

    async fn read(&self, file_path: &str, offset: u64, limit: u64) -> String {
        debug!(target: "sandbox.shell.read", file_path, offset, limit, "reading file");
        let result = self
            .executor
            .run_script(&scripts::read(file_path, offset, limit))
            .await;

        if result.truncated {
            warn!(target: "sandbox.shell.read", file_path, "script output was truncated");
            return format::file_not_found(file_path);
        }
        if result.exit_code != 0 || result.output.starts_with(scripts::READ_NOT_FOUND_MARKER) {
            return format::file_not_found(file_path);
        }

        result.output.trim_end_matches('\n').to_string()
    }

    async fn write(&self, file_path: &str, content: &str) -> WriteResult {
        debug!(target: "sandbox.shell.write", file_path, bytes = content.len(), "writing file");
        let result = self
            .executor
            .run_script(&scripts::write(file_path, content))
            .await;

        if result.exit_code == scripts::WRITE_EXIT_EXISTS {
            return WriteResult::err(format::file_already_exists(file_path));
        }
        if result.truncated {
            return WriteResult::err(format::write_failed(file_path));
        }
        if result.exit_code != 0 || result.output.contains("Error:") {
            let message = result.output.trim();
            return WriteResult::err(if message.is_empty() {
                format::write_failed(file_path)
            } else {
                message.to_string()
            });
        }

        WriteResult::ok(file_path)
    }

    async fn edit(
        &self,
        file_path: &str,
        old_string: &str,
        new_string: &str,
        replace_all: bool,
    ) -> EditResult {
        if old_string.is_empty() {
            return EditResult::err(format::EMPTY_OLD_STRING);
        }

        debug!(target: "sandbox.shell.edit", file_path, replace_all, "editing file");
        let result = self
            .executor
            .run_script(&scripts::edit(file_path, old_string, new_string, replace_all))
            .await;

        match result.exit_code {
            0 if result.truncated => EditResult::err(format::file_not_found(file_path)),
            0 => match result.output.trim().parse::<u64>() {
                Ok(occurrences) => EditResult::ok(file_path, occurrences),
                Err(_) => EditResult::err(format::file_not_found(file_path)),
            },
            scripts::EDIT_EXIT_NOT_FOUND => EditResult::err(format::string_not_found(old_string)),
            scripts::EDIT_EXIT_MULTIPLE => {
                EditResult::err(format::multiple_occurrences(old_string))
            }
            _ => EditResult::err(format::file_not_found(file_path)),
        }
    }

    async fn ls_info(&self, path: &str) -> Vec<FileInfo> {
        let result = self.executor.run_script(&scripts::ls(path)).await;
        if result.truncated {
            warn!(target: "sandbox.shell.ls", path, "script output was truncated");
            return Vec::new();
        }

        let mut entries: Vec<FileInfo> = parse_json_lines::<ListedEntry>(&result.output)
            .into_iter()
            .map(|entry| FileInfo::new(entry.path, entry.is_dir))
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    async fn grep_raw(
        &self,
        pattern: &str,
        path: Option<&str>,
        glob: Option<&str>,
    ) -> Result<Vec<GrepMatch>, String> {
        let search_path = path.unwrap_or(".");
        let result = self
            .executor
            .run_script(&scripts::grep(pattern, search_path, glob))
            .await;
        if result.truncated {
            return Err(format::output_truncated("grep"));
        }

        Ok(parse_grep_output(&result.output))
    }

    async fn glob_info(&self, pattern: &str, path: &str) -> Vec<FileInfo> {
        let result = self
            .executor
            .run_script(&scripts::glob(pattern, path))
            .await;
        if result.truncated {
            warn!(target: "sandbox.shell.glob", pattern, path, "script output was truncated");
            return Vec::new();
        }

        parse_json_lines::<GlobbedEntry>(&result.output)
            .into_iter()
            .map(|entry| FileInfo {
                path: entry.path,
                is_dir: entry.is_dir,
                size: Some(entry.size),
                modified_at: timestamp_from_secs(entry.mtime),
            })
            .collect()
    }

    async fn execute(&self, command: &str) -> ExecuteResponse {
        self.executor.execute(command).await
    }

    async fn upload_files(&self, files: &[(String, Vec<u8>)]) -> Vec<FileUploadResponse> {
        self.executor.upload_files(files).await
    }

    async fn download_files(&self, paths: &[String]) -> Vec<FileDownloadResponse> {
        self.executor.download_files(paths).await
    }
}
