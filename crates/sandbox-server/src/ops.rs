use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use grep_regex::RegexMatcherBuilder;
use grep_searcher::sinks::UTF8;
use grep_searcher::{BinaryDetection, SearcherBuilder};
use ignore::WalkBuilder;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use sandbox_backend::format::{
    self, EMPTY_FILE_NOTICE, EMPTY_OLD_STRING, file_already_exists, file_not_found,
    format_numbered_lines, multiple_occurrences, string_not_found,
};
use sandbox_backend::{EditResult, FileInfo, GrepMatch, WriteResult};

/// Filesystem operations rooted at a working directory. Relative paths resolve
/// against the root; absolute paths are used as given.
#[derive(Debug, Clone)]
pub struct SandboxFs {
    root: PathBuf,
}

fn modified_at(metadata: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    metadata.modified().ok().map(DateTime::<Utc>::from)
}

impl SandboxFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub async fn read(&self, file_path: &str, offset: u64, limit: u64) -> String {
        let target = self.resolve(file_path);
        let metadata = match tokio::fs::metadata(&target).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => return file_not_found(file_path),
        };
        if metadata.len() == 0 {
            return EMPTY_FILE_NOTICE.to_string();
        }

        match tokio::fs::read(&target).await {
            Ok(bytes) => format_numbered_lines(&String::from_utf8_lossy(&bytes), offset, limit),
            Err(_) => file_not_found(file_path),
        }
    }

    pub async fn write(&self, file_path: &str, content: &str) -> WriteResult {
        let target = self.resolve(file_path);
        if let Some(parent) = target.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return WriteResult::err(format!("Error: {e}"));
            }
        }

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return WriteResult::err(file_already_exists(file_path));
            }
            Err(e) => return WriteResult::err(format!("Error: {e}")),
        };

        if let Err(e) = file.write_all(content.as_bytes()).await {
            return WriteResult::err(format!("Error: {e}"));
        }
        if file.flush().await.is_err() {
            return WriteResult::err(format::write_failed(file_path));
        }

        WriteResult::ok(file_path)
    }

    pub async fn edit(
        &self,
        file_path: &str,
        old_string: &str,
        new_string: &str,
        replace_all: bool,
    ) -> EditResult {
        if old_string.is_empty() {
            return EditResult::err(EMPTY_OLD_STRING);
        }

        let target = self.resolve(file_path);
        let Ok(content) = tokio::fs::read_to_string(&target).await else {
            return EditResult::err(file_not_found(file_path));
        };

        let occurrences = content.matches(old_string).count();
        if occurrences == 0 {
            return EditResult::err(string_not_found(old_string));
        }
        if occurrences > 1 && !replace_all {
            return EditResult::err(multiple_occurrences(old_string));
        }

        let (updated, replaced) = if replace_all {
            (content.replace(old_string, new_string), occurrences)
        } else {
            (content.replacen(old_string, new_string, 1), 1)
        };

        match tokio::fs::write(&target, updated).await {
            Ok(()) => EditResult::ok(file_path, replaced as u64),
            Err(_) => EditResult::err(file_not_found(file_path)),
        }
    }

    /// Immediate children of `path`, sorted by name. Empty if it cannot be read.
    pub fn list(&self, path: &str) -> Vec<FileInfo> {
        let Ok(read_dir) = std::fs::read_dir(self.resolve(path)) else {
            return Vec::new();
        };

        let mut entries: Vec<FileInfo> = read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
                let metadata = entry.metadata().ok();
                FileInfo {
                    path: name,
                    is_dir,
                    size: metadata
                        .as_ref()
                        .filter(|m| m.is_file())
                        .map(|m| m.len()),
                    modified_at: metadata.as_ref().and_then(modified_at),
                }
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    /// Literal search under `path` (default: the root), optionally limited to
    /// files whose name matches `include`. Missing paths yield no matches.
    pub fn grep(
        &self,
        pattern: &str,
        path: Option<&str>,
        include: Option<&str>,
    ) -> Result<Vec<GrepMatch>, String> {
        let requested = path.filter(|p| !p.is_empty()).unwrap_or(".");
        let base_path = self.resolve(requested);
        if !base_path.exists() {
            return Ok(Vec::new());
        }

        let include_pattern = include
            .filter(|p| !p.is_empty())
            .map(|p| glob::Pattern::new(p).map_err(|e| format!("Invalid glob pattern: {e}")))
            .transpose()?;

        let matcher = RegexMatcherBuilder::new()
            .line_terminator(Some(b'\n'))
            .fixed_strings(true)
            .build(pattern)
            .map_err(|e| format!("Failed to create matcher: {e}"))?;
        let mut searcher = SearcherBuilder::new()
            .binary_detection(BinaryDetection::quit(b'\x00'))
            .line_number(true)
            .build();

        let mut walker = WalkBuilder::new(&base_path);
        walker
            .hidden(false)
            .ignore(false)
            .parents(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false);

        let mut matches = Vec::new();
        for result in walker.build() {
            let Ok(entry) = result else {
                continue;
            };
            let file = entry.path();
            if !file.is_file() {
                continue;
            }
            if let Some(ref pattern) = include_pattern {
                let name = file.file_name().unwrap_or_default().to_string_lossy();
                if !pattern.matches(&name) {
                    continue;
                }
            }

            let display_path = match file.strip_prefix(&base_path) {
                Ok(relative) if relative.as_os_str().is_empty() => requested.to_string(),
                Ok(relative) => Path::new(requested).join(relative).display().to_string(),
                Err(_) => file.display().to_string(),
            };

            let mut file_matches = Vec::new();
            let searched = searcher.search_path(
                &matcher,
                file,
                UTF8(|line_number, line| {
                    file_matches.push(GrepMatch {
                        path: display_path.clone(),
                        line: line_number,
                        text: line.strip_suffix('\n').unwrap_or(line).to_string(),
                    });
                    Ok(true)
                }),
            );
            if let Err(e) = searched {
                debug!(target: "sandbox.server.grep", path = %display_path, error = %e, "search stopped early");
            }
            matches.extend(file_matches);
        }

        Ok(matches)
    }

    /// Entries under `path` matching `pattern`, relative to `path` and sorted.
    pub fn glob(&self, pattern: &str, path: &str) -> Vec<FileInfo> {
        let base_path = self.resolve(if path.is_empty() { "/" } else { path });
        if !base_path.is_dir() {
            return Vec::new();
        }

        let full_pattern = format!(
            "{}/{}",
            glob::Pattern::escape(&base_path.to_string_lossy()).trim_end_matches('/'),
            pattern
        );
        let options = glob::MatchOptions {
            require_literal_leading_dot: true,
            ..glob::MatchOptions::new()
        };
        let Ok(paths) = glob::glob_with(&full_pattern, options) else {
            return Vec::new();
        };

        let mut entries: Vec<FileInfo> = paths
            .filter_map(|entry| entry.ok())
            .filter_map(|matched| {
                let metadata = std::fs::metadata(&matched).ok()?;
                let relative = matched.strip_prefix(&base_path).unwrap_or(&matched);
                Some(FileInfo {
                    path: relative.display().to_string(),
                    is_dir: metadata.is_dir(),
                    size: Some(metadata.len()),
                    modified_at: modified_at(&metadata),
                })
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }
}
