use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{OnceCell, RwLock};
use tonic::Status;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, warn};

use sandbox_backend::{
    EditResult, ExecuteResponse, FileDownloadResponse, FileInfo, FileOperationError,
    FileUploadResponse, GrepMatch, LocalExecutor, Result, SandboxBackend, SandboxConfig,
    SandboxError, ShellSandbox, WriteResult,
};
use sandbox_proto::sandbox_io::v1::{
    self as proto, DownloadRequest, EditRequest, Empty, ExecuteRequest, FileUpload, GlobRequest,
    GrepRequest, ListRequest, ReadRequest, UploadRequest, WriteRequest,
    sandbox_io_router_client::SandboxIoRouterClient,
};

const GRPC_MAX_MESSAGE_SIZE_BYTES: usize = 32 * 1024 * 1024;

fn rpc_failure(operation: &str, status: &Status) -> String {
    format!(
        "Error: RPC communication failed during {operation}: {}",
        status.message()
    )
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn convert_file_info(info: proto::FileInfo) -> FileInfo {
    FileInfo {
        path: info.path,
        is_dir: info.is_dir,
        size: info.size,
        modified_at: parse_timestamp(&info.modified_at),
    }
}

fn convert_grep_match(m: proto::GrepMatch) -> GrepMatch {
    GrepMatch {
        path: m.path,
        line: m.line,
        text: m.text,
    }
}

fn convert_write_response(response: proto::WriteResponse) -> WriteResult {
    if response.error.is_empty() {
        WriteResult::ok(response.path)
    } else {
        WriteResult::err(response.error)
    }
}

fn convert_edit_response(response: proto::EditResponse) -> EditResult {
    if response.error.is_empty() {
        EditResult::ok(response.path, response.occurrences)
    } else {
        EditResult::err(response.error)
    }
}

fn convert_execute_response(response: proto::ExecuteResponse) -> ExecuteResponse {
    ExecuteResponse {
        output: response.output,
        exit_code: response.exit_code,
        signal: response.signal,
        truncated: response.truncated,
    }
}

fn convert_upload_result(result: proto::UploadResult) -> FileUploadResponse {
    if result.error.is_empty() {
        FileUploadResponse::ok(result.path)
    } else {
        FileUploadResponse::err(result.path, FileOperationError::from(result.error))
    }
}

fn convert_download_result(result: proto::DownloadResult) -> FileDownloadResponse {
    if result.error.is_empty() {
        FileDownloadResponse::ok(result.path, result.content)
    } else {
        FileDownloadResponse::err(result.path, FileOperationError::from(result.error))
    }
}

/// One response per requested file, in request order. Files the server left
/// out of its reply are reported as failed.
fn align_upload_results(
    files: &[(String, Vec<u8>)],
    results: Vec<proto::UploadResult>,
) -> Vec<FileUploadResponse> {
    let mut results = results.into_iter();
    files
        .iter()
        .map(|(path, _)| match results.next() {
            Some(result) => FileUploadResponse {
                path: path.clone(),
                ..convert_upload_result(result)
            },
            None => FileUploadResponse::err(path.clone(), FileOperationError::PermissionDenied),
        })
        .collect()
}

fn align_download_results(
    paths: &[String],
    results: Vec<proto::DownloadResult>,
) -> Vec<FileDownloadResponse> {
    let mut results = results.into_iter();
    paths
        .iter()
        .map(|path| match results.next() {
            Some(result) => FileDownloadResponse {
                path: path.clone(),
                ..convert_download_result(result)
            },
            None => FileDownloadResponse::err(path.clone(), FileOperationError::FileNotFound),
        })
        .collect()
}

/// Sandbox backend that forwards every operation to a sandbox I/O service.
///
/// One channel is opened at construction and shared by all calls until
/// [`GrpcSandbox::close`]. Transport failures never escape: each operation turns
/// them into the same value-level error shapes the shell backend produces.
#[derive(Debug)]
pub struct GrpcSandbox {
    endpoint: String,
    client: RwLock<Option<SandboxIoRouterClient<Channel>>>,
    sandbox_id: OnceCell<String>,
}

impl GrpcSandbox {
    /// Open a channel to `endpoint` (e.g. `http://localhost:50051`; the scheme is
    /// optional). The connection itself is established on first use, so only a
    /// malformed endpoint fails here. Must be called within a Tokio runtime.
    pub fn new(endpoint: impl Into<String>, sandbox_id: Option<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        let uri = if endpoint.contains("://") {
            endpoint.clone()
        } else {
            format!("http://{endpoint}")
        };

        let channel = Endpoint::from_shared(uri)
            .map_err(|e| {
                SandboxError::InvalidConfiguration(format!(
                    "invalid sandbox endpoint '{endpoint}': {e}"
                ))
            })?
            .connect_lazy();

        let client = SandboxIoRouterClient::new(channel)
            .max_decoding_message_size(GRPC_MAX_MESSAGE_SIZE_BYTES)
            .max_encoding_message_size(GRPC_MAX_MESSAGE_SIZE_BYTES);

        debug!(target: "sandbox.grpc", endpoint = %endpoint, "created sandbox channel");

        Ok(Self {
            endpoint,
            client: RwLock::new(Some(client)),
            sandbox_id: OnceCell::new_with(sandbox_id),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Release the channel. Safe to call more than once; operations issued
    /// afterwards report a closed-connection error.
    pub async fn close(&self) {
        if self.client.write().await.take().is_some() {
            debug!(target: "sandbox.grpc", endpoint = %self.endpoint, "closed sandbox channel");
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.client.read().await.is_none()
    }

    fn fallback_id(&self) -> String {
        format!("grpc-sandbox-{}", self.endpoint)
    }

    async fn client(&self) -> std::result::Result<SandboxIoRouterClient<Channel>, Status> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| Status::unavailable("sandbox connection is closed"))
    }

    async fn fetch_id(&self) -> String {
        let response = match self.client().await {
            Ok(mut client) => client.get_id(Empty {}).await,
            Err(status) => Err(status),
        };
        match response {
            Ok(response) => {
                let id = response.into_inner().id;
                if id.is_empty() {
                    self.fallback_id()
                } else {
                    id
                }
            }
            Err(status) => {
                warn!(
                    target: "sandbox.grpc",
                    endpoint = %self.endpoint,
                    error = %status.message(),
                    "GetId failed, using fallback identifier"
                );
                self.fallback_id()
            }
        }
    }

    async fn try_read(
        &self,
        file_path: &str,
        offset: u64,
        limit: u64,
    ) -> std::result::Result<String, Status> {
        let response = self
            .client()
            .await?
            .read_file(ReadRequest {
                file_path: file_path.to_string(),
                offset,
                limit,
            })
            .await?;
        Ok(response.into_inner().output)
    }

    async fn try_write(
        &self,
        file_path: &str,
        content: &str,
    ) -> std::result::Result<WriteResult, Status> {
        let response = self
            .client()
            .await?
            .write_file(WriteRequest {
                file_path: file_path.to_string(),
                content: content.to_string(),
            })
            .await?;
        Ok(convert_write_response(response.into_inner()))
    }

    async fn try_edit(&self, request: EditRequest) -> std::result::Result<EditResult, Status> {
        let response = self.client().await?.edit_file(request).await?;
        Ok(convert_edit_response(response.into_inner()))
    }

    async fn try_ls(&self, path: &str) -> std::result::Result<Vec<FileInfo>, Status> {
        let mut stream = self
            .client()
            .await?
            .list_info(ListRequest {
                path: path.to_string(),
            })
            .await?
            .into_inner();

        let mut entries = Vec::new();
        while let Some(info) = stream.message().await? {
            entries.push(convert_file_info(info));
        }
        Ok(entries)
    }

    async fn try_grep(&self, request: GrepRequest) -> std::result::Result<Vec<GrepMatch>, Status> {
        let mut stream = self.client().await?.grep_raw(request).await?.into_inner();

        let mut matches = Vec::new();
        while let Some(m) = stream.message().await? {
            matches.push(convert_grep_match(m));
        }
        Ok(matches)
    }

    async fn try_glob(&self, request: GlobRequest) -> std::result::Result<Vec<FileInfo>, Status> {
        let mut stream = self.client().await?.glob_info(request).await?.into_inner();

        let mut entries = Vec::new();
        while let Some(info) = stream.message().await? {
            entries.push(convert_file_info(info));
        }
        Ok(entries)
    }

    async fn try_execute(&self, command: &str) -> std::result::Result<ExecuteResponse, Status> {
        let response = self
            .client()
            .await?
            .execute(ExecuteRequest {
                command: command.to_string(),
            })
            .await?;
        Ok(convert_execute_response(response.into_inner()))
    }

    async fn try_upload(
        &self,
        files: &[(String, Vec<u8>)],
    ) -> std::result::Result<Vec<FileUploadResponse>, Status> {
        let request = UploadRequest {
            files: files
                .iter()
                .map(|(path, content)| FileUpload {
                    path: path.clone(),
                    content: content.clone(),
                })
                .collect(),
        };
        let response = self.client().await?.upload_files(request).await?;
        Ok(align_upload_results(files, response.into_inner().results))
    }

    async fn try_download(
        &self,
        paths: &[String],
    ) -> std::result::Result<Vec<FileDownloadResponse>, Status> {
        let response = self
            .client()
            .await?
            .download_files(DownloadRequest {
                paths: paths.to_vec(),
            })
            .await?;
        Ok(align_download_results(paths, response.into_inner().results))
    }
}

#[async_trait]
impl SandboxBackend for GrpcSandbox {
    async fn id(&self) -> String {
        self.sandbox_id
            .get_or_init(|| self.fetch_id())
            .await
            .clone()
    }

    async fn read(&self, file_path: &str, offset: u64, limit: u64) -> String {
        self.try_read(file_path, offset, limit)
            .await
            .unwrap_or_else(|status| rpc_failure("read", &status))
    }

    async fn write(&self, file_path: &str, content: &str) -> WriteResult {
        self.try_write(file_path, content)
            .await
            .unwrap_or_else(|status| WriteResult::err(rpc_failure("write", &status)))
    }

    async fn edit(
        &self,
        file_path: &str,
        old_string: &str,
        new_string: &str,
        replace_all: bool,
    ) -> EditResult {
        let request = EditRequest {
            file_path: file_path.to_string(),
            old_string: old_string.to_string(),
            new_string: new_string.to_string(),
            replace_all,
        };
        self.try_edit(request)
            .await
            .unwrap_or_else(|status| EditResult::err(rpc_failure("edit", &status)))
    }

    async fn ls_info(&self, path: &str) -> Vec<FileInfo> {
        self.try_ls(path).await.unwrap_or_else(|status| {
            warn!(target: "sandbox.grpc", path, error = %status.message(), "ListInfo failed");
            Vec::new()
        })
    }

    async fn grep_raw(
        &self,
        pattern: &str,
        path: Option<&str>,
        glob: Option<&str>,
    ) -> std::result::Result<Vec<GrepMatch>, String> {
        let request = GrepRequest {
            pattern: pattern.to_string(),
            path: path.unwrap_or_default().to_string(),
            glob: glob.unwrap_or_default().to_string(),
        };
        self.try_grep(request)
            .await
            .map_err(|status| rpc_failure("grep", &status))
    }

    async fn glob_info(&self, pattern: &str, path: &str) -> Vec<FileInfo> {
        let request = GlobRequest {
            pattern: pattern.to_string(),
            path: path.to_string(),
        };
        self.try_glob(request).await.unwrap_or_else(|status| {
            warn!(target: "sandbox.grpc", pattern, error = %status.message(), "GlobInfo failed");
            Vec::new()
        })
    }

    async fn execute(&self, command: &str) -> ExecuteResponse {
        self.try_execute(command)
            .await
            .unwrap_or_else(|status| ExecuteResponse::new(rpc_failure("execute", &status), 1))
    }

    async fn upload_files(&self, files: &[(String, Vec<u8>)]) -> Vec<FileUploadResponse> {
        self.try_upload(files).await.unwrap_or_else(|status| {
            warn!(target: "sandbox.grpc", count = files.len(), error = %status.message(), "UploadFiles failed");
            align_upload_results(files, Vec::new())
        })
    }

    async fn download_files(&self, paths: &[String]) -> Vec<FileDownloadResponse> {
        self.try_download(paths).await.unwrap_or_else(|status| {
            warn!(target: "sandbox.grpc", count = paths.len(), error = %status.message(), "DownloadFiles failed");
            align_download_results(paths, Vec::new())
        })
    }
}

/// Build the backend described by `config`.
///
/// A remote backend must be created within a Tokio runtime.
pub fn create_sandbox(config: &SandboxConfig) -> Result<Arc<dyn SandboxBackend>> {
    match config {
        SandboxConfig::Local {
            root,
            max_output_bytes,
        } => {
            let mut executor = LocalExecutor::new(root.clone())?;
            if let Some(limit) = max_output_bytes {
                executor = executor.with_max_output_bytes(*limit);
            }
            Ok(Arc::new(ShellSandbox::new(executor)))
        }
        SandboxConfig::Remote {
            endpoint,
            sandbox_id,
        } => Ok(Arc::new(GrpcSandbox::new(
            endpoint.clone(),
            sandbox_id.clone(),
        )?)),
    }
}
