use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::debug;

use sandbox_backend::{CommandExecutor, FileInfo, GrepMatch, LocalExecutor};

use crate::ServerError;
use crate::ops::SandboxFs;
use crate::proto::{
    self, DownloadRequest, DownloadResponse, DownloadResult, EditRequest, EditResponse, Empty,
    ExecuteRequest, ExecuteResponse, GlobRequest, GrepRequest, IdResponse, ListRequest,
    ReadRequest, ReadResponse, UploadRequest, UploadResponse, UploadResult, WriteRequest,
    WriteResponse, sandbox_io_router_server::SandboxIoRouter,
};

const STREAM_BUFFER: usize = 100;

fn default_sandbox_id() -> String {
    format!("sandbox-{}", gethostname::gethostname().to_string_lossy())
}

fn convert_file_info(info: FileInfo) -> proto::FileInfo {
    proto::FileInfo {
        path: info.path,
        is_dir: info.is_dir,
        size: info.size,
        modified_at: info
            .modified_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default(),
    }
}

fn convert_grep_match(m: GrepMatch) -> proto::GrepMatch {
    proto::GrepMatch {
        path: m.path,
        line: m.line,
        text: m.text,
    }
}

/// Feed `items` to a response stream. Stops early if the client goes away.
fn stream_items<T: Send + 'static>(items: Vec<T>) -> ReceiverStream<Result<T, Status>> {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);

    tokio::spawn(async move {
        for item in items {
            if let Err(e) = tx.send(Ok(item)).await {
                debug!(target: "sandbox.server", "Client cancelled stream: {}", e);
                break;
            }
        }
    });

    ReceiverStream::new(rx)
}

/// Sandbox I/O service executing every request against the local filesystem
/// and a local shell, rooted at a working directory.
#[derive(Debug)]
pub struct SandboxIoService {
    fs: SandboxFs,
    executor: LocalExecutor,
    sandbox_id: String,
}

impl SandboxIoService {
    pub fn new(working_dir: PathBuf) -> Result<Self, ServerError> {
        let executor = LocalExecutor::new(working_dir.clone())?;
        Ok(Self {
            fs: SandboxFs::new(working_dir),
            executor,
            sandbox_id: default_sandbox_id(),
        })
    }

    pub fn with_sandbox_id(mut self, sandbox_id: impl Into<String>) -> Self {
        self.sandbox_id = sandbox_id.into();
        self
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.executor = self.executor.with_max_output_bytes(max_output_bytes);
        self
    }

    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    pub fn working_dir(&self) -> &std::path::Path {
        self.fs.root()
    }
}

#[tonic::async_trait]
impl SandboxIoRouter for SandboxIoService {
    type ListInfoStream = ReceiverStream<Result<proto::FileInfo, Status>>;
    type GrepRawStream = ReceiverStream<Result<proto::GrepMatch, Status>>;
    type GlobInfoStream = ReceiverStream<Result<proto::FileInfo, Status>>;

    async fn get_id(&self, _request: Request<Empty>) -> Result<Response<IdResponse>, Status> {
        Ok(Response::new(IdResponse {
            id: self.sandbox_id.clone(),
        }))
    }

    async fn read_file(
        &self,
        request: Request<ReadRequest>,
    ) -> Result<Response<ReadResponse>, Status> {
        let req = request.into_inner();
        debug!(target: "sandbox.server", file_path = %req.file_path, "ReadFile");

        let output = self.fs.read(&req.file_path, req.offset, req.limit).await;
        Ok(Response::new(ReadResponse { output }))
    }

    async fn write_file(
        &self,
        request: Request<WriteRequest>,
    ) -> Result<Response<WriteResponse>, Status> {
        let req = request.into_inner();
        debug!(target: "sandbox.server", file_path = %req.file_path, "WriteFile");

        let result = self.fs.write(&req.file_path, &req.content).await;
        Ok(Response::new(WriteResponse {
            path: result.path.unwrap_or_default(),
            error: result.error.unwrap_or_default(),
        }))
    }

    async fn edit_file(
        &self,
        request: Request<EditRequest>,
    ) -> Result<Response<EditResponse>, Status> {
        let req = request.into_inner();
        debug!(target: "sandbox.server", file_path = %req.file_path, replace_all = req.replace_all, "EditFile");

        let result = self
            .fs
            .edit(
                &req.file_path,
                &req.old_string,
                &req.new_string,
                req.replace_all,
            )
            .await;
        Ok(Response::new(EditResponse {
            path: result.path.unwrap_or_default(),
            error: result.error.unwrap_or_default(),
            occurrences: result.occurrences.unwrap_or(0),
        }))
    }

    async fn list_info(
        &self,
        request: Request<ListRequest>,
    ) -> Result<Response<Self::ListInfoStream>, Status> {
        let req = request.into_inner();
        let fs = self.fs.clone();

        let entries = tokio::task::spawn_blocking(move || fs.list(&req.path))
            .await
            .map_err(|e| Status::internal(format!("ListInfo task failed: {e}")))?;

        Ok(Response::new(stream_items(
            entries.into_iter().map(convert_file_info).collect(),
        )))
    }

    async fn grep_raw(
        &self,
        request: Request<GrepRequest>,
    ) -> Result<Response<Self::GrepRawStream>, Status> {
        let req = request.into_inner();
        let fs = self.fs.clone();

        let matches = tokio::task::spawn_blocking(move || {
            fs.grep(&req.pattern, Some(req.path.as_str()), Some(req.glob.as_str()))
        })
        .await
        .map_err(|e| Status::internal(format!("GrepRaw task failed: {e}")))?
        .map_err(Status::invalid_argument)?;

        Ok(Response::new(stream_items(
            matches.into_iter().map(convert_grep_match).collect(),
        )))
    }

    async fn glob_info(
        &self,
        request: Request<GlobRequest>,
    ) -> Result<Response<Self::GlobInfoStream>, Status> {
        let req = request.into_inner();
        let fs = self.fs.clone();

        let entries = tokio::task::spawn_blocking(move || fs.glob(&req.pattern, &req.path))
            .await
            .map_err(|e| Status::internal(format!("GlobInfo task failed: {e}")))?;

        Ok(Response::new(stream_items(
            entries.into_iter().map(convert_file_info).collect(),
        )))
    }

    async fn execute(
        &self,
        request: Request<ExecuteRequest>,
    ) -> Result<Response<ExecuteResponse>, Status> {
        let req = request.into_inner();
        let result = self.executor.execute(&req.command).await;

        Ok(Response::new(ExecuteResponse {
            output: result.output,
            exit_code: result.exit_code,
            signal: result.signal,
            truncated: result.truncated,
        }))
    }

    async fn upload_files(
        &self,
        request: Request<UploadRequest>,
    ) -> Result<Response<UploadResponse>, Status> {
        let files: Vec<(String, Vec<u8>)> = request
            .into_inner()
            .files
            .into_iter()
            .map(|f| (f.path, f.content))
            .collect();

        let results = self
            .executor
            .upload_files(&files)
            .await
            .into_iter()
            .map(|r| UploadResult {
                path: r.path,
                error: r.error.map(String::from).unwrap_or_default(),
            })
            .collect();

        Ok(Response::new(UploadResponse { results }))
    }

    async fn download_files(
        &self,
        request: Request<DownloadRequest>,
    ) -> Result<Response<DownloadResponse>, Status> {
        let paths = request.into_inner().paths;

        let results = self
            .executor
            .download_files(&paths)
            .await
            .into_iter()
            .map(|r| DownloadResult {
                path: r.path,
                content: r.content.unwrap_or_default(),
                error: r.error.map(String::from).unwrap_or_default(),
            })
            .collect();

        Ok(Response::new(DownloadResponse { results }))
    }
}
