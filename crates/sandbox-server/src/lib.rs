pub mod ops;
pub mod sandbox_io_service;

pub use sandbox_proto::sandbox_io::v1 as proto;

use std::future::Future;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use crate::proto::sandbox_io_router_server::SandboxIoRouterServer;
use crate::sandbox_io_service::SandboxIoService;

const GRPC_MAX_MESSAGE_SIZE_BYTES: usize = 32 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Sandbox(#[from] sandbox_backend::SandboxError),

    #[error("Invalid listen address: {0}")]
    InvalidAddress(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

fn router(service: SandboxIoService) -> SandboxIoRouterServer<SandboxIoService> {
    SandboxIoRouterServer::new(service)
        .max_decoding_message_size(GRPC_MAX_MESSAGE_SIZE_BYTES)
        .max_encoding_message_size(GRPC_MAX_MESSAGE_SIZE_BYTES)
}

/// Serve `service` on `addr` until `shutdown` resolves.
pub async fn serve(
    service: SandboxIoService,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()>,
) -> Result<(), ServerError> {
    Server::builder()
        .add_service(router(service))
        .serve_with_shutdown(addr, shutdown)
        .await?;
    Ok(())
}

/// Serve `service` on an already bound listener until `shutdown` resolves.
pub async fn serve_with_listener(
    service: SandboxIoService,
    listener: TcpListener,
    shutdown: impl Future<Output = ()>,
) -> Result<(), ServerError> {
    Server::builder()
        .add_service(router(service))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await?;
    Ok(())
}
