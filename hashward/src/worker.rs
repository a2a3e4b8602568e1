//! Worker side of the coordinator protocol.
//!
//! The parent side (spawning, dispatch) is in launcher.rs.
//!
//! A worker is one-shot: it reads exactly one request frame, runs exactly one
//! primitive operation, writes exactly one response frame and returns. Nothing
//! survives past that single exchange.

use std::io;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, stdin, stdout};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::JsonCodec;
use crate::bridge::protocol::{ResponseEnvelope, WorkerRequest, WorkerResponse};
use crate::primitive::{HashPrimitive, PrimitiveError};

/// Run the primitive operation named by `request`.
pub fn execute<P: HashPrimitive>(
    primitive: &P,
    request: WorkerRequest,
) -> Result<WorkerResponse, PrimitiveError> {
    match request {
        WorkerRequest::Hash { rounds, password } => {
            let salt = primitive.gen_salt(rounds)?;
            let digest = primitive.hash_with_salt(password.as_bytes(), salt)?;
            Ok(WorkerResponse::Digest(digest))
        }
        WorkerRequest::Compare { password, hash } => {
            let matched = primitive.verify(password.as_bytes(), &hash)?;
            Ok(WorkerResponse::Matched(matched))
        }
    }
}

/// Serve a single request over `reader`/`writer`.
///
/// Returns after the one response has been written (or failed to write).
/// If the channel closes before a request arrives, no response is sent.
pub async fn serve_request<R, W, P>(reader: R, writer: W, primitive: Arc<P>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    P: HashPrimitive,
{
    let mut reader = FramedRead::new(reader, JsonCodec::<WorkerRequest>::new());
    let mut writer = FramedWrite::new(writer, JsonCodec::<ResponseEnvelope>::new());

    let response = match reader.next().await {
        Some(Ok(request)) => {
            let kind = request.kind();
            tracing::debug!(%kind, "Request received");
            compute(primitive, request).await
        }
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Rejecting unrecognized request");
            WorkerResponse::failed(format!("unrecognized request: {}", e))
        }
        None => {
            tracing::error!("Channel closed before a request arrived");
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "channel closed before a request arrived",
            ));
        }
    };

    if let WorkerResponse::Failed(ref error) = response {
        tracing::error!(%error, "Request failed");
    }

    writer.send(ResponseEnvelope::from(response)).await?;
    writer.close().await?;
    tracing::debug!("Response sent");
    Ok(())
}

async fn compute<P: HashPrimitive>(primitive: Arc<P>, request: WorkerRequest) -> WorkerResponse {
    let task = tokio::task::spawn_blocking(move || execute(primitive.as_ref(), request));
    match task.await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => WorkerResponse::failed(e.to_string()),
        Err(e) if e.is_panic() => {
            let panic = e.into_panic();
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            WorkerResponse::failed(format!("worker panicked: {}", message))
        }
        Err(e) => WorkerResponse::failed(format!("worker task failed: {}", e)),
    }
}

/// Run the worker over stdin/stdout.
///
/// Stdout carries protocol frames only; logs go to stderr.
pub async fn run_worker<P: HashPrimitive>(primitive: P) -> io::Result<()> {
    serve_request(stdin(), stdout(), Arc::new(primitive)).await
}
