//! IPC bridge between the coordinator and a one-shot hashing worker.
//!
//! # Architecture
//!
//! - **protocol**: Message types (WorkerRequest, ResponseEnvelope, WorkerResponse)
//! - **codec**: JSON framing codec for AsyncRead/AsyncWrite

pub mod codec;
pub mod protocol;
