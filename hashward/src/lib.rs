//! hashward: password hashing in disposable worker processes.
//!
//! Each `hash`/`compare` call launches a one-shot worker that performs a single
//! bcrypt operation and exits, keeping CPU-bound work and its faults out of the
//! calling process. Comparisons against a missing digest run against a cached
//! fake digest so unknown accounts cost the same as wrong passwords.

pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod digest;
pub mod fake_hash;
pub mod launcher;
pub mod primitive;
pub mod worker;

pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, PasswordError};
pub use digest::pre_digest;
pub use launcher::{
    ProcessSpawner, SpawnError, TaskSpawner, WorkerError, WorkerLauncher, WorkerSpawner,
};
pub use primitive::{Bcrypt, HashPrimitive, MAX_COST, MIN_COST, PrimitiveError};
pub use worker::{run_worker, serve_request};

/// Hash `password` with the process-wide [`Coordinator`].
pub async fn hash(cost: u32, password: impl AsRef<[u8]>) -> Result<String, PasswordError> {
    Coordinator::global().hash(cost, password).await
}

/// Verify `password` with the process-wide [`Coordinator`].
pub async fn compare(
    password: impl AsRef<[u8]>,
    digest: Option<&str>,
    prehashed: bool,
) -> Result<bool, PasswordError> {
    Coordinator::global()
        .compare(password, digest, prehashed)
        .await
}
