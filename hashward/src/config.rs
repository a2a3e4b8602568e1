//! Coordinator configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::launcher::{ProcessSpawner, WorkerSpawner};

/// Work factor of the fake digest.
pub const DEFAULT_FAKE_HASH_COST: u32 = 12;

/// Upper bound on a single worker round trip.
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(120);

pub const ENV_WORKER_BIN: &str = "HASHWARD_WORKER_BIN";
pub const ENV_WORKER_TIMEOUT_SECS: &str = "HASHWARD_WORKER_TIMEOUT_SECS";
pub const ENV_FAKE_HASH_COST: &str = "HASHWARD_FAKE_HASH_COST";
pub const ENV_MAX_WORKERS: &str = "HASHWARD_MAX_WORKERS";

pub struct CoordinatorConfig {
    pub spawner: Arc<dyn WorkerSpawner>,
    pub fake_hash_cost: u32,
    /// `None` waits on a worker indefinitely.
    pub worker_timeout: Option<Duration>,
    /// `None` leaves the number of live workers unbounded.
    pub max_concurrent_workers: Option<usize>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::new(Arc::new(ProcessSpawner::default()))
    }
}

impl CoordinatorConfig {
    pub fn new(spawner: Arc<dyn WorkerSpawner>) -> Self {
        Self {
            spawner,
            fake_hash_cost: DEFAULT_FAKE_HASH_COST,
            worker_timeout: Some(DEFAULT_WORKER_TIMEOUT),
            max_concurrent_workers: None,
        }
    }

    pub fn with_fake_hash_cost(mut self, cost: u32) -> Self {
        self.fake_hash_cost = cost;
        self
    }

    pub fn with_worker_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.worker_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_workers(mut self, max: Option<usize>) -> Self {
        self.max_concurrent_workers = max;
        self
    }

    /// Build from `HASHWARD_*` environment variables, spawning worker processes.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let program = lookup(ENV_WORKER_BIN)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(ProcessSpawner::default_program);
        let mut config = Self::new(Arc::new(ProcessSpawner::new(program)));

        if let Some(secs) = parse_var::<u64>(&lookup, ENV_WORKER_TIMEOUT_SECS) {
            config.worker_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(cost) = parse_var::<u32>(&lookup, ENV_FAKE_HASH_COST) {
            config.fake_hash_cost = cost;
        }
        if let Some(max) = parse_var::<usize>(&lookup, ENV_MAX_WORKERS) {
            config.max_concurrent_workers = (max > 0).then_some(max);
        }
        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Ignoring invalid environment value");
            None
        }
    }
}
