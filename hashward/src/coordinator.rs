//! Coordinator - the long-lived side that application code calls.
//!
//! Every `hash` and `compare` runs in its own freshly launched worker. The
//! coordinator normalizes input, owns the fake-hash cache, and turns worker
//! outcomes into [`PasswordError`]s.

use std::sync::{Arc, OnceLock};

use crate::config::CoordinatorConfig;
use crate::digest::{pre_digest, random_password};
use crate::fake_hash::FakeHashCache;
use crate::launcher::{WorkerError, WorkerLauncher};
use crate::primitive::{MAX_COST, MIN_COST, cost_in_range};

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("invalid cost {0}: expected {min}..={max}", min = MIN_COST, max = MAX_COST)]
    InvalidCost(u32),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    /// Generating the fake digest failed; the cache is retryable.
    #[error("fake hash initialization failed: {0}")]
    CacheInit(#[source] Arc<PasswordError>),
}

/// Password hashing front end.
///
/// Cheap to clone; clones share the launcher and the fake-hash cache.
#[derive(Clone)]
pub struct Coordinator {
    launcher: Arc<WorkerLauncher>,
    fake_hash: Arc<FakeHashCache>,
    fake_hash_cost: u32,
}

static GLOBAL: OnceLock<Coordinator> = OnceLock::new();

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        let launcher = WorkerLauncher::new(config.spawner)
            .with_timeout(config.worker_timeout)
            .with_max_concurrent(config.max_concurrent_workers);
        Self {
            launcher: Arc::new(launcher),
            fake_hash: Arc::new(FakeHashCache::new()),
            fake_hash_cost: config.fake_hash_cost,
        }
    }

    /// Process-wide coordinator configured from the environment.
    pub fn global() -> &'static Coordinator {
        GLOBAL.get_or_init(|| Coordinator::new(CoordinatorConfig::from_env()))
    }

    /// Hash `password` at work factor `cost`.
    pub async fn hash(
        &self,
        cost: u32,
        password: impl AsRef<[u8]>,
    ) -> Result<String, PasswordError> {
        tracing::debug!(cost, "Hashing password");
        hash_normalized(&self.launcher, cost, password.as_ref()).await
    }

    /// Verify `password` against `digest`.
    ///
    /// A missing (or empty) digest is replaced by the fake digest, so the
    /// result is `false` but the worker does the same amount of work as for a
    /// real mismatch. Set `prehashed` when the stored digest was produced from
    /// a password the caller had already run through [`pre_digest`].
    pub async fn compare(
        &self,
        password: impl AsRef<[u8]>,
        digest: Option<&str>,
        prehashed: bool,
    ) -> Result<bool, PasswordError> {
        // Resolved on every call so cold and warm paths cost the same.
        let fake = self.fake_digest().await?;

        let normalized = if prehashed {
            pre_digest(pre_digest(password))
        } else {
            pre_digest(password)
        };
        let target = match digest {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => fake,
        };

        Ok(self.launcher.compare(normalized, target).await?)
    }

    /// The cached fake digest, generating it on first use.
    pub async fn fake_digest(&self) -> Result<String, PasswordError> {
        let launcher = Arc::clone(&self.launcher);
        let cost = self.fake_hash_cost;
        self.fake_hash
            .get_or_init(move || async move {
                tracing::info!(cost, "Generating fake hash");
                hash_normalized(&launcher, cost, random_password().as_bytes()).await
            })
            .await
            .map_err(PasswordError::CacheInit)
    }
}

async fn hash_normalized(
    launcher: &WorkerLauncher,
    cost: u32,
    password: &[u8],
) -> Result<String, PasswordError> {
    if !cost_in_range(cost) {
        return Err(PasswordError::InvalidCost(cost));
    }
    Ok(launcher.hash(cost, pre_digest(password)).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use crate::launcher::TaskSpawner;
    use crate::primitive::{Bcrypt, BcryptSalt, HashPrimitive, PrimitiveError};

    /// Bcrypt with call counters and a switchable hash failure.
    #[derive(Default)]
    struct Recorder {
        hashes: AtomicUsize,
        verifies: AtomicUsize,
        fail_hash: AtomicBool,
        last_verified: StdMutex<Option<String>>,
    }

    impl HashPrimitive for Arc<Recorder> {
        type Salt = BcryptSalt;

        fn gen_salt(&self, cost: u32) -> Result<BcryptSalt, PrimitiveError> {
            Bcrypt.gen_salt(cost)
        }

        fn hash_with_salt(&self, password: &[u8], salt: BcryptSalt) -> Result<String, PrimitiveError> {
            self.hashes.fetch_add(1, Ordering::SeqCst);
            if self.fail_hash.load(Ordering::SeqCst) {
                return Err(PrimitiveError::new("entropy pool exhausted"));
            }
            Bcrypt.hash_with_salt(password, salt)
        }

        fn verify(&self, password: &[u8], digest: &str) -> Result<bool, PrimitiveError> {
            self.verifies.fetch_add(1, Ordering::SeqCst);
            *self.last_verified.lock().unwrap() = Some(digest.to_string());
            Bcrypt.verify(password, digest)
        }
    }

    fn coordinator(recorder: &Arc<Recorder>, fake_cost: u32) -> Coordinator {
        let spawner = Arc::new(TaskSpawner::new(Arc::clone(recorder)));
        Coordinator::new(CoordinatorConfig::new(spawner).with_fake_hash_cost(fake_cost))
    }

    #[tokio::test]
    async fn hash_then_compare() {
        let recorder = Arc::new(Recorder::default());
        let coord = coordinator(&recorder, 4);

        let digest = coord.hash(5, "correct horse").await.unwrap();
        assert!(digest.starts_with("$2b$05$"));
        assert!(coord.compare("correct horse", Some(&digest), false).await.unwrap());
        assert!(!coord.compare("wrong horse", Some(&digest), false).await.unwrap());
        assert!(!coord.compare("correct horse", None, false).await.unwrap());
    }

    #[tokio::test]
    async fn long_passwords_are_not_truncated() {
        let recorder = Arc::new(Recorder::default());
        let coord = coordinator(&recorder, 4);

        let base = "x".repeat(100);
        let digest = coord.hash(4, format!("{}a", base)).await.unwrap();
        assert!(coord.compare(format!("{}a", base), Some(&digest), false).await.unwrap());
        assert!(!coord.compare(format!("{}b", base), Some(&digest), false).await.unwrap());
    }

    #[tokio::test]
    async fn prehashed_round_trip() {
        let recorder = Arc::new(Recorder::default());
        let coord = coordinator(&recorder, 4);

        let stored = coord.hash(4, pre_digest("s3cret")).await.unwrap();
        assert!(coord.compare("s3cret", Some(&stored), true).await.unwrap());
        assert!(!coord.compare("s3cret", Some(&stored), false).await.unwrap());
    }

    #[tokio::test]
    async fn missing_digest_compares_against_fake() {
        let recorder = Arc::new(Recorder::default());
        let coord = coordinator(&recorder, 4);

        assert!(!coord.compare("anything", None, false).await.unwrap());
        assert!(!coord.compare("anything", Some(""), true).await.unwrap());

        let fake = coord.fake_digest().await.unwrap();
        assert_eq!(recorder.last_verified.lock().unwrap().as_deref(), Some(fake.as_str()));
        assert_eq!(recorder.verifies.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fake_hash_generated_once_under_concurrency() {
        let recorder = Arc::new(Recorder::default());
        let coord = coordinator(&recorder, 4);

        let calls = (0..8).map(|i| {
            let coord = coord.clone();
            tokio::spawn(async move { coord.compare(format!("user-{}", i), None, i % 2 == 0).await })
        });
        for result in futures::future::join_all(calls).await {
            assert!(!result.unwrap().unwrap());
        }

        assert_eq!(recorder.hashes.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.verifies.load(Ordering::SeqCst), 8);

        // Warm cache: further calls never hash again.
        coord.compare("again", None, false).await.unwrap();
        coord.fake_digest().await.unwrap();
        assert_eq!(recorder.hashes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn compare_with_real_digest_still_warms_cache() {
        let recorder = Arc::new(Recorder::default());
        let coord = coordinator(&recorder, 4);

        let digest = coord.hash(4, "pw").await.unwrap();
        assert_eq!(recorder.hashes.load(Ordering::SeqCst), 1);

        assert!(coord.compare("pw", Some(&digest), false).await.unwrap());
        assert_eq!(recorder.hashes.load(Ordering::SeqCst), 2);
        assert!(coord.fake_hash.get().is_some());
    }

    #[tokio::test]
    async fn hash_failure_preserves_worker_message() {
        let recorder = Arc::new(Recorder::default());
        recorder.fail_hash.store(true, Ordering::SeqCst);
        let coord = coordinator(&recorder, 4);

        let err = coord.hash(4, "pw").await.unwrap_err();
        assert!(matches!(err, PasswordError::Worker(WorkerError::Computation(_))));
        assert!(err.to_string().contains("entropy pool exhausted"), "got {}", err);
    }

    #[tokio::test]
    async fn fake_hash_failure_is_retryable() {
        let recorder = Arc::new(Recorder::default());
        recorder.fail_hash.store(true, Ordering::SeqCst);
        let coord = coordinator(&recorder, 4);

        let err = coord.compare("pw", None, false).await.unwrap_err();
        assert!(matches!(err, PasswordError::CacheInit(_)));
        assert!(err.to_string().contains("entropy pool exhausted"), "got {}", err);
        assert_eq!(recorder.verifies.load(Ordering::SeqCst), 0);

        recorder.fail_hash.store(false, Ordering::SeqCst);
        assert!(!coord.compare("pw", None, false).await.unwrap());
        assert_eq!(recorder.hashes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn oversized_digest_is_rejected_without_a_worker() {
        let recorder = Arc::new(Recorder::default());
        let coord = coordinator(&recorder, 4);

        let err = coord
            .compare("pw", Some(&"x".repeat(70_000)), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PasswordError::Worker(WorkerError::RequestTooLarge { .. })
        ));
        assert_eq!(recorder.verifies.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_cost_spawns_nothing() {
        let recorder = Arc::new(Recorder::default());
        let coord = coordinator(&recorder, 4);

        for cost in [0, 3, 32] {
            let err = coord.hash(cost, "pw").await.unwrap_err();
            assert!(matches!(err, PasswordError::InvalidCost(c) if c == cost));
        }
        assert_eq!(recorder.hashes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_fake_cost_surfaces_as_cache_failure() {
        let recorder = Arc::new(Recorder::default());
        let coord = coordinator(&recorder, 40);

        let err = coord.compare("pw", None, false).await.unwrap_err();
        match err {
            PasswordError::CacheInit(inner) => {
                assert!(matches!(*inner, PasswordError::InvalidCost(40)))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_account_latency_matches_wrong_password() {
        let recorder = Arc::new(Recorder::default());
        let coord = coordinator(&recorder, 8);

        let digest = coord.hash(8, "real password").await.unwrap();
        coord.fake_digest().await.unwrap();

        let mut missing = Vec::new();
        let mut wrong = Vec::new();
        for _ in 0..7 {
            let started = Instant::now();
            assert!(!coord.compare("guess", None, false).await.unwrap());
            missing.push(started.elapsed());

            let started = Instant::now();
            assert!(!coord.compare("guess", Some(&digest), false).await.unwrap());
            wrong.push(started.elapsed());
        }

        let median = |mut v: Vec<Duration>| {
            v.sort();
            v[v.len() / 2].as_secs_f64()
        };
        let ratio = median(missing) / median(wrong);
        assert!((0.2..5.0).contains(&ratio), "latency ratio {}", ratio);
    }
}
