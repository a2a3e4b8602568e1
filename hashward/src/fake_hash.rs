//! Single-flight cache for the fake digest.
//!
//! State machine: `Empty -> Pending -> Resolved`. Concurrent first callers all
//! attach to one shared in-flight computation; a failed computation drops the
//! state back to `Empty` so a later caller can retry.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::coordinator::PasswordError;

type PendingDigest = Shared<BoxFuture<'static, Result<String, Arc<PasswordError>>>>;

enum CacheState {
    Empty,
    Pending(PendingDigest),
    Resolved(String),
}

pub struct FakeHashCache {
    state: StdMutex<CacheState>,
}

impl Default for FakeHashCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHashCache {
    pub fn new() -> Self {
        Self {
            state: StdMutex::new(CacheState::Empty),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // The state is replaced wholesale under the lock, so it is never torn.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The cached digest, if it has been resolved.
    pub fn get(&self) -> Option<String> {
        match &*self.lock() {
            CacheState::Resolved(digest) => Some(digest.clone()),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(&*self.lock(), CacheState::Pending(_))
    }

    /// Return the cached digest, computing it with `init` if nobody has yet.
    ///
    /// `init` runs at most once per `Empty -> Pending` transition; callers
    /// arriving while it is in flight wait for the same result.
    pub async fn get_or_init<F, Fut>(&self, init: F) -> Result<String, Arc<PasswordError>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, PasswordError>> + Send + 'static,
    {
        let pending = {
            let mut state = self.lock();
            match &*state {
                CacheState::Resolved(digest) => return Ok(digest.clone()),
                CacheState::Pending(pending) => pending.clone(),
                CacheState::Empty => {
                    let fut = init();
                    let pending = async move { fut.await.map_err(Arc::new) }
                        .boxed()
                        .shared();
                    *state = CacheState::Pending(pending.clone());
                    pending
                }
            }
        };

        let result = pending.clone().await;

        let mut state = self.lock();
        // Only the computation we awaited may settle the state; a later
        // generation (after a reset) belongs to someone else.
        let ours = matches!(&*state, CacheState::Pending(current) if current.ptr_eq(&pending));
        if ours {
            *state = match &result {
                Ok(digest) => CacheState::Resolved(digest.clone()),
                Err(e) => {
                    tracing::warn!(error = %e, "Fake hash generation failed, cache reset");
                    CacheState::Empty
                }
            };
        }
        result
    }
}
