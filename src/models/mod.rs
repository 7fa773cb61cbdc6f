#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Shared model handles.
//!
//! Models are expensive to load, so each one lives in a [`ModelSlot`] owned by
//! the component that uses it. The slot loads the model on first use and hands
//! out `Arc` clones afterwards. Only one caller loads at a time; everybody else
//! waits for that load for a bounded time.

/// Model file resolution against the hub or an offline directory.
pub mod hub;

use std::{
    future::Future,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{sync::Notify, time::Instant};

use crate::error::{LoadFailure, ModelLoadError};

/// Something that knows how to build a model of type `T` from scratch.
///
/// Loading is blocking and is always run on the blocking thread pool.
pub trait ModelLoader<T: ?Sized>: Send + Sync {
    /// Human readable model name used in logs and errors.
    fn name(&self) -> &str;

    /// Performs one load attempt.
    fn load(&self) -> Result<Arc<T>, LoadFailure>;
}

/// How often and how patiently to retry a failed model load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, at least one.
    attempts: u32,
    /// Fixed pause between attempts.
    backoff:  Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            backoff:  Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy; `attempts` is raised to one if zero.
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Total number of attempts.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Pause between attempts.
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Runs `loader` on the blocking pool until it succeeds or the attempts
    /// are exhausted.
    pub async fn load<T>(&self, loader: Arc<dyn ModelLoader<T>>) -> Result<Arc<T>, ModelLoadError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let mut last_failure = None;

        for attempt in 1..=self.attempts {
            let task_loader = Arc::clone(&loader);
            let outcome = tokio::task::spawn_blocking(move || task_loader.load())
                .await
                .unwrap_or_else(|err| {
                    Err(LoadFailure::Other(format!("loader task failed: {err}")))
                });

            match outcome {
                Ok(model) => {
                    tracing::info!(model = loader.name(), attempt, "model loaded");
                    return Ok(model);
                }
                Err(failure) => {
                    tracing::warn!(
                        model = loader.name(),
                        attempt,
                        attempts = self.attempts,
                        error = %failure,
                        "model load attempt failed"
                    );
                    last_failure = Some(failure);
                    if attempt < self.attempts {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }

        let failure =
            last_failure.unwrap_or_else(|| LoadFailure::Other("no load attempt was made".into()));
        let message = if failure.is_connectivity() {
            format!("network/download failure, check connectivity to the model hub: {failure}")
        } else {
            format!("model failed to initialize: {failure}")
        };

        Err(ModelLoadError::Unavailable {
            model: loader.name().to_string(),
            attempts: self.attempts,
            message,
        })
    }
}

/// A lazily initialized, shared, read-only model handle.
pub struct ModelSlot<T: ?Sized> {
    /// The loaded model, once available.
    cell:    OnceLock<Arc<T>>,
    /// Set while some caller is running a load.
    loading: AtomicBool,
    /// Wakes waiters when a load finishes, successfully or not.
    done:    Notify,
    /// How long a non-loading caller waits for an in-flight load.
    wait:    Duration,
}

impl<T: ?Sized> std::fmt::Debug for ModelSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSlot")
            .field("loaded", &self.cell.get().is_some())
            .field("loading", &self.loading.load(Ordering::Relaxed))
            .field("wait", &self.wait)
            .finish()
    }
}

/// Clears the loading flag and wakes waiters when the loader finishes or is
/// cancelled.
struct LoadingGuard<'a> {
    /// Flag to clear.
    loading: &'a AtomicBool,
    /// Waiters to wake.
    done:    &'a Notify,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.loading.store(false, Ordering::Release);
        self.done.notify_waiters();
    }
}

impl<T: ?Sized> ModelSlot<T> {
    /// Creates an empty slot whose waiters give up after `wait`.
    pub fn new(wait: Duration) -> Self {
        Self {
            cell: OnceLock::new(),
            loading: AtomicBool::new(false),
            done: Notify::new(),
            wait,
        }
    }

    /// Creates a slot that already holds `model`.
    pub fn ready(model: Arc<T>, wait: Duration) -> Self {
        let slot = Self::new(wait);
        let _ = slot.cell.set(model);
        slot
    }

    /// Returns the model if it has been loaded.
    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }

    /// Returns the loaded model, loading it with `load` if nobody has yet.
    ///
    /// The caller that starts the load waits for it without a bound. Callers
    /// arriving while a load is in flight wait at most the slot's bound and
    /// then fail with [`ModelLoadError::Timeout`]. If the in-flight load fails
    /// a waiter takes over and tries again.
    pub async fn get_or_load<F, Fut>(&self, load: F) -> Result<Arc<T>, ModelLoadError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Arc<T>, ModelLoadError>>,
    {
        let deadline = Instant::now() + self.wait;

        loop {
            if let Some(model) = self.cell.get() {
                return Ok(Arc::clone(model));
            }

            if self
                .loading
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let _guard = LoadingGuard {
                    loading: &self.loading,
                    done:    &self.done,
                };
                if let Some(model) = self.cell.get() {
                    return Ok(Arc::clone(model));
                }
                let model = load().await?;
                let _ = self.cell.set(Arc::clone(&model));
                return Ok(model);
            }

            let notified = self.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.cell.get().is_some() || !self.loading.load(Ordering::Acquire) {
                continue;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::warn!(waited = ?self.wait, "gave up waiting for in-flight model load");
                return Err(ModelLoadError::Timeout(self.wait));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct Flaky {
        calls:    AtomicUsize,
        succeeds: usize,
        network:  bool,
    }

    impl ModelLoader<String> for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn load(&self) -> Result<Arc<String>, LoadFailure> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeeds {
                Ok(Arc::new(format!("loaded on {call}")))
            } else if self.network {
                Err(LoadFailure::Connectivity("connection refused".into()))
            } else {
                Err(LoadFailure::Other("bad weights".into()))
            }
        }
    }

    #[tokio::test]
    async fn retry_succeeds_on_second_attempt() {
        let loader = Arc::new(Flaky {
            calls:    AtomicUsize::new(0),
            succeeds: 2,
            network:  false,
        });
        let policy = RetryPolicy::new(2, Duration::from_millis(1));

        let dyn_loader: Arc<dyn ModelLoader<String>> = loader.clone();
        let model = policy.load(dyn_loader).await.expect("second attempt loads");

        assert_eq!(*model, "loaded on 2");
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_report_connectivity() {
        let loader = Arc::new(Flaky {
            calls:    AtomicUsize::new(0),
            succeeds: usize::MAX,
            network:  true,
        });
        let policy = RetryPolicy::new(2, Duration::from_millis(1));

        let dyn_loader: Arc<dyn ModelLoader<String>> = loader.clone();
        let err = policy.load(dyn_loader).await.unwrap_err();

        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
        match err {
            ModelLoadError::Unavailable { attempts, message, .. } => {
                assert_eq!(attempts, 2);
                assert!(message.contains("network/download"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn generic_failure_is_not_reported_as_network() {
        let loader: Arc<dyn ModelLoader<String>> = Arc::new(Flaky {
            calls:    AtomicUsize::new(0),
            succeeds: usize::MAX,
            network:  false,
        });
        let err = RetryPolicy::new(1, Duration::ZERO)
            .load(loader)
            .await
            .unwrap_err();

        assert!(!err.to_string().contains("network/download"));
    }

    #[tokio::test]
    async fn ready_slot_never_loads() {
        let slot = ModelSlot::ready(Arc::new(7u32), Duration::from_millis(10));
        let value = slot
            .get_or_load(|| async { Ok(Arc::new(0u32)) })
            .await
            .expect("ready");
        assert_eq!(*value, 7);
    }

    #[tokio::test]
    async fn failed_load_leaves_slot_empty() {
        let slot: ModelSlot<u32> = ModelSlot::new(Duration::from_millis(10));
        let err = slot
            .get_or_load(|| async { Err(ModelLoadError::Timeout(Duration::ZERO)) })
            .await;
        assert!(err.is_err());
        assert!(slot.get().is_none());

        let value = slot
            .get_or_load(|| async { Ok(Arc::new(3u32)) })
            .await
            .expect("second load");
        assert_eq!(*value, 3);
    }
}
