use std::future::Future;
use std::pin::Pin;

use crate::cluster::error::ClusterError;

/// Boxed async callback fired on a count transition.
pub type TransitionFn =
    Box<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), ClusterError>> + Send>> + Send + Sync>;

/// Acquire/release counter with side-effecting edge callbacks.
///
/// `on_activate` fires on every 0→1 transition and completes before the
/// triggering `retain` returns; `on_deactivate` fires on every 1→0
/// transition. The counter is not internally synchronized: the owner
/// serializes transitions (the view registry holds its write lock across
/// them), so callbacks never run concurrently for the same instance.
///
/// A callback error propagates to the retain/release caller with the count
/// already mutated; the caller must treat the guarded resource as partially
/// started or stopped.
pub struct ReferenceCount {
    count: i64,
    on_activate: TransitionFn,
    on_deactivate: TransitionFn,
}

impl ReferenceCount {
    pub fn new(on_activate: TransitionFn, on_deactivate: TransitionFn) -> Self {
        Self {
            count: 0,
            on_activate,
            on_deactivate,
        }
    }

    /// Build a counter from plain async closures, boxing them internally.
    pub fn on<A, AF, D, DF>(activate: A, deactivate: D) -> Self
    where
        A: Fn() -> AF + Send + Sync + 'static,
        AF: Future<Output = Result<(), ClusterError>> + Send + 'static,
        D: Fn() -> DF + Send + Sync + 'static,
        DF: Future<Output = Result<(), ClusterError>> + Send + 'static,
    {
        Self::new(
            Box::new(move || {
                Box::pin(activate()) as Pin<Box<dyn Future<Output = Result<(), ClusterError>> + Send>>
            }),
            Box::new(move || {
                Box::pin(deactivate())
                    as Pin<Box<dyn Future<Output = Result<(), ClusterError>> + Send>>
            }),
        )
    }

    /// Increment the count, activating the guarded resource on the first
    /// retain.
    pub async fn retain(&mut self) -> Result<(), ClusterError> {
        self.count += 1;
        if self.count == 1 {
            (self.on_activate)().await?;
        }
        Ok(())
    }

    /// Decrement the count, deactivating the guarded resource on the last
    /// release.
    ///
    /// Releasing an unretained counter is a no-op, so deactivation cannot
    /// fire twice for the same return to zero.
    pub async fn release(&mut self) -> Result<(), ClusterError> {
        if self.count == 0 {
            return Ok(());
        }
        self.count -= 1;
        if self.count == 0 {
            (self.on_deactivate)().await?;
        }
        Ok(())
    }

    /// Current count. Diagnostics only: callers must not base start/stop
    /// decisions on it outside the owning lock.
    pub fn get(&self) -> i64 {
        self.count
    }
}

impl std::fmt::Debug for ReferenceCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceCount")
            .field("count", &self.count)
            .finish()
    }
}
