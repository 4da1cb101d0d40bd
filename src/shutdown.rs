//! Shutdown coordination for actors sharing one reactor
//!
//! Several independent actors (an HTTP client, a stream reader, a producer
//! thread) may share a reactor without any of them owning it. Each actor
//! releases itself from the [`ShutdownCoordinator`] exactly once when it is
//! permanently done; the release that brings the live count to zero stops
//! the reactor. The stop is issued at most once.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info};

/// Target of the coordinator's single stop
pub trait Stop: Send + Sync {
    fn stop(&self);
}

/// Released more times than attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("shutdown coordinator released more times than actors were attached")]
pub struct CoordinatorMisuse;

struct Inner {
    live: AtomicUsize,
    stopped: AtomicBool,
    target: Box<dyn Stop>,
}

/// Shared counter of live actors bound to a reactor's stop operation
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    /// Create a coordinator with `actors` live actors
    pub fn new(target: impl Stop + 'static, actors: usize) -> Self {
        ShutdownCoordinator {
            inner: Arc::new(Inner {
                live: AtomicUsize::new(actors),
                stopped: AtomicBool::new(false),
                target: Box::new(target),
            }),
        }
    }

    /// Record `n` more live actors
    pub fn attach(&self, n: usize) {
        let prev = self.inner.live.fetch_add(n, Ordering::AcqRel);
        debug!(live = prev + n, "actors attached");
    }

    /// Release one actor, stopping the reactor if it was the last one
    ///
    /// # Panics
    ///
    /// Panics if called more times than actors were attached; that means an
    /// actor leaked a second release.
    pub fn release(&self) {
        if let Err(e) = self.try_release() {
            error!("{}", e);
            panic!("{}", e);
        }
    }

    /// Release one actor and return the remaining live count
    pub fn try_release(&self) -> Result<usize, CoordinatorMisuse> {
        let prev = self
            .inner
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map_err(|_| CoordinatorMisuse)?;

        let live = prev - 1;
        debug!(live, "actor released");

        if live == 0 && !self.inner.stopped.swap(true, Ordering::AcqRel) {
            info!("last actor released, stopping reactor");
            self.inner.target.stop();
        }
        Ok(live)
    }

    /// Current number of live actors
    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }

    /// Whether the stop has been issued
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("live", &self.live())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
