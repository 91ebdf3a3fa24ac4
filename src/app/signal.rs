//! Readiness barrier between the application and its servers.
//!
//! Every server gets a [`ReadySignal`]. The barrier opens once each signal
//! has either reported ready or intercepted; it opens `Intercepted` if any
//! of them intercepted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Gate {
    Pending,
    Ready,
    Intercepted,
}

struct Shared {
    remaining: watch::Sender<usize>,
    intercepted: AtomicBool,
    gate: watch::Sender<Gate>,
}

/// Counting barrier owned by the application.
pub(crate) struct ReadyBarrier {
    shared: Arc<Shared>,
}

impl ReadyBarrier {
    pub(crate) fn new() -> Self {
        let (remaining, _) = watch::channel(0usize);
        let (gate, _) = watch::channel(Gate::Pending);
        Self {
            shared: Arc::new(Shared {
                remaining,
                intercepted: AtomicBool::new(false),
                gate,
            }),
        }
    }

    /// Registers one more party.
    pub(crate) fn add(&self) -> ReadySignal {
        self.shared.remaining.send_modify(|n| *n += 1);
        ReadySignal {
            shared: self.shared.clone(),
            arrived: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Waits for every party, opens the gate and returns true if a party
    /// intercepted.
    pub(crate) async fn wait(&self) -> bool {
        let mut rx = self.shared.remaining.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
        let intercepted = self.shared.intercepted.load(Ordering::Acquire);
        self.shared.gate.send_replace(if intercepted {
            Gate::Intercepted
        } else {
            Gate::Ready
        });
        intercepted
    }
}

/// A server's handle on the readiness barrier.
///
/// Clones share the same party: reporting through any clone counts once.
#[derive(Clone)]
pub struct ReadySignal {
    shared: Arc<Shared>,
    arrived: Arc<AtomicBool>,
}

impl ReadySignal {
    fn arrive(&self) {
        if !self.arrived.swap(true, Ordering::AcqRel) {
            self.shared.remaining.send_modify(|n| *n = n.saturating_sub(1));
        }
    }

    pub(crate) fn has_arrived(&self) -> bool {
        self.arrived.load(Ordering::Acquire)
    }

    /// Reports this server ready and waits until every server has reported.
    /// Returns false when startup was intercepted instead.
    pub async fn trigger_and_wait(&self) -> bool {
        self.arrive();
        let mut rx = self.shared.gate.subscribe();
        let ready = match rx.wait_for(|g| *g != Gate::Pending).await {
            Ok(g) => *g == Gate::Ready,
            Err(_) => false,
        };
        ready
    }

    /// Gives up on startup; the barrier opens once the others have reported.
    pub fn intercept(&self) {
        self.shared.intercepted.store(true, Ordering::Release);
        self.arrive();
    }

    /// Whether any server intercepted startup.
    pub fn intercepted(&self) -> bool {
        self.shared.intercepted.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ReadySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadySignal")
            .field("arrived", &self.has_arrived())
            .field("intercepted", &self.intercepted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_release_after_all_ready() {
        let barrier = ReadyBarrier::new();
        let a = barrier.add();
        let b = barrier.add();
        let wa = tokio::spawn(async move { a.trigger_and_wait().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!wa.is_finished());
        let wb = tokio::spawn(async move { b.trigger_and_wait().await });
        assert!(!barrier.wait().await);
        assert!(wa.await.unwrap());
        assert!(wb.await.unwrap());
    }

    #[tokio::test]
    async fn test_intercept_releases_waiters() {
        let barrier = ReadyBarrier::new();
        let a = barrier.add();
        let b = barrier.add();
        let wa = tokio::spawn(async move { a.trigger_and_wait().await });
        b.intercept();
        b.intercept();
        assert!(barrier.wait().await);
        assert!(!wa.await.unwrap());
        assert!(b.intercepted());
    }

    #[tokio::test]
    async fn test_empty_barrier_opens_immediately() {
        let barrier = ReadyBarrier::new();
        assert!(!barrier.wait().await);
    }
}
