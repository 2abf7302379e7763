//! Graceful shutdown coordination.
//!
//! A [`ShutdownSignal`] is shared by the listener, every connection task and
//! the process orchestrator. The first trigger wins and records why the
//! process is stopping, so the orchestrator can choose the exit code.
//!
//! ```rust
//! use meridian_server::{ShutdownReason, ShutdownSignal};
//!
//! let shutdown = ShutdownSignal::new();
//! let listener_copy = shutdown.clone();
//!
//! assert!(shutdown.trigger(ShutdownReason::DataStoreFailed));
//! assert!(!shutdown.trigger(ShutdownReason::Requested));
//! assert_eq!(listener_copy.reason(), Some(ShutdownReason::DataStoreFailed));
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use meridian_telemetry::fields;
use tokio::sync::{watch, Notify};

/// Why the process is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// An OS signal was received (`"SIGINT"`, `"SIGTERM"`).
    Signal(&'static str),
    /// The data-store connection attempt failed.
    DataStoreFailed,
    /// Shutdown was requested programmatically.
    Requested,
}

impl ShutdownReason {
    /// Returns `true` if the process should exit with a failure code.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::DataStoreFailed)
    }
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signal(name) => write!(f, "received {name}"),
            Self::DataStoreFailed => f.write_str("data store connection failed"),
            Self::Requested => f.write_str("shutdown requested"),
        }
    }
}

/// A cloneable, trigger-once shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    state: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state: Arc::new(state),
        }
    }

    /// Creates a signal that also triggers on SIGTERM or SIGINT.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        let trigger = signal.clone();

        tokio::spawn(async move {
            match wait_for_os_signal().await {
                Ok(name) => {
                    tracing::info!(signal = name, "initiating graceful shutdown");
                    trigger.trigger(ShutdownReason::Signal(name));
                }
                Err(error) => {
                    tracing::warn!({ fields::ERROR } = %error, "could not install signal handlers");
                }
            }
        });

        signal
    }

    /// Triggers shutdown.
    ///
    /// Returns `true` if this call was the one that triggered it; later
    /// calls keep the first reason.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    /// Returns `true` once triggered.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// The reason recorded by the first trigger.
    #[must_use]
    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.state.borrow()
    }

    /// Completes when shutdown is triggered, immediately if it already was.
    pub async fn recv(&self) -> ShutdownReason {
        let mut receiver = self.state.subscribe();
        let reason = match receiver.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(ShutdownReason::Requested),
            Err(_) => ShutdownReason::Requested,
        };
        reason
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_os_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_os_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("SIGINT")
}

/// Counts open connections so shutdown can wait for them to drain.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    open: Arc<AtomicUsize>,
    closed: Arc<Notify>,
}

impl ConnectionTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection until the returned guard is dropped.
    #[must_use]
    pub fn open(&self) -> ConnectionGuard {
        self.open.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            open: Arc::clone(&self.open),
            closed: Arc::clone(&self.closed),
        }
    }

    /// Number of open connections.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Completes once no connections are open.
    pub async fn drained(&self) {
        loop {
            let notified = self.closed.notified();
            if self.open.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Keeps one connection counted while alive.
#[derive(Debug)]
pub struct ConnectionGuard {
    open: Arc<AtomicUsize>,
    closed: Arc<Notify>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.open.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.closed.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    // ============== ShutdownSignal Tests ==============

    #[test]
    fn test_first_trigger_wins() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_shutdown());
        assert!(signal.trigger(ShutdownReason::Signal("SIGTERM")));
        assert!(!signal.trigger(ShutdownReason::DataStoreFailed));
        assert_eq!(signal.reason(), Some(ShutdownReason::Signal("SIGTERM")));
    }

    #[test]
    fn test_clones_share_state() {
        let a = ShutdownSignal::new();
        let b = a.clone();
        a.trigger(ShutdownReason::Requested);
        assert!(b.is_shutdown());
    }

    #[test]
    fn test_recv_pending_until_triggered() {
        let signal = ShutdownSignal::new();
        let mut waiter = task::spawn(signal.recv());
        assert_pending!(waiter.poll());

        signal.trigger(ShutdownReason::DataStoreFailed);
        assert!(waiter.is_woken());
        assert_ready_eq!(waiter.poll(), ShutdownReason::DataStoreFailed);
    }

    #[tokio::test]
    async fn test_recv_after_trigger_is_immediate() {
        let signal = ShutdownSignal::new();
        signal.trigger(ShutdownReason::Requested);
        let reason = tokio::time::timeout(Duration::from_millis(10), signal.recv())
            .await
            .unwrap();
        assert_eq!(reason, ShutdownReason::Requested);
    }

    #[test]
    fn test_reason_failure_classification() {
        assert!(ShutdownReason::DataStoreFailed.is_failure());
        assert!(!ShutdownReason::Signal("SIGINT").is_failure());
        assert!(!ShutdownReason::Requested.is_failure());
        assert_eq!(ShutdownReason::Signal("SIGINT").to_string(), "received SIGINT");
    }

    // ============== ConnectionTracker Tests ==============

    #[test]
    fn test_tracker_counts_guards() {
        let tracker = ConnectionTracker::new();
        let first = tracker.open();
        let second = tracker.open();
        assert_eq!(tracker.open_connections(), 2);
        drop(first);
        assert_eq!(tracker.open_connections(), 1);
        drop(second);
        assert_eq!(tracker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_drained_waits_for_last_guard() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.open();

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.drained().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_drained_immediate_when_idle() {
        tokio::time::timeout(Duration::from_millis(10), ConnectionTracker::new().drained())
            .await
            .unwrap();
    }
}
