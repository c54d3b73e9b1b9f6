//! Bundle readiness flag.
//!
//! A single `watch` channel is the source of truth for whether the bundle can
//! be served. Request handlers read it on every request; the build task is
//! the only writer. `Ready` is terminal.

use std::sync::Arc;

use tokio::sync::watch;

/// Lifecycle of the bundle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildStatus {
    /// Bundle missing; a build may be running (or none was configured).
    Building,
    /// Bundle available.
    Ready,
    /// The build step failed. The placeholder is served until restart.
    Failed,
}

impl BuildStatus {
    /// Lowercase name used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Building => "building",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared readiness handle. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Readiness {
    tx: Arc<watch::Sender<BuildStatus>>,
}

impl Readiness {
    /// Create a handle in the given state.
    pub fn new(initial: BuildStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Bundle already present.
    pub fn ready() -> Self {
        Self::new(BuildStatus::Ready)
    }

    /// Bundle missing.
    pub fn building() -> Self {
        Self::new(BuildStatus::Building)
    }

    /// Current status.
    pub fn status(&self) -> BuildStatus {
        *self.tx.borrow()
    }

    /// Whether requests should be routed to the bundle.
    pub fn is_ready(&self) -> bool {
        self.status() == BuildStatus::Ready
    }

    /// `Building → Ready`. Returns `false` if the status was not `Building`.
    pub fn mark_ready(&self) -> bool {
        self.transition(BuildStatus::Ready)
    }

    /// `Building → Failed`. Returns `false` if the status was not `Building`.
    pub fn mark_failed(&self) -> bool {
        self.transition(BuildStatus::Failed)
    }

    fn transition(&self, to: BuildStatus) -> bool {
        self.tx.send_if_modified(|status| {
            if *status == BuildStatus::Building {
                *status = to;
                true
            } else {
                false
            }
        })
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<BuildStatus> {
        self.tx.subscribe()
    }

    /// Wait until the status leaves `Building` and return it.
    ///
    /// Never resolves if the build never completes.
    pub async fn settled(&self) -> BuildStatus {
        let mut rx = self.subscribe();
        match rx.wait_for(|s| *s != BuildStatus::Building).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        }
    }
}
