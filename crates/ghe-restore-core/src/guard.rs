//! Exit guard for the mutating part of a restore.
//!
//! Armed right after `restoring` is published. Until it is downgraded, firing
//! it publishes `failed`; after the downgrade it only releases the transport.
//! It fires at most once. A guard dropped without firing (for example when
//! the run future is cancelled) schedules the same cleanup on the runtime.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::remote::{RemoteExecutor, TargetHost};
use crate::status::{RestoreState, StatusPublisher};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    PublishFailed,
    ReleaseOnly,
    Fired,
}

/// What firing the guard did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    /// `failed` was published (or attempted) and the transport released
    Failed,
    /// Only the transport was released
    Released,
    /// The guard had already fired
    AlreadyFired,
}

struct Inner {
    status: Arc<StatusPublisher>,
    executor: Arc<dyn RemoteExecutor>,
    host: TargetHost,
    mode: Mutex<Mode>,
}

impl Inner {
    fn take(&self) -> Mode {
        std::mem::replace(&mut *self.mode.lock(), Mode::Fired)
    }

    async fn cleanup(&self, mode: Mode) -> GuardOutcome {
        let outcome = match mode {
            Mode::Fired => return GuardOutcome::AlreadyFired,
            Mode::PublishFailed => {
                if let Err(e) = self.status.publish(RestoreState::Failed).await {
                    error!("Could not mark restore of {} as failed: {}", self.host, e);
                }
                GuardOutcome::Failed
            }
            Mode::ReleaseOnly => GuardOutcome::Released,
        };

        if let Err(e) = self.executor.release(&self.host).await {
            warn!("Failed to release connection to {}: {}", self.host, e);
        }
        outcome
    }
}

pub struct ExitGuard {
    inner: Arc<Inner>,
}

impl ExitGuard {
    pub fn arm(status: Arc<StatusPublisher>, executor: Arc<dyn RemoteExecutor>, host: TargetHost) -> Self {
        Self {
            inner: Arc::new(Inner {
                status,
                executor,
                host,
                mode: Mutex::new(Mode::PublishFailed),
            }),
        }
    }

    /// Stop publishing `failed` on exit. Allowed exactly once.
    pub fn downgrade(&self) -> Result<()> {
        let mut mode = self.inner.mode.lock();
        match *mode {
            Mode::PublishFailed => {
                *mode = Mode::ReleaseOnly;
                Ok(())
            }
            Mode::ReleaseOnly => Err(Error::Guard("exit guard already downgraded".to_string())),
            Mode::Fired => Err(Error::Guard("exit guard already fired".to_string())),
        }
    }

    /// Whether firing now would publish `failed`
    pub fn publishes_failure(&self) -> bool {
        *self.inner.mode.lock() == Mode::PublishFailed
    }

    /// Run the cleanup for the current mode; later calls are no-ops
    pub async fn fire(&self) -> GuardOutcome {
        let mode = self.inner.take();
        self.inner.cleanup(mode).await
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let mode = self.inner.take();
        if mode == Mode::Fired {
            return;
        }

        warn!("Restore of {} ended without settling its exit guard", self.inner.host);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = self.inner.clone();
                handle.spawn(async move {
                    inner.cleanup(mode).await;
                    info!("Deferred restore cleanup for {} finished", inner.host);
                });
            }
            Err(_) => error!(
                "No runtime available to clean up restore of {}; status may remain 'restoring'",
                self.inner.host
            ),
        }
    }
}
