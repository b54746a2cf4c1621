//! Bridges a platform constraint feed (network type, charging state) to
//! the coordinator's auto-pause / auto-resume hooks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use chunklift_model::{ConstraintPolicy, NetworkRequirement};

use crate::coordinator::UploadCoordinator;

/// Point-in-time device conditions as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConditions {
    pub network_available: bool,
    pub network_metered: bool,
    pub charging: bool,
}

impl DeviceConditions {
    /// Whether these conditions satisfy a session constraint policy.
    pub fn satisfies(&self, policy: &ConstraintPolicy) -> bool {
        if !self.network_available {
            return false;
        }
        if policy.network == NetworkRequirement::Unmetered && self.network_metered {
            return false;
        }
        if policy.requires_charging && !self.charging {
            return false;
        }
        true
    }
}

/// Reacts to condition changes: pauses all active sessions the moment the
/// policy is violated and resumes them once conditions have held for a
/// stability window, so a flapping network does not thrash the loops.
pub struct ConstraintMonitor {
    coordinator: Arc<UploadCoordinator>,
    policy: ConstraintPolicy,
    stability_delay: Duration,
    pending_resume: Mutex<Option<CancellationToken>>,
}

impl ConstraintMonitor {
    /// Stability window defaults to the configured `auto_resume_delay`.
    pub fn new(coordinator: Arc<UploadCoordinator>) -> Self {
        let stability_delay = coordinator.config().auto_resume_delay;
        Self::with_stability_delay(coordinator, stability_delay)
    }

    pub fn with_stability_delay(
        coordinator: Arc<UploadCoordinator>,
        stability_delay: Duration,
    ) -> Self {
        let policy = coordinator.config().constraints;
        Self {
            coordinator,
            policy,
            stability_delay,
            pending_resume: Mutex::new(None),
        }
    }

    /// Feeds a condition change in. Platform integrations call this from
    /// their connectivity / power callbacks.
    pub async fn on_conditions_changed(self: &Arc<Self>, conditions: DeviceConditions) {
        if conditions.satisfies(&self.policy) {
            self.on_constraints_satisfied().await;
        } else {
            self.on_constraints_violated().await;
        }
    }

    /// Pauses all active sessions immediately.
    pub async fn on_constraints_violated(&self) {
        // A violation supersedes any resume still counting down.
        if let Some(pending) = self.pending_resume.lock().await.take() {
            pending.cancel();
        }
        info!("constraints violated; pausing active sessions");
        self.coordinator.auto_pause_all().await;
    }

    /// Starts the stability countdown; auto-paused sessions resume once it
    /// elapses without another violation.
    pub async fn on_constraints_satisfied(self: &Arc<Self>) {
        let mut pending = self.pending_resume.lock().await;
        if pending.is_some() {
            // Countdown already running.
            return;
        }
        let token = CancellationToken::new();
        *pending = Some(token.clone());
        drop(pending);

        debug!(delay_ms = self.stability_delay.as_millis() as u64, "constraints satisfied; resume scheduled");
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(monitor.stability_delay) => {
                    monitor.pending_resume.lock().await.take();
                    info!("constraints stable; resuming auto-paused sessions");
                    monitor.coordinator.auto_resume_all().await;
                }
            }
        });
    }
}
