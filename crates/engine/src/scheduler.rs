//! Periodic background jobs (recovery sweeps, retention cleanup).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A repeatable unit of background work.
pub type PeriodicJob = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Schedules named recurring jobs. Scheduling a name again replaces the
/// previous job under that name.
pub trait JobScheduler: Send + Sync {
    fn schedule_periodic(&self, name: &str, interval: Duration, job: PeriodicJob);
    fn cancel(&self, name: &str);
}

/// Tokio-backed scheduler: one task per job, ticking on an interval.
/// Dropping the scheduler cancels every job.
#[derive(Default)]
pub struct TokioScheduler {
    jobs: Mutex<HashMap<String, CancellationToken>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobScheduler for TokioScheduler {
    fn schedule_periodic(&self, name: &str, interval: Duration, job: PeriodicJob) {
        let token = CancellationToken::new();
        let previous = {
            let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
            jobs.insert(name.to_string(), token.clone())
        };
        if let Some(previous) = previous {
            previous.cancel();
        }

        let job_name = name.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick would run the job at schedule time.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(job = %job_name, "periodic job cancelled");
                        return;
                    }
                    _ = ticker.tick() => {
                        debug!(job = %job_name, "periodic job tick");
                        job().await;
                    }
                }
            }
        });
    }

    fn cancel(&self, name: &str) {
        let removed = {
            let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
            jobs.remove(name)
        };
        if let Some(token) = removed {
            token.cancel();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        for token in jobs.values() {
            token.cancel();
        }
    }
}
