//! Periodic background jobs. Each registered job runs on its own interval
//! in its own task, with panic containment and failure counting, so one
//! misbehaving cycle never takes the daemon down.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{error, info, warn};

type JobFn = Box<dyn Fn() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

struct HeartbeatJob {
    name: String,
    interval: Duration,
    run: JobFn,
}

#[derive(Default)]
pub struct HeartbeatCoordinator {
    jobs: Vec<HeartbeatJob>,
}

impl HeartbeatCoordinator {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    /// Register a named periodic job. `make_future` is called once per tick.
    pub fn register_job<F, Fut>(&mut self, name: &str, interval: Duration, make_future: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.jobs.push(HeartbeatJob {
            name: name.to_string(),
            interval,
            run: Box::new(move || Box::pin(make_future())),
        });
    }

    /// Spawn every registered job. The first tick fires after one full
    /// interval, not immediately — startup stays quiet.
    pub fn spawn(self) {
        for job in self.jobs {
            let name = job.name.clone();
            info!(job = %name, interval_secs = job.interval.as_secs(), "Heartbeat job scheduled");

            tokio::spawn(async move {
                let consecutive_failures = Arc::new(AtomicU32::new(0));
                let mut ticker = tokio::time::interval(job.interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await; // completes immediately; skip the zeroth tick

                loop {
                    ticker.tick().await;
                    let outcome = AssertUnwindSafe((job.run)()).catch_unwind().await;
                    match outcome {
                        Ok(Ok(())) => {
                            consecutive_failures.store(0, Ordering::Relaxed);
                        }
                        Ok(Err(e)) => {
                            let failures = consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                            warn!(job = %job.name, error = %e, failures, "Heartbeat job failed");
                        }
                        Err(_) => {
                            let failures = consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                            error!(job = %job.name, failures, "Heartbeat job panicked");
                        }
                    }
                }
            });
        }
    }
}
