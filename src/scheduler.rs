//! Periodic background tasks
//!
//! A [`PeriodicTask`] runs an async callback on a fixed interval until the
//! shared liveness flag it watches turns `false`. The coordinator uses two of
//! them: one emitting heartbeats, one checking them.
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

pub struct PeriodicTask {
    name: String,
    handle: JoinHandle<()>,
}

impl std::fmt::Debug for PeriodicTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("name", &self.name)
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

impl PeriodicTask {
    /// Spawn a loop invoking `callback` every `every`, first call immediately.
    ///
    /// The loop exits after the current callback once `alive` holds `false`
    /// or its sender is dropped.
    pub fn spawn<F, Fut>(
        name: impl Into<String>,
        every: Duration,
        mut alive: watch::Receiver<bool>,
        callback: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(
                "Periodic task '{}' started with {}ms interval",
                task_name,
                every.as_millis()
            );

            loop {
                if !*alive.borrow() {
                    break;
                }
                tokio::select! {
                    biased;
                    // the watch::Ref must not outlive this arm
                    _ = async { let _ = alive.wait_for(|alive| !*alive).await; } => break,
                    _ = ticker.tick() => callback().await,
                }
            }
            debug!("Periodic task '{}' stopped", task_name);
        });

        Self { name, handle }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to exit
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}
