//! Cancellable repeating task bound to the lifetime of a server role.
//! Stopping is synchronous: `stop` returns only after the task has exited,
//! so no tick can run after teardown completes.

use log::debug;
use shared::HEARTBEAT_INTERVAL;
use std::future::Future;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub struct Heartbeat {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Heartbeat {
    pub fn start<F, Fut>(mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, mut rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut ticker = interval(HEARTBEAT_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut rx => break,
                    _ = ticker.tick() => tick().await,
                }
            }
            debug!("heartbeat stopped");
        });
        Self { shutdown, task }
    }

    /// Signals the task and waits for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_ticks_repeat_until_stopped() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);
        let heartbeat = Heartbeat::start(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(350)).await;
        heartbeat.stop().await;

        let ticks = count.load(Ordering::SeqCst);
        assert!(ticks >= 2, "expected several ticks, saw {ticks}");
    }

    #[tokio::test]
    async fn test_no_tick_runs_after_stop() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);
        let heartbeat = Heartbeat::start(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        heartbeat.stop().await;
        let after_stop = count.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }
}
