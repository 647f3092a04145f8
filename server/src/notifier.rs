//! Bounded fire-and-forget task queue. Tracker bookkeeping, disconnect
//! propagation and promotion broadcasts run here so role transitions never
//! block on notifying every peer. A saturated queue drops the task with a
//! warning instead of queueing without bound.

use log::warn;
use shared::NOTIFY_QUEUE_CAPACITY;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Job>,
}

impl Notifier {
    /// Must be called from within a tokio runtime; the dispatcher task
    /// lives as long as any clone of the notifier.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(NOTIFY_QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                tokio::spawn(job);
            }
        });
        Self { tx }
    }

    /// Queues `job` without waiting for it to run.
    pub fn submit<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tx.try_send(Box::pin(job)).is_err() {
            warn!("notification queue full, dropping task");
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
