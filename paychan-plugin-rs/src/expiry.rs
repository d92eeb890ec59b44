use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// One-shot deadline timers keyed by transfer id. Each fires once at the
/// transfer's `expires_at`; the callback re-reads the log, so a timer that
/// outlives its transfer is harmless.
#[derive(Clone, Default)]
pub struct ExpiryScheduler(Arc<ExpirySchedulerInner>);

#[derive(Default)]
pub struct ExpirySchedulerInner {
    tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl ExpiryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `callback` to run at `deadline`. A transfer id already
    /// scheduled keeps its original timer.
    pub fn schedule<F>(&self, id: Uuid, deadline: DateTime<Utc>, callback: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.0.tasks.lock();
        if tasks.contains_key(&id) {
            return
        }
        let delay = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback.await;
            scheduler.0.tasks.lock().remove(&id);
        });
        tasks.insert(id, handle);
    }

    /// Drop the timer for `id`, aborting it if it has not fired yet.
    pub fn cancel(&self, id: &Uuid) {
        if let Some(handle) = self.0.tasks.lock().remove(id) {
            handle.abort();
        }
    }

    /// Abort every outstanding timer.
    pub fn clear(&self) {
        let mut tasks = self.0.tasks.lock();
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.tasks.lock().len()
    }
}
