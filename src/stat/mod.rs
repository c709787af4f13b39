//! Flow sampling.
//!
//! `FlowControl` keeps three monotonically increasing counters (packets read,
//! packets dispatched to the pipeline, packets written) and logs how much each
//! one moved since the previous sample.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Default)]
pub struct Flow {
    count: AtomicU64,
    last: AtomicU64,
}

impl Flow {
    pub fn incr(&self, num: u64) {
        self.count.fetch_add(num, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Delta since the previous call.
    pub fn changes(&self) -> u64 {
        let current = self.count.load(Ordering::Relaxed);
        let last = self.last.swap(current, Ordering::Relaxed);
        current.saturating_sub(last)
    }
}

#[derive(Debug)]
pub struct FlowControl {
    name: String,
    pub read: Flow,
    pub dispatcher: Flow,
    pub write: Flow,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

impl FlowControl {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            read: Flow::default(),
            dispatcher: Flow::default(),
            write: Flow::default(),
            sampler: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Takes one sample of every counter.
    pub fn sample(&self) -> (u64, u64, u64) {
        (
            self.read.changes(),
            self.dispatcher.changes(),
            self.write.changes(),
        )
    }

    /// Spawns the sampling task. Calling `start` twice keeps the first task.
    pub fn start(self: &Arc<Self>, interval: Duration) {
        let mut sampler = self.sampler.lock();
        if sampler.is_some() {
            return;
        }

        let flow = Arc::clone(self);
        *sampler = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let (read, dispatcher, write) = flow.sample();
                info!(
                    flow = %flow.name,
                    read,
                    dispatcher,
                    write,
                    "flow sample"
                );
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.sampler.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changes_report_delta_since_last_sample() {
        let flow = Flow::default();
        flow.incr(3);
        flow.incr(2);
        assert_eq!(flow.changes(), 5);
        assert_eq!(flow.changes(), 0);
        flow.incr(1);
        assert_eq!(flow.changes(), 1);
        assert_eq!(flow.count(), 6);
    }

    #[tokio::test]
    async fn start_and_stop_sampler() {
        let flow = FlowControl::new("test-flow");
        flow.start(Duration::from_millis(10));
        flow.read.incr(4);
        tokio::time::sleep(Duration::from_millis(30)).await;
        flow.stop();
        assert!(flow.sampler.lock().is_none());
        assert_eq!(flow.name(), "test-flow");
    }
}
