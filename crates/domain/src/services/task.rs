//! Periodic recycler task used by both the publisher's retry buffer and the
//! consumer's pending-delete set.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one recycler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecycleReport {
    pub attempted: usize,
    pub recovered: usize,
}

/// Work drained by a [`Recycler`] on every tick.
#[async_trait]
pub trait Recycle: Send + Sync + 'static {
    /// Number of items waiting; ticks are skipped while this is zero.
    fn pending(&self) -> usize;

    async fn recycle(&self) -> RecycleReport;
}

/// Ticker plus an explicit busy flag: a tick that finds the previous run
/// still in flight, or nothing pending, does nothing.
pub struct Recycler<T> {
    name: &'static str,
    task: Arc<T>,
    busy: AtomicBool,
    started: AtomicBool,
}

impl<T: Recycle> Recycler<T> {
    pub fn new(name: &'static str, task: Arc<T>) -> Self {
        Self {
            name,
            task,
            busy: AtomicBool::new(false),
            started: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Runs one drain unless skipped. Returns `None` when skipped.
    pub async fn tick(&self) -> Option<RecycleReport> {
        if self.task.pending() == 0 {
            return None;
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(recycler = self.name, "previous run still in flight, skipping tick");
            return None;
        }
        let _busy = BusyGuard(&self.busy);

        let report = self.task.recycle().await;
        info!(
            recycler = self.name,
            attempted = report.attempted,
            recovered = report.recovered,
            "recycle tick finished"
        );
        Some(report)
    }

    /// Spawns the periodic loop. A second call on the same recycler is
    /// refused and returns `None`.
    pub fn spawn(
        self: Arc<Self>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!(recycler = self.name, "recycler already started");
            return None;
        }

        info!(recycler = self.name, ?period, "recycler started");
        Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
            info!(recycler = self.name, "recycler stopped");
        }))
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
