use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::error::EngineResult;

#[async_trait]
pub trait ReconcileLoop: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn cycle(&self) -> EngineResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Finished,
    Failed,
    Panicked,
    /// a previous cycle of the same loop was still running
    Skipped,
}

struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct ScheduledLoop {
    inner: Arc<dyn ReconcileLoop>,
    period: Duration,
    running: Arc<AtomicBool>,
}

impl ScheduledLoop {
    pub fn new(inner: Arc<dyn ReconcileLoop>, period: Duration) -> Self {
        Self {
            inner,
            period,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// runs one cycle now unless one is already in flight
    pub async fn trigger(&self) -> CycleOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(loop_name = self.name(), "previous cycle still running, skipping");
            return CycleOutcome::Skipped;
        }
        let _guard = RunningGuard(self.running.clone());
        let inner = self.inner.clone();
        match tokio::spawn(async move { inner.cycle().await }).await {
            Ok(Ok(())) => CycleOutcome::Finished,
            Ok(Err(err)) => {
                error!(loop_name = self.name(), error = %err, "reconciliation cycle failed");
                CycleOutcome::Failed
            }
            Err(join_err) => {
                error!(loop_name = self.name(), error = %join_err, "reconciliation cycle panicked");
                CycleOutcome::Panicked
            }
        }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            loop_name = self.name(),
            interval_ms = self.period.as_millis() as u64,
            "reconciliation loop started"
        );
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!(loop_name = self.name(), "reconciliation loop shutting down");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.trigger().await;
                }
            }
        }
    }
}

/// owns one task per scheduled loop, cycles of a loop never overlap
pub struct ReconciliationScheduler {
    loops: Vec<ScheduledLoop>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl ReconciliationScheduler {
    /// spawns one task per loop on the current runtime
    pub fn start(loops: Vec<ScheduledLoop>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = loops
            .iter()
            .cloned()
            .map(|scheduled| tokio::spawn(scheduled.run(shutdown_rx.clone())))
            .collect();
        Self {
            loops,
            shutdown_tx,
            handles,
        }
    }

    pub fn loops(&self) -> &[ScheduledLoop] {
        &self.loops
    }

    /// runs a cycle of the named loop now, None if no such loop
    pub async fn trigger(&self, name: &str) -> Option<CycleOutcome> {
        let scheduled = self.loops.iter().find(|l| l.name() == name)?;
        Some(scheduled.trigger().await)
    }

    /// stops ticking and waits for in-flight cycles to finish
    pub async fn shutdown(self) {
        if self.shutdown_tx.send(true).is_err() {
            warn!("all reconciliation loops already stopped");
        }
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!(error = %err, "reconciliation loop task failed");
            }
        }
        info!("reconciliation scheduler stopped");
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio::time::sleep;

    use super::{CycleOutcome, ReconcileLoop, ReconciliationScheduler, ScheduledLoop};
    use crate::{
        error::{EngineError, EngineResult},
        store::test::{setup, RUNTIME},
    };

    #[derive(Default)]
    struct SlowLoop {
        cycles: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl ReconcileLoop for SlowLoop {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn cycle(&self) -> EngineResult<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(40)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.cycles.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FaultyLoop {
        cycles: AtomicUsize,
    }

    #[async_trait]
    impl ReconcileLoop for FaultyLoop {
        fn name(&self) -> &'static str {
            "faulty"
        }

        async fn cycle(&self) -> EngineResult<()> {
            let n = self.cycles.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                panic!("cycle {} blew up", n);
            }
            Err(EngineError::TransientBackend("unreachable".into()))
        }
    }

    #[test]
    fn test_cycles_never_overlap() {
        setup();
        RUNTIME.block_on(async {
            let slow = Arc::new(SlowLoop::default());
            let scheduled = ScheduledLoop::new(slow.clone(), Duration::from_millis(5));
            let scheduler = ReconciliationScheduler::start(vec![scheduled.clone()]);

            sleep(Duration::from_millis(20)).await;
            assert!(scheduled.is_running());
            assert_eq!(CycleOutcome::Skipped, scheduled.trigger().await);

            sleep(Duration::from_millis(200)).await;
            scheduler.shutdown().await;

            assert!(slow.cycles.load(Ordering::SeqCst) >= 2);
            assert_eq!(1, slow.max_in_flight.load(Ordering::SeqCst));
            assert!(!scheduled.is_running());
        });
    }

    #[test]
    fn test_failing_cycles_do_not_stop_the_loop() {
        setup();
        RUNTIME.block_on(async {
            let faulty = Arc::new(FaultyLoop::default());
            let scheduled = ScheduledLoop::new(faulty.clone(), Duration::from_millis(5));
            assert_eq!(CycleOutcome::Panicked, scheduled.trigger().await);
            assert_eq!(CycleOutcome::Failed, scheduled.trigger().await);

            let scheduler = ReconciliationScheduler::start(vec![scheduled]);
            sleep(Duration::from_millis(60)).await;
            scheduler.shutdown().await;
            assert!(faulty.cycles.load(Ordering::SeqCst) >= 4);
        });
    }

    #[test]
    fn test_trigger_by_name() {
        setup();
        RUNTIME.block_on(async {
            let slow = Arc::new(SlowLoop::default());
            let scheduler = ReconciliationScheduler::start(vec![ScheduledLoop::new(
                slow.clone(),
                Duration::from_secs(3600),
            )]);
            // let the immediate first tick finish
            sleep(Duration::from_millis(80)).await;
            assert_eq!(Some(CycleOutcome::Finished), scheduler.trigger("slow").await);
            assert_eq!(None, scheduler.trigger("missing").await);
            scheduler.shutdown().await;
            assert_eq!(2, slow.cycles.load(Ordering::SeqCst));
        });
    }
}
