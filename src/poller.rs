//! Polling change detection for local resource listings.
//!
//! A [`PollingRefresher`] periodically re-samples one [`ResourceKind`]
//! and fires the [`ChangeSignal`] only when the sampled line set differs
//! from the previous one.  Listing is expensive (a process spawn per
//! sample) and every fire makes the consumer rebuild its whole tree, so
//! set-equal samples are swallowed.
//!
//! The first sample after construction only records a baseline.  Sampling
//! errors never stop the loop; the next tick simply tries again.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::SamplingError;
use crate::runtime::{ResourceKind, ResourceLister};
use crate::signal::ChangeSignal;
use crate::types::InventorySnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// No timer armed.
    Idle,
    /// Timer scheduled, waiting for the next tick.
    Armed,
    /// A listing is in flight.
    Sampling,
}

struct Shared {
    state: PollState,
    baseline: Option<InventorySnapshot>,
    // Bumped on every re-arm and on cancel; samples started under an older
    // generation do not write.
    generation: u64,
    cancelled: bool,
    timer: Option<JoinHandle<()>>,
    failures: u32,
}

impl Shared {
    fn resting_state(&self) -> PollState {
        if self.cancelled || self.timer.is_none() {
            PollState::Idle
        } else {
            PollState::Armed
        }
    }
}

struct Core {
    kind: ResourceKind,
    lister: Arc<dyn ResourceLister>,
    signal: Arc<ChangeSignal>,
    shared: Mutex<Shared>,
    // Serialises samples of this kind.
    sampling: tokio::sync::Mutex<()>,
}

pub struct PollingRefresher {
    core: Arc<Core>,
}

impl PollingRefresher {
    pub fn new(
        kind: ResourceKind,
        lister: Arc<dyn ResourceLister>,
        signal: Arc<ChangeSignal>,
    ) -> Self {
        Self {
            core: Arc::new(Core {
                kind,
                lister,
                signal,
                shared: Mutex::new(Shared {
                    state: PollState::Idle,
                    baseline: None,
                    generation: 0,
                    cancelled: false,
                    timer: None,
                    failures: 0,
                }),
                sampling: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Construct and arm in one go. Must be called inside a tokio runtime.
    pub fn start(
        kind: ResourceKind,
        lister: Arc<dyn ResourceLister>,
        signal: Arc<ChangeSignal>,
        interval_ms: i64,
    ) -> Self {
        let refresher = Self::new(kind, lister, signal);
        refresher.set_interval(interval_ms);
        refresher
    }

    pub fn kind(&self) -> ResourceKind {
        self.core.kind
    }

    pub fn state(&self) -> PollState {
        self.core.shared.lock().state
    }

    /// Last accepted sample, empty before the first one.
    pub fn snapshot(&self) -> InventorySnapshot {
        self.core.shared.lock().baseline.clone().unwrap_or_default()
    }

    /// Replace any pending timer with one ticking every `interval_ms`.
    /// A value ≤ 0 disarms.  Ignored after [`cancel`](Self::cancel).
    pub fn set_interval(&self, interval_ms: i64) {
        let mut shared = self.core.shared.lock();
        if shared.cancelled {
            debug!("Ignoring interval change for cancelled {} refresher", self.core.kind);
            return;
        }
        if let Some(timer) = shared.timer.take() {
            timer.abort();
        }
        shared.generation += 1;

        if interval_ms <= 0 {
            shared.state = PollState::Idle;
            info!("Auto refresh of {} disabled", self.core.kind);
            return;
        }

        let period = Duration::from_millis(interval_ms as u64);
        let generation = shared.generation;
        let core = Arc::clone(&self.core);
        shared.timer = Some(tokio::spawn(run(core, generation, period)));
        shared.state = PollState::Armed;
        info!(
            "Auto refresh of {} armed every {}ms",
            self.core.kind, interval_ms
        );
    }

    /// Record a listing the caller obtained itself as the new baseline.
    pub fn observe(&self, lines: Vec<String>) {
        self.core.shared.lock().baseline = Some(InventorySnapshot::new(lines));
    }

    /// Sample right now, outside the timer. Returns whether the signal fired.
    /// A cancelled refresher no longer samples and always returns `false`.
    pub async fn poll_now(&self) -> Result<bool, SamplingError> {
        let generation = self.core.shared.lock().generation;
        self.core.sample(generation).await
    }

    /// Stop for good. Safe from any state, repeatable.
    pub fn cancel(&self) {
        let mut shared = self.core.shared.lock();
        if let Some(timer) = shared.timer.take() {
            timer.abort();
        }
        if !shared.cancelled {
            debug!("Auto refresh of {} cancelled", self.core.kind);
        }
        shared.cancelled = true;
        shared.generation += 1;
        shared.state = PollState::Idle;
    }
}

impl Drop for PollingRefresher {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run(core: Arc<Core>, generation: u64, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = core.sample(generation).await {
            let mut shared = core.shared.lock();
            shared.failures += 1;
            if shared.failures == 1 {
                warn!("Failed to list {}: {}", core.kind, e);
            } else {
                debug!("Failed to list {} ({} in a row): {}", core.kind, shared.failures, e);
            }
        }
    }
}

impl Core {
    async fn sample(&self, generation: u64) -> Result<bool, SamplingError> {
        let _sampling = self.sampling.lock().await;
        {
            let mut shared = self.shared.lock();
            if shared.cancelled || shared.generation != generation {
                return Ok(false);
            }
            shared.state = PollState::Sampling;
        }

        let result = self.lister.list_resource_lines(self.kind).await;

        let changed = {
            let mut shared = self.shared.lock();
            let resting = shared.resting_state();
            shared.state = resting;
            if shared.generation != generation {
                return Ok(false);
            }
            let lines = result?;
            if shared.failures > 0 {
                info!("Listing {} works again", self.kind);
                shared.failures = 0;
            }

            let sampled = InventorySnapshot::new(lines);
            let unchanged = shared.baseline.as_ref().map(|prev| prev.set_eq(&sampled));
            match unchanged {
                None => {
                    debug!("Baseline of {}: {} lines", self.kind, sampled.lines().len());
                    shared.baseline = Some(sampled);
                    false
                }
                Some(true) => false,
                Some(false) => {
                    shared.baseline = Some(sampled);
                    true
                }
            }
        };

        if changed {
            debug!("{} changed, notifying", self.kind);
            self.signal.fire();
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::error::RunError;

    /// Lister that blocks inside every listing until released.
    struct Gated {
        lines: Vec<String>,
        entered: Notify,
        release: Notify,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl Gated {
        fn new(lines: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                lines: lines.iter().map(|s| s.to_string()).collect(),
                entered: Notify::new(),
                release: Notify::new(),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ResourceLister for Gated {
        async fn list_resource_lines(
            &self,
            _kind: ResourceKind,
        ) -> Result<Vec<String>, SamplingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(self.lines.clone())
        }
    }

    /// Lister replaying comma separated samples, failing once exhausted.
    struct Script {
        samples: Mutex<VecDeque<Option<&'static str>>>,
        calls: AtomicUsize,
    }

    impl Script {
        fn new(samples: &[Option<&'static str>]) -> Arc<Self> {
            Arc::new(Self {
                samples: Mutex::new(samples.iter().copied().collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResourceLister for Script {
        async fn list_resource_lines(
            &self,
            _kind: ResourceKind,
        ) -> Result<Vec<String>, SamplingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.samples.lock().pop_front().flatten() {
                Some(sample) => Ok(sample
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()),
                None => Err(SamplingError::Command(RunError::Failed {
                    command: "docker ps".to_string(),
                    status: "exit status: 1".to_string(),
                    stderr: "daemon not running".to_string(),
                })),
            }
        }
    }

    fn counting_signal() -> (Arc<ChangeSignal>, Arc<AtomicUsize>) {
        let signal = Arc::new(ChangeSignal::new());
        let fires = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fires);
        signal.subscribe(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        (signal, fires)
    }

    #[tokio::test]
    async fn fires_only_on_set_difference() {
        let script = Script::new(&[Some("a,b"), Some("a,b"), Some("b,a"), Some("a,b,c")]);
        let (signal, fires) = counting_signal();
        let refresher = PollingRefresher::new(ResourceKind::Containers, script, signal);

        let mut fired = Vec::new();
        for _ in 0..4 {
            fired.push(refresher.poll_now().await.unwrap());
        }
        assert_eq!(fired, vec![false, false, false, true]);
        assert_eq!(fires.load(Ordering::SeqCst), 1);
        assert_eq!(refresher.snapshot().lines().len(), 3);
    }

    #[tokio::test]
    async fn duplicates_do_not_count_as_change() {
        let script = Script::new(&[Some("a,b"), Some("a,b,b,a")]);
        let (signal, fires) = counting_signal();
        let refresher = PollingRefresher::new(ResourceKind::Images, script, signal);
        refresher.poll_now().await.unwrap();
        assert!(!refresher.poll_now().await.unwrap());
        assert_eq!(fires.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn observed_listing_becomes_the_baseline() {
        let script = Script::new(&[Some("a"), Some("a,b")]);
        let (signal, fires) = counting_signal();
        let refresher = PollingRefresher::new(ResourceKind::Containers, script, signal);
        refresher.observe(vec!["x".to_string()]);

        assert!(refresher.poll_now().await.unwrap());
        assert!(refresher.poll_now().await.unwrap());
        assert_eq!(fires.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_ticks_drive_sampling() {
        let script = Script::new(&[Some("a,b"), Some("a,b"), Some("b,a"), Some("a,b,c")]);
        let (signal, fires) = counting_signal();
        let refresher =
            PollingRefresher::start(ResourceKind::Containers, script.clone(), signal, 100);
        assert_eq!(refresher.state(), PollState::Armed);

        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(script.calls(), 4);
        assert_eq!(fires.load(Ordering::SeqCst), 1);
        assert_eq!(refresher.state(), PollState::Armed);
    }

    #[tokio::test(start_paused = true)]
    async fn sampling_errors_do_not_stop_the_loop() {
        let script = Script::new(&[Some("a"), None, None, Some("a,b")]);
        let (signal, fires) = counting_signal();
        let refresher =
            PollingRefresher::start(ResourceKind::Images, script.clone(), signal, 50);

        tokio::time::sleep(Duration::from_millis(220)).await;
        assert_eq!(script.calls(), 4);
        assert_eq!(fires.load(Ordering::SeqCst), 1);
        assert_eq!(refresher.snapshot().lines(), &["a".to_string(), "b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn non_positive_interval_stays_idle() {
        let script = Script::new(&[Some("a")]);
        let (signal, _) = counting_signal();
        let refresher = PollingRefresher::start(ResourceKind::Containers, script.clone(), signal, 0);
        assert_eq!(refresher.state(), PollState::Idle);

        refresher.set_interval(-5);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(script.calls(), 0);
        assert_eq!(refresher.state(), PollState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn new_interval_supersedes_pending_timer() {
        let script = Script::new(&[Some("a"); 16]);
        let (signal, _) = counting_signal();
        let refresher =
            PollingRefresher::start(ResourceKind::Containers, script.clone(), signal, 1_000);

        refresher.set_interval(100);
        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(script.calls(), 4);

        refresher.set_interval(0);
        assert_eq!(refresher.state(), PollState::Idle);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(script.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_permanent() {
        let script = Script::new(&[Some("a"); 4]);
        let (signal, _) = counting_signal();
        let refresher =
            PollingRefresher::start(ResourceKind::Containers, script.clone(), signal, 100);

        refresher.cancel();
        refresher.cancel();
        assert_eq!(refresher.state(), PollState::Idle);

        refresher.set_interval(100);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(script.calls(), 0);
        assert_eq!(refresher.state(), PollState::Idle);
    }

    #[tokio::test]
    async fn cancelled_refresher_ignores_manual_polls() {
        let script = Script::new(&[Some("a"), Some("a,b")]);
        let (signal, fires) = counting_signal();
        let refresher = PollingRefresher::new(ResourceKind::Containers, script.clone(), signal);
        refresher.poll_now().await.unwrap();

        refresher.cancel();
        assert!(!refresher.poll_now().await.unwrap());
        assert_eq!(script.calls(), 1);
        assert_eq!(fires.load(Ordering::SeqCst), 0);
        assert_eq!(refresher.snapshot().lines(), &["a".to_string()]);
        assert_eq!(refresher.state(), PollState::Idle);
    }

    #[tokio::test]
    async fn sample_in_flight_during_rearm_is_discarded() {
        let lister = Gated::new(&["a", "b"]);
        let (signal, fires) = counting_signal();
        let refresher = Arc::new(PollingRefresher::new(
            ResourceKind::Containers,
            lister.clone(),
            signal,
        ));
        refresher.observe(vec!["a".to_string()]);

        let pending = {
            let refresher = Arc::clone(&refresher);
            tokio::spawn(async move { refresher.poll_now().await })
        };
        lister.entered.notified().await;
        assert_eq!(refresher.state(), PollState::Sampling);

        refresher.set_interval(0);
        lister.release.notify_one();

        assert!(!pending.await.unwrap().unwrap());
        assert_eq!(fires.load(Ordering::SeqCst), 0);
        assert_eq!(refresher.snapshot().lines(), &["a".to_string()]);
        assert_eq!(refresher.state(), PollState::Idle);
    }

    #[tokio::test]
    async fn sample_in_flight_during_cancel_is_discarded() {
        let lister = Gated::new(&["a", "b"]);
        let (signal, fires) = counting_signal();
        let refresher = Arc::new(PollingRefresher::new(
            ResourceKind::Images,
            lister.clone(),
            signal,
        ));
        refresher.observe(vec!["a".to_string()]);

        let pending = {
            let refresher = Arc::clone(&refresher);
            tokio::spawn(async move { refresher.poll_now().await })
        };
        lister.entered.notified().await;

        refresher.cancel();
        lister.release.notify_one();

        assert!(!pending.await.unwrap().unwrap());
        assert_eq!(fires.load(Ordering::SeqCst), 0);
        assert_eq!(refresher.snapshot().lines(), &["a".to_string()]);
        assert_eq!(refresher.state(), PollState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_poll_and_timer_tick_run_one_after_the_other() {
        let lister = Gated::new(&["a"]);
        let (signal, _) = counting_signal();
        let refresher = Arc::new(PollingRefresher::start(
            ResourceKind::Containers,
            lister.clone(),
            signal,
            100,
        ));

        let manual = {
            let refresher = Arc::clone(&refresher);
            tokio::spawn(async move { refresher.poll_now().await })
        };
        lister.entered.notified().await;

        // The tick at 100ms waits behind the manual sample.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(lister.calls.load(Ordering::SeqCst), 1);

        lister.release.notify_one();
        assert!(!manual.await.unwrap().unwrap());

        lister.entered.notified().await;
        assert_eq!(lister.calls.load(Ordering::SeqCst), 2);
        assert_eq!(lister.max_in_flight.load(Ordering::SeqCst), 1);

        refresher.cancel();
    }
}
