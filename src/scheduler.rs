use crate::api::Error;
use crate::model::TelemetrySnapshot;
use async_trait::async_trait;
use serde::Serialize;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

/// One fetch of the latest reading.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn fetch(&self) -> Result<TelemetrySnapshot, Error>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshState {
    /// Last successful reading, kept across failed polls.
    pub snapshot: Option<TelemetrySnapshot>,
    pub last_updated: Option<SystemTime>,
    /// Error of the most recent poll, cleared by the next success.
    #[serde(serialize_with = "serialize_error")]
    pub last_error: Option<Error>,
    /// Sequence number of the fetch whose outcome is reflected here.
    pub sequence: u64,
    /// Failed fetches so far, superseded ones included. Survives [`RefreshHandle::reset`].
    pub failures: u64,
}

fn serialize_error<S: serde::Serializer>(error: &Option<Error>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

impl RefreshState {
    /// The displayed snapshot is older than the latest poll attempt.
    pub fn is_stale(&self) -> bool {
        self.snapshot.is_some() && self.last_error.is_some()
    }
}

struct Shared {
    source: Arc<dyn TelemetrySource>,
    next_sequence: AtomicU64,
    state: watch::Sender<RefreshState>,
}

/// Cloneable access to the refresh state, usable while the scheduler is owned elsewhere.
#[derive(Clone)]
pub struct RefreshHandle {
    shared: Arc<Shared>,
}

impl RefreshHandle {
    fn new(source: Arc<dyn TelemetrySource>) -> RefreshHandle {
        let (state, _) = watch::channel(RefreshState::default());
        RefreshHandle {
            shared: Arc::new(Shared {
                source,
                next_sequence: AtomicU64::new(0),
                state,
            }),
        }
    }

    /// Out-of-band fetch ("pull to refresh"). Does not touch the timer.
    ///
    /// Returns the outcome of this particular fetch, even if it was superseded and therefore
    /// not applied to the shared state.
    pub async fn refresh_now(&self) -> Result<TelemetrySnapshot, Error> {
        let sequence = self.shared.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!("fetch #{} started", sequence);

        let result = self.shared.source.fetch().await;
        self.apply(sequence, &result);
        result
    }

    fn apply(&self, sequence: u64, result: &Result<TelemetrySnapshot, Error>) {
        let applied = self.shared.state.send_if_modified(|state| {
            if result.is_err() {
                state.failures += 1;
            }
            if sequence <= state.sequence {
                return false;
            }
            state.sequence = sequence;
            match result {
                Ok(snapshot) => {
                    state.snapshot = Some(snapshot.clone());
                    state.last_updated = Some(SystemTime::now());
                    state.last_error = None;
                }
                Err(e) => state.last_error = Some(e.clone()),
            }
            true
        });

        match (applied, result) {
            (false, _) => log::debug!(
                "discarding fetch #{}, a later fetch already completed",
                sequence
            ),
            (true, Ok(snapshot)) => log::debug!(
                "fetch #{}: {} reports {} W AC ({})",
                sequence,
                snapshot.inverter_sn,
                snapshot.ac_power,
                snapshot.status.label()
            ),
            (true, Err(e)) => log::warn!("fetch #{} failed: {}", sequence, e),
        }
    }

    /// Forget the displayed reading, e.g. after logout. Fetches still in flight are discarded
    /// when they complete.
    pub fn reset(&self) {
        let issued = self.shared.next_sequence.load(Ordering::SeqCst);
        self.shared.state.send_modify(|state| {
            *state = RefreshState {
                sequence: issued.max(state.sequence),
                failures: state.failures,
                ..RefreshState::default()
            };
        });
        log::debug!("refresh state reset, fetches up to #{} discarded", issued);
    }

    pub fn state(&self) -> RefreshState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RefreshState> {
        self.shared.state.subscribe()
    }
}

enum SchedulerState {
    Idle,
    Active(JoinHandle<()>),
}

/// Timer-driven refresh of the latest reading.
///
/// Started when the view showing the reading becomes active, stopped (or dropped) when it goes
/// away. Every fetch, timer-driven or manual, is numbered. A result only lands in the shared
/// [`RefreshState`] when no later-issued fetch has landed before it.
pub struct RefreshScheduler {
    handle: RefreshHandle,
    /// `None` disables the timer: `start()` then performs only the initial fetch.
    period: Option<Duration>,
    state: SchedulerState,
}

impl RefreshScheduler {
    pub fn new(source: Arc<dyn TelemetrySource>, period: Option<Duration>) -> RefreshScheduler {
        RefreshScheduler {
            handle: RefreshHandle::new(source),
            period,
            state: SchedulerState::Idle,
        }
    }

    pub fn handle(&self) -> RefreshHandle {
        self.handle.clone()
    }

    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SchedulerState::Active(_))
    }

    /// Fetch once immediately, then on every period. Has no effect when already active.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> bool {
        if self.is_active() {
            log::debug!("scheduler already active");
            return false;
        }

        let handle = self.handle.clone();
        let period = self.period;
        let task = tokio::spawn(async move {
            spawn_fetch(&handle);

            if let Some(period) = period.filter(|p| !p.is_zero()) {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    spawn_fetch(&handle);
                }
            }
        });

        log::info!("refresh scheduler started (period: {:?})", self.period);
        self.state = SchedulerState::Active(task);
        true
    }

    /// Cancel the timer. Fetches already in flight are left to complete.
    pub fn stop(&mut self) -> bool {
        match mem::replace(&mut self.state, SchedulerState::Idle) {
            SchedulerState::Active(task) => {
                task.abort();
                log::info!("refresh scheduler stopped");
                true
            }
            SchedulerState::Idle => false,
        }
    }

    /// Change the period, re-arming the timer (with an immediate fetch) if active.
    pub fn set_period(&mut self, period: Option<Duration>) {
        if self.period == period {
            return;
        }
        self.period = period;
        if self.stop() {
            self.start();
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fetches run detached from the timer, so a slow response does not delay the next tick.
fn spawn_fetch(handle: &RefreshHandle) {
    let handle = handle.clone();
    tokio::spawn(async move {
        let _ = handle.refresh_now().await;
    });
}
