//! Rate-limited release of prioritised loads.
//!
//! The basic flow is:
//! 1. A load is submitted. Admission rules and the capacity gate decide whether it is kept
//! 2. Kept loads wait in a [`PriorityCollector`]
//! 3. On every tick the cadence loop checks both ceilings, takes a worker slot if one is free, and
//!    releases the most urgent pending load
//! 4. The execution runs on its own task and hands its slot back when it finishes, however it
//!    finishes
//!
//! Worker slots are taken before a load is extracted, so a full pool leaves the load where it is
//! for the next tick.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use crate::metrics::{Metrics, MetricsSnapshot};
use crate::{DispatchError, DispatcherConfig, Executor, Load, PriorityCollector, WindowBudget};

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

/// A predicate deciding whether a submitted load is accepted.
pub type AdmissionRule<T> = Arc<dyn Fn(&Load<T>) -> bool + Send + Sync>;

/// Lifecycle of a [`Dispatcher`]. Transitions only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatcherState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl DispatcherState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// The per-second and per-minute ledgers. Only the cadence loop touches these.
struct Ceilings {
    per_second: WindowBudget,
    per_minute: Option<WindowBudget>,
}

impl Ceilings {
    fn new(config: &DispatcherConfig) -> Self {
        Self {
            per_second: WindowBudget::new(config.per_second_budget as usize, SECOND),
            per_minute: config
                .per_minute_limit()
                .map(|limit| WindowBudget::new(limit, MINUTE)),
        }
    }

    /// Which ceiling, if any, forbids a release at `now`, and when it next opens.
    fn reached(&mut self, now: Instant) -> Option<(&'static str, Option<Instant>)> {
        if let Some(per_minute) = self.per_minute.as_mut() {
            if per_minute.remaining(now) == 0 {
                return Some(("per-minute", per_minute.next_release(now)));
            }
        }
        if self.per_second.remaining(now) == 0 {
            return Some(("per-second", self.per_second.next_release(now)));
        }
        None
    }

    /// Reserve one release in every ledger. Only valid right after `reached` returned `None`
    /// for the same instant.
    fn record(&mut self, now: Instant) {
        let reserved = self.per_second.try_reserve(now);
        debug_assert_eq!(reserved, Ok(()), "per-second ledger refused a checked release");
        if let Some(per_minute) = self.per_minute.as_mut() {
            let reserved = per_minute.try_reserve(now);
            debug_assert_eq!(reserved, Ok(()), "per-minute ledger refused a checked release");
        }
    }
}

/// State shared between the dispatcher handle, the cadence loop and its executions.
struct Shared<T> {
    config: DispatcherConfig,
    collector: PriorityCollector<T>,
    rules: RwLock<Vec<AdmissionRule<T>>>,
    slots: Arc<Semaphore>,
    metrics: Arc<Metrics>,
    executor: Arc<dyn Executor<T>>,
}

impl<T: Send + 'static> Shared<T> {
    fn admits(&self, load: &Load<T>) -> bool {
        // Cloned out so a rule may itself call `add_rule` without deadlocking.
        let rules = self
            .rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        rules.iter().all(|rule| rule(load))
    }

    /// One tick of the cadence loop: release at most one load.
    fn release_one(&self, now: Instant, ceilings: &mut Ceilings, tracker: &TaskTracker) {
        if let Some((ceiling, opens_at)) = ceilings.reached(now) {
            let opens_in = opens_at.map(|at| at.saturating_duration_since(now));
            trace!(ceiling, ?opens_in, "tick skipped: ceiling reached");
            return;
        }

        let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
            trace!("tick skipped: no free worker slot");
            return;
        };

        let Some(load) = self.collector.extract_top() else {
            return; // Nothing pending; the permit goes back with it
        };
        self.metrics.release_place();
        ceilings.record(now);
        Metrics::bump(&self.metrics.minute_counter);
        Metrics::bump(&self.metrics.released);

        let priority = load.priority();
        trace!(priority, pending = self.collector.size(), "releasing load");

        let executor = Arc::clone(&self.executor);
        let metrics = Arc::clone(&self.metrics);
        let payload = load.into_payload();
        tracker.spawn(async move {
            let execution = async move { executor.execute(payload).await };
            match AssertUnwindSafe(execution).catch_unwind().await {
                Ok(()) => Metrics::bump(&metrics.processed),
                Err(_) => {
                    Metrics::bump(&metrics.panicked);
                    error!(priority, "execution panicked");
                }
            }
            drop(permit);
        });
    }
}

async fn run_cadence<T: Send + 'static>(
    shared: Arc<Shared<T>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    let mut ceilings = Ceilings::new(&shared.config);

    let mut ticks = interval(shared.config.tick_period());
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut minutes = interval_at(Instant::now() + MINUTE, MINUTE);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = minutes.tick() => {
                let released = shared.metrics.reset_minute();
                trace!(released, "minute boundary");
            }
            _ = ticks.tick() => shared.release_one(Instant::now(), &mut ceilings, &tracker),
        }
    }

    debug!("cadence loop exited");
}

/// Releases submitted loads to an [`Executor`], most urgent first, within a per-second and an
/// optional per-minute ceiling.
///
/// A dispatcher is created idle; loads submitted before [`start`](Self::start) wait for it. Once
/// stopped, a dispatcher refuses every further submission.
pub struct Dispatcher<T> {
    shared: Arc<Shared<T>>,
    state: AtomicU8,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl<T: Send + 'static> Dispatcher<T> {
    pub fn new<E>(config: DispatcherConfig, executor: E) -> Result<Self, DispatchError>
    where
        E: Executor<T>,
    {
        Self::with_rules(config, executor, Vec::new())
    }

    pub fn with_rules<E>(
        config: DispatcherConfig,
        executor: E,
        rules: Vec<AdmissionRule<T>>,
    ) -> Result<Self, DispatchError>
    where
        E: Executor<T>,
    {
        config.validate()?;
        debug!(?config, rules = rules.len(), "Dispatcher::new");

        let slots = Arc::new(Semaphore::new(config.per_second_budget as usize));
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                collector: PriorityCollector::new(),
                rules: RwLock::new(rules),
                slots,
                metrics: Arc::new(Metrics::default()),
                executor: Arc::new(executor),
            }),
            state: AtomicU8::new(DispatcherState::Created as u8),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// Spawn the cadence loop on the current Tokio runtime.
    pub fn start(&self) -> Result<(), DispatchError> {
        if Handle::try_current().is_err() {
            return Err(DispatchError::NoRuntime);
        }
        self.transition(|state| match state {
            DispatcherState::Created => Some(DispatcherState::Running),
            _ => None,
        })
        .map_err(DispatchError::AlreadyStarted)?;

        debug!(tick_period = ?self.shared.config.tick_period(), "Dispatcher::start");
        self.tracker.spawn(run_cadence(
            Arc::clone(&self.shared),
            self.shutdown.clone(),
            self.tracker.clone(),
        ));
        Ok(())
    }

    /// Queue `payload` for release at the given priority. See [`submit_load`](Self::submit_load).
    pub fn submit(&self, priority: u16, payload: T) {
        self.submit_load(Load::new(priority, payload));
    }

    /// Queue a load for release.
    ///
    /// Submission never blocks and never reports back: a load refused by a rule, turned away by a
    /// full admission buffer, or submitted after `stop` is dropped and counted as rejected.
    pub fn submit_load(&self, load: Load<T>) {
        let metrics = &self.shared.metrics;
        Metrics::bump(&metrics.submitted);

        let reason = if matches!(
            self.state(),
            DispatcherState::Stopping | DispatcherState::Stopped
        ) {
            "dispatcher is shutting down"
        } else if !self.shared.admits(&load) {
            "refused by an admission rule"
        } else if !metrics.try_admit(self.shared.config.admission_capacity) {
            "admission buffer is full"
        } else {
            self.shared.collector.insert(load);
            return;
        };

        Metrics::bump(&metrics.rejected);
        debug!(priority = load.priority(), reason, "load rejected");
    }

    /// Append an admission rule. Applies to every later submission.
    pub fn add_rule<F>(&self, rule: F)
    where
        F: Fn(&Load<T>) -> bool + Send + Sync + 'static,
    {
        self.shared
            .rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(rule));
    }

    /// Stop releasing loads and wait up to `timeout` for in-flight executions to finish.
    ///
    /// On timeout the dispatcher stays in [`DispatcherState::Stopping`] and its executions keep
    /// running; calling `stop` again resumes the wait. Loads still pending are abandoned.
    pub async fn stop(&self, timeout: Duration) -> Result<(), DispatchError> {
        let previous = self.transition(|state| match state {
            DispatcherState::Created => Some(DispatcherState::Stopped),
            DispatcherState::Running => Some(DispatcherState::Stopping),
            DispatcherState::Stopping | DispatcherState::Stopped => None,
        });

        self.shutdown.cancel();
        self.tracker.close();

        match previous {
            Err(DispatcherState::Stopped) => return Ok(()),
            Ok(DispatcherState::Created) => {
                info!(abandoned = self.pending(), "dispatcher stopped before it started");
                return Ok(());
            }
            _ => {}
        }

        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!(
                ?timeout,
                in_flight = self.in_flight(),
                "dispatcher did not drain in time"
            );
            return Err(DispatchError::ShutdownTimeout(timeout));
        }

        self.state
            .store(DispatcherState::Stopped as u8, Ordering::SeqCst);
        info!(abandoned = self.pending(), "dispatcher stopped");
        Ok(())
    }

    pub fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// The number of loads waiting to be released.
    pub fn pending(&self) -> usize {
        self.shared.collector.size()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot(self.in_flight())
    }

    fn in_flight(&self) -> usize {
        (self.shared.config.per_second_budget as usize)
            .saturating_sub(self.shared.slots.available_permits())
    }

    /// Apply `step` to the current state; `Err` carries the state `step` refused to leave.
    fn transition<F>(&self, step: F) -> Result<DispatcherState, DispatcherState>
    where
        F: Fn(DispatcherState) -> Option<DispatcherState>,
    {
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |value| {
                step(DispatcherState::from_u8(value)).map(|next| next as u8)
            })
            .map(DispatcherState::from_u8)
            .map_err(DispatcherState::from_u8)
    }
}

impl<T> Drop for Dispatcher<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
