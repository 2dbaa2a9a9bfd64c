use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use crate::{
    client::{DeviceClient, FetchError},
    snapshot::Snapshot,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

pub type Callback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

#[derive(Debug, Clone)]
pub enum CoordinatorState {
    Unstarted,
    Healthy {
        snapshot: Snapshot,
        updated_at: DateTime<Utc>,
    },
    Degraded {
        error: Arc<FetchError>,
        last_good: Option<Snapshot>,
        since: DateTime<Utc>,
    },
}

impl CoordinatorState {
    /// Latest good reading, stale or not.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            CoordinatorState::Unstarted => None,
            CoordinatorState::Healthy { snapshot, .. } => Some(snapshot),
            CoordinatorState::Degraded { last_good, .. } => last_good.as_ref(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, CoordinatorState::Healthy { .. })
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, CoordinatorState::Degraded { .. })
    }
}

#[derive(Debug, Clone)]
pub enum TickOutcome {
    Updated(Snapshot),
    Failed(Arc<FetchError>),
}

#[derive(Debug, Error)]
#[error("Initial refresh of [{name}] failed: {source}")]
pub struct FirstRefreshError {
    pub name: String,
    #[source]
    pub source: Arc<FetchError>,
}

impl FirstRefreshError {
    pub fn is_timeout(&self) -> bool {
        self.source.is_timeout()
    }
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    callbacks: BTreeMap<u64, Callback>,
}

#[derive(Debug)]
struct PollerHandle {
    stop_sender: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    name: String,
    interval: Duration,
    client: Arc<dyn DeviceClient>,
    state: watch::Sender<CoordinatorState>,
    subscribers: Mutex<Subscribers>,
    tick_lock: tokio::sync::Mutex<()>,
    poller: Mutex<Option<PollerHandle>>,
}

/// Single authority on when the inverter gets polled.
///
/// Every consumer subscribes here instead of talking to the device, so the number of
/// sensors never changes how often the device is asked for data.
#[derive(Clone)]
pub struct PollCoordinator {
    inner: Arc<Inner>,
}

impl fmt::Debug for PollCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollCoordinator")
            .field("name", &self.inner.name)
            .field("interval", &self.inner.interval)
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl PollCoordinator {
    pub fn new(name: impl Into<String>, client: Arc<dyn DeviceClient>, interval: Duration) -> Self {
        let (state, _) = watch::channel(CoordinatorState::Unstarted);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                interval,
                client,
                state,
                subscribers: Mutex::new(Subscribers::default()),
                tick_lock: tokio::sync::Mutex::new(()),
                poller: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Starts the periodic timer. The first timed tick fires one interval from now.
    pub fn start(&self) {
        let mut poller = lock(&self.inner.poller);
        match poller.as_ref() {
            Some(p) if !p.handle.is_finished() => {
                log::debug!("{} -- Poller already running", self.inner.name);
                return;
            }
            Some(_) => log::warn!("{} -- Poller exited unexpectedly, restarting it", self.inner.name),
            None => {}
        }

        let (stop_sender, mut stop_receiver) = watch::channel(false);
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.interval;
        let name = self.inner.name.clone();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await; // Skip the immediate first tick

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        inner.tick().await;
                    }
                    changed = stop_receiver.changed() => {
                        if changed.is_err() || *stop_receiver.borrow() {
                            break;
                        }
                    }
                }
            }
            log::debug!("{} -- Poller stopped", name);
        });

        log::debug!("{} -- Polling every {:?}", self.inner.name, period);
        *poller = Some(PollerHandle { stop_sender, handle });
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.poller)
            .as_ref()
            .is_some_and(|p| !p.handle.is_finished())
    }

    /// Runs one tick right away and returns once its state transition has been applied.
    pub async fn refresh_now(&self) -> TickOutcome {
        self.inner.tick().await
    }

    /// Startup refresh: every kind of failure is fatal here.
    pub async fn first_refresh(&self) -> Result<Snapshot, FirstRefreshError> {
        match self.inner.tick().await {
            TickOutcome::Updated(snapshot) => Ok(snapshot),
            TickOutcome::Failed(source) => Err(FirstRefreshError {
                name: self.inner.name.clone(),
                source,
            }),
        }
    }

    /// Registers `callback` for every new snapshot. Callbacks run in registration order on
    /// the ticking task and must neither block nor panic; a panic during a timed tick ends
    /// the poller until the next `start()`.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let mut subscribers = lock(&self.inner.subscribers);
        self.insert_subscriber(&mut subscribers, Arc::new(callback))
    }

    /// Like [`PollCoordinator::subscribe`], but first calls `callback` with the current
    /// snapshot, if there is one. Both happen under the subscriber lock, so no snapshot
    /// published concurrently is missed or delivered ahead of the current one.
    ///
    /// The initial call must not subscribe or unsubscribe.
    pub fn subscribe_with_current<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let mut subscribers = lock(&self.inner.subscribers);
        if let Some(snapshot) = self.current_snapshot() {
            callback(&snapshot);
        }
        self.insert_subscriber(&mut subscribers, Arc::new(callback))
    }

    fn insert_subscriber(&self, subscribers: &mut Subscribers, callback: Callback) -> Subscription {
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.callbacks.insert(id, callback);
        log::trace!("{} -- Subscriber {} added", self.inner.name, id);
        Subscription {
            id,
            coordinator: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).callbacks.len()
    }

    pub fn current_state(&self) -> CoordinatorState {
        self.inner.state.borrow().clone()
    }

    pub fn current_snapshot(&self) -> Option<Snapshot> {
        self.inner.state.borrow().snapshot().cloned()
    }

    pub fn last_update_success(&self) -> bool {
        self.inner.state.borrow().is_healthy()
    }

    pub fn watch_state(&self) -> watch::Receiver<CoordinatorState> {
        self.inner.state.subscribe()
    }

    /// Cancels the timer, waits for an in-flight tick and drops all subscriptions.
    pub async fn stop(&self) {
        let poller = lock(&self.inner.poller).take();
        if let Some(poller) = poller {
            let _ = poller.stop_sender.send(true);
            if let Err(err) = poller.handle.await {
                log::warn!("{} -- Error waiting for poller to finish: {}", self.inner.name, err);
            }
        }
        lock(&self.inner.subscribers).callbacks.clear();
        log::debug!("{} -- Coordinator stopped", self.inner.name);
    }
}

impl Inner {
    async fn tick(&self) -> TickOutcome {
        let _guard = self.tick_lock.lock().await;
        let started = Instant::now();
        let result = self.client.fetch_latest().await;
        log::debug!("{} -- Finished fetching data in {:.3}s", self.name, started.elapsed().as_secs_f64());

        match result {
            Ok(snapshot) => {
                self.apply_success(snapshot.clone());
                TickOutcome::Updated(snapshot)
            }
            Err(err) => {
                let err = Arc::new(err);
                self.apply_failure(Arc::clone(&err));
                TickOutcome::Failed(err)
            }
        }
    }

    fn apply_success(&self, snapshot: Snapshot) {
        let previous = self.state.send_replace(CoordinatorState::Healthy {
            snapshot: snapshot.clone(),
            updated_at: Utc::now(),
        });
        if previous.is_degraded() {
            log::info!("{} -- Fetching data recovered", self.name);
        }
        self.notify(&snapshot);
    }

    fn apply_failure(&self, error: Arc<FetchError>) {
        let already_degraded = self.state.borrow().is_degraded();
        if already_degraded {
            log::debug!("{} -- Still failing: {}", self.name, error);
        } else if error.is_timeout() {
            log::warn!("{} -- {}", self.name, error);
        } else {
            log::error!("{} -- Error fetching data: {}", self.name, error);
        }

        self.state.send_modify(|state| {
            let since = match state {
                CoordinatorState::Degraded { since, .. } => *since,
                _ => Utc::now(),
            };
            let last_good = state.snapshot().cloned();
            *state = CoordinatorState::Degraded {
                error,
                last_good,
                since,
            };
        });
    }

    fn notify(&self, snapshot: &Snapshot) {
        // Released before invoking so callbacks may (un)subscribe.
        let callbacks: Vec<Callback> = lock(&self.subscribers).callbacks.values().cloned().collect();
        log::trace!("{} -- Notifying {} subscribers", self.name, callbacks.len());
        for callback in callbacks {
            callback(snapshot);
        }
    }

    fn remove_subscriber(&self, id: u64) {
        if lock(&self.subscribers).callbacks.remove(&id).is_some() {
            log::trace!("{} -- Subscriber {} removed", self.name, id);
        }
    }
}

/// Keeps a callback registered. Dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes immediately"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    coordinator: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.coordinator.upgrade() {
            inner.remove_subscriber(self.id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
