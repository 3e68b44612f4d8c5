//! Connection lifecycle and periodic refresh.
//!
//! `Disconnected -> Connecting -> Connected <-> Refreshing`, back to
//! `Disconnected` on teardown or when the provider rejects the token.
//!
//! At most one fetch is outstanding at a time. Every connection gets a new
//! generation number; a fetch that completes under an older generation is
//! dropped without touching the snapshot or calling any listener.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, FixedOffset, Local, TimeZone};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::aggregator::compute_insights;
use crate::auth::{CredentialProvider, Credentials};
use crate::config::{MonitorConfig, TrendPolicy};
use crate::error::{PulseError, Result};
use crate::insights::InsightSnapshot;
use crate::models::RunRecord;
use crate::providers::{BuildSource, Connector};

/// Source of the reference time handed to the aggregator. Daily buckets
/// are cut at midnight in the clock's time zone.
pub trait Clock: Send + Sync {
    type Tz: TimeZone;

    fn now(&self) -> DateTime<Self::Tz>;
}

/// Local wall clock, daylight saving included.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    type Tz = Local;

    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Refreshing,
}

type SnapshotListener = Box<dyn Fn(Arc<InsightSnapshot>) + Send + Sync>;
type ErrorListener = Box<dyn Fn(&PulseError) + Send + Sync>;
type Aggregate = Box<dyn Fn(&[RunRecord], &TrendPolicy) -> InsightSnapshot + Send + Sync>;

struct Session {
    state: ConnectionState,
    source: Option<Arc<dyn BuildSource>>,
    ticker: Option<JoinHandle<()>>,
    last_updated: Option<DateTime<FixedOffset>>,
    last_error: Option<String>,
}

struct Shared {
    config: MonitorConfig,
    connector: Box<dyn Connector>,
    aggregate: Aggregate,
    generation: AtomicU64,
    in_flight: AtomicBool,
    // Held while a result is checked against `generation`, applied and
    // announced, and while a teardown bumps `generation`.
    delivery: Mutex<()>,
    session: Mutex<Session>,
    snapshot: RwLock<Arc<InsightSnapshot>>,
    snapshot_listeners: RwLock<Vec<SnapshotListener>>,
    error_listeners: RwLock<Vec<ErrorListener>>,
}

/// Clears the single-flight flag when a fetch settles, even by panic.
struct InFlight<'a> {
    flag: &'a AtomicBool,
    armed: bool,
}

impl InFlight<'_> {
    fn release(mut self) {
        self.flag.store(false, Ordering::Release);
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(false, Ordering::Release);
        }
    }
}

/// Owns the connection to a build provider and the current snapshot.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct PollingController {
    shared: Arc<Shared>,
}

impl PollingController {
    pub fn new(config: MonitorConfig, connector: impl Connector + 'static) -> Result<Self> {
        Self::with_clock(config, connector, SystemClock)
    }

    pub fn with_clock(
        config: MonitorConfig,
        connector: impl Connector + 'static,
        clock: impl Clock + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let aggregate: Aggregate =
            Box::new(move |records: &[RunRecord], policy: &TrendPolicy| {
                compute_insights(records, &clock.now(), policy)
            });

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                connector: Box::new(connector),
                aggregate,
                generation: AtomicU64::new(0),
                in_flight: AtomicBool::new(false),
                delivery: Mutex::new(()),
                session: Mutex::new(Session {
                    state: ConnectionState::Disconnected,
                    source: None,
                    ticker: None,
                    last_updated: None,
                    last_error: None,
                }),
                snapshot: RwLock::new(Arc::new(InsightSnapshot::default())),
                snapshot_listeners: RwLock::new(Vec::new()),
                error_listeners: RwLock::new(Vec::new()),
            }),
        })
    }

    /// Validates the credentials with one probe call. On success the
    /// controller is `Connected` and the first refresh starts right away;
    /// on failure it stays `Disconnected` and the error is reported. No
    /// retry is attempted.
    pub async fn connect(&self, credentials: Credentials) -> Result<()> {
        self.disconnect();
        let generation = self.shared.generation.load(Ordering::SeqCst);
        self.shared.session.lock().state = ConnectionState::Connecting;
        info!(
            "Connecting to {} (project: {})",
            credentials.organization_url(),
            credentials.project()
        );

        let attempt: Result<Arc<dyn BuildSource>> = async {
            let source = self.shared.connector.open(&credentials)?;
            source.probe().await?;
            Ok(source)
        }
        .await;

        let _delivery = self.shared.delivery.lock();
        if self.shared.generation.load(Ordering::SeqCst) != generation {
            debug!("Connection attempt superseded");
            return Err(PulseError::Cancelled);
        }

        match attempt {
            Ok(source) => {
                let mut session = self.shared.session.lock();
                session.source = Some(source);
                session.state = ConnectionState::Connected;
                session.last_error = None;
                session.ticker = Some(Shared::spawn_ticker(&self.shared, generation));
                info!("Connected to project: {}", credentials.project());
                Ok(())
            }
            Err(err) => {
                {
                    let mut session = self.shared.session.lock();
                    session.state = ConnectionState::Disconnected;
                    session.last_error = Some(err.to_string());
                }
                warn!("Connection failed: {err}");
                self.shared.notify_error(&err);
                Err(err)
            }
        }
    }

    pub async fn connect_with(&self, provider: &dyn CredentialProvider) -> Result<()> {
        let credentials = provider.load()?;
        self.connect(credentials).await
    }

    /// Stops periodic refresh. A fetch already in flight runs to completion
    /// but its result is discarded.
    ///
    /// Must not be called from inside a listener.
    pub fn disconnect(&self) {
        let _delivery = self.shared.delivery.lock();
        self.shared.close_session();
    }

    /// Requests a refresh outside the schedule. Returns `false` when not
    /// connected or when a fetch is already outstanding; the request is then
    /// dropped, not queued.
    pub fn manual_refresh(&self) -> bool {
        let generation = self.shared.generation.load(Ordering::SeqCst);
        Shared::request_refresh(&self.shared, generation)
    }

    /// The latest snapshot. Replaced as a whole; never observed half-written.
    pub fn snapshot(&self) -> Arc<InsightSnapshot> {
        Arc::clone(&self.shared.snapshot.read())
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.session.lock().state
    }

    pub fn is_refreshing(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    pub fn last_updated(&self) -> Option<DateTime<FixedOffset>> {
        self.shared.session.lock().last_updated
    }

    /// Message of the most recent failure; cleared by the next good refresh.
    pub fn last_error(&self) -> Option<String> {
        self.shared.session.lock().last_error.clone()
    }

    /// Called with every new snapshot. Listeners must not call `connect` or
    /// `disconnect`.
    pub fn on_snapshot_updated(
        &self,
        listener: impl Fn(Arc<InsightSnapshot>) + Send + Sync + 'static,
    ) {
        self.shared.snapshot_listeners.write().push(Box::new(listener));
    }

    /// Called with every connection or fetch failure. Listeners must not
    /// call `connect` or `disconnect`.
    pub fn on_error(&self, listener: impl Fn(&PulseError) + Send + Sync + 'static) {
        self.shared.error_listeners.write().push(Box::new(listener));
    }
}

impl Shared {
    /// Caller holds `delivery`.
    fn close_session(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);

        let mut session = self.session.lock();
        if let Some(ticker) = session.ticker.take() {
            ticker.abort();
        }
        session.source = None;
        if session.state != ConnectionState::Disconnected {
            info!("Disconnected");
        }
        session.state = ConnectionState::Disconnected;
    }

    fn spawn_ticker(shared: &Arc<Self>, generation: u64) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(shared);
        let period = shared.config.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                // The first tick completes immediately.
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                Self::request_refresh(&shared, generation);
            }
        })
    }

    fn request_refresh(shared: &Arc<Self>, generation: u64) -> bool {
        let source = {
            let mut session = shared.session.lock();
            if shared.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            let Some(source) = session.source.clone() else {
                debug!("Refresh requested while disconnected");
                return false;
            };
            if shared
                .in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                debug!("Refresh already in flight, coalescing request");
                return false;
            }
            session.state = ConnectionState::Refreshing;
            source
        };

        let shared = Arc::clone(shared);
        let top = shared.config.fetch_top;
        tokio::spawn(async move {
            let in_flight = InFlight {
                flag: &shared.in_flight,
                armed: true,
            };
            let result = source.fetch_runs(top).await;
            Self::finish_refresh(&shared, generation, result, in_flight);
        });

        true
    }

    fn finish_refresh(
        shared: &Arc<Self>,
        generation: u64,
        result: Result<Vec<RunRecord>>,
        in_flight: InFlight<'_>,
    ) {
        let delivery = shared.delivery.lock();
        let current = shared.generation.load(Ordering::SeqCst);
        if current != generation {
            debug!("Discarding refresh result from a closed connection");
            in_flight.release();
            drop(delivery);
            // A connection opened meanwhile had its first tick coalesced.
            Self::request_refresh(shared, current);
            return;
        }

        match result {
            Ok(records) => {
                let snapshot = Arc::new((shared.aggregate)(&records, &shared.config.trend));
                *shared.snapshot.write() = Arc::clone(&snapshot);
                {
                    let mut session = shared.session.lock();
                    session.state = ConnectionState::Connected;
                    session.last_updated = snapshot.computed_at;
                    session.last_error = None;
                }
                in_flight.release();
                info!(
                    "Snapshot updated: {} runs, {}% success",
                    snapshot.total_runs, snapshot.success_rate
                );
                shared.notify_snapshot(&snapshot);
            }
            Err(err) => {
                warn!("Refresh failed, keeping previous snapshot: {err}");
                if matches!(err, PulseError::AuthenticationFailed(_)) {
                    shared.close_session();
                } else {
                    shared.session.lock().state = ConnectionState::Connected;
                }
                shared.session.lock().last_error = Some(err.to_string());
                in_flight.release();
                shared.notify_error(&err);
            }
        }
    }

    fn notify_snapshot(&self, snapshot: &Arc<InsightSnapshot>) {
        for listener in self.snapshot_listeners.read().iter() {
            listener(Arc::clone(snapshot));
        }
    }

    fn notify_error(&self, err: &PulseError) {
        for listener in self.error_listeners.read().iter() {
            listener(err);
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(ticker) = self.session.get_mut().ticker.take() {
            ticker.abort();
        }
    }
}
