use std::sync::Arc;
use std::time::Duration;

use delta_ingest_core::{DatagramTransport, DecodeError, Received, TransportError};
use delta_ingest_gt7::{GT7Config, Gt7Transport};
use model::{BrakePoint, FuelProjection, Lap, LapTableRow, Metric, PeakValleyRow, Profile, SessionStats};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, EngineConfig};
use crate::segmenter::{SegmentOutcome, Segmenter};
use crate::view::{LapSelection, LapView, QueryError};

const RECEIVE_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestCounters {
    pub accepted: u64,
    pub stale: u64,
    pub bad_magic: u64,
    pub truncated: u64,
    pub timeouts: u64,
    pub heartbeat_failures: u64,
    pub laps_closed: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopTiming {
    pub heartbeat_interval: Duration,
    pub receive_timeout: Duration,
}

impl From<&GT7Config> for LoopTiming {
    fn from(cfg: &GT7Config) -> Self {
        Self { heartbeat_interval: cfg.heartbeat_interval(), receive_timeout: cfg.receive_timeout() }
    }
}

struct Inner {
    segmenter: Segmenter,
    counters: IngestCounters,
    last_datagram: Option<Instant>,
    last_publish: Option<Instant>,
    saved_revision: u64,
    // closed laps as of the given history revision
    laps_cache: (u64, Arc<Vec<Arc<Lap>>>),
}

struct Shared {
    inner: Mutex<Inner>,
    view: RwLock<Arc<LapView>>,
    config: Arc<EngineConfig>,
}

impl Shared {
    fn publish(&self, inner: &mut Inner) {
        let seg = &inner.segmenter;
        if inner.laps_cache.0 != seg.history_revision() {
            inner.laps_cache = (seg.history_revision(), Arc::new(seg.history().to_vec()));
        }
        let view = LapView {
            revision: seg.revision(),
            history_revision: seg.history_revision(),
            current: seg.current_lap().cloned().map(Arc::new),
            laps: inner.laps_cache.1.clone(),
            stats: seg.stats().clone(),
            fuel_level: seg.fuel_level(),
            counters: inner.counters,
            config: self.config.clone(),
        };
        inner.last_publish = Some(Instant::now());
        *self.view.write() = Arc::new(view);
    }

    fn publish_now(&self) {
        let mut inner = self.inner.lock();
        self.publish(&mut inner);
    }

    fn ingest(&self, raw: &[u8]) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.last_datagram = Some(now);

        match inner.segmenter.feed_datagram(raw) {
            Err(e) => {
                match e {
                    DecodeError::BadMagic { .. } => inner.counters.bad_magic += 1,
                    DecodeError::Truncated { .. } => inner.counters.truncated += 1,
                }
                debug!(error = %e, len = raw.len(), "datagram dropped");
                return;
            }
            Ok(SegmentOutcome::Stale) => {
                inner.counters.stale += 1;
                return;
            }
            Ok(SegmentOutcome::LapClosed(_)) => {
                inner.counters.accepted += 1;
                inner.counters.laps_closed += 1;
                self.publish(&mut inner);
                return;
            }
            Ok(SegmentOutcome::Recorded | SegmentOutcome::Skipped) => inner.counters.accepted += 1,
        }

        let due = inner
            .last_publish
            .map_or(true, |t| now.duration_since(t) >= self.config.publish_interval());
        if due {
            self.publish(&mut inner);
        }
    }
}

async fn run<T: DatagramTransport>(
    mut transport: T,
    shared: Arc<Shared>,
    timing: LoopTiming,
    mut stop: watch::Receiver<bool>,
) {
    let mut heartbeat = time::interval(timing.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // heartbeats interrupt the receive wait but must not restart it
    let mut deadline = Instant::now() + timing.receive_timeout;
    info!(?timing, "acquisition loop started");

    loop {
        let wait = deadline.saturating_duration_since(Instant::now());
        tokio::select! {
            biased;

            _ = stop.changed() => break,
            _ = heartbeat.tick() => {
                if let Err(e) = transport.send_heartbeat().await {
                    warn!(error = %e, "heartbeat failed");
                    shared.inner.lock().counters.heartbeat_failures += 1;
                }
            }
            got = transport.receive(wait) => {
                match got {
                    Ok(Received::Datagram(raw)) => shared.ingest(&raw),
                    Ok(Received::Timeout) => {
                        debug!(after = ?timing.receive_timeout, "no telemetry");
                        shared.inner.lock().counters.timeouts += 1;
                    }
                    Err(e) => {
                        warn!(error = %e, "receive failed");
                        time::sleep(RECEIVE_BACKOFF).await;
                    }
                }
                deadline = Instant::now() + timing.receive_timeout;
            }
        }
    }

    shared.publish_now();
    info!("acquisition loop stopped");
}

/// Running acquisition session. Dropping the engine without [`Engine::stop`]
/// also ends the loop once the stop channel closes.
pub struct Engine {
    handle: EngineHandle,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Engine {
    /// Open the GT7 socket and start streaming.
    pub async fn start(gt7: &GT7Config, cfg: EngineConfig) -> Result<Self, StartError> {
        cfg.validate()?;
        let transport = Gt7Transport::open(gt7).await?;
        Ok(Self::spawn(transport, LoopTiming::from(gt7), cfg)?)
    }

    /// Start the loop over any transport. Must be called inside a tokio
    /// runtime.
    pub fn spawn<T: DatagramTransport + 'static>(
        transport: T,
        timing: LoopTiming,
        cfg: EngineConfig,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let config = Arc::new(cfg);
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                segmenter: Segmenter::from_config(&config),
                counters: IngestCounters::default(),
                last_datagram: None,
                last_publish: None,
                saved_revision: 0,
                laps_cache: (0, Arc::new(Vec::new())),
            }),
            view: RwLock::new(Arc::new(LapView::empty(config.clone()))),
            config,
        });

        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run(transport, shared.clone(), timing, stop_rx));
        Ok(Self { handle: EngineHandle { shared }, stop, task })
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Stop heartbeats, close the socket and wait for the loop to finish.
    /// Recorded laps stay readable through the returned handle.
    pub async fn stop(self) -> EngineHandle {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "acquisition task ended abnormally");
        }
        self.handle
    }
}

/// Cheap, cloneable access to a running or stopped engine.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    /// Latest published state.
    pub fn view(&self) -> Arc<LapView> {
        self.shared.view.read().clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn current_lap(&self) -> Option<Arc<Lap>> {
        self.view().current_lap()
    }

    /// Closed laps, most recent first.
    pub fn laps(&self) -> Arc<Vec<Arc<Lap>>> {
        self.view().laps.clone()
    }

    pub fn lap(&self, sel: LapSelection) -> Result<Arc<Lap>, QueryError> {
        self.view().lap(sel)
    }

    pub fn profile(&self, sel: LapSelection, metric: Metric) -> Result<Profile, QueryError> {
        self.view().profile(sel, metric)
    }

    pub fn median(&self, metric: Metric) -> Result<Profile, QueryError> {
        self.view().median(metric)
    }

    pub fn peak_valley(
        &self,
        reference: LapSelection,
        comparison: LapSelection,
    ) -> Result<Vec<PeakValleyRow>, QueryError> {
        self.view().peak_valley(reference, comparison)
    }

    pub fn brake_points(&self, sel: LapSelection) -> Result<Vec<BrakePoint>, QueryError> {
        self.view().brake_points(sel)
    }

    pub fn fuel_projection(&self) -> Result<Vec<FuelProjection>, QueryError> {
        self.view().fuel_projection()
    }

    pub fn time_delta(
        &self,
        reference: LapSelection,
        comparison: LapSelection,
    ) -> Result<Profile, QueryError> {
        self.view().time_delta(reference, comparison)
    }

    pub fn lap_table(&self) -> Vec<LapTableRow> {
        self.view().lap_table()
    }

    pub fn overlay(&self, selections: &[LapSelection], metric: Metric) -> Result<Value, QueryError> {
        self.view().overlay(selections, metric)
    }

    pub fn reset_history(&self) {
        let mut inner = self.shared.inner.lock();
        inner.segmenter.reset();
        self.shared.publish(&mut inner);
    }

    /// Record that the current laps have been persisted.
    pub fn mark_saved(&self) {
        let mut inner = self.shared.inner.lock();
        inner.saved_revision = inner.segmenter.history_revision();
    }

    pub fn has_unsaved_laps(&self) -> bool {
        let inner = self.shared.inner.lock();
        !inner.segmenter.history().is_empty()
            && inner.segmenter.history_revision() != inner.saved_revision
    }

    /// Insert laps from storage, oldest first.
    pub fn load_laps(&self, laps: Vec<Lap>, replace: bool) {
        let mut inner = self.shared.inner.lock();
        inner.segmenter.load_laps(laps, replace);
        self.shared.publish(&mut inner);
    }

    pub fn finish_lap_now(&self) -> Option<Arc<Lap>> {
        let mut inner = self.shared.inner.lock();
        let lap = inner.segmenter.finish_lap_now()?;
        inner.counters.laps_closed += 1;
        self.shared.publish(&mut inner);
        Some(lap)
    }

    /// A datagram arrived within `disconnect_after`.
    pub fn is_connected(&self) -> bool {
        let limit = self.shared.config.disconnect_after();
        self.shared.inner.lock().last_datagram.is_some_and(|t| t.elapsed() < limit)
    }

    pub fn session_stats(&self) -> SessionStats {
        self.shared.inner.lock().segmenter.stats().clone()
    }

    pub fn counters(&self) -> IngestCounters {
        self.shared.inner.lock().counters
    }

    pub fn revision(&self) -> u64 {
        self.shared.inner.lock().segmenter.revision()
    }
}
