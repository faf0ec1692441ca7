use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use delta_ingest_core::{DatagramTransport, Received, Snapshot, TransportError};
use delta_ingest_gt7::{encode, GT7Config, PacketVariant};
use delta_session::{Engine, EngineConfig, EngineHandle, LapSelection, LoopTiming, QueryError};
use model::Metric;
use tokio::sync::mpsc;
use tokio::time;

struct ScriptedTransport {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    heartbeats: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl DatagramTransport for ScriptedTransport {
    async fn send_heartbeat(&self) -> Result<(), TransportError> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Received, TransportError> {
        match time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(raw)) => Ok(Received::Datagram(Bytes::from(raw))),
            Ok(None) => {
                time::sleep(timeout).await;
                Ok(Received::Timeout)
            }
            Err(_) => Ok(Received::Timeout),
        }
    }
}

struct Rig {
    engine: Engine,
    console: mpsc::UnboundedSender<Vec<u8>>,
    heartbeats: Arc<AtomicUsize>,
}

fn rig_with(cfg: EngineConfig, timing: LoopTiming) -> Rig {
    let (console, rx) = mpsc::unbounded_channel();
    let heartbeats = Arc::new(AtomicUsize::new(0));
    let transport = ScriptedTransport { rx, heartbeats: heartbeats.clone() };
    let engine = Engine::spawn(transport, timing, cfg).unwrap();
    Rig { engine, console, heartbeats }
}

fn rig(cfg: EngineConfig) -> Rig {
    let timing = LoopTiming {
        heartbeat_interval: Duration::from_millis(20),
        receive_timeout: Duration::from_millis(20),
    };
    rig_with(cfg, timing)
}

fn test_config() -> EngineConfig {
    EngineConfig { publish_interval_ms: 0, ..EngineConfig::default() }
}

fn snap(packet_id: i32, lap: i16) -> Snapshot {
    let mut s = Snapshot {
        packet_id,
        current_lap: lap,
        position: [packet_id as f32 * 0.5, 0.0, 0.0],
        speed_kph: 1.0,
        fuel_level: 60.0 - packet_id as f32 * 0.01,
        ..Snapshot::default()
    };
    s.flags.on_track = true;
    s
}

fn datagram(s: &Snapshot) -> Vec<u8> {
    encode(s, PacketVariant::Standard)
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = time::Instant::now() + Duration::from_secs(3);
    while !check() {
        assert!(time::Instant::now() < deadline, "timed out waiting for {what}");
        time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_accepted(h: &EngineHandle, n: u64) {
    eventually("accepted packets", || h.counters().accepted >= n).await;
}

#[tokio::test]
async fn lap_number_sequence_closes_two_laps() {
    let r = rig(test_config());
    let h = r.engine.handle();

    for (i, lap) in [1, 1, 1, 2, 2, 3].into_iter().enumerate() {
        let mut s = snap(i as i32 + 1, lap);
        if i == 3 {
            s.last_lap_ms = 83_456;
        }
        r.console.send(datagram(&s)).unwrap();
    }
    wait_accepted(&h, 6).await;

    let laps = h.laps();
    assert_eq!(laps.len(), 2);
    assert_eq!(laps[1].meta.lap_number, 1);
    assert_eq!(laps[1].finish_time_ms, Some(83_456));
    assert_eq!(laps[0].meta.lap_number, 2);
    assert_eq!(h.current_lap().map(|l| l.meta.lap_number), Some(3));
    assert_eq!(h.counters().laps_closed, 2);
    assert!(h.is_connected());
}

#[tokio::test]
async fn loop_sends_heartbeats() {
    let r = rig(test_config());
    let hb = r.heartbeats.clone();
    eventually("heartbeats", || hb.load(Ordering::SeqCst) >= 3).await;
    r.engine.stop().await;
}

#[tokio::test]
async fn junk_and_stale_datagrams_are_counted_and_dropped() {
    let r = rig(test_config());
    let h = r.engine.handle();

    r.console.send(datagram(&snap(10, 1))).unwrap();
    wait_accepted(&h, 1).await;
    let rev = h.revision();

    let mut bad = datagram(&snap(11, 2));
    bad[0] ^= 0x5A;
    r.console.send(bad).unwrap();
    r.console.send(vec![0u8; 100]).unwrap();
    r.console.send(datagram(&snap(9, 2))).unwrap();
    r.console.send(datagram(&snap(10, 2))).unwrap();

    eventually("drops", || {
        let c = h.counters();
        c.bad_magic == 1 && c.truncated == 1 && c.stale == 2
    })
    .await;
    assert_eq!(h.revision(), rev);
    assert!(h.laps().is_empty());
    assert_eq!(h.current_lap().map(|l| l.points.len()), Some(1));
}

#[tokio::test]
async fn stop_keeps_laps_readable() {
    let r = rig(test_config());
    let h = r.engine.handle();
    for (id, lap) in [(1, 1), (2, 1), (3, 2), (4, 2)] {
        r.console.send(datagram(&snap(id, lap))).unwrap();
    }
    wait_accepted(&h, 4).await;

    let stopped = r.engine.stop().await;
    assert_eq!(stopped.laps().len(), 1);
    assert_eq!(stopped.current_lap().map(|l| l.points.len()), Some(2));
    assert!(r.console.send(datagram(&snap(5, 3))).is_err());
    assert!(stopped.lap(LapSelection::Last).is_ok());
}

#[tokio::test]
async fn commands_reach_the_segmenter() {
    let r = rig(test_config());
    let h = r.engine.handle();
    for id in 1..=61 {
        r.console.send(datagram(&snap(id, 1))).unwrap();
    }
    wait_accepted(&h, 61).await;

    assert!(!h.has_unsaved_laps());
    let lap = h.finish_lap_now().unwrap();
    assert!(lap.manual);
    assert_eq!(lap.finish_time_ms, Some(1000));
    assert!(h.current_lap().is_none());
    assert_eq!(h.laps().len(), 1);
    assert!(h.has_unsaved_laps());

    h.mark_saved();
    assert!(!h.has_unsaved_laps());

    let table = h.lap_table();
    assert_eq!(table.len(), 1);
    assert!((table[0].fuel_consumed - 0.6).abs() < 1e-3);

    h.reset_history();
    assert!(h.laps().is_empty());
    assert_eq!(h.session_stats().max_speed_kph, 0.0);
    assert_eq!(h.median(Metric::Speed), Err(QueryError::InsufficientData));
}

#[tokio::test]
async fn loaded_laps_are_queryable() {
    let r = rig(EngineConfig { brake_points: true, ..test_config() });
    let h = r.engine.handle();

    let mut lap = model::Lap::new(4, 7, 0);
    for d in 0..=100u32 {
        lap.record(model::TelemetryPoint {
            t_ms: d as f64 * 50.0,
            lap_distance_m: d as f64,
            x: d as f64,
            y: 0.0,
            z: 0.0,
            speed_kph: 72.0,
            throttle: 100.0,
            brake: 0.0,
            gear: 2,
            rpm: 4000.0,
            body_height_mm: 90.0,
            fuel_level: 20.0,
            tyres_spinning: false,
        });
    }
    lap.finish_time_ms = Some(5000);
    h.load_laps(vec![lap], true);

    let p = h.profile(LapSelection::Best, Metric::Speed).unwrap();
    assert_eq!(p.at(50.0), Some(72.0));
    let m = h.median(Metric::Speed).unwrap();
    assert_eq!(m.values.len(), 101);
    assert_eq!(h.time_delta(LapSelection::Last, LapSelection::Best).unwrap().at(10.0), Some(0.0));
    assert!(h.brake_points(LapSelection::Last).unwrap().is_empty());
    assert!(h.overlay(&[LapSelection::Last], Metric::Speed).unwrap().is_array());
    assert!(h.peak_valley(LapSelection::Last, LapSelection::Best).unwrap().is_empty());
    r.engine.stop().await;
}

#[tokio::test]
async fn silence_turns_into_disconnected() {
    let cfg = EngineConfig { disconnect_after_ms: 50, ..test_config() };
    let r = rig(cfg);
    let h = r.engine.handle();
    assert!(!h.is_connected());

    r.console.send(datagram(&snap(1, 1))).unwrap();
    wait_accepted(&h, 1).await;
    assert!(h.is_connected());

    eventually("disconnect", || !h.is_connected()).await;
    eventually("timeouts", || h.counters().timeouts > 0).await;
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let (_console, rx) = mpsc::unbounded_channel();
    let transport = ScriptedTransport { rx, heartbeats: Arc::new(AtomicUsize::new(0)) };
    let timing = LoopTiming {
        heartbeat_interval: Duration::from_millis(20),
        receive_timeout: Duration::from_millis(20),
    };
    let cfg = EngineConfig { history_capacity: 0, ..EngineConfig::default() };
    assert!(Engine::spawn(transport, timing, cfg).is_err());
}

#[tokio::test]
async fn timeouts_count_when_heartbeats_are_faster() {
    let timing = LoopTiming {
        heartbeat_interval: Duration::from_millis(5),
        receive_timeout: Duration::from_millis(40),
    };
    let r = rig_with(test_config(), timing);
    let h = r.engine.handle();
    let hb = r.heartbeats.clone();

    eventually("timeouts", || h.counters().timeouts >= 2).await;
    assert!(hb.load(Ordering::SeqCst) >= 2);
    r.engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn default_timing_reports_silence() {
    let r = rig_with(EngineConfig::default(), LoopTiming::from(&GT7Config::default()));
    let h = r.engine.handle();

    time::sleep(Duration::from_secs(30)).await;
    let timeouts = h.counters().timeouts;
    assert!((25..=31).contains(&timeouts), "timeouts = {timeouts}");
    assert!(r.heartbeats.load(Ordering::SeqCst) >= 30);
    assert!(!h.is_connected());

    // a datagram restarts the receive window
    r.console.send(datagram(&snap(1, 1))).unwrap();
    wait_accepted(&h, 1).await;
    assert!(h.is_connected());
    r.engine.stop().await;
}
