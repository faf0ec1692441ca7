//! Folds the snapshot stream into laps.
//!
//! The segmenter is the only writer of lap data. It is synchronous and owns
//! no I/O; the acquisition loop feeds it one datagram at a time and the
//! command methods reach it through the same lock.

use std::sync::Arc;

use delta_ingest_core::{DecodeError, Snapshot};
use delta_ingest_gt7::{decode, TICK_HZ};
use model::{Lap, LapAnomaly, SessionStats, TelemetryPoint};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, SegmenterConfig, ValidityPolicy};
use crate::history::LapHistory;

#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOutcome {
    /// Packet id not newer than the last accepted one; dropped.
    Stale,
    /// Accepted for sequencing, nothing recorded.
    Skipped,
    Recorded,
    /// A lap closed on this snapshot. The snapshot itself went into the
    /// next lap when it was recordable.
    LapClosed(Arc<Lap>),
}

enum LapEnd {
    Finished(u32),
    /// Back at the lap's starting point with the lap number unchanged.
    Looped(u32),
    Manual(u32),
    Abandoned { to: i16 },
}

fn gap(a: [f32; 3], b: [f32; 3]) -> f64 {
    let d: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    d.sqrt() as f64
}

// lap being recorded
struct OpenLap {
    lap: Lap,
    number: i16,
    start_packet: i32,
    start_position: [f32; 3],
    prev: Option<Snapshot>,
    distance_m: f64,
    // opened by a position close; a late lap number may still rename it
    looped: bool,
}

impl OpenLap {
    fn elapsed_ms(&self, packet_id: i32) -> f64 {
        (packet_id as i64 - self.start_packet as i64) as f64 * 1000.0 / TICK_HZ
    }

    fn ticks_ms(&self, packet_id: i32) -> u32 {
        self.elapsed_ms(packet_id).round() as u32
    }

    fn boundary(&self, s: &Snapshot, cfg: &SegmenterConfig) -> Option<LapEnd> {
        if s.current_lap > self.number {
            let ms = s.last_lap_time().unwrap_or_else(|| self.ticks_ms(s.packet_id));
            return Some(LapEnd::Finished(ms));
        }
        if s.current_lap < self.number {
            return Some(LapEnd::Abandoned { to: s.current_lap });
        }
        match s.lap_distance_m {
            Some(d) if self.distance_m >= cfg.reset_from_m && (d as f64) <= cfg.reset_to_m => {
                Some(LapEnd::Finished(self.ticks_ms(s.packet_id)))
            }
            Some(_) => None,
            None => self.passed_start(s, cfg).then(|| LapEnd::Looped(self.ticks_ms(s.packet_id))),
        }
    }

    /// The previous point was the closest approach to the start position
    /// and it lay inside the close radius.
    fn passed_start(&self, s: &Snapshot, cfg: &SegmenterConfig) -> bool {
        let Some(prev) = &self.prev else { return false };
        if cfg.loop_close_radius_m <= 0.0 || self.distance_m < cfg.loop_min_distance_m {
            return false;
        }
        let before = gap(prev.position, self.start_position);
        before <= cfg.loop_close_radius_m && gap(s.position, self.start_position) > before
    }
}

pub struct Segmenter {
    cfg: SegmenterConfig,
    policy: ValidityPolicy,
    open: Option<OpenLap>,
    last_packet_id: Option<i32>,
    last_lap_number: Option<i16>,
    // lap number that opens cleanly at a known boundary
    armed: Option<i16>,
    looped: bool,
    history: LapHistory,
    stats: SessionStats,
    fuel_level: Option<f64>,
    revision: u64,
    history_revision: u64,
}

impl Segmenter {
    pub fn new(cfg: SegmenterConfig, policy: ValidityPolicy, capacity: usize) -> Self {
        Self {
            cfg,
            policy,
            open: None,
            last_packet_id: None,
            last_lap_number: None,
            armed: None,
            looped: false,
            history: LapHistory::new(capacity),
            stats: SessionStats::default(),
            fuel_level: None,
            revision: 0,
            history_revision: 0,
        }
    }

    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(cfg.segmenter.clone(), cfg.validity.clone(), cfg.history_capacity)
    }

    /// Decode and feed one datagram. Undecodable datagrams leave the
    /// segmenter untouched.
    pub fn feed_datagram(&mut self, raw: &[u8]) -> Result<SegmentOutcome, DecodeError> {
        let s = decode(raw)?;
        Ok(self.feed(s))
    }

    pub fn feed(&mut self, s: Snapshot) -> SegmentOutcome {
        if self.last_packet_id.is_some_and(|last| s.packet_id <= last) {
            return SegmentOutcome::Stale;
        }
        self.last_packet_id = Some(s.packet_id);
        let prev_number = self.last_lap_number.replace(s.current_lap);
        self.revision += 1;

        if let Some(open) = self.open.as_mut() {
            if open.looped && s.current_lap > open.number && open.distance_m < self.cfg.loop_min_distance_m {
                debug!(from = open.number, to = s.current_lap, "late lap number adopted");
                open.number = s.current_lap;
                open.lap.meta.lap_number = s.current_lap.max(0) as u32;
                open.looped = false;
            }
        }

        let end = self.open.as_ref().and_then(|open| open.boundary(&s, &self.cfg));
        let closed = match end {
            Some(end) => {
                self.armed = match end {
                    LapEnd::Abandoned { .. } => None,
                    _ => Some(s.current_lap),
                };
                self.looped = matches!(end, LapEnd::Looped(_));
                self.close(end)
            }
            None => None,
        };
        if closed.is_none() && self.open.is_none() {
            if let Some(prev) = prev_number.filter(|n| *n != s.current_lap) {
                self.armed = self.clean_start(prev, s.current_lap).then_some(s.current_lap);
            }
        }

        let outcome = |recorded: bool| match (&closed, recorded) {
            (Some(lap), _) => SegmentOutcome::LapClosed(lap.clone()),
            (None, true) => SegmentOutcome::Recorded,
            (None, false) => SegmentOutcome::Skipped,
        };

        if !s.is_recordable() || (self.open.is_none() && s.current_lap <= 0) {
            return outcome(false);
        }
        if self.open.is_none() {
            self.open_lap(&s);
        }
        self.record(s);
        outcome(true)
    }

    /// A lap number change seen while no lap is open starts the new lap
    /// at its line: one lap on, or off lap 0 onto an early lap.
    fn clean_start(&self, from: i16, to: i16) -> bool {
        if from <= 0 {
            to >= 1 && to <= self.policy.max_clean_start_lap
        } else {
            to == from + 1
        }
    }

    fn open_lap(&mut self, s: &Snapshot) {
        let mut lap = Lap::new(s.current_lap.max(0) as u32, s.car_id, s.total_laps.max(0) as u32);
        if self.armed != Some(s.current_lap) {
            let far = s
                .lap_distance_m
                .is_some_and(|d| d as f64 > self.policy.max_start_distance_m);
            if far || s.speed_kph as f64 > self.policy.truncated_start_speed_kph {
                let anomaly = LapAnomaly::TruncatedStart { speed_kph: s.speed_kph as f64 };
                warn!(lap = s.current_lap, %anomaly, "lap recording started mid-lap");
                lap.mark_invalid(anomaly);
            }
        }
        self.armed = None;
        debug!(lap = s.current_lap, packet_id = s.packet_id, "lap opened");
        self.open = Some(OpenLap {
            lap,
            number: s.current_lap,
            start_packet: s.packet_id,
            start_position: s.position,
            prev: None,
            distance_m: 0.0,
            looped: std::mem::take(&mut self.looped),
        });
    }

    fn record(&mut self, s: Snapshot) {
        let Some(open) = self.open.as_mut() else { return };

        match (s.lap_distance_m, &open.prev) {
            (Some(d), _) => open.distance_m = d as f64,
            (None, Some(prev)) => open.distance_m += s.distance_to(prev) as f64,
            (None, None) => {}
        }

        let index = open.lap.points.len();
        if let Some(prev) = &open.prev {
            if open.lap.valid && index < self.policy.inspect_samples {
                if let Some(anomaly) = jump(&self.policy, prev, &s, index) {
                    warn!(lap = open.number, %anomaly, "discontinuity at lap start");
                    open.lap.mark_invalid(anomaly);
                }
            }
        }

        let t_ms = open.elapsed_ms(s.packet_id);
        open.lap.record(point(&s, t_ms, open.distance_m, self.cfg.tyre_spin_ratio));

        let st = &mut self.stats;
        st.max_speed_kph = st.max_speed_kph.max(s.speed_kph as f64);
        let h = s.body_height_mm as f64;
        st.min_body_height_mm = Some(st.min_body_height_mm.map_or(h, |m| m.min(h)));
        if let Some(best) = s.best_lap_time() {
            st.best_lap_ms = Some(st.best_lap_ms.map_or(best, |b| b.min(best)));
        }
        self.fuel_level = Some(s.fuel_level as f64);
        open.prev = Some(s);
    }

    fn close(&mut self, end: LapEnd) -> Option<Arc<Lap>> {
        let open = self.open.take()?;
        let mut lap = open.lap;
        match end {
            LapEnd::Finished(ms) => lap.finish_time_ms = Some(ms),
            LapEnd::Looped(ms) => {
                debug!(lap = open.number, "lap closed at its starting point");
                lap.finish_time_ms = Some(ms);
            }
            LapEnd::Manual(ms) => {
                lap.finish_time_ms = Some(ms);
                lap.manual = true;
            }
            LapEnd::Abandoned { to } => {
                let anomaly = LapAnomaly::Abandoned { from_lap: open.number as i32, to_lap: to as i32 };
                warn!(%anomaly, "lap abandoned");
                lap.mark_invalid(anomaly);
            }
        }
        lap.meta.finished_at = Some(OffsetDateTime::now_utc());

        if let (true, Some(ms)) = (lap.valid, lap.finish_time_ms) {
            let best = &mut self.stats.best_lap_ms;
            *best = Some(best.map_or(ms, |b| b.min(ms)));
        }

        info!(
            lap = lap.meta.lap_number,
            time_ms = ?lap.finish_time_ms,
            valid = lap.valid,
            manual = lap.manual,
            points = lap.points.len(),
            "lap closed"
        );
        let lap = Arc::new(lap);
        if let Some(evicted) = self.history.push(lap.clone()) {
            debug!(id = %evicted.id, "history full, oldest lap evicted");
        }
        self.history_revision += 1;
        Some(lap)
    }

    /// Close the open lap where the car is now. The next recordable
    /// snapshot opens a fresh lap.
    pub fn finish_lap_now(&mut self) -> Option<Arc<Lap>> {
        let open = self.open.as_ref()?;
        let ms = open.lap.elapsed_ms().round() as u32;
        self.armed = Some(open.number);
        self.looped = false;
        self.revision += 1;
        self.close(LapEnd::Manual(ms))
    }

    /// Drop all laps and session stats. The sequence watermark survives so
    /// replayed packets stay stale.
    pub fn reset(&mut self) {
        self.history.clear();
        self.open = None;
        self.armed = None;
        self.looped = false;
        self.stats = SessionStats::default();
        self.fuel_level = None;
        self.revision += 1;
        self.history_revision += 1;
        info!("session reset");
    }

    /// Add laps recorded elsewhere, oldest first.
    pub fn load_laps(&mut self, laps: Vec<Lap>, replace: bool) {
        let n = laps.len();
        let laps = laps.into_iter().map(Arc::new);
        if replace {
            self.history.replace(laps);
        } else {
            for lap in laps {
                self.history.push(lap);
            }
        }
        self.revision += 1;
        self.history_revision += 1;
        info!(count = n, replace, "laps loaded");
    }

    pub fn history(&self) -> &LapHistory {
        &self.history
    }

    pub fn current_lap(&self) -> Option<&Lap> {
        self.open.as_ref().map(|o| &o.lap)
    }

    pub fn is_recording(&self) -> bool {
        self.open.is_some()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn fuel_level(&self) -> Option<f64> {
        self.fuel_level
    }

    /// Bumped on every accepted snapshot and command.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Bumped whenever the set of closed laps changes.
    pub fn history_revision(&self) -> u64 {
        self.history_revision
    }
}

fn jump(policy: &ValidityPolicy, prev: &Snapshot, s: &Snapshot, index: usize) -> Option<LapAnomaly> {
    let gap = (s.packet_id as i64 - prev.packet_id as i64).max(1) as f64;
    let position_step_m = s.distance_to(prev) as f64;
    let speed_step_kph = (s.speed_kph - prev.speed_kph).abs() as f64;
    if position_step_m > policy.max_position_step_m * gap
        || speed_step_kph > policy.max_speed_step_kph * gap
    {
        Some(LapAnomaly::Discontinuity { index, position_step_m, speed_step_kph })
    } else {
        None
    }
}

fn point(s: &Snapshot, t_ms: f64, distance_m: f64, spin_ratio: f32) -> TelemetryPoint {
    TelemetryPoint {
        t_ms,
        lap_distance_m: distance_m,
        x: s.position[0] as f64,
        y: s.position[1] as f64,
        z: s.position[2] as f64,
        speed_kph: s.speed_kph as f64,
        throttle: s.throttle as f64,
        brake: s.brake as f64,
        gear: s.gear,
        rpm: s.rpm as f64,
        body_height_mm: s.body_height_mm as f64,
        fuel_level: s.fuel_level as f64,
        tyres_spinning: s.tyres_spinning(spin_ratio),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delta_ingest_gt7::{encode, PacketVariant};

    fn segmenter() -> Segmenter {
        Segmenter::from_config(&EngineConfig::default())
    }

    // on track, crawling half a metre per tick
    fn snap(packet_id: i32, lap: i16) -> Snapshot {
        let mut s = Snapshot {
            packet_id,
            current_lap: lap,
            position: [packet_id as f32 * 0.5, 0.0, 0.0],
            fuel_level: 50.0,
            body_height_mm: 80.0,
            ..Snapshot::default()
        };
        s.flags.on_track = true;
        s
    }

    fn closed(o: SegmentOutcome) -> Arc<Lap> {
        match o {
            SegmentOutcome::LapClosed(lap) => lap,
            other => panic!("expected a closed lap, got {other:?}"),
        }
    }

    #[test]
    fn lap_numbers_drive_boundaries() {
        let mut seg = segmenter();
        let laps = [1, 1, 1, 2, 2, 3];
        let mut closed_laps = vec![];
        for (i, n) in laps.iter().enumerate() {
            let mut s = snap(i as i32 + 1, *n);
            if i == 3 {
                s.last_lap_ms = 91_234;
            }
            if let SegmentOutcome::LapClosed(lap) = seg.feed(s) {
                closed_laps.push(lap);
            }
        }
        assert_eq!(closed_laps.len(), 2);
        assert_eq!(closed_laps[0].meta.lap_number, 1);
        assert_eq!(closed_laps[0].finish_time_ms, Some(91_234));
        assert_eq!(closed_laps[0].points.len(), 3);
        assert_eq!(closed_laps[1].meta.lap_number, 2);
        assert!(closed_laps.iter().all(|l| l.valid));
        assert_eq!(seg.current_lap().map(|l| l.meta.lap_number), Some(3));
        assert_eq!(seg.history().len(), 2);
    }

    #[test]
    fn missing_last_lap_time_falls_back_to_ticks() {
        let mut seg = segmenter();
        seg.feed(snap(100, 1));
        let lap = closed(seg.feed(snap(160, 2)));
        assert_eq!(lap.finish_time_ms, Some(1000));
    }

    #[test]
    fn stale_packets_change_nothing() {
        let mut seg = segmenter();
        seg.feed(snap(10, 1));
        seg.feed(snap(11, 1));
        let rev = seg.revision();
        assert_eq!(seg.feed(snap(11, 2)), SegmentOutcome::Stale);
        assert_eq!(seg.feed(snap(5, 1)), SegmentOutcome::Stale);
        assert_eq!(seg.revision(), rev);
        assert_eq!(seg.current_lap().map(|l| l.points.len()), Some(2));
        assert!(seg.history().is_empty());
    }

    #[test]
    fn bad_magic_datagram_is_rejected_untouched() {
        let mut seg = segmenter();
        seg.feed(snap(1, 1));
        let rev = seg.revision();
        let mut raw = encode(&snap(2, 2), PacketVariant::Standard);
        raw[0x10] ^= 0xFF;
        raw[0x00] ^= 0xFF;
        assert!(matches!(seg.feed_datagram(&raw), Err(DecodeError::BadMagic { .. })));
        assert_eq!(seg.revision(), rev);
        assert!(seg.history().is_empty());

        let good = encode(&snap(2, 1), PacketVariant::Standard);
        assert_eq!(seg.feed_datagram(&good), Ok(SegmentOutcome::Recorded));
    }

    #[test]
    fn distance_comes_from_position() {
        let mut seg = segmenter();
        for id in 1..=5 {
            seg.feed(snap(id, 1));
        }
        let lap = seg.current_lap().unwrap();
        assert_eq!(lap.length_m(), 2.0);
        assert!((lap.elapsed_ms() - 4000.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn paused_snapshots_add_no_points() {
        let mut seg = segmenter();
        seg.feed(snap(1, 1));
        let mut paused = snap(2, 1);
        paused.flags.paused = true;
        assert_eq!(seg.feed(paused), SegmentOutcome::Skipped);
        seg.feed(snap(3, 1));
        assert_eq!(seg.current_lap().map(|l| l.points.len()), Some(2));
    }

    #[test]
    fn lap_zero_never_opens() {
        let mut seg = segmenter();
        assert_eq!(seg.feed(snap(1, 0)), SegmentOutcome::Skipped);
        assert!(!seg.is_recording());
    }

    #[test]
    fn joining_mid_lap_is_truncated() {
        let mut seg = segmenter();
        let mut s = snap(500, 3);
        s.speed_kph = 180.0;
        seg.feed(s);
        let lap = seg.current_lap().unwrap();
        assert!(!lap.valid);
        assert!(matches!(lap.anomaly, Some(LapAnomaly::TruncatedStart { .. })));
    }

    #[test]
    fn observed_lap_change_arms_a_clean_start() {
        let mut seg = segmenter();
        seg.feed(snap(1, 0));
        let mut s = snap(2, 1);
        s.speed_kph = 150.0;
        seg.feed(s);
        assert!(seg.current_lap().unwrap().valid);
    }

    #[test]
    fn replay_entered_from_menu_mid_lap_is_truncated() {
        let mut seg = segmenter();
        seg.feed(snap(1, 0));
        for id in 2..32 {
            let mut s = snap(id, 5);
            s.speed_kph = 220.0;
            seg.feed(s);
        }
        let lap = seg.current_lap().unwrap();
        assert!(!lap.valid);
        assert_eq!(lap.anomaly, Some(LapAnomaly::TruncatedStart { speed_kph: 220.0 }));
    }

    #[test]
    fn clean_start_lap_limit_is_configurable() {
        let cfg = EngineConfig {
            validity: ValidityPolicy { max_clean_start_lap: 5, ..ValidityPolicy::default() },
            ..EngineConfig::default()
        };
        let mut seg = Segmenter::from_config(&cfg);
        seg.feed(snap(1, 0));
        let mut s = snap(2, 5);
        s.speed_kph = 220.0;
        seg.feed(s);
        assert!(seg.current_lap().unwrap().valid);
    }

    #[test]
    fn skipped_lap_number_while_idle_is_not_a_clean_start() {
        let mut seg = segmenter();
        let mut s = snap(1, 2);
        s.flags.on_track = false;
        seg.feed(s);
        let mut s = snap(2, 4);
        s.speed_kph = 150.0;
        seg.feed(s);
        assert!(!seg.current_lap().unwrap().valid);
    }

    // a 2 km circle driven at 8 m per tick, 250 ticks per lap
    fn on_circle(packet_id: i32, lap: i16) -> Snapshot {
        let r = 2000.0 / std::f64::consts::TAU;
        let theta = (packet_id - 1) as f64 * std::f64::consts::TAU / 250.0;
        let mut s = snap(packet_id, lap);
        s.position = [(r * theta.cos()) as f32, 0.0, (r * theta.sin()) as f32];
        s
    }

    #[test]
    fn returning_to_start_closes_lap_without_lap_number() {
        let mut seg = segmenter();
        let mut closed_laps = vec![];
        for id in 1..=520 {
            if let SegmentOutcome::LapClosed(lap) = seg.feed(on_circle(id, 1)) {
                closed_laps.push((id, lap));
            }
        }
        assert_eq!(closed_laps.len(), 2);
        assert_eq!(closed_laps[0].0, 252);
        for (_, lap) in &closed_laps {
            assert!(lap.valid);
            assert!((lap.length_m() - 2000.0).abs() < 20.0, "length {}", lap.length_m());
            assert_eq!(lap.meta.lap_number, 1);
        }
        assert_eq!(closed_laps[0].1.finish_time_ms, Some(4183));
        assert!(seg.current_lap().unwrap().valid);
    }

    #[test]
    fn lap_numbers_win_at_the_line() {
        let mut seg = segmenter();
        let mut numbers = vec![];
        for id in 1..=600 {
            let lap = 1 + ((id - 1) / 250) as i16;
            if let SegmentOutcome::LapClosed(l) = seg.feed(on_circle(id, lap)) {
                numbers.push(l.meta.lap_number);
            }
        }
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(seg.current_lap().unwrap().meta.lap_number, 3);
    }

    #[test]
    fn late_lap_number_renames_looped_lap() {
        let mut seg = segmenter();
        for id in 1..=255 {
            seg.feed(on_circle(id, 1));
        }
        assert_eq!(seg.history().len(), 1);
        for id in 256..=300 {
            assert!(!matches!(seg.feed(on_circle(id, 2)), SegmentOutcome::LapClosed(_)));
        }
        assert_eq!(seg.history().len(), 1);
        let lap = seg.current_lap().unwrap();
        assert_eq!(lap.meta.lap_number, 2);
        assert!(lap.valid);
    }

    #[test]
    fn zero_radius_disables_position_close() {
        let cfg = EngineConfig {
            segmenter: SegmenterConfig { loop_close_radius_m: 0.0, ..SegmenterConfig::default() },
            ..EngineConfig::default()
        };
        let mut seg = Segmenter::from_config(&cfg);
        for id in 1..=520 {
            seg.feed(on_circle(id, 1));
        }
        assert!(seg.history().is_empty());
    }

    #[test]
    fn early_jump_is_a_discontinuity() {
        let mut seg = segmenter();
        seg.feed(snap(1, 1));
        seg.feed(snap(2, 1));
        let mut teleport = snap(3, 1);
        teleport.position = [400.0, 0.0, 0.0];
        seg.feed(teleport);
        let lap = seg.current_lap().unwrap();
        assert!(!lap.valid);
        match &lap.anomaly {
            Some(LapAnomaly::Discontinuity { index, .. }) => assert_eq!(*index, 2),
            other => panic!("unexpected anomaly {other:?}"),
        }
    }

    #[test]
    fn late_jump_is_tolerated() {
        let mut seg = segmenter();
        for id in 1..=20 {
            seg.feed(snap(id, 1));
        }
        let mut teleport = snap(21, 1);
        teleport.position = [400.0, 0.0, 0.0];
        seg.feed(teleport);
        assert!(seg.current_lap().unwrap().valid);
    }

    #[test]
    fn packet_gap_scales_thresholds() {
        let mut seg = segmenter();
        seg.feed(snap(1, 1));
        let mut s = snap(5, 1);
        s.position = [30.0, 0.0, 0.0];
        seg.feed(s);
        assert!(seg.current_lap().unwrap().valid);
    }

    #[test]
    fn lap_number_drop_abandons_lap() {
        let mut seg = segmenter();
        seg.feed(snap(1, 2));
        seg.feed(snap(2, 2));
        let lap = closed(seg.feed(snap(3, 0)));
        assert!(!lap.valid);
        assert_eq!(lap.finish_time_ms, None);
        assert_eq!(lap.anomaly, Some(LapAnomaly::Abandoned { from_lap: 2, to_lap: 0 }));
        assert!(!seg.is_recording());

        // restart from the grid
        let mut s = snap(4, 1);
        s.speed_kph = 60.0;
        seg.feed(s);
        assert!(seg.current_lap().unwrap().valid);
    }

    #[test]
    fn reported_distance_reset_closes_lap() {
        let mut seg = segmenter();
        for (id, d) in [(1, 0.0), (2, 300.0), (3, 620.0)] {
            let mut s = snap(id, 1);
            s.lap_distance_m = Some(d);
            seg.feed(s);
        }
        let mut s = snap(4, 1);
        s.lap_distance_m = Some(3.0);
        let lap = closed(seg.feed(s));
        assert_eq!(lap.finish_time_ms, Some(50));
        assert_eq!(lap.length_m(), 620.0);
        assert!(seg.current_lap().unwrap().valid);
    }

    #[test]
    fn manual_finish_then_fresh_lap() {
        let mut seg = segmenter();
        for id in 1..=61 {
            seg.feed(snap(id, 1));
        }
        let lap = seg.finish_lap_now().unwrap();
        assert!(lap.manual);
        assert_eq!(lap.finish_time_ms, Some(1000));
        assert!(!seg.is_recording());
        assert!(seg.finish_lap_now().is_none());

        let mut s = snap(62, 1);
        s.speed_kph = 200.0;
        seg.feed(s);
        assert!(seg.current_lap().unwrap().valid);
    }

    #[test]
    fn reset_keeps_watermark() {
        let mut seg = segmenter();
        seg.feed(snap(1, 1));
        seg.feed(snap(2, 2));
        seg.reset();
        assert!(seg.history().is_empty());
        assert!(!seg.is_recording());
        assert_eq!(seg.stats(), &SessionStats::default());
        assert_eq!(seg.feed(snap(2, 2)), SegmentOutcome::Stale);
    }

    #[test]
    fn session_stats_follow_recorded_ticks() {
        let mut seg = segmenter();
        let mut a = snap(1, 1);
        a.speed_kph = 3.0;
        a.best_lap_ms = 88_000;
        let mut b = snap(2, 1);
        b.speed_kph = 20.0;
        b.body_height_mm = 65.0;
        seg.feed(a);
        seg.feed(b);
        let st = seg.stats();
        assert_eq!(st.max_speed_kph, 20.0);
        assert_eq!(st.min_body_height_mm, Some(65.0));
        assert_eq!(st.best_lap_ms, Some(88_000));
        assert_eq!(seg.fuel_level(), Some(50.0));
    }

    #[test]
    fn load_laps_appends_or_replaces() {
        let mut seg = segmenter();
        seg.feed(snap(1, 1));
        seg.feed(snap(2, 2));
        let before = seg.history_revision();
        seg.load_laps(vec![Lap::new(7, 0, 0), Lap::new(8, 0, 0)], false);
        assert_eq!(seg.history().len(), 3);
        assert_eq!(seg.history().get(0).map(|l| l.meta.lap_number), Some(8));
        seg.load_laps(vec![Lap::new(9, 0, 0)], true);
        assert_eq!(seg.history().len(), 1);
        assert!(seg.history_revision() > before);
    }
}
