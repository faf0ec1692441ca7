use std::sync::Arc;

use analysis::{self as an, AnalysisError, DistanceGrid};
use model::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::IngestCounters;

/// Which closed lap a query refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LapSelection {
    /// Most recently closed.
    Last,
    /// Fastest valid completed lap.
    Best,
    /// `0` is the most recent.
    Index(usize),
    Id(#[serde(with = "uuid::serde::simple")] Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("not enough valid laps")]
    InsufficientData,
    #[error("no lap matches {0:?}")]
    UnknownLap(LapSelection),
    #[error("brake point detection is disabled")]
    BrakePointsDisabled,
}

impl From<AnalysisError> for QueryError {
    fn from(e: AnalysisError) -> Self {
        match e {
            AnalysisError::InsufficientData => QueryError::InsufficientData,
        }
    }
}

/// Immutable state published by the engine. Readers hold an `Arc` to one
/// of these and never see a lap change underneath them.
#[derive(Debug, Clone)]
pub struct LapView {
    pub revision: u64,
    pub history_revision: u64,
    pub current: Option<Arc<Lap>>,
    /// Most recent first.
    pub laps: Arc<Vec<Arc<Lap>>>,
    pub stats: SessionStats,
    pub fuel_level: Option<f64>,
    pub counters: IngestCounters,
    pub config: Arc<EngineConfig>,
}

impl LapView {
    pub fn empty(config: Arc<EngineConfig>) -> Self {
        Self {
            revision: 0,
            history_revision: 0,
            current: None,
            laps: Arc::new(Vec::new()),
            stats: SessionStats::default(),
            fuel_level: None,
            counters: IngestCounters::default(),
            config,
        }
    }

    pub fn current_lap(&self) -> Option<Arc<Lap>> {
        self.current.clone()
    }

    pub fn laps(&self) -> &[Arc<Lap>] {
        &self.laps
    }

    pub fn lap(&self, sel: LapSelection) -> Result<Arc<Lap>, QueryError> {
        let found = match sel {
            LapSelection::Last => {
                return self.laps.first().cloned().ok_or(QueryError::InsufficientData)
            }
            LapSelection::Best => {
                return self
                    .laps
                    .iter()
                    .filter(|l| l.valid)
                    .filter_map(|l| l.finish_time_ms.map(|t| (t, l)))
                    .min_by_key(|(t, _)| *t)
                    .map(|(_, l)| l.clone())
                    .ok_or(QueryError::InsufficientData)
            }
            LapSelection::Index(i) => self.laps.get(i),
            LapSelection::Id(id) => self.laps.iter().find(|l| l.id == id),
        };
        found.cloned().ok_or(QueryError::UnknownLap(sel))
    }

    fn step(&self) -> f64 {
        self.config.grid_step_m
    }

    pub fn profile(&self, sel: LapSelection, metric: Metric) -> Result<Profile, QueryError> {
        let lap = self.lap(sel)?;
        let grid = DistanceGrid::for_laps([lap.as_ref()], self.step());
        Ok(an::build_profile(&lap, metric, &grid))
    }

    pub fn median(&self, metric: Metric) -> Result<Profile, QueryError> {
        let laps = self.laps.iter().map(|l| l.as_ref());
        Ok(an::median_profile(laps, metric, self.step(), &self.config.median)?)
    }

    pub fn peak_valley(
        &self,
        reference: LapSelection,
        comparison: LapSelection,
    ) -> Result<Vec<PeakValleyRow>, QueryError> {
        let (r, c) = (self.lap(reference)?, self.lap(comparison)?);
        let grid = DistanceGrid::for_laps([r.as_ref(), c.as_ref()], self.step());
        Ok(an::peak_valley_table(
            &an::build_profile(&r, Metric::Speed, &grid),
            &an::build_profile(&c, Metric::Speed, &grid),
            &self.config.peak_valley,
        ))
    }

    pub fn brake_points(&self, sel: LapSelection) -> Result<Vec<BrakePoint>, QueryError> {
        if !self.config.brake_points {
            return Err(QueryError::BrakePointsDisabled);
        }
        Ok(an::brake_points(&*self.lap(sel)?, &self.config.brake))
    }

    /// Projections for the standard mixture range from the current tank.
    pub fn fuel_projection(&self) -> Result<Vec<FuelProjection>, QueryError> {
        let fuel = self.fuel_level.ok_or(QueryError::InsufficientData)?;
        let recent = self
            .laps
            .iter()
            .filter(|l| l.valid && l.is_complete())
            .take(self.config.fuel_laps.max(1))
            .map(|l| l.as_ref());
        Ok(an::project(fuel, recent, &FuelMap::standard_range())?)
    }

    pub fn time_delta(
        &self,
        reference: LapSelection,
        comparison: LapSelection,
    ) -> Result<Profile, QueryError> {
        let (r, c) = (self.lap(reference)?, self.lap(comparison)?);
        Ok(an::time_delta_by_distance(&r, &c, self.step()))
    }

    pub fn lap_table(&self) -> Vec<LapTableRow> {
        an::lap_table(self.laps.iter().map(|l| l.as_ref()), self.stats.best_lap_ms)
    }

    /// Chart rows for `metric` over the selected laps, one column per lap.
    pub fn overlay(&self, selections: &[LapSelection], metric: Metric) -> Result<Value, QueryError> {
        let laps = selections
            .iter()
            .map(|s| self.lap(*s))
            .collect::<Result<Vec<_>, _>>()?;
        let grid = DistanceGrid::for_laps(laps.iter().map(|l| l.as_ref()), self.step());
        let labelled: Vec<(String, Profile)> = laps
            .iter()
            .map(|l| (format!("{}_{}", metric, l.id.simple()), an::build_profile(l, metric, &grid)))
            .collect();
        let series: Vec<(&str, &Profile)> = labelled.iter().map(|(k, p)| (k.as_str(), p)).collect();
        Ok(an::overlay_profiles(&series))
    }
}
