use std::collections::VecDeque;
use std::sync::Arc;

use model::Lap;
use uuid::Uuid;

/// Closed laps, newest first, bounded. The oldest lap is evicted once the
/// ring is full.
#[derive(Debug, Clone)]
pub struct LapHistory {
    laps: VecDeque<Arc<Lap>>,
    capacity: usize,
}

impl LapHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { laps: VecDeque::with_capacity(capacity.min(1024)), capacity }
    }

    /// Returns the evicted lap, if any.
    pub fn push(&mut self, lap: Arc<Lap>) -> Option<Arc<Lap>> {
        self.laps.push_front(lap);
        if self.laps.len() > self.capacity {
            self.laps.pop_back()
        } else {
            None
        }
    }

    /// Most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Lap>> + '_ {
        self.laps.iter()
    }

    /// `0` is the most recent lap.
    pub fn get(&self, index: usize) -> Option<&Arc<Lap>> {
        self.laps.get(index)
    }

    pub fn find(&self, id: Uuid) -> Option<&Arc<Lap>> {
        self.laps.iter().find(|l| l.id == id)
    }

    pub fn len(&self) -> usize {
        self.laps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.laps.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.laps.clear();
    }

    /// Swap the contents for `laps`, given oldest first.
    pub fn replace(&mut self, laps: impl IntoIterator<Item = Arc<Lap>>) {
        self.laps.clear();
        for lap in laps {
            self.push(lap);
        }
    }

    pub fn to_vec(&self) -> Vec<Arc<Lap>> {
        self.laps.iter().cloned().collect()
    }
}
