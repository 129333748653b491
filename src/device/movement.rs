use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use serde::Serialize;

use crate::device::decoder::{Axes, MotionSample};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    X,
    Y,
    Z,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementEvent {
    pub timestamp: SystemTime,
    pub dominant_axis: Axis,
    pub magnitude: f64,
}

/// Movement figures attached to every stored motion sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MovementReading {
    pub detected: bool,
    pub magnitude: f64,
    pub delta: f64,
}

/// Shared, bounded history of movement events; the oldest is evicted first.
#[derive(Debug, Clone)]
pub struct MovementHistory {
    events: Arc<Mutex<VecDeque<MovementEvent>>>,
    capacity: usize,
}

impl MovementHistory {
    pub fn new(capacity: usize) -> Self {
        MovementHistory {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, event: MovementEvent) {
        if self.capacity == 0 {
            return;
        }

        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn snapshot(&self) -> Vec<MovementEvent> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.iter().copied().collect()
    }
}

pub struct MovementTracker {
    threshold: f64,
    previous: Option<Axes>,
    history: MovementHistory,
}

impl MovementTracker {
    pub fn new(threshold: f64, history: MovementHistory) -> Self {
        MovementTracker { threshold, previous: None, history }
    }

    /// Returns `None` for samples that should not feed movement detection (invalid or suspect).
    pub fn observe(&mut self, sample: &MotionSample, timestamp: SystemTime) -> Option<(MovementReading, Option<MovementEvent>)> {
        if !sample.is_valid || sample.is_suspect {
            return None;
        }
        let axes = sample.primary?.axes;
        let magnitude = magnitude(&axes);

        let previous = match self.previous.replace(axes) {
            Some(previous) => previous,
            None => return Some((MovementReading { detected: false, magnitude, delta: 0.0 }, None)),
        };

        let delta = (magnitude - self::magnitude(&previous)).abs();
        let detected = delta >= self.threshold;
        let reading = MovementReading { detected, magnitude, delta };

        if !detected {
            return Some((reading, None));
        }

        let event = MovementEvent {
            timestamp,
            dominant_axis: dominant_axis(&previous, &axes),
            magnitude,
        };
        self.history.push(event);
        Some((reading, Some(event)))
    }
}

fn magnitude(axes: &Axes) -> f64 {
    let (x, y, z) = (axes.x as f64, axes.y as f64, axes.z as f64);
    (x * x + y * y + z * z).sqrt()
}

fn dominant_axis(previous: &Axes, current: &Axes) -> Axis {
    let dx = (current.x - previous.x).abs();
    let dy = (current.y - previous.y).abs();
    let dz = (current.z - previous.z).abs();

    if dx >= dy && dx >= dz {
        Axis::X
    } else if dy >= dz {
        Axis::Y
    } else {
        Axis::Z
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::decoder::decode_motion;

    fn tracker(capacity: usize) -> (MovementTracker, MovementHistory) {
        let history = MovementHistory::new(capacity);
        (MovementTracker::new(8.0, history.clone()), history)
    }

    #[test]
    fn first_sample_has_no_delta() {
        let (mut tracker, history) = tracker(4);
        let (reading, event) = tracker.observe(&decode_motion(&[3, 4, 0, 0]), SystemTime::now()).unwrap();

        assert_eq!(reading, MovementReading { detected: false, magnitude: 5.0, delta: 0.0 });
        assert!(event.is_none());
        assert!(history.snapshot().is_empty());
    }

    #[test]
    fn large_changes_are_movements() {
        let (mut tracker, history) = tracker(4);
        tracker.observe(&decode_motion(&[1, 1, 1, 0]), SystemTime::now());

        let (small, event) = tracker.observe(&decode_motion(&[2, 1, 1, 0]), SystemTime::now()).unwrap();
        assert!(!small.detected);
        assert!(event.is_none());

        let (big, event) = tracker.observe(&decode_motion(&[2, 1, 40, 0]), SystemTime::now()).unwrap();
        assert!(big.detected);
        assert!(big.delta >= 8.0);
        assert_eq!(event.unwrap().dominant_axis, Axis::Z);
        assert_eq!(history.snapshot().len(), 1);
    }

    #[test]
    fn suspect_and_invalid_samples_are_ignored() {
        let (mut tracker, _) = tracker(4);
        assert!(tracker.observe(&decode_motion(&[0, 0, 0, 0]), SystemTime::now()).is_none());
        assert!(tracker.observe(&decode_motion(&[0; 6]), SystemTime::now()).is_none());
        assert!(tracker.observe(&decode_motion(&[1, 2, 3]), SystemTime::now()).is_none());
    }

    #[test]
    fn history_evicts_oldest_first() {
        let (mut tracker, history) = tracker(2);
        tracker.observe(&decode_motion(&[0, 0, 1, 0]), SystemTime::now());
        for x in [20, 40, 60] {
            tracker.observe(&decode_motion(&[x, 0, 1, 0]), SystemTime::now());
        }

        let events = history.snapshot();
        assert_eq!(events.len(), 2);
        assert!(events[0].magnitude < events[1].magnitude);
        assert!((events[1].magnitude - 60.0).abs() < 0.01);
    }

    #[test]
    fn zero_capacity_history_keeps_nothing() {
        let (mut tracker, history) = tracker(0);
        tracker.observe(&decode_motion(&[0, 0, 1, 0]), SystemTime::now());
        for x in [20, 40, 60] {
            let (reading, event) = tracker.observe(&decode_motion(&[x, 0, 1, 0]), SystemTime::now()).unwrap();
            assert!(reading.detected);
            assert!(event.is_some());
        }

        assert!(history.snapshot().is_empty());
    }
}
