//! Analog trigger to button conversion with hysteresis.

use super::profile::TriggerType;

/// Raw value at or above which a released trigger becomes pressed.
pub const TRIGGER_EDGE_HIGH: i32 = 180;
/// Raw value at or below which a pressed trigger becomes released.
pub const TRIGGER_EDGE_LOW: i32 = 60;

/// Press or release produced by a threshold crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEdge {
    Pressed,
    Released,
}

#[derive(Debug, Clone)]
pub struct TriggerEdgeDetector {
    high: i32,
    low: i32,
    pressed: [bool; 2],
}

impl Default for TriggerEdgeDetector {
    fn default() -> Self {
        Self::new(TRIGGER_EDGE_HIGH, TRIGGER_EDGE_LOW)
    }
}

impl TriggerEdgeDetector {
    pub fn new(high: i32, low: i32) -> Self {
        debug_assert!(high > low, "press threshold must sit above release");
        Self {
            high,
            low,
            pressed: [false; 2],
        }
    }

    fn slot(trigger: TriggerType) -> usize {
        match trigger {
            TriggerType::Left => 0,
            TriggerType::Right => 1,
        }
    }

    pub fn is_pressed(&self, trigger: TriggerType) -> bool {
        self.pressed[Self::slot(trigger)]
    }

    /// Feeds one raw sample, returning an edge only on a threshold crossing.
    pub fn update(&mut self, trigger: TriggerType, value: i32) -> Option<TriggerEdge> {
        let latch = &mut self.pressed[Self::slot(trigger)];

        if !*latch && value >= self.high {
            *latch = true;
            Some(TriggerEdge::Pressed)
        } else if *latch && value <= self.low {
            *latch = false;
            Some(TriggerEdge::Released)
        } else {
            None
        }
    }
}
