//! Change tracking for the two analog sticks.
//!
//! Raw per-axis updates below a minimum delta are treated as noise. Accepted
//! updates mark the stick dirty; the dispatcher later asks for the pending
//! value, which is only handed out when its deadzone-removed form differs
//! from what was last transmitted.

use tracing::debug;

use super::profile::{DeviceProfile, JoystickType, StickAxis};
use super::vector::StickSample;

/// Default smallest per-axis change that counts as signal.
pub const DEFAULT_MIN_DELTA: f32 = 0.015;

#[derive(Debug, Clone, Default)]
struct StickChangeState {
    live: StickSample,
    dirty: bool,
    last_sent: StickSample,
}

#[derive(Debug, Clone)]
pub struct StickTracker {
    min_delta: f32,
    left: StickChangeState,
    right: StickChangeState,
}

impl Default for StickTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DELTA)
    }
}

impl StickTracker {
    pub fn new(min_delta: f32) -> Self {
        Self {
            min_delta,
            left: StickChangeState::default(),
            right: StickChangeState::default(),
        }
    }

    fn state(&self, stick: JoystickType) -> &StickChangeState {
        match stick {
            JoystickType::Left => &self.left,
            JoystickType::Right => &self.right,
        }
    }

    fn state_mut(&mut self, stick: JoystickType) -> &mut StickChangeState {
        match stick {
            JoystickType::Left => &mut self.left,
            JoystickType::Right => &mut self.right,
        }
    }

    /// Stores a normalized component if it moved by at least the minimum
    /// delta. Returns whether the sample was accepted.
    pub fn update(&mut self, stick: JoystickType, axis: StickAxis, value: f32) -> bool {
        let min_delta = self.min_delta;
        let state = self.state_mut(stick);
        let current = match axis {
            StickAxis::X => &mut state.live.x,
            StickAxis::Y => &mut state.live.y,
        };

        if (value - *current).abs() < min_delta {
            return false;
        }

        *current = value;
        state.dirty = true;
        true
    }

    pub fn is_dirty(&self, stick: JoystickType) -> bool {
        self.state(stick).dirty
    }

    pub fn any_dirty(&self) -> bool {
        self.left.dirty || self.right.dirty
    }

    /// Raw live sample, before deadzone removal.
    pub fn live(&self, stick: JoystickType) -> StickSample {
        self.state(stick).live
    }

    /// Hands out the deadzone-removed sample when it differs from the last
    /// transmitted one, recording it as transmitted.
    ///
    /// The dirty flag is cleared only when something is returned.
    pub fn take_pending_if_changed(
        &mut self,
        stick: JoystickType,
        profile: &DeviceProfile,
    ) -> Option<StickSample> {
        let state = self.state_mut(stick);
        let value = profile.remove_deadzone(state.live);

        if value == state.last_sent {
            debug!("{:?} stick moved inside the same output value", stick);
            return None;
        }

        state.last_sent = value;
        state.dirty = false;
        Some(value)
    }
}
