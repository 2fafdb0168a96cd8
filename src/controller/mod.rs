//! Controller subsystem: raw gamepad input to logical events
//!
//! 1. [`event_collector`] - Device detection and raw evdev reading
//! 2. [`profile`] - Per-family code tables, normalization and deadzone
//! 3. [`stick_tracker`] / [`trigger`] - Change detection for analog inputs
//!
//! # Architecture
//!
//! ```text
//! evdev ──► Collector ──► Profile ──┬─► StickTracker
//!          (own thread)  (classify) └─► TriggerEdgeDetector
//! ```

pub mod event_collector;
pub mod profile;
pub mod stick_tracker;
pub mod trigger;
pub mod vector;

pub use event_collector::{CollectorError, CollectorHandle, CollectorSettings, RawEvent};
pub use profile::{DeviceFamily, DeviceProfile, JoystickType, LogicalKey, TriggerType};
