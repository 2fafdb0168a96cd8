//! Device profiles: per-family raw code tables and stick normalization.
//!
//! A profile is selected once at startup from the device family and turns
//! every raw event coming out of the collector into a [`Classified`] event
//! expressed in the logical vocabulary the peer understands.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::event_collector::RawEvent;
use super::vector::{unit_range, StickSample};

/// Full scale of a signed 16 bit stick axis.
pub const AXIS_MAX: f32 = 32767.0;

/// Logical buttons, numbered by their wire ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LogicalKey {
    Unknown = 0,
    Y = 1,
    B = 2,
    A = 3,
    X = 4,
    Up = 5,
    Right = 6,
    Down = 7,
    Left = 8,
    Start = 9,
    Select = 10,
    Lb = 11,
    Lt = 12,
    Rb = 13,
    Rt = 14,
    Home = 15,
    RStick = 16,
    LStick = 17,
}

impl LogicalKey {
    pub const ALL: [LogicalKey; 18] = [
        LogicalKey::Unknown,
        LogicalKey::Y,
        LogicalKey::B,
        LogicalKey::A,
        LogicalKey::X,
        LogicalKey::Up,
        LogicalKey::Right,
        LogicalKey::Down,
        LogicalKey::Left,
        LogicalKey::Start,
        LogicalKey::Select,
        LogicalKey::Lb,
        LogicalKey::Lt,
        LogicalKey::Rb,
        LogicalKey::Rt,
        LogicalKey::Home,
        LogicalKey::RStick,
        LogicalKey::LStick,
    ];

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.get(usize::from(ordinal)).copied()
    }
}

// Joystick type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoystickType {
    Left,
    Right,
}

// Stick component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StickAxis {
    X,
    Y,
}

// Trigger type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerType {
    Left,
    Right,
}

impl TriggerType {
    pub fn key(self) -> LogicalKey {
        match self {
            TriggerType::Left => LogicalKey::Lt,
            TriggerType::Right => LogicalKey::Rt,
        }
    }
}

/// Result of running a raw event through a profile
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Classified {
    Key { key: LogicalKey, pressed: bool },
    Trigger { trigger: TriggerType, value: i32 },
    Stick { stick: JoystickType, axis: StickAxis, value: f32 },
    Ignored,
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("Raw code {code} is mapped to both {first:?} and {second:?}")]
    DuplicateCode {
        code: u16,
        first: LogicalKey,
        second: LogicalKey,
    },

    #[error("Unknown device family: {0}")]
    UnknownFamily(String),

    #[error("Deadzone {0} is outside [0, 1)")]
    InvalidDeadzone(f32),
}

/// Supported controller families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    /// Xbox 360 pads driven by xpad
    Xbox360,
    /// Left and right Joy-Con paired into one device by joycond
    Joycons,
}

impl DeviceFamily {
    /// Picks the family from an evdev device name.
    pub fn detect(device_name: &str) -> Option<Self> {
        if device_name.contains("Combined Joy-Cons") {
            Some(DeviceFamily::Joycons)
        } else if device_name.contains("Xbox 360") {
            Some(DeviceFamily::Xbox360)
        } else {
            None
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceFamily::Xbox360 => write!(f, "xbox360"),
            DeviceFamily::Joycons => write!(f, "joycons"),
        }
    }
}

impl FromStr for DeviceFamily {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xbox360" | "xbox 360" => Ok(DeviceFamily::Xbox360),
            "joycons" | "joy-cons" | "combined joy-cons" => Ok(DeviceFamily::Joycons),
            _ => Err(ProfileError::UnknownFamily(s.to_string())),
        }
    }
}

/// Which raw absolute axis codes feed which logical stick component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisLayout {
    pub left_x: u16,
    pub left_y: u16,
    pub right_x: u16,
    pub right_y: u16,
    /// Analog trigger axes, only for families that report triggers as axes
    pub left_trigger: Option<u16>,
    pub right_trigger: Option<u16>,
}

impl Default for AxisLayout {
    fn default() -> Self {
        // ABS_X, ABS_Y, ABS_RX, ABS_RY
        Self {
            left_x: 0,
            left_y: 1,
            right_x: 3,
            right_y: 4,
            left_trigger: None,
            right_trigger: None,
        }
    }
}

const XBOX360_KEYS: &[(u16, LogicalKey)] = &[
    (308, LogicalKey::Y),
    (305, LogicalKey::B),
    (304, LogicalKey::A),
    (307, LogicalKey::X),
    (706, LogicalKey::Up),
    (705, LogicalKey::Right),
    (707, LogicalKey::Down),
    (704, LogicalKey::Left),
    (315, LogicalKey::Start),
    (314, LogicalKey::Select),
    (310, LogicalKey::Lb),
    (311, LogicalKey::Rb),
    (316, LogicalKey::Home),
    (318, LogicalKey::RStick),
    (317, LogicalKey::LStick),
];

const JOYCONS_KEYS: &[(u16, LogicalKey)] = &[
    (307, LogicalKey::Y),
    (305, LogicalKey::B),
    (304, LogicalKey::A),
    (308, LogicalKey::X),
    (545, LogicalKey::Up),
    (547, LogicalKey::Right),
    (544, LogicalKey::Down),
    (546, LogicalKey::Left),
    (315, LogicalKey::Start),
    (314, LogicalKey::Select),
    (310, LogicalKey::Lb),
    (312, LogicalKey::Lt),
    (311, LogicalKey::Rb),
    (313, LogicalKey::Rt),
    (316, LogicalKey::Home),
    (318, LogicalKey::RStick),
    (317, LogicalKey::LStick),
];

/// Mapping and calibration data for one controller family.
///
/// Immutable once built. Construction rejects tables that assign two
/// different logical keys to the same raw code.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    family: DeviceFamily,
    deadzone: f32,
    layout: AxisLayout,
    mapping: HashMap<u16, LogicalKey>,
}

impl DeviceProfile {
    /// Builds the stock profile of a family.
    pub fn for_family(family: DeviceFamily) -> Result<Self, ProfileError> {
        match family {
            DeviceFamily::Xbox360 => Self::from_table(
                family,
                0.43,
                AxisLayout {
                    left_trigger: Some(2),
                    right_trigger: Some(5),
                    ..AxisLayout::default()
                },
                XBOX360_KEYS,
            ),
            DeviceFamily::Joycons => {
                Self::from_table(family, 0.10, AxisLayout::default(), JOYCONS_KEYS)
            }
        }
    }

    pub fn from_table(
        family: DeviceFamily,
        deadzone: f32,
        layout: AxisLayout,
        table: &[(u16, LogicalKey)],
    ) -> Result<Self, ProfileError> {
        if !(0.0..1.0).contains(&deadzone) {
            return Err(ProfileError::InvalidDeadzone(deadzone));
        }

        let mut mapping = HashMap::with_capacity(table.len());
        for &(code, key) in table {
            if let Some(first) = mapping.insert(code, key) {
                if first != key {
                    return Err(ProfileError::DuplicateCode {
                        code,
                        first,
                        second: key,
                    });
                }
            }
        }

        Ok(Self {
            family,
            deadzone,
            layout,
            mapping,
        })
    }

    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    pub fn deadzone(&self) -> f32 {
        self.deadzone
    }

    pub fn layout(&self) -> &AxisLayout {
        &self.layout
    }

    /// Logical key for a raw key code, `Unknown` when unmapped.
    pub fn key_for(&self, code: u16) -> LogicalKey {
        self.mapping.get(&code).copied().unwrap_or(LogicalKey::Unknown)
    }

    pub fn classify(&self, event: &RawEvent) -> Classified {
        match *event {
            RawEvent::Key { code, pressed, .. } => Classified::Key {
                key: self.key_for(code),
                pressed,
            },
            RawEvent::Axis { code, value, .. } => self.classify_axis(code, value),
            RawEvent::Sync | RawEvent::Other { .. } => Classified::Ignored,
        }
    }

    fn classify_axis(&self, code: u16, value: i32) -> Classified {
        // Triggers keep their raw 0..255 value and sign
        if self.layout.left_trigger == Some(code) {
            return Classified::Trigger {
                trigger: TriggerType::Left,
                value,
            };
        }
        if self.layout.right_trigger == Some(code) {
            return Classified::Trigger {
                trigger: TriggerType::Right,
                value,
            };
        }

        let (stick, axis) = if code == self.layout.left_x {
            (JoystickType::Left, StickAxis::X)
        } else if code == self.layout.left_y {
            (JoystickType::Left, StickAxis::Y)
        } else if code == self.layout.right_x {
            (JoystickType::Right, StickAxis::X)
        } else if code == self.layout.right_y {
            (JoystickType::Right, StickAxis::Y)
        } else {
            debug!("Ignoring unassigned axis code {}", code);
            return Classified::Ignored;
        };

        // Up is positive on the wire, evdev reports it negative
        let oriented = match axis {
            StickAxis::X => value,
            StickAxis::Y => value.saturating_neg(),
        };

        Classified::Stick {
            stick,
            axis,
            value: self.normalize(oriented),
        }
    }

    /// Maps a raw axis sample linearly onto [-1.0, 1.0].
    pub fn normalize(&self, raw: i32) -> f32 {
        unit_range(raw as f32 / AXIS_MAX)
    }

    /// Snaps samples inside the deadzone to zero and rescales the rest so
    /// the deadzone edge maps to 0 and the unit circle to 1, keeping the
    /// direction.
    pub fn remove_deadzone(&self, sample: StickSample) -> StickSample {
        let h = sample.magnitude();

        // Also covers h == 0 since the deadzone is never negative
        if h <= self.deadzone {
            return StickSample::ZERO;
        }

        let in_zone = (h - self.deadzone) / (1.0 - self.deadzone);
        let scale = in_zone / h;

        StickSample::new(unit_range(sample.x * scale), unit_range(sample.y * scale))
    }
}
