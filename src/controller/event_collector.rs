use std::path::PathBuf;
use std::thread;

use chrono::{DateTime, Local};
use evdev::{Device, EventType, InputEvent};
use statum::{machine, state};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::profile::DeviceFamily;

// Raw input event as read from the device, with a chrono timestamp
#[derive(Debug, Clone)]
pub enum RawEvent {
    Key {
        code: u16,
        pressed: bool,
        timestamp: DateTime<Local>,
    },
    Axis {
        code: u16,
        value: i32,
        timestamp: DateTime<Local>,
    },
    Sync,
    Other {
        kind: u16,
    },
}

impl RawEvent {
    /// Builds a typed event from the evdev (type, code, value) triple.
    pub fn from_parts(kind: EventType, code: u16, value: i32) -> Self {
        let timestamp = Local::now();
        match kind {
            // Autorepeat (2) still counts as held
            EventType::KEY => RawEvent::Key {
                code,
                pressed: value != 0,
                timestamp,
            },
            EventType::ABSOLUTE => RawEvent::Axis {
                code,
                value,
                timestamp,
            },
            EventType::SYNCHRONIZATION => RawEvent::Sync,
            other => RawEvent::Other { kind: other.0 },
        }
    }

    /// Time between reading the event off the device and `now`, for
    /// timestamped events.
    pub fn latency(&self, now: DateTime<Local>) -> Option<chrono::Duration> {
        match self {
            RawEvent::Key { timestamp, .. } | RawEvent::Axis { timestamp, .. } => {
                Some(now.signed_duration_since(*timestamp))
            }
            RawEvent::Sync | RawEvent::Other { .. } => None,
        }
    }
}

impl From<InputEvent> for RawEvent {
    fn from(event: InputEvent) -> Self {
        RawEvent::from_parts(event.event_type(), event.code(), event.value())
    }
}

// Collector settings
#[derive(Clone, Debug, Default)]
pub struct CollectorSettings {
    /// Open this device node instead of scanning /dev/input
    pub device_path: Option<PathBuf>,
    /// Use this family's profile regardless of the device name
    pub forced_family: Option<DeviceFamily>,
}

// Collector errors
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Failed to initialize collector: {0}")]
    InitializationError(String),

    #[error("Failed to read events: {0}")]
    EventReadError(#[from] std::io::Error),

    #[error("No supported gamepad found: {0}")]
    NoGamepadError(String),
}

/// Device picked by detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,
    pub family: DeviceFamily,
}

#[state]
#[derive(Debug, Clone)]
pub enum CollectionState {
    Detecting,
    Streaming,
}

#[machine]
pub struct EventCollector<S: CollectionState> {
    settings: CollectorSettings,

    // Opened input device, set once detection succeeds
    device: Option<Device>,
    info: Option<DeviceInfo>,

    event_sender: mpsc::Sender<RawEvent>,
    shutdown: CancellationToken,
}

impl<S: CollectionState> EventCollector<S> {
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }
}

impl EventCollector<Detecting> {
    pub fn create(
        settings: Option<CollectorSettings>,
        event_sender: mpsc::Sender<RawEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        let settings = settings.unwrap_or_default();
        debug!("Creating Event Collector with settings: {:?}", settings);
        Self::new(settings, None, None, event_sender, shutdown)
    }

    /// Finds a supported gamepad and transitions to Streaming.
    pub fn detect(mut self) -> Result<EventCollector<Streaming>, CollectorError> {
        let (path, device) = match self.settings.device_path.clone() {
            Some(path) => {
                info!("Opening configured device {}", path.display());
                let device = Device::open(&path).map_err(|e| {
                    CollectorError::InitializationError(format!("{}: {}", path.display(), e))
                })?;
                (path, device)
            }
            None => self.scan()?,
        };

        let name = device.name().unwrap_or_default().to_string();
        let family = self
            .settings
            .forced_family
            .or_else(|| DeviceFamily::detect(&name))
            .ok_or_else(|| {
                CollectorError::NoGamepadError(format!(
                    "{} ({}) is not a supported family",
                    path.display(),
                    name
                ))
            })?;

        info!("Using {} - {} as {}", path.display(), name, family);
        self.info = Some(DeviceInfo { path, name, family });
        self.device = Some(device);
        Ok(self.transition())
    }

    fn scan(&self) -> Result<(PathBuf, Device), CollectorError> {
        for (path, device) in evdev::enumerate() {
            let name = device.name().unwrap_or_default();
            debug!("Found input device {}: {}", path.display(), name);

            if DeviceFamily::detect(name).is_some() {
                return Ok((path, device));
            }
            // Unmatched devices are closed on drop
        }

        Err(CollectorError::NoGamepadError(
            "no device named like an Xbox 360 pad or Combined Joy-Cons".to_string(),
        ))
    }
}

impl EventCollector<Streaming> {
    /// Blocks on the device and forwards every event until shutdown, the
    /// receiver going away, or a read error.
    pub fn run_collection_loop(&mut self) -> Result<(), CollectorError> {
        info!("Starting Event Collector loop");
        let device = self.device.as_mut().ok_or_else(|| {
            CollectorError::InitializationError("streaming without a device".to_string())
        })?;

        loop {
            if self.shutdown.is_cancelled() {
                info!("Event Collector shutting down");
                return Ok(());
            }

            let events: Vec<RawEvent> = device.fetch_events()?.map(RawEvent::from).collect();

            for event in events {
                if self.event_sender.blocking_send(event).is_err() {
                    info!("Event receiver closed, stopping collector");
                    return Ok(());
                }
            }
        }
    }
}

/// Owns the reader thread. The device handle lives on that thread and is
/// released when the loop returns.
pub struct CollectorHandle {
    info: DeviceInfo,
    task_handle: thread::JoinHandle<()>,
}

impl CollectorHandle {
    /// Detects the device on the calling thread so a missing gamepad fails
    /// startup, then moves the blocking read loop onto its own thread.
    pub fn spawn(
        settings: Option<CollectorSettings>,
        event_sender: mpsc::Sender<RawEvent>,
        shutdown: CancellationToken,
    ) -> Result<Self, CollectorError> {
        info!("Spawning Event Collector with settings: {:?}", settings);

        let collector = EventCollector::create(settings, event_sender, shutdown);
        let mut streaming = collector.detect()?;
        let info = streaming
            .device_info()
            .cloned()
            .ok_or_else(|| CollectorError::InitializationError("missing device info".into()))?;

        // Own thread: reads park indefinitely on an idle device
        let task_handle = thread::Builder::new()
            .name("event-collector".to_string())
            .spawn(move || {
                match streaming.run_collection_loop() {
                    Ok(()) => info!("Event Collector finished"),
                    Err(e) => error!("Collector terminated with error: {}", e),
                }
                // Dropping the collector closes the channel and releases the device
            })
            .map_err(|e| CollectorError::InitializationError(e.to_string()))?;

        info!("Event Collector successfully started");
        Ok(Self { info, task_handle })
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn is_finished(&self) -> bool {
        self.task_handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_values_map_to_pressed_state() {
        assert!(matches!(
            RawEvent::from_parts(EventType::KEY, 304, 1),
            RawEvent::Key { code: 304, pressed: true, .. }
        ));
        assert!(matches!(
            RawEvent::from_parts(EventType::KEY, 304, 0),
            RawEvent::Key { pressed: false, .. }
        ));
        assert!(matches!(
            RawEvent::from_parts(EventType::KEY, 304, 2),
            RawEvent::Key { pressed: true, .. }
        ));
    }

    #[test]
    fn absolute_events_keep_signed_value() {
        assert!(matches!(
            RawEvent::from_parts(EventType::ABSOLUTE, 1, -32768),
            RawEvent::Axis { code: 1, value: -32768, .. }
        ));
    }

    #[test]
    fn other_categories_are_tagged() {
        assert!(matches!(
            RawEvent::from_parts(EventType::SYNCHRONIZATION, 0, 0),
            RawEvent::Sync
        ));
        assert!(matches!(
            RawEvent::from_parts(EventType::MISC, 4, 90001),
            RawEvent::Other { kind: 4 }
        ));
    }

    #[test]
    fn latency_is_measured_from_the_read_time() {
        let read_at = Local::now();
        let event = RawEvent::Key {
            code: 304,
            pressed: true,
            timestamp: read_at,
        };
        let later = read_at + chrono::Duration::milliseconds(7);
        assert_eq!(event.latency(later), Some(chrono::Duration::milliseconds(7)));
        assert_eq!(RawEvent::Sync.latency(later), None);
    }

    #[test]
    fn missing_configured_device_fails_detection() {
        let (tx, _rx) = mpsc::channel(1);
        let settings = CollectorSettings {
            device_path: Some(PathBuf::from("/nonexistent/padbridge-event99")),
            forced_family: Some(DeviceFamily::Xbox360),
        };
        let collector = EventCollector::create(Some(settings), tx, CancellationToken::new());
        assert!(matches!(
            collector.detect(),
            Err(CollectorError::InitializationError(_))
        ));
    }
}
