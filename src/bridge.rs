//! Event dispatch loop.
//!
//! One task owns every piece of mutable state: stick and trigger trackers,
//! the stream client and the deadlines driving them. Raw events arrive over
//! a channel from the collector thread.
//!
//! ```text
//! RawEvent ──► DeviceProfile ──┬─► key ─────────────────────┐
//!                              ├─► TriggerEdgeDetector ─────┼─► StreamClient
//!                              └─► StickTracker ──(timer)───┘
//! ```
//!
//! Keys and trigger edges go out immediately. Stick motion is coalesced and
//! flushed at most once per notify interval, from the same loop that also
//! drives reconnects.

use std::time::Duration;

use chrono::Local;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::event_collector::RawEvent;
use crate::controller::profile::{Classified, DeviceProfile, JoystickType};
use crate::controller::stick_tracker::{StickTracker, DEFAULT_MIN_DELTA};
use crate::controller::trigger::{TriggerEdge, TriggerEdgeDetector};
use crate::stream::client::StreamClient;
use crate::stream::protocol::{encode_batch, WireMessage};

#[derive(Clone, Debug, PartialEq)]
pub struct BridgeSettings {
    /// Minimum spacing between stick transmissions, also the wait granularity
    pub axis_notify_interval: Duration,
    pub min_delta: f32,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            axis_notify_interval: Duration::from_millis(10),
            min_delta: DEFAULT_MIN_DELTA,
        }
    }
}

/// Why the dispatch loop ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown token was cancelled
    Shutdown,
    /// The collector stopped feeding events
    DeviceLost,
}

pub struct Bridge {
    profile: DeviceProfile,
    sticks: StickTracker,
    triggers: TriggerEdgeDetector,
    client: StreamClient,
    axis_notify_interval: Duration,
    next_axis_notify: Instant,
}

impl Bridge {
    pub fn new(profile: DeviceProfile, client: StreamClient, settings: BridgeSettings) -> Self {
        debug!(
            "Creating bridge for {} with settings: {:?}",
            profile.family(),
            settings
        );
        Self {
            profile,
            sticks: StickTracker::new(settings.min_delta),
            triggers: TriggerEdgeDetector::default(),
            client,
            axis_notify_interval: settings.axis_notify_interval,
            next_axis_notify: Instant::now(),
        }
    }

    pub fn client(&self) -> &StreamClient {
        &self.client
    }

    pub fn sticks(&self) -> &StickTracker {
        &self.sticks
    }

    /// Routes one raw event. Keys and trigger edges are sent right away.
    pub async fn handle_event(&mut self, event: RawEvent) {
        if let Some(latency) = event.latency(Local::now()) {
            debug!("Event latency {}us", latency.num_microseconds().unwrap_or(i64::MAX));
        }

        match self.profile.classify(&event) {
            Classified::Key { key, pressed } => {
                self.client.send(&WireMessage::key(key, pressed).encode()).await;
            }
            Classified::Trigger { trigger, value } => {
                if let Some(edge) = self.triggers.update(trigger, value) {
                    let pressed = edge == TriggerEdge::Pressed;
                    debug!("{:?} trigger {:?} at {}", trigger, edge, value);
                    self.client
                        .send(&WireMessage::key(trigger.key(), pressed).encode())
                        .await;
                }
            }
            Classified::Stick { stick, axis, value } => {
                self.sticks.update(stick, axis, value);
            }
            Classified::Ignored => {
                if let RawEvent::Other { kind } = event {
                    warn!("Unhandled event type: {}", kind);
                }
            }
        }
    }

    /// Sends pending stick changes if the notify window has elapsed.
    ///
    /// The window advances whenever a stick was dirty, even if nothing ended
    /// up on the wire.
    pub async fn flush_sticks(&mut self, now: Instant) {
        if !self.sticks.any_dirty() || now < self.next_axis_notify {
            return;
        }
        self.next_axis_notify = now + self.axis_notify_interval;

        let mut batch = Vec::with_capacity(2);
        for stick in [JoystickType::Left, JoystickType::Right] {
            if !self.sticks.is_dirty(stick) {
                continue;
            }
            if let Some(value) = self.sticks.take_pending_if_changed(stick, &self.profile) {
                batch.push(WireMessage::stick(stick, value));
            }
        }

        if !batch.is_empty() {
            self.client.send(&encode_batch(&batch)).await;
        }
    }

    /// Earliest instant the loop has work to do without a new event.
    pub fn next_deadline(&self, now: Instant) -> Instant {
        let mut deadline = now + self.axis_notify_interval;
        if self.sticks.any_dirty() {
            deadline = deadline.min(self.next_axis_notify);
        }
        if let Some(retry) = self.client.next_retry() {
            deadline = deadline.min(retry);
        }
        deadline
    }

    /// Drives the bridge until shutdown or until the collector goes away.
    /// The connection is closed on every exit path.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<RawEvent>,
        shutdown: CancellationToken,
    ) -> StopReason {
        info!("Starting dispatch loop");

        let reason = loop {
            if let Some(reason) = self.step(&mut events, &shutdown).await {
                break reason;
            }
        };

        self.client.shutdown().await;
        let status = self.client.status();
        let last_activity = status
            .last_activity
            .map(|at| at.format("%H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| "never".to_string());
        info!(
            "Dispatch loop stopped ({:?}) after {} messages sent, {} dropped, last activity {}",
            reason, status.messages_sent, status.messages_dropped, last_activity
        );
        reason
    }

    /// One loop iteration: flush, start a due reconnect, then wait for the
    /// first of an event, a finished connect attempt, the next deadline or
    /// shutdown.
    pub async fn step(
        &mut self,
        events: &mut mpsc::Receiver<RawEvent>,
        shutdown: &CancellationToken,
    ) -> Option<StopReason> {
        let now = Instant::now();
        self.flush_sticks(now).await;
        self.client.poll_reconnect(now);

        let deadline = self.next_deadline(Instant::now());

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutdown requested");
                Some(StopReason::Shutdown)
            }
            event = events.recv() => match event {
                Some(event) => {
                    self.handle_event(event).await;
                    None
                }
                None => {
                    warn!("Event channel closed, device is gone");
                    Some(StopReason::DeviceLost)
                }
            },
            result = self.client.connect_finished() => {
                self.client.complete_connect(result);
                None
            }
            _ = sleep_until(deadline) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::profile::DeviceFamily;
    use crate::stream::client::ClientSettings;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpSocket, TcpStream};
    use tokio::time::timeout;

    fn key(code: u16, pressed: bool) -> RawEvent {
        RawEvent::Key {
            code,
            pressed,
            timestamp: Local::now(),
        }
    }

    fn axis(code: u16, value: i32) -> RawEvent {
        RawEvent::Axis {
            code,
            value,
            timestamp: Local::now(),
        }
    }

    async fn connected_bridge(family: DeviceFamily) -> (Bridge, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut client = StreamClient::new(ClientSettings {
            port,
            retry_interval: Duration::from_millis(50),
            ..ClientSettings::default()
        });
        client.connect().await;
        let (peer, _) = listener.accept().await.unwrap();

        let profile = DeviceProfile::for_family(family).unwrap();
        (Bridge::new(profile, client, BridgeSettings::default()), peer)
    }

    async fn read_text(peer: &mut TcpStream, len: usize) -> String {
        let mut buf = vec![0u8; len];
        timeout(Duration::from_secs(1), peer.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn keys_are_sent_immediately() {
        let (mut bridge, mut peer) = connected_bridge(DeviceFamily::Xbox360).await;
        bridge.handle_event(key(304, true)).await;
        bridge.handle_event(key(304, false)).await;
        assert_eq!(read_text(&mut peer, 16).await, "K_DOWN|3\nK_UP|3\n");
    }

    #[tokio::test]
    async fn unmapped_key_goes_out_as_unknown() {
        let (mut bridge, mut peer) = connected_bridge(DeviceFamily::Xbox360).await;
        bridge.handle_event(key(9999, true)).await;
        assert_eq!(read_text(&mut peer, 9).await, "K_DOWN|0\n");
    }

    #[tokio::test]
    async fn trigger_axis_becomes_lt_button() {
        let (mut bridge, mut peer) = connected_bridge(DeviceFamily::Xbox360).await;
        for value in [0, 50, 100, 180, 200, 60, 30] {
            bridge.handle_event(axis(2, value)).await;
        }
        assert_eq!(read_text(&mut peer, 18).await, "K_DOWN|12\nK_UP|12\n");
        assert_eq!(bridge.client().status().messages_sent, 2);
    }

    #[tokio::test]
    async fn half_diagonal_left_stick_end_to_end() {
        let (mut bridge, mut peer) = connected_bridge(DeviceFamily::Xbox360).await;
        bridge.handle_event(axis(0, 16383)).await;
        bridge.handle_event(axis(1, -16383)).await;

        let live = bridge.sticks().live(JoystickType::Left);
        assert!((live.x - 0.5).abs() < 1e-3 && (live.y - 0.5).abs() < 1e-3);

        bridge.flush_sticks(Instant::now()).await;
        assert_eq!(read_text(&mut peer, 20).await, "L_STICK|0.344|0.344\n");
    }

    #[tokio::test]
    async fn stick_updates_are_rate_limited() {
        let (mut bridge, mut peer) = connected_bridge(DeviceFamily::Joycons).await;
        let start = Instant::now();

        bridge.handle_event(axis(3, 32767)).await;
        bridge.flush_sticks(start).await;
        assert_eq!(read_text(&mut peer, 20).await, "R_STICK|1.000|0.000\n");

        // Inside the window: held back
        bridge.handle_event(axis(3, -32767)).await;
        bridge.flush_sticks(start).await;
        assert!(bridge.sticks().is_dirty(JoystickType::Right));

        bridge.flush_sticks(start + Duration::from_millis(10)).await;
        assert_eq!(read_text(&mut peer, 21).await, "R_STICK|-1.000|0.000\n");
        assert_eq!(bridge.client().status().messages_sent, 2);
    }

    #[tokio::test]
    async fn same_output_in_one_window_is_sent_once() {
        let (mut bridge, mut peer) = connected_bridge(DeviceFamily::Joycons).await;
        let start = Instant::now();

        bridge.handle_event(axis(0, 32767)).await;
        bridge.flush_sticks(start).await;
        assert_eq!(read_text(&mut peer, 20).await, "L_STICK|1.000|0.000\n");

        // Two raw moves that land on the same clamped output
        bridge.handle_event(axis(0, 31000)).await;
        bridge.handle_event(axis(0, 32767)).await;
        bridge.flush_sticks(start + Duration::from_millis(10)).await;

        bridge.handle_event(key(316, true)).await;
        assert_eq!(read_text(&mut peer, 10).await, "K_DOWN|15\n");
        assert_eq!(bridge.client().status().messages_sent, 2);
    }

    #[tokio::test]
    async fn distinct_moves_in_one_window_send_one_line() {
        let (mut bridge, mut peer) = connected_bridge(DeviceFamily::Joycons).await;
        let start = Instant::now();

        bridge.handle_event(axis(0, 32767)).await;
        bridge.flush_sticks(start).await;
        assert_eq!(read_text(&mut peer, 20).await, "L_STICK|1.000|0.000\n");

        // Both moves produce new outputs, only the latest goes out
        bridge.handle_event(axis(0, 16383)).await;
        bridge.flush_sticks(start).await;
        bridge.handle_event(axis(0, 26000)).await;
        bridge.flush_sticks(start + Duration::from_millis(5)).await;
        bridge.flush_sticks(start + Duration::from_millis(10)).await;

        bridge.handle_event(key(316, true)).await;
        assert_eq!(
            read_text(&mut peer, 30).await,
            "L_STICK|0.771|0.000\nK_DOWN|15\n"
        );
        assert_eq!(bridge.client().status().messages_sent, 3);
    }

    #[tokio::test]
    async fn both_sticks_share_one_write() {
        let (mut bridge, mut peer) = connected_bridge(DeviceFamily::Joycons).await;
        bridge.handle_event(axis(0, 32767)).await;
        bridge.handle_event(axis(4, -32767)).await;
        bridge.flush_sticks(Instant::now()).await;

        assert_eq!(
            read_text(&mut peer, 40).await,
            "L_STICK|1.000|0.000\nR_STICK|0.000|1.000\n"
        );
        assert_eq!(bridge.client().status().messages_sent, 1);
    }

    #[tokio::test]
    async fn deadline_follows_pending_retry() {
        let profile = DeviceProfile::for_family(DeviceFamily::Joycons).unwrap();
        let bridge = Bridge::new(
            profile,
            StreamClient::new(ClientSettings::default()),
            BridgeSettings::default(),
        );
        let now = Instant::now();
        assert!(bridge.next_deadline(now) <= now);
    }

    #[tokio::test]
    async fn deadline_follows_notify_window() {
        let (mut bridge, _peer) = connected_bridge(DeviceFamily::Joycons).await;
        let t0 = Instant::now();
        assert_eq!(bridge.next_deadline(t0), t0 + Duration::from_millis(10));

        bridge.handle_event(axis(0, 32767)).await;
        bridge.flush_sticks(t0).await;
        bridge.handle_event(axis(0, 0)).await;

        let later = t0 + Duration::from_millis(5);
        assert_eq!(bridge.next_deadline(later), t0 + Duration::from_millis(10));
    }

    #[tokio::test]
    async fn disconnected_bridge_keeps_running() {
        let profile = DeviceProfile::for_family(DeviceFamily::Xbox360).unwrap();
        let client = StreamClient::new(ClientSettings::default());
        let mut bridge = Bridge::new(profile, client, BridgeSettings::default());

        bridge.handle_event(key(304, true)).await;
        bridge.handle_event(axis(0, 20000)).await;
        bridge.flush_sticks(Instant::now()).await;
        bridge.handle_event(RawEvent::Other { kind: 4 }).await;

        assert_eq!(bridge.client().status().messages_dropped, 2);
        assert!(!bridge.sticks().is_dirty(JoystickType::Left));
    }

    #[tokio::test]
    async fn run_forwards_events_until_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = StreamClient::new(ClientSettings {
            port,
            ..ClientSettings::default()
        });
        let profile = DeviceProfile::for_family(DeviceFamily::Joycons).unwrap();
        let bridge = Bridge::new(profile, client, BridgeSettings::default());

        let (tx, rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(bridge.run(rx, shutdown.clone()));

        let (mut peer, _) = timeout(Duration::from_secs(1), listener.accept())
            .await
            .unwrap()
            .unwrap();
        // Let the loop pick up the finished connect before input arrives
        tokio::time::sleep(Duration::from_millis(50)).await;

        tx.send(key(312, true)).await.unwrap();
        tx.send(axis(1, 32767)).await.unwrap();
        assert_eq!(read_text(&mut peer, 10).await, "K_DOWN|12\n");
        assert_eq!(read_text(&mut peer, 21).await, "L_STICK|0.000|-1.000\n");

        shutdown.cancel();
        let reason = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(reason, StopReason::Shutdown);

        let mut rest = Vec::new();
        peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn run_stops_when_the_collector_goes_away() {
        let profile = DeviceProfile::for_family(DeviceFamily::Joycons).unwrap();
        let bridge = Bridge::new(
            profile,
            StreamClient::new(ClientSettings::default()),
            BridgeSettings::default(),
        );
        let (tx, rx) = mpsc::channel(1);
        drop(tx);

        let reason = timeout(Duration::from_secs(5), bridge.run(rx, CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(reason, StopReason::DeviceLost);
    }

    #[tokio::test]
    async fn events_are_handled_while_a_connect_is_pending() {
        // Backlog of one, filled up so further SYNs go unanswered
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(1).unwrap();
        let addr = listener.local_addr().unwrap();
        let mut fillers = Vec::new();
        for _ in 0..4 {
            if let Ok(Ok(stream)) =
                timeout(Duration::from_millis(100), TcpStream::connect(addr)).await
            {
                fillers.push(stream);
            }
        }

        let client = StreamClient::new(ClientSettings {
            port: addr.port(),
            retry_interval: Duration::from_secs(2),
            ..ClientSettings::default()
        });
        let profile = DeviceProfile::for_family(DeviceFamily::Xbox360).unwrap();
        let mut bridge = Bridge::new(profile, client, BridgeSettings::default());

        let (tx, mut rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        tx.send(key(304, true)).await.unwrap();

        let handled = timeout(Duration::from_millis(500), async {
            loop {
                assert_eq!(bridge.step(&mut rx, &shutdown).await, None);
                let status = bridge.client().status();
                if status.messages_sent + status.messages_dropped == 1 {
                    break;
                }
            }
        })
        .await;
        assert!(handled.is_ok());
    }
}
