//! Resilient outbound stream to the peer.
//!
//! The client is either connected or waiting for its next retry. Connect
//! attempts run as a spawned task so the owner keeps handling input while the
//! peer is unreachable. Sends while disconnected are dropped, transport errors
//! close the connection and schedule a retry a fixed interval later. Nothing
//! is ever reported back to the caller: the peer may come and go at any time.

use std::io;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug, PartialEq)]
pub struct ClientSettings {
    pub host: String,
    pub port: u16,
    pub retry_interval: Duration,
    /// Surface every outbound message in the log
    pub debug: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7070,
            retry_interval: Duration::from_secs(3),
            debug: false,
        }
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

#[derive(Clone, Debug, Default)]
pub struct StreamStatus {
    pub connection_state: ConnectionState,
    pub messages_sent: usize,
    pub messages_dropped: usize,
    pub connect_failures: usize,
    pub last_activity: Option<DateTime<Local>>,
}

pub struct StreamClient {
    settings: ClientSettings,
    stream: Option<TcpStream>,
    // In-flight connect attempt, polled by the owner alongside its other work
    pending: Option<JoinHandle<io::Result<TcpStream>>>,
    next_retry: Instant,
    status: StreamStatus,
}

impl StreamClient {
    /// Creates a disconnected client whose first attempt is due immediately.
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            settings,
            stream: None,
            pending: None,
            next_retry: Instant::now(),
            status: StreamStatus::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.status.connection_state
    }

    pub fn status(&self) -> &StreamStatus {
        &self.status
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_connecting(&self) -> bool {
        self.pending.is_some()
    }

    /// When the next connect attempt is due, only while disconnected and no
    /// attempt is in flight.
    pub fn next_retry(&self) -> Option<Instant> {
        if self.is_connected() || self.is_connecting() {
            None
        } else {
            Some(self.next_retry)
        }
    }

    /// Opens the connection and waits for the outcome. Failures are logged
    /// and schedule the next retry.
    pub async fn connect(&mut self) {
        if self.is_connected() {
            debug!("Already connected, ignoring connect request");
            return;
        }
        if !self.is_connecting() {
            self.start_connect();
        }
        let result = self.connect_finished().await;
        self.complete_connect(result);
    }

    /// Starts a background attempt if disconnected and the retry deadline has
    /// passed. Returns immediately.
    pub fn poll_reconnect(&mut self, now: Instant) {
        if !self.is_connected() && !self.is_connecting() && now >= self.next_retry {
            self.start_connect();
        }
    }

    /// Resolves with the outcome of the in-flight attempt. Never resolves
    /// when no attempt is running, so it can sit in a `select!` permanently.
    pub async fn connect_finished(&mut self) -> io::Result<TcpStream> {
        match self.pending.as_mut() {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => Err(io::Error::other(e)),
            },
            None => std::future::pending().await,
        }
    }

    /// Applies the outcome returned by [`StreamClient::connect_finished`].
    pub fn complete_connect(&mut self, result: io::Result<TcpStream>) {
        self.pending = None;
        match result {
            Ok(stream) => {
                info!(
                    "Connected to server {}:{}",
                    self.settings.host, self.settings.port
                );
                self.stream = Some(stream);
                self.status.connection_state = ConnectionState::Connected;
                self.status.last_activity = Some(Local::now());
            }
            Err(e) => {
                error!(
                    "Connection to {}:{} failed: {}",
                    self.settings.host, self.settings.port, e
                );
                self.status.connect_failures += 1;
                self.schedule_retry();
            }
        }
    }

    fn start_connect(&mut self) {
        let host = self.settings.host.clone();
        let port = self.settings.port;
        let limit = self.settings.retry_interval;
        debug!("Connecting to {}:{}", host, port);
        self.pending = Some(tokio::spawn(open_stream(host, port, limit)));
    }

    /// Best-effort write. Dropped while disconnected, never queued.
    pub async fn send(&mut self, msg: &str) {
        if self.settings.debug {
            info!("{}", msg.trim_end());
        }

        let Some(stream) = self.stream.as_mut() else {
            self.status.messages_dropped += 1;
            return;
        };

        match stream.write_all(msg.as_bytes()).await {
            Ok(()) => {
                self.status.messages_sent += 1;
                self.status.last_activity = Some(Local::now());
            }
            Err(e) => {
                error!("Send failed: {}", e);
                self.status.messages_dropped += 1;
                self.stream = None;
                self.schedule_retry();
            }
        }
    }

    /// Closes the connection if open.
    pub async fn shutdown(&mut self) {
        if let Some(attempt) = self.pending.take() {
            attempt.abort();
        }
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                warn!("Error while closing connection: {}", e);
            }
            info!("Connection closed");
        }
        self.status.connection_state = ConnectionState::Disconnected;
    }

    fn schedule_retry(&mut self) {
        self.status.connection_state = ConnectionState::Disconnected;
        self.next_retry = Instant::now() + self.settings.retry_interval;
        debug!(
            "Next connection attempt in {:?}",
            self.settings.retry_interval
        );
    }
}

/// One connect attempt, bounded by `limit` so a black-holed endpoint counts as
/// a failure instead of hanging.
async fn open_stream(host: String, port: u16, limit: Duration) -> io::Result<TcpStream> {
    let stream = timeout(limit, TcpStream::connect((host.as_str(), port)))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}
