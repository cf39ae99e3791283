//! WebSocket transport with automatic reconnection.
//!
//! A single background task owns the connection and walks it through
//! `connecting -> connected -> reconnecting` as the link comes and goes.
//! Failed connects retry with capped exponential backoff plus jitter so a
//! fleet of clients does not stampede a recovering server. Inbound text
//! frames are parsed into [`Envelope`]s; anything that does not parse is
//! logged and dropped without disturbing the connection.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use docket_protocol::{ClientCommand, Envelope};

use crate::config::{BackoffConfig, SyncConfig};
use crate::error::{ConfigError, TransportError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const LOG_PREVIEW_CHARS: usize = 240;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Where the connection currently stands, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No connection and none requested yet
    Disconnected,
    /// First connection attempt in progress
    Connecting,
    /// Link is up. `generation` counts successful connects since spawn;
    /// anything past 1 means the session was rebuilt after a drop.
    Connected { generation: u64 },
    /// Link lost or connect failed; retrying with backoff
    Reconnecting { attempt: u32 },
    /// Disconnected on request; stays down until asked to connect again
    Closed,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected { .. })
    }
}

/// What the transport task reports back to the engine.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    /// Connection established (or re-established)
    Up { generation: u64 },
    /// An established connection was lost
    Down { reason: String },
    /// A well-formed envelope arrived
    Frame(Envelope),
}

enum TransportControl {
    Connect,
    Disconnect,
    Send(ClientCommand),
}

/// Cheap-to-clone handle onto the transport task.
#[derive(Clone)]
pub(crate) struct TransportHandle {
    control_tx: mpsc::UnboundedSender<TransportControl>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl TransportHandle {
    pub(crate) fn spawn(
        config: &SyncConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<TransportHandle, ConfigError> {
        // Validate up front; a bad URL would otherwise fail on every retry forever.
        Url::parse(&config.endpoint).map_err(|source| ConfigError::InvalidEndpoint {
            url: config.endpoint.clone(),
            source,
        })?;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        let task = TransportTask {
            endpoint: config.endpoint.clone(),
            backoff: config.backoff.clone(),
            ping_interval: config.ping_interval,
            control_rx,
            events,
            status_tx,
            generation: 0,
        };
        tokio::spawn(task.run());

        Ok(TransportHandle {
            control_tx,
            status_rx,
        })
    }

    pub(crate) fn connect(&self) {
        let _ = self.control_tx.send(TransportControl::Connect);
    }

    pub(crate) fn disconnect(&self) {
        let _ = self.control_tx.send(TransportControl::Disconnect);
    }

    /// Queues a command for the wire. Fails fast when the link is down so
    /// callers can surface the condition instead of silently losing writes.
    pub(crate) fn send(&self, command: ClientCommand) -> Result<(), TransportError> {
        if !self.status_rx.borrow().is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.control_tx
            .send(TransportControl::Send(command))
            .map_err(|_| TransportError::Closed)
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    pub(crate) fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }
}

enum CycleEnd {
    /// Disconnect requested; task goes back to idle
    Stopped,
    /// Control channel closed; task exits
    Shutdown,
}

enum ConnEnd {
    Dropped(String),
    Disconnect,
    Shutdown,
}

enum RetryWait {
    Elapsed,
    Disconnect,
    Shutdown,
}

struct TransportTask {
    endpoint: String,
    backoff: BackoffConfig,
    ping_interval: Duration,
    control_rx: mpsc::UnboundedReceiver<TransportControl>,
    events: mpsc::UnboundedSender<TransportEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
    generation: u64,
}

impl TransportTask {
    async fn run(mut self) {
        // Idle until told to connect; each cycle runs until disconnect or shutdown.
        loop {
            let Some(control) = self.control_rx.recv().await else {
                break;
            };
            match control {
                TransportControl::Connect => {
                    if matches!(self.connection_cycle().await, CycleEnd::Shutdown) {
                        break;
                    }
                }
                TransportControl::Disconnect => {
                    self.set_status(ConnectionStatus::Closed);
                }
                TransportControl::Send(_) => {
                    debug!(
                        component = "transport",
                        event = "ws.send.dropped",
                        "Dropping outbound command: not connected"
                    );
                }
            }
        }
        debug!(component = "transport", event = "ws.task.exit", "Transport task exiting");
    }

    /// One connect-and-retry cycle. Returns only on disconnect or shutdown;
    /// connection drops and failed attempts loop back through the backoff.
    async fn connection_cycle(&mut self) -> CycleEnd {
        let mut attempt: u32 = 0;
        self.set_status(ConnectionStatus::Connecting);

        loop {
            match self.try_connect().await {
                Ok(ws) => {
                    attempt = 0;
                    self.generation += 1;
                    let generation = self.generation;
                    self.set_status(ConnectionStatus::Connected { generation });
                    info!(
                        component = "transport",
                        event = "ws.connected",
                        url = %self.endpoint,
                        generation,
                        "WebSocket connected"
                    );
                    let _ = self.events.send(TransportEvent::Up { generation });

                    match self.drive_connection(ws).await {
                        ConnEnd::Dropped(reason) => {
                            warn!(
                                component = "transport",
                                event = "ws.dropped",
                                reason = %reason,
                                "Connection lost; reconnecting"
                            );
                            let _ = self.events.send(TransportEvent::Down { reason });
                        }
                        ConnEnd::Disconnect => {
                            self.set_status(ConnectionStatus::Closed);
                            return CycleEnd::Stopped;
                        }
                        ConnEnd::Shutdown => return CycleEnd::Shutdown,
                    }
                }
                Err(reason) => {
                    debug!(
                        component = "transport",
                        event = "ws.connect.failed",
                        url = %self.endpoint,
                        attempt,
                        error = %reason,
                        "Connect attempt failed"
                    );
                }
            }

            let delay = self.backoff.delay_for(attempt);
            attempt = attempt.saturating_add(1);
            self.set_status(ConnectionStatus::Reconnecting { attempt });
            debug!(
                component = "transport",
                event = "ws.retry.scheduled",
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Waiting before next connect attempt"
            );
            match self.wait_before_retry(delay).await {
                RetryWait::Elapsed => {}
                RetryWait::Disconnect => {
                    self.set_status(ConnectionStatus::Closed);
                    return CycleEnd::Stopped;
                }
                RetryWait::Shutdown => return CycleEnd::Shutdown,
            }
        }
    }

    async fn try_connect(&self) -> Result<WsStream, String> {
        match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(self.endpoint.as_str())).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!("connect timed out after {CONNECT_TIMEOUT:?}")),
        }
    }

    /// Pumps an established connection until it drops or we are told to stop.
    async fn drive_connection(&mut self, ws: WsStream) -> ConnEnd {
        let (mut sink, mut stream) = ws.split();
        let mut ping = tokio::time::interval_at(
            Instant::now() + self.ping_interval,
            self.ping_interval,
        );

        loop {
            tokio::select! {
                control = self.control_rx.recv() => match control {
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return ConnEnd::Shutdown;
                    }
                    Some(TransportControl::Disconnect) => {
                        info!(
                            component = "transport",
                            event = "ws.disconnect",
                            "Closing connection on request"
                        );
                        let _ = sink.send(Message::Close(None)).await;
                        return ConnEnd::Disconnect;
                    }
                    Some(TransportControl::Connect) => {}
                    Some(TransportControl::Send(command)) => {
                        match serde_json::to_string(&command) {
                            Ok(json) => {
                                if let Err(err) = sink.send(Message::Text(json)).await {
                                    warn!(
                                        component = "transport",
                                        event = "ws.send.failed",
                                        error = %err,
                                        "Send failed; treating connection as lost"
                                    );
                                    return ConnEnd::Dropped(err.to_string());
                                }
                            }
                            Err(err) => {
                                warn!(
                                    component = "transport",
                                    event = "ws.send.serialize_failed",
                                    error = %err,
                                    "Could not serialize outbound command"
                                );
                            }
                        }
                    }
                },
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.forward_frame(&text),
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(close))) => {
                        let reason = close
                            .map(|frame| frame.reason.to_string())
                            .unwrap_or_else(|| "server closed connection".to_string());
                        return ConnEnd::Dropped(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return ConnEnd::Dropped(err.to_string()),
                    None => return ConnEnd::Dropped("stream ended".to_string()),
                },
                _ = ping.tick() => {
                    if let Err(err) = sink.send(Message::Ping(Vec::new())).await {
                        return ConnEnd::Dropped(err.to_string());
                    }
                }
            }
        }
    }

    /// A malformed frame is logged and dropped; the connection stays up and
    /// later frames are unaffected.
    fn forward_frame(&self, text: &str) {
        match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => {
                let _ = self.events.send(TransportEvent::Frame(envelope));
            }
            Err(err) => {
                warn!(
                    component = "transport",
                    event = "ws.frame.malformed",
                    error = %err,
                    payload_bytes = text.len(),
                    payload_preview = %truncate_for_log(text, LOG_PREVIEW_CHARS),
                    "Dropping frame that does not parse as an envelope"
                );
            }
        }
    }

    /// Sleeps out the backoff delay while staying responsive to control
    /// messages. Disconnect cancels the pending retry.
    async fn wait_before_retry(&mut self, delay: Duration) -> RetryWait {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return RetryWait::Elapsed,
                control = self.control_rx.recv() => match control {
                    None => return RetryWait::Shutdown,
                    Some(TransportControl::Disconnect) => return RetryWait::Disconnect,
                    Some(TransportControl::Connect) => {}
                    Some(TransportControl::Send(_)) => {
                        debug!(
                            component = "transport",
                            event = "ws.send.dropped",
                            "Dropping outbound command: not connected"
                        );
                    }
                }
            }
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_replace(status);
    }
}

fn truncate_for_log(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_is_the_only_connected_status() {
        assert!(ConnectionStatus::Connected { generation: 1 }.is_connected());
        assert!(!ConnectionStatus::Disconnected.is_connected());
        assert!(!ConnectionStatus::Connecting.is_connected());
        assert!(!ConnectionStatus::Reconnecting { attempt: 3 }.is_connected());
        assert!(!ConnectionStatus::Closed.is_connected());
    }

    #[test]
    fn truncate_leaves_short_text_alone() {
        assert_eq!(truncate_for_log("hello", 10), "hello");
    }

    #[test]
    fn truncate_cuts_long_text_at_char_boundary() {
        let long = "x".repeat(500);
        let cut = truncate_for_log(&long, 240);
        assert_eq!(cut.chars().count(), 241);
        assert!(cut.ends_with('…'));
    }

    #[tokio::test]
    async fn spawn_rejects_invalid_endpoint() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let config = SyncConfig::new("not a url");
        let err = TransportHandle::spawn(&config, events_tx);
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn send_fails_fast_when_not_connected() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let config = SyncConfig::new("ws://127.0.0.1:1/ws");
        let handle = TransportHandle::spawn(&config, events_tx).unwrap();
        let err = handle.send(ClientCommand::Subscribe {
            topic: "case.created".to_string(),
        });
        assert_eq!(err, Err(TransportError::NotConnected));
    }
}
