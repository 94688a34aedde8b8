//! rosbridge v2 WebSocket client.
//!
//! [`BridgeConnection`] owns a single socket task per connection.  All
//! outbound frames reach that task through a bounded hand-off channel, so
//! callers never block on the network:
//!
//! ```text
//! publish_message ──try_send──► [outbound mpsc] ──► socket task ──► ws://host:port
//!                                                      ▲
//!                           inbound frames (logged) ───┘
//! ```
//!
//! The connection is an explicit state machine observable through a
//! [`watch`] channel:
//!
//! ```text
//! Disconnected ──connect──► Connecting ──handshake ok──► Connected
//!      ▲                        │                            │
//!      └──── handshake failed ──┘      close ──► Closing ────┤
//!      └────────────── remote close / read error ────────────┘
//! ```
//!
//! There is no automatic reconnect.  Every connection gets a fresh epoch;
//! socket tasks only ever update the state while their epoch is current.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sensorbridge_types::BridgeError;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tracing::{debug, info, warn};

use crate::envelope::Envelope;

/// Conventional rosbridge port.
pub const DEFAULT_PORT: u16 = 9090;

const OUTBOUND_CAPACITY: usize = 64;
const CLOSE_GRACE: Duration = Duration::from_secs(1);

// ────────────────────────────────────────────────────────────────────────────
// State
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Closing => write!(f, "Closing"),
        }
    }
}

/// Protocol frames, one JSON object per text message.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Frame<'a> {
    Advertise {
        topic: &'a str,
        #[serde(rename = "type")]
        msg_type: &'a str,
    },
    Subscribe {
        topic: &'a str,
    },
    Publish {
        topic: &'a str,
        msg: &'a Envelope,
    },
}

enum Outbound {
    Text(String),
    Close,
}

/// Connection state plus the epoch that is allowed to change it.
struct Shared {
    state_tx: watch::Sender<ConnectionState>,
    epoch: Mutex<u64>,
}

impl Shared {
    fn epoch(&self) -> MutexGuard<'_, u64> {
        self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `next` only if `epoch` still identifies the live connection.
    fn transition(&self, epoch: u64, next: ConnectionState) -> bool {
        let current = self.epoch();
        if *current != epoch {
            debug!(epoch, current = *current, state = %next, "stale connection task; state left untouched");
            return false;
        }
        self.state_tx.send_replace(next);
        true
    }
}

struct Link {
    epoch: u64,
    outbound: mpsc::Sender<Outbound>,
    task: JoinHandle<()>,
}

// ────────────────────────────────────────────────────────────────────────────
// Publisher seam
// ────────────────────────────────────────────────────────────────────────────

/// Anything that can take an encoded envelope off the dispatcher's hands.
pub trait Publisher: Send + Sync {
    /// Hand `envelope` off for transmission on its topic.  Returns `false`
    /// when it was dropped.
    fn publish(&self, envelope: &Envelope) -> bool;
}

// ────────────────────────────────────────────────────────────────────────────
// BridgeConnection
// ────────────────────────────────────────────────────────────────────────────

pub struct BridgeConnection {
    shared: Arc<Shared>,
    link: Mutex<Option<Link>>,
}

impl Default for BridgeConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeConnection {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                state_tx,
                epoch: Mutex::new(0),
            }),
            link: Mutex::new(None),
        }
    }

    fn link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Open `ws://host:port`.
    ///
    /// Returns as soon as the attempt is under way with the state set to
    /// `Connecting`.  The outcome of the handshake is reported only through
    /// the state.  Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::InvalidState`] unless the connection is
    ///   `Disconnected`.
    /// - [`BridgeError::InvalidUrl`] when `host` does not form a valid URL.
    /// - [`BridgeError::NoRuntime`] when called outside a Tokio runtime.
    pub fn connect(&self, host: &str, port: u16) -> Result<(), BridgeError> {
        let url = format!("ws://{host}:{port}");
        if host.is_empty() {
            return Err(BridgeError::InvalidUrl(url));
        }
        let request = url
            .as_str()
            .into_client_request()
            .map_err(|e| BridgeError::InvalidUrl(format!("{url}: {e}")))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| BridgeError::NoRuntime("connect".to_string()))?;

        let mut link = self.link();
        let state = self.state();
        if state != ConnectionState::Disconnected {
            return Err(BridgeError::InvalidState {
                operation: "connect".to_string(),
                state: state.to_string(),
            });
        }

        let epoch = {
            let mut current = self.shared.epoch();
            *current += 1;
            self.shared.state_tx.send_replace(ConnectionState::Connecting);
            *current
        };

        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let task = runtime.spawn(run_socket(
            Arc::clone(&self.shared),
            epoch,
            request,
            url.clone(),
            outbound_rx,
        ));
        info!(url = %url, epoch, "bridge connecting");

        *link = Some(Link {
            epoch,
            outbound,
            task,
        });
        Ok(())
    }

    /// Wait until the state leaves `Connecting`.
    ///
    /// Returns the settled state, or `None` if `timeout` elapsed first.
    pub async fn wait_until_settled(&self, timeout: Duration) -> Option<ConnectionState> {
        let mut rx = self.watch_state();
        match tokio::time::timeout(timeout, rx.wait_for(|s| *s != ConnectionState::Connecting))
            .await
        {
            Ok(Ok(state)) => Some(*state),
            Ok(Err(_)) => Some(ConnectionState::Disconnected),
            Err(_) => None,
        }
    }

    /// Announce that this client will publish `msg_type` on `topic`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotConnected`] unless the connection is `Connected`.
    pub fn advertise_topic(&self, topic: &str, msg_type: &str) -> Result<(), BridgeError> {
        if self.hand_off(&Frame::Advertise { topic, msg_type })? {
            info!(topic, msg_type, "topic advertised");
        } else {
            warn!(topic, "advertise dropped; outbound queue full");
        }
        Ok(())
    }

    /// Ask the server to forward messages on `topic`.  Forwarded frames are
    /// logged, nothing else.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotConnected`] unless the connection is `Connected`.
    pub fn subscribe_to_topic(&self, topic: &str) -> Result<(), BridgeError> {
        if self.hand_off(&Frame::Subscribe { topic })? {
            info!(topic, "topic subscribed");
        } else {
            warn!(topic, "subscribe dropped; outbound queue full");
        }
        Ok(())
    }

    /// Publish `envelope` on `topic`.
    ///
    /// Fire-and-forget: a no-op when not connected, never queued past the
    /// hand-off channel and never retried.  Returns whether the frame was
    /// handed to the socket task.
    pub fn publish_message(&self, topic: &str, envelope: &Envelope) -> bool {
        match self.hand_off(&Frame::Publish {
            topic,
            msg: envelope,
        }) {
            Ok(true) => true,
            Ok(false) => {
                debug!(topic, "publish dropped; outbound queue full");
                false
            }
            Err(BridgeError::NotConnected) => {
                debug!(topic, "publish skipped; bridge not connected");
                false
            }
            Err(e) => {
                warn!(topic, error = %e, "publish failed");
                false
            }
        }
    }

    /// Serialize `frame` and hand it to the socket task.
    ///
    /// `Ok(false)` means the hand-off channel was full.
    fn hand_off(&self, frame: &Frame<'_>) -> Result<bool, BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected);
        }
        let json =
            serde_json::to_string(frame).map_err(|e| BridgeError::Serialization(e.to_string()))?;

        let link = self.link();
        let Some(link) = link.as_ref() else {
            return Err(BridgeError::NotConnected);
        };
        match link.outbound.try_send(Outbound::Text(json)) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(BridgeError::NotConnected),
        }
    }

    /// Close the connection with a normal-closure frame.
    ///
    /// Passes through `Closing` when connected, cancels a handshake still in
    /// progress, and always ends `Disconnected`.  Idempotent.
    ///
    /// The close frame queues behind frames already handed off.  Queueing it
    /// and waiting for the socket task share one `CLOSE_GRACE` budget.
    pub async fn close(&self) {
        let Some(link) = self.link().take() else {
            return;
        };
        let Link {
            epoch,
            outbound,
            mut task,
        } = link;

        if self.state() == ConnectionState::Connected
            && self.shared.transition(epoch, ConnectionState::Closing)
        {
            let drained = tokio::time::timeout(CLOSE_GRACE, async {
                // A send error means the socket task is already gone.
                if outbound.send(Outbound::Close).await.is_ok() {
                    let _ = (&mut task).await;
                }
            })
            .await;
            if drained.is_err() {
                warn!(epoch, "bridge socket did not close in time; aborting");
                task.abort();
            }
        } else {
            task.abort();
            // Cancellation is the expected outcome.
            let _ = task.await;
        }

        self.shared.transition(epoch, ConnectionState::Disconnected);
        info!(epoch, "bridge closed");
    }
}

impl Publisher for BridgeConnection {
    fn publish(&self, envelope: &Envelope) -> bool {
        self.publish_message(envelope.topic().name(), envelope)
    }
}

impl Drop for BridgeConnection {
    fn drop(&mut self) {
        if let Some(link) = self.link().take() {
            link.task.abort();
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Socket task
// ────────────────────────────────────────────────────────────────────────────

async fn run_socket(
    shared: Arc<Shared>,
    epoch: u64,
    request: Request,
    url: String,
    mut outbound_rx: mpsc::Receiver<Outbound>,
) {
    let ws_stream = match connect_async(request).await {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            warn!(url = %url, error = %e, "bridge handshake failed");
            shared.transition(epoch, ConnectionState::Disconnected);
            return;
        }
    };
    if !shared.transition(epoch, ConnectionState::Connected) {
        return;
    }
    info!(url = %url, "bridge connected");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    loop {
        tokio::select! {
            // Frames handed off by publishers.
            cmd = outbound_rx.recv() => {
                match cmd {
                    Some(Outbound::Text(json)) => {
                        if let Err(e) = ws_tx.send(Message::Text(json.into())).await {
                            warn!(url = %url, error = %e, "bridge write failed");
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: Utf8Bytes::from_static("session stopped"),
                        };
                        if let Err(e) = ws_tx.send(Message::Close(Some(frame))).await {
                            debug!(error = %e, "close frame not delivered");
                        }
                        break;
                    }
                }
            }
            // Frames from the server.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        info!(frame = %text.as_str(), "bridge frame received");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(url = %url, frame = ?frame, "bridge closed by server");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(url = %url, error = %e, "bridge read failed");
                        break;
                    }
                    None => {
                        warn!(url = %url, "bridge stream ended");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    shared.transition(epoch, ConnectionState::Disconnected);
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
