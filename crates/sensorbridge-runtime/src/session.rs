//! [`SessionOrchestrator`] – one streaming session at a time.
//!
//! A session runs these steps in order:
//!
//! 1. **Validate** the bridge address as an IPv4 dotted quad.
//! 2. **Connect** and wait, bounded by `connect_timeout`, for the handshake
//!    to settle.
//! 3. **Advertise** every topic of the enabled sources, then let the server
//!    settle for `settle_delay`.
//! 4. **Stream**: spawn the [`Dispatcher`] and start every configured
//!    [`EventSource`].
//!
//! [`SessionOrchestrator::stop_session`] unwinds in reverse: sources first,
//! then the dispatcher, then the connection.  A failed start leaves nothing
//! running.
//!
//! Each session runs inside a `session` tracing span carrying a fresh
//! session id.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sensorbridge_hal::sim::{SimPlatform, SimRates};
//! use sensorbridge_runtime::session::{SessionConfig, SessionOrchestrator};
//!
//! # async fn run() -> Result<(), sensorbridge_runtime::SessionError> {
//! let platform = Arc::new(SimPlatform::new(SimRates::default()));
//! let mut orchestrator = SessionOrchestrator::new(SessionConfig::default(), platform);
//! orchestrator.start_session("192.168.1.5").await?;
//! // ...
//! orchestrator.stop_session().await;
//! # Ok(())
//! # }
//! ```

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sensorbridge_hal::{EventSource, SensorPlatform, SourceKind};
use sensorbridge_middleware::{
    BridgeConnection, ConnectionState, DEFAULT_PORT, DispatchStats, Dispatcher, Publisher,
    TopicKind, TypeNaming,
};
use sensorbridge_types::{BridgeError, Channel};
use serde::Serialize;
use thiserror::Error;
use tracing::{Instrument, Span, info, info_span, warn};
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Invalid bridge address: {0:?} (expected an IPv4 address such as 192.168.1.5)")]
    InvalidAddress(String),

    #[error("A session is already active")]
    AlreadyActive,

    #[error("Timed out after {timeout_ms} ms connecting to {url}")]
    ConnectTimeout { url: String, timeout_ms: u64 },

    #[error("Could not connect to {0}")]
    ConnectFailed(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl SessionError {
    fn connect_timeout(url: String, timeout: Duration) -> Self {
        SessionError::ConnectTimeout {
            url,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`SessionOrchestrator`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// rosbridge server port.
    pub port: u16,
    /// Upper bound on the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Pause between advertising and the first publish.
    pub settle_delay: Duration,
    /// Spelling of advertised message types.
    pub type_naming: TypeNaming,
    /// Sources started with each session, in activation order.
    pub sources: Vec<SourceKind>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_millis(2000),
            settle_delay: Duration::from_millis(1000),
            type_naming: TypeNaming::default(),
            sources: SourceKind::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Idle,
    Active,
    /// Sources are running but the transport has dropped.
    Degraded,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Degraded => write!(f, "degraded"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a dotted-quad IPv4 address: four groups of one to three decimal
/// digits, each at most 255.  Leading zeros are accepted (`010` is ten).
pub fn validate_address(address: &str) -> Result<Ipv4Addr, SessionError> {
    let invalid = || SessionError::InvalidAddress(address.to_string());

    let mut octets = [0u8; 4];
    let mut groups = address.split('.');
    for octet in &mut octets {
        let group = groups.next().ok_or_else(invalid)?;
        if group.is_empty() || group.len() > 3 || !group.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        *octet = group.parse().map_err(|_| invalid())?;
    }
    if groups.next().is_some() {
        return Err(invalid());
    }
    Ok(Ipv4Addr::from(octets))
}

/// Topics the given sources publish on, in catalog order.
pub fn topics_for(sources: &[SourceKind]) -> Vec<TopicKind> {
    TopicKind::ALL
        .into_iter()
        .filter(|topic| {
            let producer = match topic {
                TopicKind::Imu => SourceKind::Inertial,
                TopicKind::NavSatFix => SourceKind::Location,
                TopicKind::Odometry => SourceKind::Orientation,
                TopicKind::StepCount => SourceKind::StepCount,
            };
            sources.contains(&producer)
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionOrchestrator
// ─────────────────────────────────────────────────────────────────────────────

struct ActiveSession {
    id: Uuid,
    address: Ipv4Addr,
    started: Instant,
    span: Span,
    sources: Vec<EventSource>,
    dispatcher: Dispatcher,
}

pub struct SessionOrchestrator {
    config: SessionConfig,
    platform: Arc<dyn SensorPlatform>,
    bridge: Arc<BridgeConnection>,
    active: Option<ActiveSession>,
}

impl SessionOrchestrator {
    pub fn new(config: SessionConfig, platform: Arc<dyn SensorPlatform>) -> Self {
        Self {
            config,
            platform,
            bridge: Arc::new(BridgeConnection::new()),
            active: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Replace the configuration used by the next session.
    pub fn set_config(&mut self, config: SessionConfig) {
        self.config = config;
    }

    pub fn bridge(&self) -> &Arc<BridgeConnection> {
        &self.bridge
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn status(&self) -> SessionStatus {
        match &self.active {
            None => SessionStatus::Idle,
            Some(_) if self.bridge.is_connected() => SessionStatus::Active,
            Some(_) => SessionStatus::Degraded,
        }
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|s| s.id)
    }

    pub fn address(&self) -> Option<Ipv4Addr> {
        self.active.as_ref().map(|s| s.address)
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.active.as_ref().map(|s| s.started.elapsed())
    }

    pub fn stats(&self) -> Option<DispatchStats> {
        self.active.as_ref().map(|s| s.dispatcher.stats())
    }

    /// Channels that went live per source in the running session.
    pub fn live_sources(&self) -> Vec<(SourceKind, Vec<Channel>)> {
        self.active
            .as_ref()
            .map(|s| {
                s.sources
                    .iter()
                    .map(|src| (src.kind(), src.live_channels()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Topics advertised with each session.
    pub fn topics(&self) -> Vec<TopicKind> {
        topics_for(&self.config.sources)
    }

    /// Subscribe to an inbound topic on the running session's connection.
    pub fn subscribe(&self, topic: &str) -> Result<(), SessionError> {
        if self.active.is_none() {
            return Err(BridgeError::NotConnected.into());
        }
        Ok(self.bridge.subscribe_to_topic(topic)?)
    }

    /// Start streaming to the rosbridge server at `address`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyActive`] while a session is running.
    /// - [`SessionError::InvalidAddress`] before any network activity.
    /// - [`SessionError::ConnectTimeout`] / [`SessionError::ConnectFailed`]
    ///   when the server cannot be reached; no source is started.
    pub async fn start_session(&mut self, address: &str) -> Result<(), SessionError> {
        if self.active.is_some() {
            return Err(SessionError::AlreadyActive);
        }
        let ip = validate_address(address)?;

        let id = Uuid::new_v4();
        let span = info_span!("session", session_id = %id, address = %ip);
        let started = self.open(ip).instrument(span.clone()).await;

        match started {
            Ok((sources, dispatcher)) => {
                self.active = Some(ActiveSession {
                    id,
                    address: ip,
                    started: Instant::now(),
                    span,
                    sources,
                    dispatcher,
                });
                Ok(())
            }
            Err(e) => {
                self.bridge.close().instrument(span.clone()).await;
                span.in_scope(|| warn!(error = %e, "session failed to start"));
                Err(e)
            }
        }
    }

    async fn open(&self, ip: Ipv4Addr) -> Result<(Vec<EventSource>, Dispatcher), SessionError> {
        let host = ip.to_string();
        let url = format!("ws://{host}:{}", self.config.port);

        self.bridge.connect(&host, self.config.port)?;
        match self.bridge.wait_until_settled(self.config.connect_timeout).await {
            Some(ConnectionState::Connected) => {}
            Some(_) => return Err(SessionError::ConnectFailed(url)),
            None => {
                return Err(SessionError::connect_timeout(url, self.config.connect_timeout));
            }
        }

        for topic in self.topics() {
            self.bridge
                .advertise_topic(topic.name(), topic.ros_type(self.config.type_naming))?;
        }
        tokio::time::sleep(self.config.settle_delay).await;
        if !self.bridge.is_connected() {
            return Err(SessionError::ConnectFailed(url));
        }

        let publisher: Arc<dyn Publisher> = self.bridge.clone();
        let dispatcher = Dispatcher::spawn(publisher);
        let mut sources = Vec::with_capacity(self.config.sources.len());
        let mut live = 0;
        for &kind in &self.config.sources {
            let mut source = EventSource::new(kind, Arc::clone(&self.platform));
            live += source.start(dispatcher.sink()).await;
            sources.push(source);
        }

        info!(url = %url, sources = sources.len(), live_channels = live, "session started");
        Ok((sources, dispatcher))
    }

    /// Stop the running session.  Idempotent; returns the final dispatcher
    /// statistics when a session was running.
    pub async fn stop_session(&mut self) -> Option<DispatchStats> {
        let session = self.active.take()?;
        let span = session.span.clone();
        let stats = self.close_session(session).instrument(span).await;
        Some(stats)
    }

    async fn close_session(&self, session: ActiveSession) -> DispatchStats {
        let ActiveSession {
            started,
            mut sources,
            dispatcher,
            ..
        } = session;

        for source in &mut sources {
            source.stop().await;
        }
        let stats = dispatcher.shutdown().await;
        self.bridge.close().await;

        info!(
            uptime_s = started.elapsed().as_secs(),
            readings = stats.readings,
            "session stopped"
        );
        stats
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
