//! [`EventSource`] – per-variant activation of platform channels.
//!
//! Sources form a closed set tagged by [`SourceKind`].  The tag decides which
//! physical channels the source subscribes to:
//!
//! | Kind | Channels |
//! |---|---|
//! | [`SourceKind::Inertial`] | linear acceleration, angular velocity |
//! | [`SourceKind::Orientation`] | attitude |
//! | [`SourceKind::Location`] | location |
//! | [`SourceKind::StepCount`] | step counter |
//!
//! Every reading leaves the source wrapped in a [`Delivery`] that carries the
//! source's [`SourceGate`].  Consumers process a delivery only through
//! [`SourceGate::admit`], so once [`EventSource::stop`] returns nothing
//! attributable to that source is emitted, including readings still queued
//! downstream.

use std::sync::{Arc, PoisonError, RwLock};

use futures_util::StreamExt;
use sensorbridge_types::{Channel, Reading};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::platform::{ReadingStream, SensorPlatform};

/// Variant tag of an [`EventSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Inertial,
    Orientation,
    Location,
    StepCount,
}

impl SourceKind {
    /// Every source variant, in activation order.
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Inertial,
        SourceKind::Orientation,
        SourceKind::Location,
        SourceKind::StepCount,
    ];

    /// Physical channels this variant subscribes to.
    pub fn channels(self) -> &'static [Channel] {
        match self {
            SourceKind::Inertial => &[Channel::LinearAcceleration, Channel::AngularVelocity],
            SourceKind::Orientation => &[Channel::Attitude],
            SourceKind::Location => &[Channel::Location],
            SourceKind::StepCount => &[Channel::StepCounter],
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Inertial => write!(f, "inertial"),
            SourceKind::Orientation => write!(f, "orientation"),
            SourceKind::Location => write!(f, "location"),
            SourceKind::StepCount => write!(f, "step_count"),
        }
    }
}

/// Open/closed latch shared by a source and whoever consumes its readings.
///
/// Closing waits for any closure currently running under
/// [`admit`][Self::admit] to finish.
#[derive(Debug, Clone)]
pub struct SourceGate {
    open: Arc<RwLock<bool>>,
}

impl SourceGate {
    fn new() -> Self {
        Self {
            open: Arc::new(RwLock::new(true)),
        }
    }

    /// Run `f` if the gate is still open and return its result, or `None`
    /// when the source has been stopped.  `f` must not block.
    pub fn admit<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let open = self.open.read().unwrap_or_else(PoisonError::into_inner);
        if *open { Some(f()) } else { None }
    }

    pub fn is_open(&self) -> bool {
        *self.open.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        *self.open.write().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

/// A reading on its way downstream, tagged with its source's gate.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub gate: SourceGate,
    pub reading: Reading,
}

struct LiveChannel {
    channel: Channel,
    forwarder: JoinHandle<()>,
}

/// One activatable source of readings.
pub struct EventSource {
    kind: SourceKind,
    platform: Arc<dyn SensorPlatform>,
    gate: Option<SourceGate>,
    live: Vec<LiveChannel>,
}

impl EventSource {
    pub fn new(kind: SourceKind, platform: Arc<dyn SensorPlatform>) -> Self {
        Self {
            kind,
            platform,
            gate: None,
            live: Vec::new(),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn is_running(&self) -> bool {
        self.gate.is_some()
    }

    /// Channels that actually went live on the last [`start`][Self::start].
    pub fn live_channels(&self) -> Vec<Channel> {
        self.live.iter().map(|c| c.channel).collect()
    }

    /// Subscribe to every available channel of this variant and forward its
    /// readings into `sink`.
    ///
    /// Missing or refused channels are skipped; the source never fails
    /// outright.  Returns the number of channels that went live.  Calling
    /// `start` on a running source is a no-op.
    pub async fn start(&mut self, sink: mpsc::Sender<Delivery>) -> usize {
        if self.is_running() {
            return self.live.len();
        }

        let gate = SourceGate::new();
        for &channel in self.kind.channels() {
            if !self.platform.is_available(channel) {
                info!(source = %self.kind, channel = %channel, "channel unavailable on this device; skipping");
                continue;
            }
            match self.platform.start_channel(channel).await {
                Ok(feed) => {
                    let forwarder = tokio::spawn(forward(feed, gate.clone(), sink.clone()));
                    self.live.push(LiveChannel { channel, forwarder });
                }
                Err(e) => {
                    info!(source = %self.kind, channel = %channel, error = %e, "channel refused; skipping");
                }
            }
        }

        info!(source = %self.kind, live = self.live.len(), "event source started");
        self.gate = Some(gate);
        self.live.len()
    }

    /// Stop the source.
    ///
    /// Closes the delivery gate, joins every forwarding task and tears down
    /// each platform subscription before returning.  Idempotent.
    pub async fn stop(&mut self) {
        let Some(gate) = self.gate.take() else {
            return;
        };
        gate.close();

        for live in self.live.drain(..) {
            live.forwarder.abort();
            // The join reports cancellation; that is the expected outcome.
            let _ = live.forwarder.await;
            self.platform.stop_channel(live.channel).await;
        }
        info!(source = %self.kind, "event source stopped");
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.take() {
            gate.close();
        }
        for live in &self.live {
            live.forwarder.abort();
        }
    }
}

async fn forward(mut feed: ReadingStream, gate: SourceGate, sink: mpsc::Sender<Delivery>) {
    while let Some(reading) = feed.next().await {
        let delivery = Delivery {
            gate: gate.clone(),
            reading,
        };
        if sink.send(delivery).await.is_err() {
            debug!("reading sink closed; forwarder exiting");
            break;
        }
    }
}
