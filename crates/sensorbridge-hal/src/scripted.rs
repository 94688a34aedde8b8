//! [`ScriptedPlatform`] – hand-driven platform for tests.
//!
//! Readings are injected with [`ScriptedPlatform::push`] and forwarded to the
//! stream of the matching channel, if that channel is running.  Channels can
//! be declared missing to exercise degraded-capability paths.
//!
//! # Example
//!
//! ```rust
//! use sensorbridge_hal::scripted::ScriptedPlatform;
//! use sensorbridge_types::{Channel, Reading};
//!
//! let platform = ScriptedPlatform::new().without(Channel::StepCounter);
//! // Nothing is running yet, so the reading has nowhere to go.
//! assert!(!platform.push(Reading::step_count(3)));
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use sensorbridge_types::{Channel, HalError, Reading};
use tokio::sync::mpsc;

use crate::platform::{ReadingStream, SensorPlatform};

/// Platform whose readings are supplied by the caller.
#[derive(Default)]
pub struct ScriptedPlatform {
    missing: HashSet<Channel>,
    feeds: Mutex<HashMap<Channel, mpsc::UnboundedSender<Reading>>>,
    stops: Mutex<Vec<Channel>>,
}

impl ScriptedPlatform {
    /// Create a platform on which every channel is available.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `channel` as absent from the device (builder-style).
    pub fn without(mut self, channel: Channel) -> Self {
        self.missing.insert(channel);
        self
    }

    /// Deliver `reading` on its channel.
    ///
    /// Returns `false` when the channel is not running.
    pub fn push(&self, reading: Reading) -> bool {
        match lock(&self.feeds).get(&reading.channel) {
            Some(tx) => tx.send(reading).is_ok(),
            None => false,
        }
    }

    /// Whether `channel` currently has a live subscription.
    pub fn is_live(&self, channel: Channel) -> bool {
        lock(&self.feeds).contains_key(&channel)
    }

    /// Channels passed to `stop_channel`, in call order.
    pub fn stopped_channels(&self) -> Vec<Channel> {
        lock(&self.stops).clone()
    }
}

#[async_trait]
impl SensorPlatform for ScriptedPlatform {
    fn is_available(&self, channel: Channel) -> bool {
        !self.missing.contains(&channel)
    }

    async fn start_channel(&self, channel: Channel) -> Result<ReadingStream, HalError> {
        if !self.is_available(channel) {
            return Err(HalError::ChannelUnavailable(channel));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.feeds).insert(channel, tx);
        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|reading| (reading, rx))
        })
        .boxed())
    }

    async fn stop_channel(&self, channel: Channel) {
        // Dropping the sender ends the stream.
        lock(&self.feeds).remove(&channel);
        lock(&self.stops).push(channel);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorbridge_types::Vector3;

    #[tokio::test]
    async fn push_reaches_running_channel() {
        let platform = ScriptedPlatform::new();
        let mut feed = platform.start_channel(Channel::LinearAcceleration).await.unwrap();

        assert!(platform.push(Reading::linear_acceleration(Vector3::new(1.0, 2.0, 3.0))));

        let reading = feed.next().await.unwrap();
        assert_eq!(reading.channel, Channel::LinearAcceleration);
    }

    #[tokio::test]
    async fn push_to_idle_channel_is_rejected() {
        let platform = ScriptedPlatform::new();
        let _feed = platform.start_channel(Channel::Attitude).await.unwrap();
        assert!(!platform.push(Reading::step_count(1)));
    }

    #[tokio::test]
    async fn missing_channel_cannot_start() {
        let platform = ScriptedPlatform::new().without(Channel::Location);
        assert!(!platform.is_available(Channel::Location));
        assert!(platform.start_channel(Channel::Location).await.is_err());
    }

    #[tokio::test]
    async fn stop_ends_stream_and_is_recorded() {
        let platform = ScriptedPlatform::new();
        let mut feed = platform.start_channel(Channel::StepCounter).await.unwrap();
        platform.stop_channel(Channel::StepCounter).await;

        assert!(!platform.is_live(Channel::StepCounter));
        assert!(feed.next().await.is_none());
        assert_eq!(platform.stopped_channels(), vec![Channel::StepCounter]);
    }
}
