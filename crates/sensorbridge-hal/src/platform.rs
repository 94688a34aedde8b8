//! Generic `SensorPlatform` trait for the host's motion and location
//! subsystem.
//!
//! The bridge never talks to sensor drivers directly.  Platforms implement
//! this trait and hand out one [`ReadingStream`] per physical [`Channel`];
//! [`EventSource`][crate::source::EventSource] is the only caller.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use sensorbridge_types::{Channel, HalError, Reading};

/// Live feed of readings for one channel.  The stream ends once the channel
/// is stopped.
pub type ReadingStream = BoxStream<'static, Reading>;

/// Capability-typed event feed offered by the host platform.
#[async_trait]
pub trait SensorPlatform: Send + Sync {
    /// Whether the device has the hardware backing `channel`.
    fn is_available(&self, channel: Channel) -> bool;

    /// Subscribe to `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::ChannelUnavailable`] when the device lacks the
    /// channel and [`HalError::Platform`] when the subscription is refused.
    async fn start_channel(&self, channel: Channel) -> Result<ReadingStream, HalError>;

    /// Tear down the subscription for `channel`.  Once this returns the
    /// platform delivers nothing further on it.  No-op for channels that are
    /// not running.
    async fn stop_channel(&self, channel: Channel);
}
