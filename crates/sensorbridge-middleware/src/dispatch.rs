//! Single-consumer dispatcher: readings in, envelopes out.
//!
//! Every [`Delivery`] from every event source funnels through one bounded
//! channel into one task.  That task is the only place where
//! [`EnvelopeState`] and the [`OdometryIntegrator`] are mutated, and the
//! only caller of the [`Publisher`], so envelopes of a topic leave in the
//! order their readings arrived.
//!
//! Emission rules:
//!
//! | Reading | State update | Envelope |
//! |---|---|---|
//! | linear acceleration | replace vector | `/imu/data` |
//! | angular velocity | replace vector | `/imu/data` |
//! | attitude | replace quaternion (normalized) | `/odom` |
//! | location | feed odometry integrator | `/gps/fix` |
//! | step counter | – | `/step_counter` |

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sensorbridge_hal::Delivery;
use sensorbridge_perception::{GpsVelocity, OdometryIntegrator};
use sensorbridge_types::{Channel, Quaternion, Reading, ReadingPayload, Vector3};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bridge::Publisher;
use crate::envelope::{
    Envelope, Stamp, encode_imu, encode_nav_sat_fix, encode_odometry, encode_step_count,
};
use crate::topics::TopicKind;

/// Capacity of the reading channel feeding the dispatcher.
pub const DISPATCH_CAPACITY: usize = 256;

// ────────────────────────────────────────────────────────────────────────────
// Envelope state
// ────────────────────────────────────────────────────────────────────────────

/// Latest value of every field shared between envelopes.
///
/// Fields no reading has supplied yet keep their defaults: zero vectors and
/// the identity quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EnvelopeState {
    pub linear_acceleration: Vector3,
    pub angular_velocity: Vector3,
    pub orientation: Quaternion,
}

/// Turns readings into envelopes.  Holds all per-session mutable state.
#[derive(Debug, Default)]
pub struct EnvelopeAssembler {
    state: EnvelopeState,
    odometry: OdometryIntegrator,
}

impl EnvelopeAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &EnvelopeState {
        &self.state
    }

    pub fn odometry(&self) -> &OdometryIntegrator {
        &self.odometry
    }

    /// Fold `reading` into the state and build the envelope it triggers.
    ///
    /// Returns `None` for degenerate attitudes and for readings whose payload
    /// does not match their channel.
    pub fn ingest(&mut self, reading: &Reading, stamp: Stamp) -> Option<Envelope> {
        match (reading.channel, reading.payload) {
            (Channel::LinearAcceleration, ReadingPayload::Vector(v)) => {
                self.state.linear_acceleration = v;
                Some(self.imu(stamp))
            }
            (Channel::AngularVelocity, ReadingPayload::Vector(v)) => {
                self.state.angular_velocity = v;
                Some(self.imu(stamp))
            }
            (Channel::Attitude, ReadingPayload::Attitude(q)) => {
                let Some(unit) = q.normalized() else {
                    debug!(?q, "degenerate attitude discarded");
                    return None;
                };
                self.state.orientation = unit;
                Some(Envelope::Odometry(encode_odometry(
                    stamp,
                    self.odometry.position(),
                    self.state.orientation,
                    self.odometry.linear_velocity(),
                    self.state.angular_velocity,
                )))
            }
            (Channel::Location, ReadingPayload::Fix(fix)) => {
                self.odometry.apply(GpsVelocity::from(&fix));
                Some(Envelope::NavSatFix(encode_nav_sat_fix(stamp, &fix)))
            }
            (Channel::StepCounter, ReadingPayload::Count(total)) => {
                Some(Envelope::StepCount(encode_step_count(total)))
            }
            (channel, payload) => {
                warn!(channel = %channel, ?payload, "reading payload does not match its channel");
                None
            }
        }
    }

    fn imu(&self, stamp: Stamp) -> Envelope {
        Envelope::Imu(encode_imu(
            stamp,
            self.state.orientation,
            self.state.angular_velocity,
            self.state.linear_acceleration,
        ))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Statistics
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Readings admitted and processed.
    pub readings: u64,
    /// Readings refused because their source had stopped.
    pub discarded: u64,
    /// Envelopes the publisher refused (not connected or queue full).
    pub dropped: u64,
    pub imu: u64,
    pub nav_sat_fix: u64,
    pub odometry: u64,
    pub step_count: u64,
}

impl DispatchStats {
    /// Envelopes handed to the publisher on `topic`.
    pub fn published(&self, topic: TopicKind) -> u64 {
        match topic {
            TopicKind::Imu => self.imu,
            TopicKind::NavSatFix => self.nav_sat_fix,
            TopicKind::Odometry => self.odometry,
            TopicKind::StepCount => self.step_count,
        }
    }

    fn record_published(&mut self, topic: TopicKind) {
        match topic {
            TopicKind::Imu => self.imu += 1,
            TopicKind::NavSatFix => self.nav_sat_fix += 1,
            TopicKind::Odometry => self.odometry += 1,
            TopicKind::StepCount => self.step_count += 1,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ────────────────────────────────────────────────────────────────────────────

pub struct Dispatcher {
    sink: mpsc::Sender<Delivery>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    stats: Arc<Mutex<DispatchStats>>,
}

impl Dispatcher {
    /// Spawn the dispatcher task with a fresh [`EnvelopeAssembler`].
    pub fn spawn(publisher: Arc<dyn Publisher>) -> Self {
        let (sink, rx) = mpsc::channel(DISPATCH_CAPACITY);
        let (stop, stop_rx) = oneshot::channel();
        let stats = Arc::new(Mutex::new(DispatchStats::default()));
        let task = tokio::spawn(run(rx, stop_rx, publisher, Arc::clone(&stats)));
        info!("dispatcher started");
        Self {
            sink,
            stop: Some(stop),
            task,
            stats,
        }
    }

    /// Sender handed to event sources.
    pub fn sink(&self) -> mpsc::Sender<Delivery> {
        self.sink.clone()
    }

    pub fn stats(&self) -> DispatchStats {
        *lock_stats(&self.stats)
    }

    /// Stop consuming, drop whatever is still queued and join the task.
    pub async fn shutdown(mut self) -> DispatchStats {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "dispatcher task ended abnormally");
        }
        let stats = self.stats();
        info!(
            readings = stats.readings,
            discarded = stats.discarded,
            dropped = stats.dropped,
            "dispatcher stopped"
        );
        stats
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn lock_stats(stats: &Mutex<DispatchStats>) -> MutexGuard<'_, DispatchStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run(
    mut rx: mpsc::Receiver<Delivery>,
    mut stop_rx: oneshot::Receiver<()>,
    publisher: Arc<dyn Publisher>,
    stats: Arc<Mutex<DispatchStats>>,
) {
    let mut assembler = EnvelopeAssembler::new();

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            delivery = rx.recv() => {
                let Some(Delivery { gate, reading }) = delivery else {
                    break;
                };
                let admitted = gate.admit(|| {
                    let mut stats = lock_stats(&stats);
                    stats.readings += 1;
                    if let Some(envelope) = assembler.ingest(&reading, Stamp::now()) {
                        if publisher.publish(&envelope) {
                            stats.record_published(envelope.topic());
                        } else {
                            stats.dropped += 1;
                        }
                    }
                });
                if admitted.is_none() {
                    debug!(channel = %reading.channel, "reading from stopped source discarded");
                    lock_stats(&stats).discarded += 1;
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use sensorbridge_hal::scripted::ScriptedPlatform;
    use sensorbridge_hal::{EventSource, SourceKind};
    use sensorbridge_types::GpsFix;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        envelopes: Mutex<Vec<Envelope>>,
    }

    impl Recorder {
        fn taken(&self) -> Vec<Envelope> {
            self.envelopes.lock().unwrap().clone()
        }
    }

    impl Publisher for Recorder {
        fn publish(&self, envelope: &Envelope) -> bool {
            self.envelopes.lock().unwrap().push(envelope.clone());
            true
        }
    }

    fn stamp() -> Stamp {
        Stamp { secs: 1, nsecs: 0 }
    }

    fn fix(speed: f64, bearing: f64, t_ms: i64) -> Reading {
        Reading::location(GpsFix {
            latitude: 25.0,
            longitude: 121.0,
            altitude: 5.0,
            speed_mps: speed,
            bearing_deg: bearing,
            fix_time_ms: t_ms,
        })
    }

    async fn wait_for_stats(dispatcher: &Dispatcher, done: impl Fn(&DispatchStats) -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !done(&dispatcher.stats()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("dispatcher stats did not converge");
    }

    #[test]
    fn imu_before_attitude_carries_identity() {
        let mut assembler = EnvelopeAssembler::new();
        let reading = Reading::angular_velocity(Vector3::new(0.0, 0.0, 0.5));

        let Some(Envelope::Imu(imu)) = assembler.ingest(&reading, stamp()) else {
            panic!("angular velocity must emit Imu");
        };
        assert_eq!(imu.orientation, Quaternion::IDENTITY);
        assert_eq!(imu.angular_velocity.z, 0.5);
        assert_eq!(imu.linear_acceleration, Vector3::ZERO);
    }

    #[test]
    fn imu_combines_latest_vectors() {
        let mut assembler = EnvelopeAssembler::new();
        assembler.ingest(&Reading::angular_velocity(Vector3::new(1.0, 0.0, 0.0)), stamp());
        let Some(Envelope::Imu(imu)) =
            assembler.ingest(&Reading::linear_acceleration(Vector3::new(0.0, 2.0, 0.0)), stamp())
        else {
            panic!("linear acceleration must emit Imu");
        };
        assert_eq!(imu.angular_velocity.x, 1.0);
        assert_eq!(imu.linear_acceleration.y, 2.0);
    }

    #[test]
    fn attitude_emits_odometry_only() {
        let mut assembler = EnvelopeAssembler::new();
        let q = Quaternion::new(0.0, 0.0, 2.0, 2.0);

        let Some(Envelope::Odometry(odom)) = assembler.ingest(&Reading::attitude(q), stamp())
        else {
            panic!("attitude must emit Odometry");
        };
        let stored = odom.pose.pose.orientation;
        assert!((stored.norm() - 1.0).abs() < 1e-12);
        assert_eq!(assembler.state().orientation, stored);

        // The next Imu picks up the new orientation.
        let Some(Envelope::Imu(imu)) =
            assembler.ingest(&Reading::angular_velocity(Vector3::ZERO), stamp())
        else {
            panic!("expected Imu");
        };
        assert_eq!(imu.orientation, stored);
    }

    #[test]
    fn degenerate_attitude_is_discarded() {
        let mut assembler = EnvelopeAssembler::new();
        let reading = Reading::attitude(Quaternion::new(0.0, 0.0, 0.0, 0.0));
        assert!(assembler.ingest(&reading, stamp()).is_none());
        assert_eq!(assembler.state().orientation, Quaternion::IDENTITY);
    }

    #[test]
    fn location_feeds_odometry_pose_and_twist() {
        let mut assembler = EnvelopeAssembler::new();
        assert!(matches!(
            assembler.ingest(&fix(10.0, 90.0, 0), stamp()),
            Some(Envelope::NavSatFix(_))
        ));
        assembler.ingest(&fix(10.0, 90.0, 1_000), stamp());
        assembler.ingest(&Reading::angular_velocity(Vector3::new(0.0, 0.0, 0.2)), stamp());

        let Some(Envelope::Odometry(odom)) =
            assembler.ingest(&Reading::attitude(Quaternion::IDENTITY), stamp())
        else {
            panic!("expected Odometry");
        };
        let p = odom.pose.pose.position;
        assert!((p.y - 10.0).abs() < 1e-9);
        assert!(p.x.abs() < 1e-9);
        let linear = odom.twist.twist.linear;
        assert!((linear.y - 10.0).abs() < 1e-9);
        assert_eq!(odom.twist.twist.angular.z, 0.2);
    }

    #[test]
    fn mismatched_payload_is_ignored() {
        let mut assembler = EnvelopeAssembler::new();
        let mut reading = Reading::step_count(3);
        reading.channel = Channel::Attitude;
        assert!(assembler.ingest(&reading, stamp()).is_none());
    }

    #[tokio::test]
    async fn dispatcher_publishes_in_delivery_order() {
        let platform = Arc::new(ScriptedPlatform::new());
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::spawn(recorder.clone());
        let mut source = EventSource::new(SourceKind::StepCount, platform.clone());
        source.start(dispatcher.sink()).await;

        for total in 1..=5 {
            platform.push(Reading::step_count(total));
        }
        wait_for_stats(&dispatcher, |s| s.step_count == 5).await;

        let counts: Vec<i32> = recorder
            .taken()
            .into_iter()
            .map(|e| match e {
                Envelope::StepCount(m) => m.data,
                other => panic!("unexpected envelope {other:?}"),
            })
            .collect();
        assert_eq!(counts, vec![1, 2, 3, 4, 5]);

        source.stop().await;
        let stats = dispatcher.shutdown().await;
        assert_eq!(stats.readings, 5);
        assert_eq!(stats.published(TopicKind::StepCount), 5);
    }

    #[tokio::test]
    async fn queued_reading_from_stopped_source_is_discarded() {
        let platform = Arc::new(ScriptedPlatform::new());
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::spawn(recorder.clone());

        // Hold the delivery back so it is still queued when the source stops.
        let (hold_tx, mut hold_rx) = mpsc::channel(4);
        let mut source = EventSource::new(SourceKind::Inertial, platform.clone());
        source.start(hold_tx).await;
        platform.push(Reading::linear_acceleration(Vector3::new(0.0, 0.0, 1.0)));
        let held = hold_rx.recv().await.unwrap();

        source.stop().await;
        dispatcher.sink().send(held).await.unwrap();

        wait_for_stats(&dispatcher, |s| s.discarded == 1).await;
        assert!(recorder.taken().is_empty());
        assert_eq!(dispatcher.stats().readings, 0);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn refused_envelopes_are_counted_as_dropped() {
        struct Refuser;
        impl Publisher for Refuser {
            fn publish(&self, _envelope: &Envelope) -> bool {
                false
            }
        }

        let platform = Arc::new(ScriptedPlatform::new());
        let dispatcher = Dispatcher::spawn(Arc::new(Refuser));
        let mut source = EventSource::new(SourceKind::Location, platform.clone());
        source.start(dispatcher.sink()).await;

        platform.push(fix(1.0, 0.0, 0));
        wait_for_stats(&dispatcher, |s| s.dropped == 1).await;
        assert_eq!(dispatcher.stats().nav_sat_fix, 0);

        source.stop().await;
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_joins_while_sink_clone_alive() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::spawn(recorder);
        let _sink = dispatcher.sink();

        let stats = tokio::time::timeout(Duration::from_secs(1), dispatcher.shutdown())
            .await
            .expect("shutdown must not wait for senders");
        assert_eq!(stats, DispatchStats::default());
    }
}
