//! In-process simulated platform for headless runs without a phone.
//!
//! [`SimPlatform`] synthesises a pedestrian walking a circle of fixed radius
//! around a reference coordinate and serves every channel from a Tokio
//! interval task:
//!
//! | Channel | Synthetic signal |
//! |---|---|
//! | linear acceleration | centripetal acceleration plus a vertical step bob |
//! | angular velocity | constant yaw rate of the circle |
//! | attitude | yaw quaternion tangent to the circle |
//! | location | lat/lon on the circle, walking speed, bearing |
//! | step counter | cumulative steps at cadence |
//!
//! A rate of `0.0` makes the channel unavailable, which is how degraded
//! devices are simulated.  Rates slower than one tick per day are refused
//! as well; rates faster than 1 GHz run at a 1 ns period.
//!
//! # Example
//!
//! ```rust
//! use sensorbridge_hal::sim::{SimPlatform, SimRates};
//! use sensorbridge_hal::SensorPlatform;
//! use sensorbridge_types::Channel;
//!
//! let platform = SimPlatform::new(SimRates { step_hz: 0.0, ..SimRates::default() });
//! assert!(!platform.is_available(Channel::StepCounter));
//! assert!(platform.is_available(Channel::Location));
//! ```

use std::collections::HashMap;
use std::f64::consts::{PI, TAU};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use sensorbridge_types::{Channel, GpsFix, HalError, Quaternion, Reading, Vector3};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::platform::{ReadingStream, SensorPlatform};

const METERS_PER_DEGREE_LAT: f64 = 111_320.0;
const WALK_SPEED_MPS: f64 = 1.4;
const CIRCLE_RADIUS_M: f64 = 20.0;
const STEP_CADENCE_HZ: f64 = 1.8;
const FEED_CAPACITY: usize = 64;
const MIN_PERIOD: Duration = Duration::from_nanos(1);
const MAX_PERIOD: Duration = Duration::from_secs(86_400);

/// Per-channel output rates in Hz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimRates {
    pub imu_hz: f64,
    pub attitude_hz: f64,
    pub gps_hz: f64,
    pub step_hz: f64,
}

impl Default for SimRates {
    fn default() -> Self {
        Self {
            imu_hz: 50.0,
            attitude_hz: 20.0,
            gps_hz: 1.0,
            step_hz: 1.0,
        }
    }
}

/// Kinematic state of the simulated walker at time `t`.
#[derive(Debug, Clone, Copy)]
struct Walker {
    origin_lat: f64,
    origin_lon: f64,
}

impl Walker {
    fn yaw_rate(&self) -> f64 {
        WALK_SPEED_MPS / CIRCLE_RADIUS_M
    }

    fn phase(&self, t: f64) -> f64 {
        self.yaw_rate() * t
    }

    fn heading(&self, t: f64) -> f64 {
        (self.phase(t) + PI / 2.0).rem_euclid(TAU)
    }

    fn sample(&self, channel: Channel, t: f64) -> Reading {
        match channel {
            Channel::LinearAcceleration => {
                let theta = self.phase(t);
                let centripetal = WALK_SPEED_MPS * WALK_SPEED_MPS / CIRCLE_RADIUS_M;
                let bob = 0.3 * (TAU * STEP_CADENCE_HZ * t).sin();
                Reading::linear_acceleration(Vector3::new(
                    -centripetal * theta.cos(),
                    -centripetal * theta.sin(),
                    bob,
                ))
            }
            Channel::AngularVelocity => {
                Reading::angular_velocity(Vector3::new(0.0, 0.0, self.yaw_rate()))
            }
            Channel::Attitude => {
                let half = self.heading(t) / 2.0;
                Reading::attitude(Quaternion::new(0.0, 0.0, half.sin(), half.cos()))
            }
            Channel::Location => {
                let theta = self.phase(t);
                let east = CIRCLE_RADIUS_M * theta.cos();
                let north = CIRCLE_RADIUS_M * theta.sin();
                let latitude = self.origin_lat + north / METERS_PER_DEGREE_LAT;
                let longitude = self.origin_lon
                    + east / (METERS_PER_DEGREE_LAT * self.origin_lat.to_radians().cos());
                Reading::location(GpsFix {
                    latitude,
                    longitude,
                    altitude: 10.0,
                    speed_mps: WALK_SPEED_MPS,
                    bearing_deg: self.heading(t).to_degrees(),
                    fix_time_ms: (t * 1000.0) as i64,
                })
            }
            Channel::StepCounter => Reading::step_count((t * STEP_CADENCE_HZ) as u64),
        }
    }
}

/// Synthetic platform backed by Tokio interval tasks.
pub struct SimPlatform {
    rates: SimRates,
    walker: Walker,
    epoch: Instant,
    generators: Mutex<HashMap<Channel, JoinHandle<()>>>,
}

impl SimPlatform {
    pub fn new(rates: SimRates) -> Self {
        Self {
            rates,
            walker: Walker {
                origin_lat: 25.0330,
                origin_lon: 121.5654,
            },
            epoch: Instant::now(),
            generators: Mutex::new(HashMap::new()),
        }
    }

    /// Centre the walking circle on the given coordinate (builder-style).
    pub fn with_origin(mut self, latitude: f64, longitude: f64) -> Self {
        self.walker = Walker {
            origin_lat: latitude,
            origin_lon: longitude,
        };
        self
    }

    fn rate(&self, channel: Channel) -> f64 {
        match channel {
            Channel::LinearAcceleration | Channel::AngularVelocity => self.rates.imu_hz,
            Channel::Attitude => self.rates.attitude_hz,
            Channel::Location => self.rates.gps_hz,
            Channel::StepCounter => self.rates.step_hz,
        }
    }

    /// Tick period for `channel`, or `None` when its rate cannot be served.
    fn period(&self, channel: Channel) -> Option<Duration> {
        let hz = self.rate(channel);
        if !hz.is_finite() || hz <= 0.0 {
            return None;
        }
        let period = Duration::try_from_secs_f64(1.0 / hz).ok()?.max(MIN_PERIOD);
        (period <= MAX_PERIOD).then_some(period)
    }

    fn generators(&self) -> MutexGuard<'_, HashMap<Channel, JoinHandle<()>>> {
        self.generators.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SensorPlatform for SimPlatform {
    fn is_available(&self, channel: Channel) -> bool {
        self.period(channel).is_some()
    }

    async fn start_channel(&self, channel: Channel) -> Result<ReadingStream, HalError> {
        let Some(period) = self.period(channel) else {
            return Err(HalError::ChannelUnavailable(channel));
        };
        let walker = self.walker;
        let epoch = self.epoch;
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);

        let generator = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let t = epoch.elapsed().as_secs_f64();
                if tx.send(walker.sample(channel, t)).await.is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = self.generators().insert(channel, generator) {
            previous.abort();
        }
        debug!(channel = %channel, period_ns = u64::try_from(period.as_nanos()).unwrap_or(u64::MAX), "sim channel started");

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|reading| (reading, rx))
        })
        .boxed())
    }

    async fn stop_channel(&self, channel: Channel) {
        let generator = self.generators().remove(&channel);
        if let Some(generator) = generator {
            generator.abort();
            let _ = generator.await;
            debug!(channel = %channel, "sim channel stopped");
        }
    }
}
