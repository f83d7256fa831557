//! Observatory pose and timing model.
//!
//! The sequencer never computes durations itself. It asks an
//! [`ObservatoryModel`] how long the slew to a target takes, how the visit
//! is laid out, and what the airmass is, and the model keeps track of where
//! the telescope points and which filter is in the beam.
//!
//! [`KinematicObservatory`] is the shipped model: constant-speed slews
//! along the great circle, a settle time, a filter change that runs in
//! parallel with the slew, and a visit made of back-to-back exposures with
//! shutter and readout overheads.

use chrono::{DateTime, TimeDelta, Utc};
use socs_types::{Filter, ObservatoryState, Target};
use tracing::warn;

use crate::clock::{delta_to_seconds, seconds_to_delta};
use crate::config::{CameraConfig, ObservatoryConfig, SlewConfig};

/// Julian date of the Unix epoch.
const UNIX_EPOCH_JD: f64 = 2_440_587.5;

/// Julian date of J2000.0.
const J2000_JD: f64 = 2_451_545.0;

/// Seconds per day.
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Airmass is evaluated no lower than this altitude, in degrees.
const MIN_ALTITUDE_DEG: f64 = 5.0;

/// One activity contributing to a slew.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityDelay {
    /// Activity name.
    pub name: &'static str,
    /// Activity duration in seconds.
    pub delay: f64,
    /// Whether the activity determines the slew duration.
    pub in_critical_path: bool,
}

/// Result of slewing to a target.
#[derive(Debug, Clone, PartialEq)]
pub struct SlewOutcome {
    /// Total slew duration.
    pub duration: TimeDelta,
    /// Angular distance travelled in degrees.
    pub distance: f64,
    /// Activities that made up the slew.
    pub activities: Vec<ActivityDelay>,
    /// Pose before the slew.
    pub initial: ObservatoryState,
    /// Pose after the slew.
    pub final_state: ObservatoryState,
}

/// Layout of a visit.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitPlan {
    /// Shutter-open time of each exposure, in seconds.
    pub exposure_times: Vec<f64>,
    /// Start of each exposure relative to the visit start.
    pub exposure_offsets: Vec<TimeDelta>,
    /// Total visit duration.
    pub duration: TimeDelta,
}

/// Observatory pose and timing model.
pub trait ObservatoryModel {
    /// Pose at `at`. Pure.
    fn state(&self, at: DateTime<Utc>) -> ObservatoryState;

    /// Slew to `target` starting at `at` and update the pose.
    fn slew(&mut self, target: &Target, at: DateTime<Utc>) -> SlewOutcome;

    /// Lay out the visit for `target`. Pure.
    fn plan_visit(&self, target: &Target) -> VisitPlan;

    /// Airmass of a sky position at `at`. Pure.
    fn airmass(&self, ra: f64, dec: f64, at: DateTime<Utc>) -> f64;

    /// Take `filter` out of the carousel and load a stored one in its
    /// place. Returns whether a swap happened.
    fn swap_filter(&mut self, filter: Filter) -> bool;

    /// Stop tracking and return to the park position.
    fn park(&mut self) {}
}

/// Constant-speed slewing observatory at a fixed site.
#[derive(Debug, Clone, PartialEq)]
pub struct KinematicObservatory {
    latitude: f64,
    longitude: f64,
    slew_config: SlewConfig,
    camera: CameraConfig,
    park_position: (f64, f64),
    ra: f64,
    dec: f64,
    angle: f64,
    filter: Filter,
    tracking: bool,
    mounted: Vec<Filter>,
    unmounted: Vec<Filter>,
}

impl KinematicObservatory {
    /// Create a parked observatory from the `observatory` config section.
    pub fn from_config(config: &ObservatoryConfig) -> Self {
        Self {
            latitude: config.site.latitude,
            longitude: config.site.longitude,
            slew_config: config.slew.clone(),
            camera: config.camera.clone(),
            park_position: (config.park.ra, config.park.dec),
            ra: config.park.ra,
            dec: config.park.dec,
            angle: 0.0,
            filter: config.filters.initial,
            tracking: false,
            mounted: config.filters.mounted.clone(),
            unmounted: config.filters.unmounted.clone(),
        }
    }

    /// Filter currently in the beam.
    pub const fn filter(&self) -> Filter {
        self.filter
    }

    /// Filters loaded in the carousel.
    pub fn mounted_filters(&self) -> &[Filter] {
        &self.mounted
    }

    /// Altitude and azimuth of a sky position at `at`, in degrees.
    pub fn alt_az(&self, ra: f64, dec: f64, at: DateTime<Utc>) -> (f64, f64) {
        let lst = local_sidereal_degrees(at, self.longitude);
        let hour_angle = (lst - ra).to_radians();
        let dec = dec.to_radians();
        let lat = self.latitude.to_radians();

        let sin_alt = dec
            .sin()
            .mul_add(lat.sin(), dec.cos() * lat.cos() * hour_angle.cos())
            .clamp(-1.0, 1.0);
        let alt = sin_alt.asin();
        let az = (-hour_angle.sin() * dec.cos())
            .atan2(lat.cos().mul_add(dec.sin(), -(lat.sin() * dec.cos() * hour_angle.cos())));

        (alt.to_degrees(), az.to_degrees().rem_euclid(360.0))
    }
}

impl ObservatoryModel for KinematicObservatory {
    fn state(&self, at: DateTime<Utc>) -> ObservatoryState {
        let (alt, az) = self.alt_az(self.ra, self.dec, at);
        ObservatoryState {
            timestamp: at,
            ra: self.ra,
            dec: self.dec,
            angle: self.angle,
            alt,
            az,
            filter: self.filter,
            tracking: self.tracking,
            mounted_filters: self.mounted.clone(),
            unmounted_filters: self.unmounted.clone(),
        }
    }

    fn slew(&mut self, target: &Target, at: DateTime<Utc>) -> SlewOutcome {
        let initial = self.state(at);
        let distance = angular_distance(self.ra, self.dec, target.ra, target.dec);

        let telescope = distance / self.slew_config.telescope_speed_deg_per_sec;
        let settle = if distance > 0.0 {
            self.slew_config.settle_time_secs
        } else {
            0.0
        };
        let filter_change = if target.filter == self.filter {
            0.0
        } else {
            self.slew_config.filter_change_secs
        };
        let mechanical = telescope + settle;
        let filter_bound = filter_change > mechanical;

        let mut activities = vec![ActivityDelay {
            name: "telescope",
            delay: telescope,
            in_critical_path: !filter_bound,
        }];
        if settle > 0.0 {
            activities.push(ActivityDelay {
                name: "settle",
                delay: settle,
                in_critical_path: !filter_bound,
            });
        }
        if filter_change > 0.0 {
            activities.push(ActivityDelay {
                name: "filter",
                delay: filter_change,
                in_critical_path: filter_bound,
            });
        }

        if target.filter != self.filter && !self.mounted.contains(&target.filter) {
            warn!(
                filter = %target.filter,
                target_id = %target.target_id,
                "Requested filter is not mounted"
            );
        }

        let duration = seconds_to_delta(mechanical.max(filter_change));
        self.ra = target.ra;
        self.dec = target.dec;
        self.angle = target.angle;
        self.filter = target.filter;
        self.tracking = true;

        let end = at.checked_add_signed(duration).unwrap_or(at);
        SlewOutcome {
            duration,
            distance,
            activities,
            initial,
            final_state: self.state(end),
        }
    }

    fn plan_visit(&self, target: &Target) -> VisitPlan {
        let count = usize::try_from(target.num_exposures.min(self.camera.max_exposures))
            .unwrap_or_default();
        let exposure_times: Vec<f64> = (0..count)
            .map(|i| {
                target
                    .exposure_times
                    .get(i)
                    .copied()
                    .unwrap_or(self.camera.default_exposure_secs)
            })
            .collect();

        let mut exposure_offsets = Vec::with_capacity(exposure_times.len());
        let mut elapsed = 0.0;
        for (i, exposure) in exposure_times.iter().enumerate() {
            if i > 0 {
                elapsed += self.camera.readout_secs;
            }
            exposure_offsets.push(seconds_to_delta(elapsed));
            elapsed += exposure + self.camera.shutter_secs;
        }

        VisitPlan {
            exposure_times,
            exposure_offsets,
            duration: seconds_to_delta(elapsed),
        }
    }

    fn airmass(&self, ra: f64, dec: f64, at: DateTime<Utc>) -> f64 {
        let (alt, _) = self.alt_az(ra, dec, at);
        1.0 / alt.max(MIN_ALTITUDE_DEG).to_radians().sin()
    }

    fn swap_filter(&mut self, filter: Filter) -> bool {
        let Some(slot) = self.mounted.iter_mut().find(|f| **f == filter) else {
            warn!(filter = %filter, "Cannot unmount a filter that is not mounted");
            return false;
        };
        if self.unmounted.is_empty() {
            warn!(filter = %filter, "No stored filter to swap in");
            return false;
        }
        let replacement = self.unmounted.remove(0);
        let removed = std::mem::replace(slot, replacement);
        self.unmounted.push(removed);
        if self.filter == removed {
            self.filter = replacement;
        }
        true
    }

    fn park(&mut self) {
        (self.ra, self.dec) = self.park_position;
        self.tracking = false;
    }
}

/// Great-circle distance between two sky positions, in degrees.
pub fn angular_distance(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let (ra1, dec1, ra2, dec2) = (
        ra1.to_radians(),
        dec1.to_radians(),
        ra2.to_radians(),
        dec2.to_radians(),
    );
    let half_ddec = ((dec2 - dec1) / 2.0).sin();
    let half_dra = ((ra2 - ra1) / 2.0).sin();
    let h = (dec1.cos() * dec2.cos() * half_dra).mul_add(half_dra, half_ddec * half_ddec);
    (2.0 * h.clamp(0.0, 1.0).sqrt().asin()).to_degrees()
}

/// Local mean sidereal time in degrees.
fn local_sidereal_degrees(at: DateTime<Utc>, longitude: f64) -> f64 {
    let days = delta_to_seconds(TimeDelta::microseconds(at.timestamp_micros())) / SECONDS_PER_DAY;
    let jd = days + UNIX_EPOCH_JD;
    let gmst = 360.985_647_366_29_f64.mul_add(jd - J2000_JD, 280.460_618_37);
    (gmst + longitude).rem_euclid(360.0)
}
