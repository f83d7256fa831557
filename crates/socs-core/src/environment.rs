//! Sky, cloud, and seeing models.
//!
//! The driver asks three questions of the environment: when does a night
//! start and end, how cloudy is it, and how good is the seeing. Each is a
//! trait so a run can swap in a different model; the shipped models are
//! simple:
//!
//! - [`FixedNightSkyModel`] places sunset at a fixed UTC offset and gives
//!   every night the same length.
//! - [`TabulatedCloudModel`] and [`TabulatedSeeingModel`] look values up in
//!   step-function tables keyed by seconds since the survey start.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use socs_types::Filter;

use crate::clock::seconds_to_delta;
use crate::config::{CloudConfig, EnvironmentSample, NightConfig, SeeingConfig};

/// Seconds per hour, for config conversions.
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Reference wavelength of the seeing tables, in nanometres.
const REFERENCE_WAVELENGTH_NM: f64 = 500.0;

/// Sunset and sunrise for one night.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NightBoundaries {
    /// Start of the observing night.
    pub sunset: DateTime<Utc>,
    /// End of the observing night.
    pub sunrise: DateTime<Utc>,
}

impl NightBoundaries {
    /// Length of the night.
    pub fn duration(&self) -> TimeDelta {
        self.sunrise.signed_duration_since(self.sunset)
    }
}

/// Twilight model.
pub trait SkyModel {
    /// Boundaries of the night that begins on `date`.
    fn night_boundaries(&self, date: NaiveDate) -> NightBoundaries;
}

/// Cloud model.
pub trait CloudModel {
    /// Cloud opacity (0.0 clear to 1.0 overcast) `elapsed` into the survey.
    fn cloud(&self, elapsed: TimeDelta) -> f64;
}

/// Seeing figures for one instant, filter, and airmass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeeingReading {
    /// Zenith atmospheric seeing at 500 nm, in arcseconds.
    pub fwhm_500: f64,
    /// Geometric FWHM, in arcseconds.
    pub fwhm_geometric: f64,
    /// Effective FWHM, in arcseconds.
    pub fwhm_effective: f64,
}

/// Seeing model.
pub trait SeeingModel {
    /// Seeing `elapsed` into the survey, through `filter` at `airmass`.
    fn seeing(&self, elapsed: TimeDelta, filter: Filter, airmass: f64) -> SeeingReading;
}

// ---------------------------------------------------------------------------
// Fixed night schedule
// ---------------------------------------------------------------------------

/// Every night starts at the same UTC offset and lasts the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedNightSkyModel {
    /// Sunset, after midnight UTC of the night's date.
    sunset_offset: TimeDelta,
    /// Night length.
    night_length: TimeDelta,
}

impl FixedNightSkyModel {
    /// Create a model from explicit offsets.
    pub const fn new(sunset_offset: TimeDelta, night_length: TimeDelta) -> Self {
        Self {
            sunset_offset,
            night_length,
        }
    }

    /// Create a model from the `environment.night` config section.
    pub fn from_config(config: &NightConfig) -> Self {
        Self::new(
            seconds_to_delta(config.sunset_hours_utc * SECONDS_PER_HOUR),
            seconds_to_delta(config.night_hours * SECONDS_PER_HOUR),
        )
    }
}

impl SkyModel for FixedNightSkyModel {
    fn night_boundaries(&self, date: NaiveDate) -> NightBoundaries {
        let midnight = date.and_time(NaiveTime::MIN).and_utc();
        let sunset = midnight
            .checked_add_signed(self.sunset_offset)
            .unwrap_or(midnight);
        let sunrise = sunset.checked_add_signed(self.night_length).unwrap_or(sunset);
        NightBoundaries { sunset, sunrise }
    }
}

// ---------------------------------------------------------------------------
// Step-function tables
// ---------------------------------------------------------------------------

/// Samples sorted by time; a lookup returns the latest sample at or before
/// the query, or the first sample for queries before the table starts.
#[derive(Debug, Clone, PartialEq)]
struct StepTable {
    samples: Vec<EnvironmentSample>,
}

impl StepTable {
    fn new(samples: &[EnvironmentSample]) -> Self {
        let mut samples = samples.to_vec();
        samples.sort_by_key(|s| s.elapsed_secs);
        Self { samples }
    }

    fn lookup(&self, elapsed: TimeDelta) -> Option<f64> {
        let secs = elapsed.num_seconds();
        let idx = self.samples.partition_point(|s| s.elapsed_secs <= secs);
        idx.checked_sub(1)
            .and_then(|i| self.samples.get(i))
            .or_else(|| self.samples.first())
            .map(|s| s.value)
    }
}

/// Cloud opacity from a step-function table.
#[derive(Debug, Clone, PartialEq)]
pub struct TabulatedCloudModel {
    table: StepTable,
}

impl TabulatedCloudModel {
    /// Create a model from raw samples (any order).
    pub fn new(samples: &[EnvironmentSample]) -> Self {
        Self {
            table: StepTable::new(samples),
        }
    }

    /// Create a model from the `environment.cloud` config section.
    pub fn from_config(config: &CloudConfig) -> Self {
        Self::new(&config.table)
    }
}

impl CloudModel for TabulatedCloudModel {
    fn cloud(&self, elapsed: TimeDelta) -> f64 {
        self.table.lookup(elapsed).unwrap_or(0.0).clamp(0.0, 1.0)
    }
}

/// Seeing from a step-function table of zenith FWHM at 500 nm, corrected
/// for filter wavelength and airmass and combined with the fixed system
/// contributions.
#[derive(Debug, Clone, PartialEq)]
pub struct TabulatedSeeingModel {
    table: StepTable,
    /// Quadrature sum of telescope, optics, and camera contributions.
    system_fwhm: f64,
}

impl TabulatedSeeingModel {
    /// Create a model from samples and system contributions (arcseconds).
    pub fn new(samples: &[EnvironmentSample], telescope: f64, optics: f64, camera: f64) -> Self {
        Self {
            table: StepTable::new(samples),
            system_fwhm: camera
                .mul_add(camera, telescope.mul_add(telescope, optics * optics))
                .sqrt(),
        }
    }

    /// Create a model from the `environment.seeing` config section.
    pub fn from_config(config: &SeeingConfig) -> Self {
        Self::new(
            &config.table,
            config.telescope_seeing,
            config.optical_design_seeing,
            config.camera_seeing,
        )
    }
}

impl SeeingModel for TabulatedSeeingModel {
    fn seeing(&self, elapsed: TimeDelta, filter: Filter, airmass: f64) -> SeeingReading {
        let fwhm_500 = self.table.lookup(elapsed).unwrap_or(0.0);
        let airmass = if airmass.is_finite() && airmass >= 1.0 {
            airmass
        } else {
            1.0
        };
        let airmass_correction = airmass.powf(0.6);
        let filter_correction =
            (REFERENCE_WAVELENGTH_NM / filter.effective_wavelength_nm()).powf(0.3);

        let atmospheric = fwhm_500 * filter_correction * airmass_correction;
        let system = self.system_fwhm * airmass_correction;
        let fwhm_effective = 1.16 * system.mul_add(system, 1.04 * atmospheric * atmospheric).sqrt();
        let fwhm_geometric = 0.822_f64.mul_add(fwhm_effective, 0.052);

        SeeingReading {
            fwhm_500,
            fwhm_geometric,
            fwhm_effective,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    fn sample(elapsed_secs: i64, value: f64) -> EnvironmentSample {
        EnvironmentSample {
            elapsed_secs,
            value,
        }
    }

    #[test]
    fn fixed_night_boundaries() {
        let model = FixedNightSkyModel::new(TimeDelta::hours(19), TimeDelta::hours(10));
        let date = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        let night = model.night_boundaries(date);
        assert_eq!(night.sunset.timestamp(), 1_641_063_600);
        assert_eq!(night.duration(), TimeDelta::hours(10));
    }

    #[test]
    fn fixed_night_from_fractional_hours() {
        let model = FixedNightSkyModel::from_config(&NightConfig {
            sunset_hours_utc: 23.5,
            night_hours: 0.1,
        });
        let night = model.night_boundaries(NaiveDate::from_ymd_opt(2022, 1, 1).unwrap());
        assert_eq!(night.duration(), TimeDelta::seconds(360));
    }

    #[test]
    fn cloud_table_is_a_step_function() {
        let model = TabulatedCloudModel::new(&[sample(3600, 0.5), sample(0, 0.1)]);
        assert!((model.cloud(TimeDelta::zero()) - 0.1).abs() < EPSILON);
        assert!((model.cloud(TimeDelta::seconds(3599)) - 0.1).abs() < EPSILON);
        assert!((model.cloud(TimeDelta::seconds(3600)) - 0.5).abs() < EPSILON);
        assert!((model.cloud(TimeDelta::days(30)) - 0.5).abs() < EPSILON);
    }

    #[test]
    fn cloud_before_table_uses_first_sample() {
        let model = TabulatedCloudModel::new(&[sample(100, 0.3)]);
        assert!((model.cloud(TimeDelta::seconds(5)) - 0.3).abs() < EPSILON);
    }

    #[test]
    fn empty_cloud_table_is_clear() {
        let model = TabulatedCloudModel::new(&[]);
        assert!(model.cloud(TimeDelta::hours(1)).abs() < EPSILON);
    }

    #[test]
    fn seeing_at_zenith_in_reference_band() {
        let model = TabulatedSeeingModel::new(&[sample(0, 0.7)], 0.25, 0.08, 0.30);
        let reading = model.seeing(TimeDelta::zero(), Filter::R, 1.0);
        assert!((reading.fwhm_500 - 0.7).abs() < EPSILON);

        let system = (0.25_f64 * 0.25 + 0.08 * 0.08 + 0.30 * 0.30).sqrt();
        let atmospheric = 0.7 * (500.0 / 622.2_f64).powf(0.3);
        let expected_eff = 1.16 * (system * system + 1.04 * atmospheric * atmospheric).sqrt();
        assert!((reading.fwhm_effective - expected_eff).abs() < 1e-12);
        assert!((reading.fwhm_geometric - (0.822 * expected_eff + 0.052)).abs() < 1e-12);
    }

    #[test]
    fn seeing_worsens_with_airmass() {
        let model = TabulatedSeeingModel::new(&[sample(0, 0.7)], 0.25, 0.08, 0.30);
        let zenith = model.seeing(TimeDelta::zero(), Filter::G, 1.0);
        let low = model.seeing(TimeDelta::zero(), Filter::G, 2.0);
        assert!(low.fwhm_effective > zenith.fwhm_effective);
        assert!(low.fwhm_geometric > zenith.fwhm_geometric);
        assert!((low.fwhm_500 - zenith.fwhm_500).abs() < EPSILON);
    }

    #[test]
    fn bluer_filters_see_worse() {
        let model = TabulatedSeeingModel::new(&[sample(0, 0.7)], 0.0, 0.0, 0.0);
        let u = model.seeing(TimeDelta::zero(), Filter::U, 1.0);
        let y = model.seeing(TimeDelta::zero(), Filter::Y, 1.0);
        assert!(u.fwhm_effective > y.fwhm_effective);
    }
}
