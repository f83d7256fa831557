//! Enumeration types shared by the driver, the sequencer and storage.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// A camera filter band.
///
/// Serialized as the single lowercase band letter the scheduler uses
/// (`"u"`, `"g"`, `"r"`, `"i"`, `"z"`, `"y"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    /// Ultraviolet band.
    U,
    /// Green band.
    G,
    /// Red band.
    R,
    /// Near-infrared band.
    I,
    /// Far-red band.
    Z,
    /// Infrared band.
    Y,
}

impl Filter {
    /// All filters in wavelength order.
    pub const ALL: [Self; 6] = [Self::U, Self::G, Self::R, Self::I, Self::Z, Self::Y];

    /// Effective wavelength of the band in nanometres.
    pub const fn effective_wavelength_nm(self) -> f64 {
        match self {
            Self::U => 367.0,
            Self::G => 482.5,
            Self::R => 622.2,
            Self::I => 754.5,
            Self::Z => 869.1,
            Self::Y => 971.0,
        }
    }

    /// The band letter.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::U => "u",
            Self::G => "g",
            Self::R => "r",
            Self::I => "i",
            Self::Z => "z",
            Self::Y => "y",
        }
    }
}

impl core::fmt::Display for Filter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Record streams
// ---------------------------------------------------------------------------

/// Which side of an exposure cycle a history record belongs to.
///
/// Proposal history and exposure history are both kept as two independent
/// streams: one keyed by the requested target, one keyed by the realized
/// observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    /// Records owned by a scheduler target.
    Target,
    /// Records owned by a completed observation.
    Observation,
}

impl HistoryKind {
    /// Stable lowercase name, used for storage columns and log fields.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Target => "target",
            Self::Observation => "observation",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn filter_uses_band_letter_on_the_wire() {
        let json = serde_json::to_string(&Filter::R).unwrap();
        assert_eq!(json, "\"r\"");
        let back: Filter = serde_json::from_str("\"y\"").unwrap();
        assert_eq!(back, Filter::Y);
    }

    #[test]
    fn wavelengths_increase_through_the_bands() {
        let waves: Vec<f64> = Filter::ALL
            .iter()
            .map(|f| f.effective_wavelength_nm())
            .collect();
        assert!(waves.windows(2).all(|w| matches!(w, [a, b] if a < b)));
    }
}
