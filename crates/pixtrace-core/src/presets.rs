//! Named parameter presets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{CurveFitting, TraceOptions};

/// A named bundle of trace parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Flat black-and-white logos.
    #[default]
    LogoBw,
    /// Clean icons: heavier speckle filtering, softer corners.
    IconClean,
    /// Fine detail: minimal speckle filtering, sharp corners.
    Detailed,
}

impl Preset {
    /// Every preset, in display order.
    pub const ALL: [Self; 3] = [Self::LogoBw, Self::IconClean, Self::Detailed];

    /// The full option set this preset applies.
    #[must_use]
    pub const fn options(self) -> TraceOptions {
        match self {
            Self::LogoBw => TraceOptions {
                threshold: 128,
                invert: false,
                filter_speckle: 4,
                corner_threshold: 60,
                curve_fitting: CurveFitting::Spline,
                path_precision: 8,
            },
            Self::IconClean => TraceOptions {
                threshold: 140,
                invert: false,
                filter_speckle: 10,
                corner_threshold: 90,
                curve_fitting: CurveFitting::Spline,
                path_precision: 6,
            },
            Self::Detailed => TraceOptions {
                threshold: 128,
                invert: false,
                filter_speckle: 2,
                corner_threshold: 30,
                curve_fitting: CurveFitting::Spline,
                path_precision: 10,
            },
        }
    }

    /// Wire name of the preset.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::LogoBw => "logo_bw",
            Self::IconClean => "icon_clean",
            Self::Detailed => "detailed",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unrecognized preset name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown preset {0:?} (expected logo_bw, icon_clean or detailed)")]
pub struct UnknownPreset(pub String);

impl FromStr for Preset {
    type Err = UnknownPreset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|preset| preset.name() == s)
            .ok_or_else(|| UnknownPreset(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_preset_is_in_range() {
        for preset in Preset::ALL {
            assert!(preset.options().validate().is_ok(), "{preset}");
        }
    }

    #[test]
    fn names_round_trip_through_from_str() {
        for preset in Preset::ALL {
            assert_eq!(preset.name().parse::<Preset>(), Ok(preset));
        }
        assert!("poster".parse::<Preset>().is_err());
    }

    #[test]
    fn icon_clean_values() {
        let options = Preset::IconClean.options();
        assert_eq!(options.threshold, 140);
        assert_eq!(options.filter_speckle, 10);
        assert_eq!(options.corner_threshold, 90);
        assert_eq!(options.path_precision, 6);
    }
}
