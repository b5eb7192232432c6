//! Panel effect modes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Mode id some firmware revisions report for the audio spectrum effect.
pub const LEGACY_SPECTRUM_ID: u8 = 46;

/// Built-in effects of the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PanelMode {
    NightLight = 0,
    Candle = 1,
    Sky = 2,
    AudioSpectrum = 3,
    Vortex = 4,
    Twinkling = 5,
    TimeTunnel = 6,
    Ecg = 7,
    Bounce = 8,
    Clock = 9,
    Hourglass = 10,
    Image = 11,
}

impl PanelMode {
    /// Every mode, ordered by id.
    pub const ALL: [Self; 12] = [
        Self::NightLight,
        Self::Candle,
        Self::Sky,
        Self::AudioSpectrum,
        Self::Vortex,
        Self::Twinkling,
        Self::TimeTunnel,
        Self::Ecg,
        Self::Bounce,
        Self::Clock,
        Self::Hourglass,
        Self::Image,
    ];

    /// Numeric id of the mode, also the index into the colour table.
    #[must_use]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Look up a mode by id. The legacy spectrum id maps to [`PanelMode::AudioSpectrum`].
    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        if id == LEGACY_SPECTRUM_ID {
            return Some(Self::AudioSpectrum);
        }
        Self::ALL.get(usize::from(id)).copied()
    }
}

impl TryFrom<u8> for PanelMode {
    type Error = CoreError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::from_id(id).ok_or(CoreError::UnknownMode(id))
    }
}

impl fmt::Display for PanelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NightLight => "night light",
            Self::Candle => "candle",
            Self::Sky => "sky",
            Self::AudioSpectrum => "audio spectrum",
            Self::Vortex => "vortex",
            Self::Twinkling => "twinkling",
            Self::TimeTunnel => "time tunnel",
            Self::Ecg => "ecg",
            Self::Bounce => "bounce",
            Self::Clock => "clock",
            Self::Hourglass => "hourglass",
            Self::Image => "image",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_ids_round_trip() {
        for mode in PanelMode::ALL {
            assert_eq!(PanelMode::from_id(mode.id()), Some(mode));
        }
    }

    #[test]
    fn test_legacy_id_aliases_spectrum() {
        assert_eq!(PanelMode::from_id(LEGACY_SPECTRUM_ID), Some(PanelMode::AudioSpectrum));
    }

    #[test]
    fn test_unknown_id_rejected() {
        assert_eq!(PanelMode::from_id(12), None);
        assert_matches!(PanelMode::try_from(200), Err(CoreError::UnknownMode(200)));
    }

    #[test]
    fn test_deserializes_snake_case_names() {
        use serde::de::IntoDeserializer;
        use serde::de::value::{Error, StrDeserializer};

        let de: StrDeserializer<'_, Error> = "audio_spectrum".into_deserializer();
        assert_eq!(PanelMode::deserialize(de).ok(), Some(PanelMode::AudioSpectrum));
    }
}
