//! Video export preset negotiation.

use serde::{Deserialize, Serialize};

use crate::error::RetrieveError;

/// Export presets offered by the asset store for videos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExportPreset {
    /// Original container and codec, no re-encode.
    Passthrough,
    Sd480,
    Qhd540,
    Hd720,
    Hd1080,
    Uhd2160,
    /// Best quality the store can produce, at source size.
    Highest,
}

impl ExportPreset {
    /// Longer output dimension of a sized preset.
    pub fn long_side(self) -> Option<u32> {
        match self {
            ExportPreset::Sd480 => Some(640),
            ExportPreset::Qhd540 => Some(960),
            ExportPreset::Hd720 => Some(1280),
            ExportPreset::Hd1080 => Some(1920),
            ExportPreset::Uhd2160 => Some(3840),
            ExportPreset::Passthrough | ExportPreset::Highest => None,
        }
    }

    fn rank(self) -> u32 {
        match self {
            ExportPreset::Passthrough => 0,
            ExportPreset::Highest => u32::MAX,
            sized => sized.long_side().unwrap_or(0),
        }
    }
}

/// Picks the export preset for a video.
///
/// - Pass-through when the source format is accepted and no downscale is needed.
/// - Otherwise the smallest sized preset covering the target long side.
/// - Otherwise the highest preset available.
pub fn negotiate_preset(
    available: &[ExportPreset],
    source_long_side: u32,
    downscale_to: Option<u32>,
    source_accepted: bool,
) -> Result<ExportPreset, RetrieveError> {
    if downscale_to.is_none() && source_accepted && available.contains(&ExportPreset::Passthrough)
    {
        return Ok(ExportPreset::Passthrough);
    }

    let target = downscale_to.map_or(source_long_side, |cap| cap.min(source_long_side));

    let covering = available
        .iter()
        .copied()
        .filter(|p| p.long_side().is_some_and(|side| side >= target))
        .min_by_key(|p| p.rank());
    if let Some(preset) = covering {
        return Ok(preset);
    }

    available
        .iter()
        .copied()
        .filter(|p| *p != ExportPreset::Passthrough)
        .max_by_key(|p| p.rank())
        .or_else(|| available.first().copied())
        .ok_or_else(|| RetrieveError::ExportFailed("no export preset available".into()))
}
