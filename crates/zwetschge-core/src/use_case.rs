//! Per-use-case configuration types

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::device::TimedRegEntry;

/// Access level required to select a use case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    /// Normal operation
    Normal,
    /// Raw-data access, requires activation level three
    LevelThreeRaw,
}

impl Default for AccessLevel {
    fn default() -> Self {
        Self::Normal
    }
}

/// Error converting a raw byte into an [`AccessLevel`]
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid access level value {0}")]
pub struct InvalidAccessLevel(pub u8);

impl From<AccessLevel> for u8 {
    fn from(level: AccessLevel) -> Self {
        match level {
            AccessLevel::Normal => 0,
            AccessLevel::LevelThreeRaw => 1,
        }
    }
}

impl TryFrom<u8> for AccessLevel {
    type Error = InvalidAccessLevel;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::LevelThreeRaw),
            other => Err(InvalidAccessLevel(other)),
        }
    }
}

/// A block of register values that the imager reads directly from storage.
///
/// The writer chooses the flash address; the imager is pointed at the block
/// via `imager_address`. If the block carries its own checksum, that value is
/// already the final element of `values` (appended by the block generator),
/// so the codec treats the block as opaque 16-bit words.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequentialRegisterBlock {
    /// Register values in imager read order
    pub values: Vec<u16>,
    /// Base address at which the imager expects the block
    pub imager_address: u16,
}

/// The register work attached to a use case.
///
/// A use case carries either a timed register list (replayed by the driver)
/// or a sequential register block (read by the imager itself), never both
/// and never neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterAction {
    /// Register writes replayed by the driver, with per-entry delays
    TimedList(Vec<TimedRegEntry>),
    /// A contiguous block the imager reads directly from flash
    SequentialBlock(SequentialRegisterBlock),
}

impl Default for RegisterAction {
    fn default() -> Self {
        Self::TimedList(Vec::new())
    }
}

/// One exposure group: the nominal exposure time and its limits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureGroup {
    /// Nominal exposure
    pub exposure: u16,
    /// Lower limit
    pub min: u16,
    /// Upper limit
    pub max: u16,
}

/// A run of raw frames captured at one frequency with one exposure group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFrameSet {
    /// Number of raw frames in this set
    pub frame_count: u8,
    /// Modulation frequency in Hz
    pub frequency: u32,
    /// Index into the use case's exposure groups
    pub exposure_group: u8,
}

/// One operating mode of the imager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UseCase {
    /// ASCII name, at most 255 bytes
    pub name: String,
    /// Unique identifier within the device
    pub guid: Uuid,
    /// Image width and height in pixels
    pub image_size: (u16, u16),
    /// Frequency of each raw frame in Hz, in raw-frame order
    #[serde(default)]
    pub imager_frequencies: Vec<u32>,
    /// Stream identifiers
    #[serde(default)]
    pub stream_ids: Vec<u16>,
    /// Frame rate the use case starts at
    pub start_fps: u8,
    /// Minimum and maximum frame rate; `min <= start_fps <= max`
    pub fps_limits: (u8, u8),
    /// Identifier of the processing parameters
    pub processing_params: Uuid,
    /// Wait time in microseconds, stored as a 24-bit value
    #[serde(default)]
    pub wait_time: u32,
    /// Access level required to use this mode
    #[serde(default)]
    pub access_level: AccessLevel,
    /// Raw frames per measurement block
    #[serde(default)]
    pub measurement_blocks: Vec<u16>,
    /// Exposure groups referenced by the raw frame sets
    #[serde(default)]
    pub exposure_groups: Vec<ExposureGroup>,
    /// Raw frame sets, in capture order
    #[serde(default)]
    pub raw_frame_sets: Vec<RawFrameSet>,
    /// The register work for this use case
    #[serde(default)]
    pub register_action: RegisterAction,
    /// Opaque reserved bytes, at most 255
    #[serde(default)]
    pub reserved_block: Vec<u8>,
}

impl UseCase {
    /// The per-frame frequency list implied by the raw frame sets: each
    /// set's frequency repeated `frame_count` times, in set order. For a
    /// consistent use case this equals `imager_frequencies`.
    pub fn expanded_frequencies(&self) -> Vec<u32> {
        self.raw_frame_sets
            .iter()
            .flat_map(|set| std::iter::repeat(set.frequency).take(set.frame_count as usize))
            .collect()
    }

    /// Total raw frame count over all raw frame sets
    pub fn raw_frame_count(&self) -> usize {
        self.raw_frame_sets
            .iter()
            .map(|set| set.frame_count as usize)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_level_round_trips_through_u8() {
        for level in [AccessLevel::Normal, AccessLevel::LevelThreeRaw] {
            assert_eq!(AccessLevel::try_from(u8::from(level)), Ok(level));
        }
        assert_eq!(AccessLevel::try_from(2), Err(InvalidAccessLevel(2)));
    }

    #[test]
    fn expanded_frequencies_follow_set_order() {
        let uc = UseCase {
            name: "test".into(),
            guid: Uuid::nil(),
            image_size: (224, 172),
            start_fps: 5,
            fps_limits: (1, 10),
            processing_params: Uuid::nil(),
            raw_frame_sets: vec![
                RawFrameSet {
                    frame_count: 1,
                    frequency: 60_240_000,
                    exposure_group: 0,
                },
                RawFrameSet {
                    frame_count: 2,
                    frequency: 80_320_000,
                    exposure_group: 1,
                },
            ],
            imager_frequencies: vec![],
            stream_ids: vec![],
            wait_time: 0,
            access_level: AccessLevel::Normal,
            measurement_blocks: vec![],
            exposure_groups: vec![],
            register_action: RegisterAction::default(),
            reserved_block: vec![],
        };
        assert_eq!(
            uc.expanded_frequencies(),
            vec![60_240_000, 80_320_000, 80_320_000]
        );
        assert_eq!(uc.raw_frame_count(), 3);
    }
}
