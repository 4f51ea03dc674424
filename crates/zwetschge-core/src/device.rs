//! Device-level types for a Zwetschge container

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::use_case::UseCase;

/// One entry of a timed register list: write `value` to `address`, then wait.
///
/// The delay is stored in units of 32 microseconds, which is the resolution
/// the imager hardware applies when replaying the list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedRegEntry {
    /// Register address
    pub address: u16,
    /// Value to write
    pub value: u16,
    /// Delay after the write, in 32 microsecond units
    pub delay: u16,
}

impl TimedRegEntry {
    /// Entry with no delay after the write
    pub fn new(address: u16, value: u16) -> Self {
        Self {
            address,
            value,
            delay: 0,
        }
    }

    /// Entry with a delay given in microseconds, rounded up to the next
    /// 32 microsecond unit. Returns `None` if the delay does not fit the
    /// 16-bit on-disk field.
    pub fn from_micros(address: u16, value: u16, micros: u32) -> Option<Self> {
        let delay = u16::try_from(micros.div_ceil(32)).ok()?;
        Some(Self {
            address,
            value,
            delay,
        })
    }
}

/// The per-device register maps, as opposed to the per-use-case register work.
///
/// Six named ordered sequences; any of them may be empty. The on-disk order
/// is fixed: `init`, `fw_page1`, `fw_page2`, `fw_start`, `start`, `stop`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOfRegisterMaps {
    /// Imager initialization
    #[serde(default)]
    pub init: Vec<TimedRegEntry>,
    /// First firmware page
    #[serde(default)]
    pub fw_page1: Vec<TimedRegEntry>,
    /// Second firmware page
    #[serde(default)]
    pub fw_page2: Vec<TimedRegEntry>,
    /// Firmware start sequence
    #[serde(default)]
    pub fw_start: Vec<TimedRegEntry>,
    /// Capture start sequence
    #[serde(default)]
    pub start: Vec<TimedRegEntry>,
    /// Capture stop sequence
    #[serde(default)]
    pub stop: Vec<TimedRegEntry>,
}

impl TableOfRegisterMaps {
    /// The six maps in their fixed on-disk order
    pub fn in_disk_order(&self) -> [&Vec<TimedRegEntry>; 6] {
        [
            &self.init,
            &self.fw_page1,
            &self.fw_page2,
            &self.fw_start,
            &self.start,
            &self.stop,
        ]
    }
}

/// Complete description of one device, the root of the data model.
///
/// Instances are built once (from static tables, a JSON description, or a
/// decoded image) and are not mutated afterwards, apart from
/// [`DeviceData::add_use_case`] which appends during construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceData {
    /// Display name of the device; not stored in the binary image
    #[serde(default)]
    pub name: String,
    /// Issuer of the product code, exactly 4 ASCII bytes
    pub product_issuer: String,
    /// 16-byte product identifier
    pub product_code: Uuid,
    /// System frequency in Hz
    pub system_frequency: u32,
    /// Supported use cases; the order here is the on-disk order
    #[serde(default)]
    pub use_cases: Vec<UseCase>,
    /// Per-device register maps
    #[serde(default)]
    pub register_maps: TableOfRegisterMaps,
}

impl DeviceData {
    /// Append an additional use case to the ones already present
    pub fn add_use_case(&mut self, use_case: UseCase) {
        self.use_cases.push(use_case);
    }
}
