//! Layout planning: assign a flash address to every section before writing
//!
//! The table of contents is a fixed-size structure at a fixed address, but
//! it points at sections which are themselves variable-length and placed
//! after it. Offsets therefore have to be known before any bytes are
//! committed, which makes writing a two-pass operation: plan, then
//! serialize against the plan.
//!
//! Section lengths are obtained by running the real encoders and taking the
//! length of the result. Encoding each section twice is a small cost for
//! never having a second, slightly different arithmetic copy of the
//! encoding rules - that duplication is exactly how layout/writer offset
//! mismatches happen.

use std::collections::BTreeMap;

use uuid::Uuid;
use zwetschge_core::{DeviceData, RegisterAction};

use crate::error::WriteError;
use crate::wire::{round_up_to_page, FLASH_OFFSET, MODULE_SERIAL_LEN};
use crate::writer;

/// Planned flash addresses of every section of an image.
///
/// All addresses are flash-absolute, i.e. they assume the 0x2000-byte
/// reserved region is present, whether or not the final file includes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    /// Address of the table of contents
    pub toc: usize,
    /// Address of the table of register maps
    pub register_maps: usize,
    /// Address of the table of use cases
    pub use_case_table: usize,
    /// Address of each use case's sequential register block, keyed by guid
    pub sequential_blocks: BTreeMap<Uuid, usize>,
    /// Address of the calibration blob, 0 if absent
    pub calibration_start: usize,
    /// Length of the calibration blob in bytes
    pub calibration_len: usize,
    /// CRC-32 over the calibration blob
    pub calibration_crc: u32,
    /// Address of the module suffix, 0 if absent
    pub module_suffix_start: usize,
    /// Length of the module suffix in bytes
    pub module_suffix_len: usize,
}

/// Compute the layout for a device description.
///
/// Sections are placed in write order: reserved region, table of contents,
/// table of register maps, table of use cases, then each use case's
/// sequential register block (in use-case order, each aligned up to the
/// next flash page), then the calibration blob and the module suffix with
/// no alignment.
pub fn plan_layout(
    device: &DeviceData,
    calibration: Option<&[u8]>,
    module_suffix: Option<&[u8]>,
) -> Result<Layout, WriteError> {
    let calibration = calibration.filter(|c| !c.is_empty());
    let module_suffix = module_suffix.filter(|s| !s.is_empty());

    let mut layout = Layout {
        toc: FLASH_OFFSET,
        ..Default::default()
    };

    let zero_serial = [0u8; MODULE_SERIAL_LEN];
    let toc_len = writer::encode_table_of_contents(device, &Layout::default(), &zero_serial)?.len();
    layout.register_maps = layout.toc + toc_len;

    let torm_len = writer::encode_table_of_register_maps(device)?.len();
    layout.use_case_table = layout.register_maps + torm_len;

    // A dry run with no block addresses assigned: every sequential register
    // header is the same size, so the length is already exact.
    let touc_len = writer::encode_table_of_use_cases(device, &BTreeMap::new())?.len();
    let mut cursor = layout.use_case_table + touc_len;

    for uc in &device.use_cases {
        if let RegisterAction::SequentialBlock(block) = &uc.register_action {
            cursor = round_up_to_page(cursor);
            if layout.sequential_blocks.insert(uc.guid, cursor).is_some() {
                return Err(WriteError::DuplicateSequentialGuid(uc.guid));
            }
            cursor += writer::sequential_block_len(block);
        }
    }

    if let Some(calibration) = calibration {
        layout.calibration_crc = crc32fast::hash(calibration);
        layout.calibration_len = calibration.len();
        layout.calibration_start = cursor;
        cursor += calibration.len();
    }

    if let Some(module_suffix) = module_suffix {
        layout.module_suffix_len = module_suffix.len();
        layout.module_suffix_start = cursor;
    }

    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{FLASH_PAGE, TOC_SIZE};
    use zwetschge_core::{AccessLevel, ExposureGroup, RawFrameSet, SequentialRegisterBlock, UseCase};

    fn guid(last: u8) -> Uuid {
        let mut bytes = [0u8; 16];
        bytes[15] = last;
        Uuid::from_bytes(bytes)
    }

    fn seq_use_case(name: &str, last_guid_byte: u8, values: usize) -> UseCase {
        UseCase {
            name: name.to_string(),
            guid: guid(last_guid_byte),
            image_size: (224, 172),
            imager_frequencies: vec![60_240_000],
            stream_ids: vec![0x4000],
            start_fps: 5,
            fps_limits: (1, 10),
            processing_params: guid(0x80 | last_guid_byte),
            wait_time: 0,
            access_level: AccessLevel::Normal,
            measurement_blocks: vec![1],
            exposure_groups: vec![ExposureGroup {
                exposure: 670,
                min: 50,
                max: 670,
            }],
            raw_frame_sets: vec![RawFrameSet {
                frame_count: 1,
                frequency: 60_240_000,
                exposure_group: 0,
            }],
            register_action: RegisterAction::SequentialBlock(SequentialRegisterBlock {
                values: (0..values as u16).map(|v| v.wrapping_mul(3)).collect(),
                imager_address: 0x8000,
            }),
            reserved_block: vec![],
        }
    }

    fn device() -> DeviceData {
        DeviceData {
            name: "LayoutTest".to_string(),
            product_issuer: "PMD ".to_string(),
            product_code: guid(0x42),
            system_frequency: 24_000_000,
            use_cases: vec![
                seq_use_case("First", 1, 300),
                seq_use_case("Second", 2, 17),
            ],
            register_maps: Default::default(),
        }
    }

    #[test]
    fn sections_are_laid_out_in_order() {
        let layout = plan_layout(&device(), Some(&[1, 2, 3]), Some(b"suffix")).unwrap();
        assert_eq!(layout.toc, FLASH_OFFSET);
        assert_eq!(layout.register_maps, FLASH_OFFSET + TOC_SIZE);
        assert!(layout.use_case_table > layout.register_maps);
        let first = layout.sequential_blocks[&guid(1)];
        let second = layout.sequential_blocks[&guid(2)];
        assert!(first >= layout.use_case_table);
        // 300 values = 600 bytes, so the second block starts 3 pages later
        assert_eq!(second, round_up_to_page(first + 600));
        assert!(layout.calibration_start >= second + 34);
        assert_eq!(layout.calibration_len, 3);
        assert_eq!(layout.module_suffix_start, layout.calibration_start + 3);
        assert_eq!(layout.module_suffix_len, 6);
    }

    #[test]
    fn sequential_blocks_are_page_aligned() {
        let layout = plan_layout(&device(), None, None).unwrap();
        for (&guid, &offset) in &layout.sequential_blocks {
            assert_eq!(offset % FLASH_PAGE, 0, "block {guid} at {offset:#x}");
        }
    }

    #[test]
    fn calibration_follows_at_next_free_byte_without_alignment() {
        let layout = plan_layout(&device(), Some(&[0u8; 128]), None).unwrap();
        let second = layout.sequential_blocks[&guid(2)];
        assert_eq!(layout.calibration_start, second + 34);
    }

    #[test]
    fn duplicate_guids_with_blocks_are_rejected() {
        let mut dev = device();
        dev.use_cases[1].guid = dev.use_cases[0].guid;
        let err = plan_layout(&dev, None, None).unwrap_err();
        assert!(matches!(err, WriteError::DuplicateSequentialGuid(_)));
    }

    #[test]
    fn empty_calibration_is_treated_as_absent() {
        let layout = plan_layout(&device(), Some(&[]), None).unwrap();
        assert_eq!(layout.calibration_start, 0);
        assert_eq!(layout.calibration_len, 0);
        assert_eq!(layout.calibration_crc, 0);
    }
}
