//! Serialization of a device description into a Zwetschge image

use std::collections::BTreeMap;

use tracing::debug;
use uuid::Uuid;
use zwetschge_core::{DeviceData, RegisterAction, SequentialRegisterBlock, UseCase};

use crate::error::WriteError;
use crate::layout::{plan_layout, Layout};
use crate::wire::{
    put_ptr_size, put_seq_reg_header, put_timed_reg_entry, put_u24, FILE_MARKER, FLASH_OFFSET,
    MODULE_SERIAL_LEN, TOC_MAGIC, TORM_MAGIC, TORM_VERSION, TOUC_MAGIC, ZWETSCHGE_VERSION,
};

/// Options for [`write`]
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Module serial, exactly 19 ASCII bytes; absent or empty serials are
    /// stored as 19 NUL bytes
    pub module_serial: Option<String>,
    /// Optional module suffix text
    pub module_suffix: Option<String>,
    /// Whether to include the 0x2000-byte reserved region. A file without
    /// it still uses flash-absolute addresses and is meant to be flashed
    /// starting at offset 0x2000.
    pub include_reserved: bool,
}

impl WriteOptions {
    /// Options for a full flash image including the reserved region
    pub fn flash_image() -> Self {
        Self {
            include_reserved: true,
            ..Default::default()
        }
    }
}

/// Produce a byte-exact Zwetschge image from a device description.
///
/// The output is deterministic: the same inputs always produce the same
/// bytes. Malformed input (wrong-length issuer or serial, values that do
/// not fit their on-disk fields) is rejected before any bytes are produced.
pub fn write(
    device: &DeviceData,
    calibration: Option<&[u8]>,
    opts: &WriteOptions,
) -> Result<Vec<u8>, WriteError> {
    let serial = encode_module_serial(opts.module_serial.as_deref())?;
    // An empty suffix is the same as no suffix, like the empty calibration
    // below; only a non-empty one gets a section.
    let suffix = match opts.module_suffix.as_deref() {
        Some(s) if !s.is_ascii() => {
            return Err(WriteError::NotAscii {
                field: "module suffix",
                text: s.to_string(),
            })
        }
        Some(s) if !s.is_empty() => Some(s.as_bytes()),
        _ => None,
    };
    let calibration = calibration.filter(|c| !c.is_empty());

    let layout = plan_layout(device, calibration, suffix)?;
    debug!(
        toc = format_args!("{:#x}", layout.toc),
        register_maps = format_args!("{:#x}", layout.register_maps),
        use_case_table = format_args!("{:#x}", layout.use_case_table),
        sequential_blocks = layout.sequential_blocks.len(),
        "planned image layout"
    );

    let mut image = Vec::with_capacity(layout.toc + 0x1000);
    image.extend_from_slice(FILE_MARKER);
    image.resize(layout.toc, 0);

    image.extend_from_slice(&encode_table_of_contents(device, &layout, &serial)?);
    reached(&image, layout.register_maps, "table of register maps")?;
    image.extend_from_slice(&encode_table_of_register_maps(device)?);
    reached(&image, layout.use_case_table, "table of use cases")?;
    image.extend_from_slice(&encode_table_of_use_cases(device, &layout.sequential_blocks)?);

    for uc in &device.use_cases {
        if let RegisterAction::SequentialBlock(block) = &uc.register_action {
            let start = layout.sequential_blocks[&uc.guid];
            pad_to(&mut image, start, &format!("sequential block \"{}\"", uc.name))?;
            image.extend_from_slice(&encode_sequential_block(block));
        }
    }

    if let Some(calibration) = calibration {
        reached(&image, layout.calibration_start, "calibration")?;
        image.extend_from_slice(calibration);
    }
    if let Some(suffix) = suffix {
        reached(&image, layout.module_suffix_start, "module suffix")?;
        image.extend_from_slice(suffix);
    }

    if opts.include_reserved {
        Ok(image)
    } else {
        Ok(image.split_off(FLASH_OFFSET))
    }
}

fn encode_module_serial(serial: Option<&str>) -> Result<[u8; MODULE_SERIAL_LEN], WriteError> {
    match serial {
        None | Some("") => Ok([0u8; MODULE_SERIAL_LEN]),
        Some(s) => {
            if s.len() != MODULE_SERIAL_LEN || !s.is_ascii() {
                return Err(WriteError::BadModuleSerial(s.to_string()));
            }
            let mut out = [0u8; MODULE_SERIAL_LEN];
            out.copy_from_slice(s.as_bytes());
            Ok(out)
        }
    }
}

/// Pad with zeros up to `planned`; reaching past it means the layout and
/// the serialization disagree, which is an internal error.
fn pad_to(image: &mut Vec<u8>, planned: usize, section: &str) -> Result<(), WriteError> {
    if image.len() > planned {
        return Err(WriteError::LayoutMismatch {
            section: section.to_string(),
            planned,
            actual: image.len(),
        });
    }
    image.resize(planned, 0);
    Ok(())
}

fn reached(image: &[u8], planned: usize, section: &str) -> Result<(), WriteError> {
    if image.len() != planned {
        return Err(WriteError::LayoutMismatch {
            section: section.to_string(),
            planned,
            actual: image.len(),
        });
    }
    Ok(())
}

/// Encode the v147 table of contents against a computed layout.
///
/// With a default layout this still produces the correct number of bytes,
/// which is what the planner's dry run relies on.
pub(crate) fn encode_table_of_contents(
    device: &DeviceData,
    layout: &Layout,
    serial: &[u8; MODULE_SERIAL_LEN],
) -> Result<Vec<u8>, WriteError> {
    if device.product_issuer.len() != 4 || !device.product_issuer.is_ascii() {
        return Err(WriteError::BadProductIssuer(device.product_issuer.clone()));
    }

    let mut payload = Vec::with_capacity(80);
    put_u24(&mut payload, ZWETSCHGE_VERSION, "container version")?;
    put_ptr_size(
        &mut payload,
        layout.module_suffix_start,
        layout.module_suffix_len,
        "module suffix pointer",
    )?;
    payload.extend_from_slice(device.product_issuer.as_bytes());
    payload.extend_from_slice(device.product_code.as_bytes());
    payload.extend_from_slice(&device.system_frequency.to_le_bytes());
    put_ptr_size(
        &mut payload,
        layout.register_maps,
        encode_table_of_register_maps(device)?.len(),
        "register map table pointer",
    )?;
    put_ptr_size(
        &mut payload,
        layout.calibration_start,
        layout.calibration_len,
        "calibration pointer",
    )?;
    payload.extend_from_slice(&layout.calibration_crc.to_le_bytes());
    let count = device.use_cases.len();
    if count > usize::from(u8::MAX) {
        return Err(WriteError::TooManyUseCases(count));
    }
    payload.push(count as u8);
    put_ptr_size(
        &mut payload,
        layout.use_case_table,
        encode_table_of_use_cases(device, &layout.sequential_blocks)?.len(),
        "use case table pointer",
    )?;
    payload.extend_from_slice(serial);

    Ok(with_magic_and_crc(TOC_MAGIC, payload))
}

pub(crate) fn encode_table_of_register_maps(device: &DeviceData) -> Result<Vec<u8>, WriteError> {
    let mut payload = Vec::new();
    put_u24(&mut payload, TORM_VERSION, "register map table version")?;
    // Two firmware-page superblock headers, reserved and always zero in v1
    put_seq_reg_header(&mut payload, 0, 0, 0, "firmware page 1 superblock")?;
    put_seq_reg_header(&mut payload, 0, 0, 0, "firmware page 2 superblock")?;

    let maps = device.register_maps.in_disk_order();
    for map in &maps {
        let len = check_fits(map.len(), u64::from(u16::MAX), "register map length")?;
        payload.extend_from_slice(&(len as u16).to_le_bytes());
    }
    for map in &maps {
        for entry in map.iter() {
            put_timed_reg_entry(&mut payload, entry);
        }
    }

    Ok(with_magic_and_crc(TORM_MAGIC, payload))
}

/// Encode all use case records, in input order.
///
/// `block_addresses` maps each use case guid to the flash address of its
/// sequential register block. An empty map yields headers with address
/// zero, which would be an invalid image but has the exact final length -
/// the planner's dry run uses that.
pub(crate) fn encode_table_of_use_cases(
    device: &DeviceData,
    block_addresses: &BTreeMap<Uuid, usize>,
) -> Result<Vec<u8>, WriteError> {
    let mut payload = Vec::new();
    for uc in &device.use_cases {
        let address = block_addresses.get(&uc.guid).copied().unwrap_or(0);
        payload.extend_from_slice(&encode_use_case(uc, address)?);
    }
    Ok(with_magic_and_crc(TOUC_MAGIC, payload))
}

fn encode_use_case(uc: &UseCase, block_address: usize) -> Result<Vec<u8>, WriteError> {
    if !uc.name.is_ascii() {
        return Err(WriteError::NotAscii {
            field: "use case name",
            text: uc.name.clone(),
        });
    }

    let (timed_list, block): (&[_], Option<&SequentialRegisterBlock>) = match &uc.register_action {
        RegisterAction::TimedList(list) => (list.as_slice(), None),
        RegisterAction::SequentialBlock(block) => (&[], Some(block)),
    };

    let mut body = Vec::new();
    match block {
        None => put_seq_reg_header(&mut body, 0, 0, 0, "sequential register header")?,
        Some(block) => put_seq_reg_header(
            &mut body,
            block_address,
            sequential_block_len(block),
            block.imager_address,
            "sequential register header",
        )?,
    }

    body.extend_from_slice(&uc.image_size.0.to_le_bytes());
    body.extend_from_slice(&uc.image_size.1.to_le_bytes());
    body.extend_from_slice(uc.guid.as_bytes());
    body.push(uc.start_fps);
    body.push(uc.fps_limits.0);
    body.push(uc.fps_limits.1);
    body.extend_from_slice(uc.processing_params.as_bytes());
    put_u24(&mut body, uc.wait_time, "wait time")?;
    body.push(u8::from(uc.access_level));

    body.push(check_fits(uc.name.len(), 255, "use case name length")? as u8);
    let blocks = check_fits(
        uc.measurement_blocks.len(),
        u64::from(u16::MAX),
        "measurement block count",
    )?;
    body.extend_from_slice(&(blocks as u16).to_le_bytes());
    let freqs = check_fits(
        uc.imager_frequencies.len(),
        u64::from(u16::MAX),
        "imager frequency count",
    )?;
    body.extend_from_slice(&(freqs as u16).to_le_bytes());
    let timed = check_fits(
        timed_list.len(),
        u64::from(u16::MAX),
        "timed register list length",
    )?;
    body.extend_from_slice(&(timed as u16).to_le_bytes());
    body.push(check_fits(uc.stream_ids.len(), 255, "stream id count")? as u8);
    body.push(check_fits(uc.exposure_groups.len(), 255, "exposure group count")? as u8);
    let sets = check_fits(
        uc.raw_frame_sets.len(),
        u64::from(u16::MAX),
        "raw frame set count",
    )?;
    body.extend_from_slice(&(sets as u16).to_le_bytes());
    body.push(check_fits(uc.reserved_block.len(), 255, "reserved block length")? as u8);

    body.extend_from_slice(uc.name.as_bytes());
    for &block_count in &uc.measurement_blocks {
        body.extend_from_slice(&block_count.to_le_bytes());
    }
    for &freq in &uc.imager_frequencies {
        body.extend_from_slice(&freq.to_le_bytes());
    }
    for entry in timed_list {
        put_timed_reg_entry(&mut body, entry);
    }
    for &stream in &uc.stream_ids {
        body.extend_from_slice(&stream.to_le_bytes());
    }
    for group in &uc.exposure_groups {
        body.extend_from_slice(&group.exposure.to_le_bytes());
        body.extend_from_slice(&group.min.to_le_bytes());
        body.extend_from_slice(&group.max.to_le_bytes());
    }
    for set in &uc.raw_frame_sets {
        body.push(set.frame_count);
        body.extend_from_slice(&set.frequency.to_le_bytes());
        body.push(set.exposure_group);
    }
    body.extend_from_slice(&uc.reserved_block);

    // The record is self-delimited by a leading total length that counts
    // its own two bytes.
    let total = check_fits(body.len() + 2, u64::from(u16::MAX), "use case record length")?;
    let mut record = Vec::with_capacity(body.len() + 2);
    record.extend_from_slice(&(total as u16).to_le_bytes());
    record.extend_from_slice(&body);
    Ok(record)
}

/// Sequential register values are packed big-endian, the opposite byte
/// order from every other field. That matches the imager's native SPI read
/// order and must not be "fixed".
pub(crate) fn encode_sequential_block(block: &SequentialRegisterBlock) -> Vec<u8> {
    let mut out = Vec::with_capacity(block.values.len() * 2);
    for &value in &block.values {
        out.extend_from_slice(&value.to_be_bytes());
    }
    out
}

pub(crate) fn sequential_block_len(block: &SequentialRegisterBlock) -> usize {
    block.values.len() * 2
}

fn with_magic_and_crc(magic: &[u8], payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(magic.len() + 4 + payload.len());
    out.extend_from_slice(magic);
    out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    out.extend_from_slice(&payload);
    out
}

fn check_fits(value: usize, max: u64, field: &'static str) -> Result<u64, WriteError> {
    let value = value as u64;
    if value > max {
        return Err(WriteError::ValueTooLarge { field, value, max });
    }
    Ok(value)
}
