//! Decoding of a Zwetschge image back into a device description
//!
//! The reader is the exact inverse of the writer, with integrity enforced
//! at every section boundary: each CRC is verified before the decoded data
//! is trusted, and any mismatch aborts the whole read. There is no
//! best-effort decoding of a corrupt image.

use tracing::debug;
use uuid::Uuid;
use zwetschge_core::{
    AccessLevel, DeviceData, ExposureGroup, RawFrameSet, RegisterAction, SequentialRegisterBlock,
    TableOfRegisterMaps, TimedRegEntry, UseCase,
};

use crate::error::ReadError;
use crate::wire::{
    Cursor, FLASH_OFFSET, MODULE_SERIAL_LEN, TOC_MAGIC, TOC_OFFSET_CALIBRATION,
    TOC_OFFSET_CALIBRATION_CRC, TOC_OFFSET_CRC, TOC_OFFSET_MODULE_SERIAL,
    TOC_OFFSET_MODULE_SUFFIX, TOC_OFFSET_PRODUCT_CODE, TOC_OFFSET_PRODUCT_ISSUER,
    TOC_OFFSET_REGISTER_MAPS, TOC_OFFSET_SYSTEM_FREQUENCY, TOC_OFFSET_USE_CASES,
    TOC_OFFSET_USE_CASE_COUNT, TOC_OFFSET_VERSION, TOC_SIZE, TORM_MAGIC, TORM_VERSION, TOUC_MAGIC,
    ZWETSCHGE_VERSION,
};

/// Everything decoded from one image
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    /// The device description. Its display name is not stored in the
    /// container and comes back empty.
    pub device: DeviceData,
    /// Calibration blob, if the image carries one
    pub calibration: Option<Vec<u8>>,
    /// Module serial; an all-NUL serial field reads back as `None`
    pub module_serial: Option<String>,
    /// Module suffix bytes, if present
    pub module_suffix: Option<Vec<u8>>,
}

/// Decode a complete image.
///
/// Accepts both a full flash image (table of contents at 0x2000, reserved
/// region present) and a stripped file (table of contents at offset 0). In
/// both cases all addresses inside the image are flash-absolute.
pub fn read(bytes: &[u8]) -> Result<Image, ReadError> {
    let toc_pos = locate_toc(bytes)?;
    let toc = match bytes.get(toc_pos..toc_pos + TOC_SIZE) {
        Some(toc) => toc,
        None => {
            return Err(ReadError::Truncated {
                section: "table of contents",
                offset: bytes.len() - toc_pos,
                needed: toc_pos + TOC_SIZE - bytes.len(),
            })
        }
    };

    let version = u24_at(toc, TOC_OFFSET_VERSION);
    if version != ZWETSCHGE_VERSION {
        return Err(ReadError::UnsupportedVersion { found: version });
    }
    let stored = u32_at(toc, TOC_OFFSET_CRC);
    let computed = crc32fast::hash(&toc[TOC_OFFSET_VERSION..TOC_SIZE]);
    if stored != computed {
        return Err(ReadError::CrcMismatch {
            section: "table of contents",
            stored,
            computed,
        });
    }

    let (suffix_ptr, suffix_len) = ptr_size_at(toc, TOC_OFFSET_MODULE_SUFFIX);
    let issuer = &toc[TOC_OFFSET_PRODUCT_ISSUER..TOC_OFFSET_PRODUCT_ISSUER + 4];
    if !issuer.is_ascii() {
        return Err(ReadError::NotAscii {
            field: "product issuer",
        });
    }
    let product_code =
        Uuid::from_bytes(toc[TOC_OFFSET_PRODUCT_CODE..TOC_OFFSET_PRODUCT_CODE + 16].try_into().unwrap());
    let system_frequency = u32_at(toc, TOC_OFFSET_SYSTEM_FREQUENCY);
    let (torm_ptr, torm_len) = ptr_size_at(toc, TOC_OFFSET_REGISTER_MAPS);
    let (cal_ptr, cal_len) = ptr_size_at(toc, TOC_OFFSET_CALIBRATION);
    let cal_crc = u32_at(toc, TOC_OFFSET_CALIBRATION_CRC);
    let use_case_count = toc[TOC_OFFSET_USE_CASE_COUNT];
    let (touc_ptr, touc_len) = ptr_size_at(toc, TOC_OFFSET_USE_CASES);
    let serial_bytes = &toc[TOC_OFFSET_MODULE_SERIAL..TOC_OFFSET_MODULE_SERIAL + MODULE_SERIAL_LEN];

    debug!(
        version = format_args!("{version:#x}"),
        use_cases = use_case_count,
        calibration_len = cal_len,
        "decoded table of contents"
    );

    let calibration = if cal_len == 0 {
        None
    } else {
        let blob = section_slice(bytes, toc_pos, cal_ptr, cal_len, "calibration")?;
        let computed = crc32fast::hash(blob);
        if computed != cal_crc {
            return Err(ReadError::CrcMismatch {
                section: "calibration",
                stored: cal_crc,
                computed,
            });
        }
        Some(blob.to_vec())
    };

    let torm_data = section_slice(bytes, toc_pos, torm_ptr, torm_len, "table of register maps")?;
    let register_maps = decode_register_maps(torm_data)?;

    let touc_data = section_slice(bytes, toc_pos, touc_ptr, touc_len, "table of use cases")?;
    let records = decode_use_case_table(touc_data, use_case_count)?;

    let mut use_cases = Vec::with_capacity(records.len());
    for record in records {
        use_cases.push(materialize_use_case(bytes, toc_pos, record)?);
    }

    let module_serial = if serial_bytes.iter().all(|&b| b == 0) {
        None
    } else if !serial_bytes.is_ascii() {
        return Err(ReadError::NotAscii {
            field: "module serial",
        });
    } else {
        Some(String::from_utf8_lossy(serial_bytes).into_owned())
    };

    let module_suffix = if suffix_len == 0 {
        None
    } else {
        Some(section_slice(bytes, toc_pos, suffix_ptr, suffix_len, "module suffix")?.to_vec())
    };

    Ok(Image {
        device: DeviceData {
            name: String::new(),
            product_issuer: String::from_utf8_lossy(issuer).into_owned(),
            product_code,
            system_frequency,
            use_cases,
            register_maps,
        },
        calibration,
        module_serial,
        module_suffix,
    })
}

fn locate_toc(bytes: &[u8]) -> Result<usize, ReadError> {
    if bytes.starts_with(TOC_MAGIC) {
        return Ok(0);
    }
    if bytes.len() > FLASH_OFFSET && bytes[FLASH_OFFSET..].starts_with(TOC_MAGIC) {
        return Ok(FLASH_OFFSET);
    }
    Err(ReadError::BadMagic)
}

/// Map a flash-absolute address to a slice of the input buffer.
///
/// The table of contents lives at flash address 0x2000; if it was found at
/// buffer offset 0 the reserved region was stripped and every address is
/// shifted down accordingly.
fn section_slice<'a>(
    bytes: &'a [u8],
    toc_pos: usize,
    address: u32,
    length: u32,
    section: &'static str,
) -> Result<&'a [u8], ReadError> {
    let out_of_range = ReadError::SectionOutOfRange {
        section,
        address: address as usize,
        length: length as usize,
    };
    let start = (address as usize + toc_pos)
        .checked_sub(FLASH_OFFSET)
        .ok_or_else(|| out_of_range.clone())?;
    let end = start.checked_add(length as usize).ok_or_else(|| out_of_range.clone())?;
    bytes.get(start..end).ok_or(out_of_range)
}

fn u24_at(buf: &[u8], offset: usize) -> u32 {
    u32::from(buf[offset]) | u32::from(buf[offset + 1]) << 8 | u32::from(buf[offset + 2]) << 16
}

fn u32_at(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn ptr_size_at(buf: &[u8], offset: usize) -> (u32, u32) {
    (u24_at(buf, offset), u24_at(buf, offset + 3))
}

fn decode_register_maps(data: &[u8]) -> Result<TableOfRegisterMaps, ReadError> {
    const SECTION: &str = "table of register maps";
    let payload = split_magic_crc(data, TORM_MAGIC, SECTION)?;
    let stored = u32_at(data, 5);
    let computed = crc32fast::hash(payload);
    if stored != computed {
        return Err(ReadError::CrcMismatch {
            section: SECTION,
            stored,
            computed,
        });
    }

    let mut cur = Cursor::new(payload, SECTION);
    let version = cur.u24_le()?;
    if version != TORM_VERSION {
        debug!(version, "unexpected register map table version");
    }
    // reserved firmware-page superblock headers
    cur.take(16)?;

    let mut lengths = [0usize; 6];
    for len in &mut lengths {
        *len = usize::from(cur.u16_le()?);
    }
    let mut maps: Vec<Vec<TimedRegEntry>> = Vec::with_capacity(6);
    for &len in &lengths {
        let mut entries = Vec::with_capacity(len);
        for _ in 0..len {
            entries.push(TimedRegEntry {
                address: cur.u16_le()?,
                value: cur.u16_le()?,
                delay: cur.u16_le()?,
            });
        }
        maps.push(entries);
    }

    let mut maps = maps.into_iter();
    Ok(TableOfRegisterMaps {
        init: maps.next().unwrap(),
        fw_page1: maps.next().unwrap(),
        fw_page2: maps.next().unwrap(),
        fw_start: maps.next().unwrap(),
        start: maps.next().unwrap(),
        stop: maps.next().unwrap(),
    })
}

/// One decoded use case record, before its sequential register block (if
/// any) has been materialized from the surrounding buffer.
struct UseCaseRecord {
    seq_ptr: u32,
    seq_len: u32,
    seq_imager_address: u16,
    timed_list: Vec<TimedRegEntry>,
    use_case: UseCase,
}

fn decode_use_case_table(data: &[u8], count: u8) -> Result<Vec<UseCaseRecord>, ReadError> {
    const SECTION: &str = "table of use cases";
    let records = split_magic_crc(data, TOUC_MAGIC, SECTION)?;
    let stored = u32_at(data, 5);
    let computed = crc32fast::hash(records);
    if stored != computed {
        return Err(ReadError::CrcMismatch {
            section: SECTION,
            stored,
            computed,
        });
    }

    let mut decoded = Vec::with_capacity(usize::from(count));
    let mut pos = 0usize;
    for index in 0..usize::from(count) {
        let mut cur = Cursor::new(&records[pos..], SECTION);
        let declared = usize::from(cur.u16_le()?);
        if declared < 2 || records.len() - pos < declared {
            return Err(ReadError::Truncated {
                section: SECTION,
                offset: pos,
                needed: declared.saturating_sub(records.len() - pos),
            });
        }
        let body = &records[pos + 2..pos + declared];
        let record = decode_use_case_record(body, index, declared)?;
        decoded.push(record);
        pos += declared;
    }
    Ok(decoded)
}

fn decode_use_case_record(
    body: &[u8],
    index: usize,
    declared: usize,
) -> Result<UseCaseRecord, ReadError> {
    let mut cur = Cursor::new(body, "use case record");

    let (seq_ptr, seq_len, seq_imager_address) = cur.seq_reg_header()?;
    let width = cur.u16_le()?;
    let height = cur.u16_le()?;
    let guid = Uuid::from_bytes(cur.take(16)?.try_into().unwrap());
    let start_fps = cur.u8()?;
    let fps_min = cur.u8()?;
    let fps_max = cur.u8()?;
    let processing_params = Uuid::from_bytes(cur.take(16)?.try_into().unwrap());
    let wait_time = cur.u24_le()?;
    let access_level_raw = cur.u8()?;

    let name_len = usize::from(cur.u8()?);
    let block_count = usize::from(cur.u16_le()?);
    let freq_count = usize::from(cur.u16_le()?);
    let timed_count = usize::from(cur.u16_le()?);
    let stream_count = usize::from(cur.u8()?);
    let group_count = usize::from(cur.u8()?);
    let set_count = usize::from(cur.u16_le()?);
    let reserved_len = usize::from(cur.u8()?);

    let name_bytes = cur.take(name_len)?;
    if !name_bytes.is_ascii() {
        return Err(ReadError::NotAscii {
            field: "use case name",
        });
    }
    let name = String::from_utf8_lossy(name_bytes).into_owned();

    let access_level = AccessLevel::try_from(access_level_raw).map_err(|e| {
        ReadError::InvalidAccessLevel {
            use_case: name.clone(),
            value: e.0,
        }
    })?;

    let mut measurement_blocks = Vec::with_capacity(block_count);
    for _ in 0..block_count {
        measurement_blocks.push(cur.u16_le()?);
    }
    let mut imager_frequencies = Vec::with_capacity(freq_count);
    for _ in 0..freq_count {
        imager_frequencies.push(cur.u32_le()?);
    }
    let mut timed_list = Vec::with_capacity(timed_count);
    for _ in 0..timed_count {
        timed_list.push(TimedRegEntry {
            address: cur.u16_le()?,
            value: cur.u16_le()?,
            delay: cur.u16_le()?,
        });
    }
    let mut stream_ids = Vec::with_capacity(stream_count);
    for _ in 0..stream_count {
        stream_ids.push(cur.u16_le()?);
    }
    let mut exposure_groups = Vec::with_capacity(group_count);
    for _ in 0..group_count {
        exposure_groups.push(ExposureGroup {
            exposure: cur.u16_le()?,
            min: cur.u16_le()?,
            max: cur.u16_le()?,
        });
    }
    let mut raw_frame_sets = Vec::with_capacity(set_count);
    for _ in 0..set_count {
        raw_frame_sets.push(RawFrameSet {
            frame_count: cur.u8()?,
            frequency: cur.u32_le()?,
            exposure_group: cur.u8()?,
        });
    }
    let reserved_block = cur.take(reserved_len)?.to_vec();

    if cur.remaining() != 0 {
        return Err(ReadError::RecordLengthMismatch {
            index,
            declared,
            consumed: cur.pos() + 2,
        });
    }

    Ok(UseCaseRecord {
        seq_ptr,
        seq_len,
        seq_imager_address,
        timed_list,
        use_case: UseCase {
            name,
            guid,
            image_size: (width, height),
            imager_frequencies,
            stream_ids,
            start_fps,
            fps_limits: (fps_min, fps_max),
            processing_params,
            wait_time,
            access_level,
            measurement_blocks,
            exposure_groups,
            raw_frame_sets,
            register_action: RegisterAction::TimedList(Vec::new()),
            reserved_block,
        },
    })
}

/// Second pass: attach the register work. The table-of-use-cases decode
/// alone does not include sequential block payloads; they are separate
/// page-aligned sections located via each record's header.
fn materialize_use_case(
    bytes: &[u8],
    toc_pos: usize,
    record: UseCaseRecord,
) -> Result<UseCase, ReadError> {
    let mut uc = record.use_case;
    if record.seq_ptr != 0 || record.seq_len != 0 {
        if !record.timed_list.is_empty() {
            return Err(ReadError::ConflictingRegisterAction {
                use_case: uc.name,
                entries: record.timed_list.len(),
            });
        }
        let raw = section_slice(
            bytes,
            toc_pos,
            record.seq_ptr,
            record.seq_len,
            "sequential register block",
        )?;
        if raw.len() % 2 != 0 {
            return Err(ReadError::OddSequentialBlock {
                use_case: uc.name,
                length: raw.len(),
            });
        }
        let values = raw
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        uc.register_action = RegisterAction::SequentialBlock(SequentialRegisterBlock {
            values,
            imager_address: record.seq_imager_address,
        });
    } else {
        uc.register_action = RegisterAction::TimedList(record.timed_list);
    }
    Ok(uc)
}

fn split_magic_crc<'a>(
    data: &'a [u8],
    magic: &[u8],
    section: &'static str,
) -> Result<&'a [u8], ReadError> {
    if data.len() < magic.len() + 4 {
        return Err(ReadError::Truncated {
            section,
            offset: data.len(),
            needed: magic.len() + 4 - data.len(),
        });
    }
    if &data[..magic.len()] != magic {
        return Err(ReadError::BadSectionMagic { section });
    }
    Ok(&data[magic.len() + 4..])
}
