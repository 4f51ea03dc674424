//! Wire-level primitives shared by the writer and the reader
//!
//! Everything in a Zwetschge image is little-endian with one deliberate
//! exception: the values inside a sequential register block are big-endian,
//! matching the SPI read order of the imager. Addresses and sizes are packed
//! as 24-bit values, so no section can live beyond 16 MiB of flash.

use zwetschge_core::TimedRegEntry;

use crate::error::{ReadError, WriteError};

/// Magic tag of the table of contents
pub const TOC_MAGIC: &[u8; 9] = b"ZWETSCHGE";
/// Magic tag of the table of register maps
pub const TORM_MAGIC: &[u8; 5] = b"eLENA";
/// Magic tag of the table of use cases
pub const TOUC_MAGIC: &[u8; 5] = b"Elena";

/// The container version this codec implements
pub const ZWETSCHGE_VERSION: u32 = 0x147;
/// Version of the table of register maps
pub const TORM_VERSION: u32 = 1;

/// Flash address of the table of contents; the region below it is reserved
/// (one erase sector of the target SPI flash)
pub const FLASH_OFFSET: usize = 0x2000;
/// Flash page size; sequential register blocks are aligned to this
pub const FLASH_PAGE: usize = 0x100;

/// Marker written at the start of the reserved region of an image file
pub const FILE_MARKER: &[u8] = b"This is a Zwetschge file\0";

const U24_MAX: u32 = 0x00ff_ffff;

// Byte offsets within the v147 table of contents, relative to its magic tag.
// These are fixed positions, documented as such rather than computed.
pub const TOC_OFFSET_CRC: usize = 9;
pub const TOC_OFFSET_VERSION: usize = 13;
pub const TOC_OFFSET_MODULE_SUFFIX: usize = 16;
pub const TOC_OFFSET_PRODUCT_ISSUER: usize = 22;
pub const TOC_OFFSET_PRODUCT_CODE: usize = 26;
pub const TOC_OFFSET_SYSTEM_FREQUENCY: usize = 42;
pub const TOC_OFFSET_REGISTER_MAPS: usize = 46;
pub const TOC_OFFSET_CALIBRATION: usize = 52;
pub const TOC_OFFSET_CALIBRATION_CRC: usize = 58;
pub const TOC_OFFSET_USE_CASE_COUNT: usize = 62;
pub const TOC_OFFSET_USE_CASES: usize = 63;
pub const TOC_OFFSET_MODULE_SERIAL: usize = 69;
/// Total size of the v147 table of contents
pub const TOC_SIZE: usize = 88;
/// Length of the module serial field
pub const MODULE_SERIAL_LEN: usize = 19;

/// Round an offset up to the next flash page boundary
pub fn round_up_to_page(offset: usize) -> usize {
    offset.div_ceil(FLASH_PAGE) * FLASH_PAGE
}

/// Append a 24-bit little-endian value
pub fn put_u24(out: &mut Vec<u8>, value: u32, field: &'static str) -> Result<(), WriteError> {
    if value > U24_MAX {
        return Err(WriteError::ValueTooLarge {
            field,
            value: u64::from(value),
            max: u64::from(U24_MAX),
        });
    }
    out.extend_from_slice(&value.to_le_bytes()[..3]);
    Ok(())
}

/// Append one of the format's 24-bit pointer + 24-bit size pairs
pub fn put_ptr_size(
    out: &mut Vec<u8>,
    ptr: usize,
    size: usize,
    field: &'static str,
) -> Result<(), WriteError> {
    put_u24(out, as_u24(ptr, field)?, field)?;
    put_u24(out, as_u24(size, field)?, field)
}

/// Append a sequential register header: pointer, size, imager base address
pub fn put_seq_reg_header(
    out: &mut Vec<u8>,
    ptr: usize,
    size: usize,
    imager_address: u16,
    field: &'static str,
) -> Result<(), WriteError> {
    put_ptr_size(out, ptr, size, field)?;
    out.extend_from_slice(&imager_address.to_le_bytes());
    Ok(())
}

/// Append a timed register entry as three little-endian 16-bit values
pub fn put_timed_reg_entry(out: &mut Vec<u8>, entry: &TimedRegEntry) {
    out.extend_from_slice(&entry.address.to_le_bytes());
    out.extend_from_slice(&entry.value.to_le_bytes());
    out.extend_from_slice(&entry.delay.to_le_bytes());
}

fn as_u24(value: usize, field: &'static str) -> Result<u32, WriteError> {
    u32::try_from(value)
        .ok()
        .filter(|&v| v <= U24_MAX)
        .ok_or(WriteError::ValueTooLarge {
            field,
            value: value as u64,
            max: u64::from(U24_MAX),
        })
}

/// Bounds-checked forward-only reader over one section's bytes.
///
/// Every accessor fails with [`ReadError::Truncated`] naming the section and
/// the offset at which bytes ran out, so a corrupt image is diagnosed rather
/// than panicking on a slice.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    section: &'static str,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8], section: &'static str) -> Self {
        Self {
            buf,
            pos: 0,
            section,
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], ReadError> {
        if self.remaining() < n {
            return Err(ReadError::Truncated {
                section: self.section,
                offset: self.pos,
                needed: n - self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, ReadError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16_le(&mut self) -> Result<u16, ReadError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u16_be(&mut self) -> Result<u16, ReadError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u24_le(&mut self) -> Result<u32, ReadError> {
        let b = self.take(3)?;
        Ok(u32::from(b[0]) | u32::from(b[1]) << 8 | u32::from(b[2]) << 16)
    }

    pub fn u32_le(&mut self) -> Result<u32, ReadError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a 24-bit pointer + 24-bit size pair
    pub fn ptr_size(&mut self) -> Result<(u32, u32), ReadError> {
        Ok((self.u24_le()?, self.u24_le()?))
    }

    /// Read a sequential register header: pointer, size, imager base address
    pub fn seq_reg_header(&mut self) -> Result<(u32, u32, u16), ReadError> {
        Ok((self.u24_le()?, self.u24_le()?, self.u16_le()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u24_is_little_endian_and_bounded() {
        let mut out = Vec::new();
        put_u24(&mut out, 0x147, "test").unwrap();
        assert_eq!(out, [0x47, 0x01, 0x00]);

        let err = put_u24(&mut Vec::new(), 0x0100_0000, "test").unwrap_err();
        assert!(matches!(err, WriteError::ValueTooLarge { .. }));
    }

    #[test]
    fn u24_round_trips_through_cursor() {
        let mut out = Vec::new();
        put_u24(&mut out, 0x00ab_cdef, "test").unwrap();
        let mut cur = Cursor::new(&out, "test");
        assert_eq!(cur.u24_le().unwrap(), 0x00ab_cdef);
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn page_rounding() {
        assert_eq!(round_up_to_page(0), 0);
        assert_eq!(round_up_to_page(1), 0x100);
        assert_eq!(round_up_to_page(0x100), 0x100);
        assert_eq!(round_up_to_page(0x101), 0x200);
    }

    #[test]
    fn cursor_reports_truncation_with_offset() {
        let mut cur = Cursor::new(&[1, 2, 3], "demo section");
        cur.take(2).unwrap();
        let err = cur.u32_le().unwrap_err();
        assert_eq!(
            err,
            ReadError::Truncated {
                section: "demo section",
                offset: 2,
                needed: 3,
            }
        );
    }

    #[test]
    fn toc_offsets_are_contiguous() {
        assert_eq!(TOC_OFFSET_VERSION, TOC_OFFSET_CRC + 4);
        assert_eq!(TOC_OFFSET_MODULE_SUFFIX, TOC_OFFSET_VERSION + 3);
        assert_eq!(TOC_OFFSET_PRODUCT_ISSUER, TOC_OFFSET_MODULE_SUFFIX + 6);
        assert_eq!(TOC_OFFSET_PRODUCT_CODE, TOC_OFFSET_PRODUCT_ISSUER + 4);
        assert_eq!(TOC_OFFSET_SYSTEM_FREQUENCY, TOC_OFFSET_PRODUCT_CODE + 16);
        assert_eq!(TOC_OFFSET_REGISTER_MAPS, TOC_OFFSET_SYSTEM_FREQUENCY + 4);
        assert_eq!(TOC_OFFSET_CALIBRATION, TOC_OFFSET_REGISTER_MAPS + 6);
        assert_eq!(TOC_OFFSET_CALIBRATION_CRC, TOC_OFFSET_CALIBRATION + 6);
        assert_eq!(TOC_OFFSET_USE_CASE_COUNT, TOC_OFFSET_CALIBRATION_CRC + 4);
        assert_eq!(TOC_OFFSET_USE_CASES, TOC_OFFSET_USE_CASE_COUNT + 1);
        assert_eq!(TOC_OFFSET_MODULE_SERIAL, TOC_OFFSET_USE_CASES + 6);
        assert_eq!(TOC_SIZE, TOC_OFFSET_MODULE_SERIAL + MODULE_SERIAL_LEN);
    }
}
