//! Bounded-width packed integer arrays.
//!
//! Arrays of small non-negative integers (per-document field counts, chunk
//! lengths) are stored without per-value framing. The cheapest lossless
//! representation is chosen per array:
//!
//! - length 1: a single VInt
//! - all values equal: a `0` sentinel VInt followed by the repeated value
//! - otherwise: the minimum bit width covering the maximum value, followed
//!   by every value packed into exactly that many bits, contiguous across
//!   byte boundaries (most significant bits first)
//!
//! The encoding is not self-describing: the decoder must be told the array
//! length.

use std::io::Read;

use crate::error::{Result, StrataError};
use crate::storage::{StorageOutput, StructWriter};
use crate::util::varint;

/// Version of the packed encoding, recorded in file headers that embed
/// packed arrays.
pub const PACKED_FORMAT_VERSION: u32 = 1;

/// Number of bits needed to represent `max` (at least 1).
pub fn bits_required(max: u32) -> u32 {
    (32 - max.leading_zeros()).max(1)
}

/// Write `values` in the cheapest representation. `values` must not be
/// empty.
pub fn write_packed<W: StorageOutput>(out: &mut StructWriter<W>, values: &[u32]) -> Result<()> {
    assert!(!values.is_empty());

    if values.len() == 1 {
        return out.write_vint(values[0]);
    }

    if values.iter().all(|&v| v == values[0]) {
        out.write_vint(0)?;
        return out.write_vint(values[0]);
    }

    let max = values.iter().copied().max().unwrap();
    let width = bits_required(max);
    out.write_vint(width)?;

    let mut current = 0u64;
    let mut bits_filled = 0u32;
    for &value in values {
        current = (current << width) | value as u64;
        bits_filled += width;
        while bits_filled >= 8 {
            out.write_u8(((current >> (bits_filled - 8)) & 0xFF) as u8)?;
            bits_filled -= 8;
        }
    }
    if bits_filled > 0 {
        // Left-align the remaining bits in the final byte.
        out.write_u8(((current << (8 - bits_filled)) & 0xFF) as u8)?;
    }

    Ok(())
}

/// Read an array of `len` values written by [`write_packed`].
pub fn read_packed<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u32>> {
    if len == 0 {
        return Err(StrataError::format("packed array length must be positive"));
    }

    if len == 1 {
        return Ok(vec![varint::read_u32(reader)?]);
    }

    let width = varint::read_u32(reader)?;
    if width == 0 {
        let value = varint::read_u32(reader)?;
        return Ok(vec![value; len]);
    }
    if width > 32 {
        return Err(StrataError::format(format!(
            "packed array bit width out of range: {width}"
        )));
    }

    let mask = if width == 32 {
        u32::MAX as u64
    } else {
        (1u64 << width) - 1
    };

    let mut values = Vec::with_capacity(len);
    let mut current = 0u64;
    let mut bits_avail = 0u32;
    let mut byte = [0u8; 1];
    for _ in 0..len {
        while bits_avail < width {
            reader.read_exact(&mut byte)?;
            current = (current << 8) | byte[0] as u64;
            bits_avail += 8;
        }
        values.push(((current >> (bits_avail - width)) & mask) as u32);
        bits_avail -= width;
    }

    Ok(values)
}
