//! Variable-length integer and numeric encodings.
//!
//! This module provides the wire encodings used throughout the segment
//! files:
//!
//! - VInt/VLong: unsigned integers written 7 bits per byte, least
//!   significant group first, continuation flag in the high bit.
//! - ZInt/ZLong: zig-zag signed variants so small-magnitude negative
//!   numbers stay compact.
//! - ZFloat/ZDouble: compact float encodings with a one-byte fast path for
//!   small integral values, the raw IEEE-754 pattern for other positive
//!   values, and a sentinel-prefixed pattern for negatives. Negative zero
//!   is deliberately kept out of the small-integer path so it round-trips
//!   bit-exact.
//! - TLong: a timestamp-aware long encoding that divides out day, hour or
//!   second multiples before zig-zag coding, collapsing most epoch-milli
//!   timestamps to one to three bytes.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{Result, StrataError};

/// Maximum encoded length of a VInt.
pub const MAX_VINT_LEN: usize = 5;
/// Maximum encoded length of a VLong.
pub const MAX_VLONG_LEN: usize = 10;

const NEGATIVE_ZERO_FLOAT: u32 = (-0.0f32).to_bits();
const NEGATIVE_ZERO_DOUBLE: u64 = (-0.0f64).to_bits();

// Timestamp multiples, in milliseconds.
const SECOND: i64 = 1000;
const HOUR: i64 = 60 * 60 * SECOND;
const DAY: i64 = 24 * HOUR;
const SECOND_ENCODING: u8 = 0x40;
const HOUR_ENCODING: u8 = 0x80;
const DAY_ENCODING: u8 = 0xC0;

/// Encode a u32 into `buf`, returning the number of bytes used.
pub fn encode_u32(value: u32, buf: &mut [u8; MAX_VINT_LEN]) -> usize {
    let mut val = value;
    let mut len = 0;
    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;
        if val != 0 {
            byte |= 0x80;
        }
        buf[len] = byte;
        len += 1;
        if val == 0 {
            return len;
        }
    }
}

/// Encode a u64 into `buf`, returning the number of bytes used.
pub fn encode_u64(value: u64, buf: &mut [u8; MAX_VLONG_LEN]) -> usize {
    let mut val = value;
    let mut len = 0;
    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;
        if val != 0 {
            byte |= 0x80;
        }
        buf[len] = byte;
        len += 1;
        if val == 0 {
            return len;
        }
    }
}

/// The raw bytes consumed while decoding one varint, for checksum feeds.
pub struct RawVarint {
    buf: [u8; MAX_VLONG_LEN],
    len: usize,
}

impl RawVarint {
    /// The encoded bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Number of encoded bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if no bytes were consumed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Write a variable-length u32 to a writer.
pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<usize> {
    let mut buf = [0u8; MAX_VINT_LEN];
    let len = encode_u32(value, &mut buf);
    writer.write_all(&buf[..len])?;
    Ok(len)
}

/// Write a variable-length u64 to a writer.
pub fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<usize> {
    let mut buf = [0u8; MAX_VLONG_LEN];
    let len = encode_u64(value, &mut buf);
    writer.write_all(&buf[..len])?;
    Ok(len)
}

/// Read a variable-length u32, also returning the raw encoded bytes.
pub fn read_u32_raw<R: Read>(reader: &mut R) -> Result<(u32, RawVarint)> {
    let mut raw = RawVarint {
        buf: [0u8; MAX_VLONG_LEN],
        len: 0,
    };
    let mut result = 0u32;
    let mut shift = 0;

    loop {
        if raw.len == MAX_VINT_LEN {
            return Err(StrataError::format("VInt with too many continuation bytes"));
        }
        let byte = reader.read_u8()?;
        raw.buf[raw.len] = byte;
        raw.len += 1;

        result |= ((byte & 0x7F) as u32) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, raw));
        }

        shift += 7;
    }
}

/// Read a variable-length u64, also returning the raw encoded bytes.
pub fn read_u64_raw<R: Read>(reader: &mut R) -> Result<(u64, RawVarint)> {
    let mut raw = RawVarint {
        buf: [0u8; MAX_VLONG_LEN],
        len: 0,
    };
    let mut result = 0u64;
    let mut shift = 0;

    loop {
        if raw.len == MAX_VLONG_LEN {
            return Err(StrataError::format(
                "VLong with too many continuation bytes",
            ));
        }
        let byte = reader.read_u8()?;
        raw.buf[raw.len] = byte;
        raw.len += 1;

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, raw));
        }

        shift += 7;
    }
}

/// Read a variable-length u32 from a reader.
pub fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    read_u32_raw(reader).map(|(v, _)| v)
}

/// Read a variable-length u64 from a reader.
pub fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    read_u64_raw(reader).map(|(v, _)| v)
}

/// Zig-zag encode an i32.
pub fn zigzag_encode_i32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Zig-zag decode to an i32.
pub fn zigzag_decode_i32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

/// Zig-zag encode an i64.
pub fn zigzag_encode_i64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Zig-zag decode to an i64.
pub fn zigzag_decode_i64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Write a zig-zag encoded i32.
pub fn write_zint<W: Write>(writer: &mut W, value: i32) -> Result<usize> {
    write_u32(writer, zigzag_encode_i32(value))
}

/// Read a zig-zag encoded i32.
pub fn read_zint<R: Read>(reader: &mut R) -> Result<i32> {
    Ok(zigzag_decode_i32(read_u32(reader)?))
}

/// Write a zig-zag encoded i64.
pub fn write_zlong<W: Write>(writer: &mut W, value: i64) -> Result<usize> {
    write_u64(writer, zigzag_encode_i64(value))
}

/// Read a zig-zag encoded i64.
pub fn read_zlong<R: Read>(reader: &mut R) -> Result<i64> {
    Ok(zigzag_decode_i64(read_u64(reader)?))
}

/// Write a float in compact variable-length form: one byte for small
/// integral values in `[-1, 125]`, four bytes for other non-negative
/// values, five bytes (0xFF sentinel + pattern) otherwise.
pub fn write_zfloat<W: Write>(writer: &mut W, f: f32) -> Result<()> {
    let int_val = f as i32;
    let float_bits = f.to_bits();

    if f == int_val as f32 && (-1..=125).contains(&int_val) && float_bits != NEGATIVE_ZERO_FLOAT {
        // small integer value [-1..125]: single byte
        writer.write_u8(0x80 | (1 + int_val) as u8)?;
    } else if float_bits >> 31 == 0 {
        // other non-negative floats: 4 bytes, sign bit lands in the header
        writer.write_u32::<BigEndian>(float_bits)?;
    } else {
        // other negative floats: 5 bytes
        writer.write_u8(0xFF)?;
        writer.write_u32::<BigEndian>(float_bits)?;
    }
    Ok(())
}

/// Read a float written by [`write_zfloat`].
pub fn read_zfloat<R: Read>(reader: &mut R) -> Result<f32> {
    let b = reader.read_u8()?;
    if b == 0xFF {
        Ok(f32::from_bits(reader.read_u32::<BigEndian>()?))
    } else if b & 0x80 != 0 {
        Ok(((b & 0x7F) as i32 - 1) as f32)
    } else {
        let mut rest = [0u8; 3];
        reader.read_exact(&mut rest)?;
        let bits = (b as u32) << 24 | (rest[0] as u32) << 16 | (rest[1] as u32) << 8 | rest[2] as u32;
        Ok(f32::from_bits(bits))
    }
}

/// Write a double in compact variable-length form: one byte for small
/// integral values in `[-1, 124]`, five bytes (0xFE sentinel + float
/// pattern) when the value round-trips exactly through an f32, eight bytes
/// for other non-negative values, nine bytes (0xFF sentinel + pattern)
/// otherwise.
pub fn write_zdouble<W: Write>(writer: &mut W, d: f64) -> Result<()> {
    let int_val = d as i32;
    let double_bits = d.to_bits();

    if d == int_val as f64 && (-1..=124).contains(&int_val) && double_bits != NEGATIVE_ZERO_DOUBLE {
        // small integer value [-1..124]: single byte
        writer.write_u8(0x80 | (1 + int_val) as u8)?;
    } else if d == (d as f32) as f64 {
        // exact f32 representation: 5 bytes
        writer.write_u8(0xFE)?;
        writer.write_u32::<BigEndian>((d as f32).to_bits())?;
    } else if double_bits >> 63 == 0 {
        // other non-negative doubles: 8 bytes
        writer.write_u64::<BigEndian>(double_bits)?;
    } else {
        // other negative doubles: 9 bytes
        writer.write_u8(0xFF)?;
        writer.write_u64::<BigEndian>(double_bits)?;
    }
    Ok(())
}

/// Read a double written by [`write_zdouble`].
pub fn read_zdouble<R: Read>(reader: &mut R) -> Result<f64> {
    let b = reader.read_u8()?;
    if b == 0xFF {
        Ok(f64::from_bits(reader.read_u64::<BigEndian>()?))
    } else if b == 0xFE {
        Ok(f32::from_bits(reader.read_u32::<BigEndian>()?) as f64)
    } else if b & 0x80 != 0 {
        Ok(((b & 0x7F) as i32 - 1) as f64)
    } else {
        let mut rest = [0u8; 7];
        reader.read_exact(&mut rest)?;
        let mut bits = (b as u64) << 56;
        for (i, &byte) in rest.iter().enumerate() {
            bits |= (byte as u64) << (48 - 8 * i);
        }
        Ok(f64::from_bits(bits))
    }
}

/// Write a long in timestamp-aware variable-length form.
///
/// The header's top two bits record which multiple was divided out (raw,
/// second, hour or day — tested in decreasing-coarseness order), bit 0x20
/// flags a VLong continuation, and the low five bits hold the bottom of
/// the zig-zag encoded scaled value.
pub fn write_tlong<W: Write>(writer: &mut W, l: i64) -> Result<()> {
    let mut l = l;
    let mut header: u8;
    if l % SECOND != 0 {
        header = 0;
    } else if l % DAY == 0 {
        header = DAY_ENCODING;
        l /= DAY;
    } else if l % HOUR == 0 {
        header = HOUR_ENCODING;
        l /= HOUR;
    } else {
        header = SECOND_ENCODING;
        l /= SECOND;
    }

    let zig_zag = zigzag_encode_i64(l);
    header |= (zig_zag & 0x1F) as u8;
    let upper_bits = zig_zag >> 5;
    if upper_bits != 0 {
        header |= 0x20;
    }
    writer.write_u8(header)?;
    if upper_bits != 0 {
        write_u64(writer, upper_bits)?;
    }
    Ok(())
}

/// Read a long written by [`write_tlong`].
pub fn read_tlong<R: Read>(reader: &mut R) -> Result<i64> {
    let header = reader.read_u8()?;

    let mut bits = (header & 0x1F) as u64;
    if header & 0x20 != 0 {
        bits |= read_u64(reader)? << 5;
    }

    let l = zigzag_decode_i64(bits);

    match header & DAY_ENCODING {
        0 => Ok(l),
        SECOND_ENCODING => Ok(l * SECOND),
        HOUR_ENCODING => Ok(l * HOUR),
        DAY_ENCODING => Ok(l * DAY),
        _ => unreachable!(),
    }
}
