//! Variable-length integer encoding for lengths and packet ids.
//!
//! 7 payload bits per byte, high bit as continuation flag, little-endian
//! group order. Negative values always occupy the maximum width (5 bytes for
//! 32-bit, 10 for 64-bit) because the accumulation is unsigned: the sign bit
//! travels with the rest of the value instead of being extended.

use std::io::{Read, Write};

use crate::error::{RelayError, Result};

/// Maximum encoded width of a 32-bit varint.
pub const MAX_VARINT_LEN: usize = 5;
/// Maximum encoded width of a 64-bit varlong.
pub const MAX_VARLONG_LEN: usize = 10;

/// Write a 32-bit varint.
pub fn write_varint<W: Write + ?Sized>(writer: &mut W, value: i32) -> Result<usize> {
    let mut value = value as u32;
    let mut bytes_written = 0;
    loop {
        if value & !0x7F == 0 {
            writer.write_all(&[value as u8])?;
            return Ok(bytes_written + 1);
        }

        writer.write_all(&[(value & 0x7F) as u8 | 0x80])?;
        bytes_written += 1;
        value >>= 7;
    }
}

/// Write a 64-bit varlong.
pub fn write_varlong<W: Write + ?Sized>(writer: &mut W, value: i64) -> Result<usize> {
    let mut value = value as u64;
    let mut bytes_written = 0;
    loop {
        if value & !0x7F == 0 {
            writer.write_all(&[value as u8])?;
            return Ok(bytes_written + 1);
        }

        writer.write_all(&[(value & 0x7F) as u8 | 0x80])?;
        bytes_written += 1;
        value >>= 7;
    }
}

/// Read a 32-bit varint.
///
/// Fails with a framing error once a sixth encoded byte would be required;
/// a violation here is a protocol break and closes the connection.
pub fn read_varint<R: Read + ?Sized>(reader: &mut R) -> Result<i32> {
    let mut value: u32 = 0;
    let mut bit_offset = 0;

    loop {
        if bit_offset == 35 {
            return Err(RelayError::Framing("varint is too big".to_string()));
        }

        let byte = read_byte(reader)?;
        value |= u32::from(byte & 0x7F) << bit_offset;

        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }

        bit_offset += 7;
    }
}

/// Read a 64-bit varlong.
pub fn read_varlong<R: Read + ?Sized>(reader: &mut R) -> Result<i64> {
    let mut value: u64 = 0;
    let mut bit_offset = 0;

    loop {
        if bit_offset == 70 {
            return Err(RelayError::Framing("varlong is too big".to_string()));
        }

        let byte = read_byte(reader)?;
        value |= u64::from(byte & 0x7F) << bit_offset;

        if byte & 0x80 == 0 {
            return Ok(value as i64);
        }

        bit_offset += 7;
    }
}

/// The encoded width of `value` as a 32-bit varint.
pub fn varint_len(value: i32) -> usize {
    let mut value = value as u32;
    let mut len = 1;
    while value & !0x7F != 0 {
        len += 1;
        value >>= 7;
    }
    len
}

fn read_byte<R: Read + ?Sized>(reader: &mut R) -> Result<u8> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    Ok(byte[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode(value: i32) -> Vec<u8> {
        let mut buf = Vec::new();
        write_varint(&mut buf, value).unwrap();
        buf
    }

    #[test]
    fn test_varint_known_encodings() {
        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(1), vec![0x01]);
        assert_eq!(encode(127), vec![0x7F]);
        assert_eq!(encode(128), vec![0x80, 0x01]);
        assert_eq!(encode(300), vec![0xAC, 0x02]);
        assert_eq!(encode(16383), vec![0xFF, 0x7F]);
        assert_eq!(encode(16384), vec![0x80, 0x80, 0x01]);
        assert_eq!(encode(i32::MAX), vec![0xFF, 0xFF, 0xFF, 0xFF, 0x07]);
    }

    #[test]
    fn test_negative_values_use_full_width() {
        assert_eq!(encode(-1), vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
        assert_eq!(encode(-1).len(), MAX_VARINT_LEN);
        assert_eq!(encode(i32::MIN), vec![0x80, 0x80, 0x80, 0x80, 0x08]);
    }

    #[test]
    fn test_varint_roundtrip() {
        for value in [0, 1, 127, 128, 255, 16383, 16384, 2_097_151, i32::MAX, -1, i32::MIN] {
            let buf = encode(value);
            let decoded = read_varint(&mut Cursor::new(&buf)).unwrap();
            assert_eq!(value, decoded, "roundtrip failed for {value}");
            assert_eq!(buf.len(), varint_len(value));
        }
    }

    #[test]
    fn test_varlong_roundtrip() {
        for value in [0i64, 1, 127, 128, i64::from(i32::MAX), i64::MAX, -1, i64::MIN] {
            let mut buf = Vec::new();
            write_varlong(&mut buf, value).unwrap();
            let decoded = read_varlong(&mut Cursor::new(&buf)).unwrap();
            assert_eq!(value, decoded, "roundtrip failed for {value}");
        }
        let mut buf = Vec::new();
        write_varlong(&mut buf, -1).unwrap();
        assert_eq!(buf.len(), MAX_VARLONG_LEN);
    }

    #[test]
    fn test_overlong_varint_rejected() {
        let buf = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let err = read_varint(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, RelayError::Framing(_)));
    }

    #[test]
    fn test_truncated_varint_is_io_error() {
        let buf = [0x80, 0x80];
        let err = read_varint(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, RelayError::Io(_)));
    }
}
