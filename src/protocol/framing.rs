//! Length-prefixed frame codec with the optional zlib compression envelope.
//!
//! Every message on the wire is `[varint length][body]`. Once a compression
//! threshold has been negotiated, the body itself is
//! `[varint uncompressed_len][payload]`: a zero marker means the payload is
//! carried as-is (it was under the threshold), anything else is the exact
//! inflated size of a zlib-deflated payload.
//!
//! Reading and writing deliberately take plain `Read`/`Write` streams; the
//! cipher filters installed during login sit underneath and stay invisible
//! here.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::varint::{read_varint, write_varint};
use super::COMPRESSION_DISABLED;
use crate::error::{RelayError, Result};

/// Read one raw frame body: the varint length prefix, then exactly that many
/// bytes. The body still carries the compression envelope if one is active.
pub fn read_frame_body<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let length = read_varint(reader)?;
    if length < 0 {
        return Err(RelayError::Framing(format!(
            "negative frame length: {length}"
        )));
    }

    let mut body = vec![0u8; length as usize];
    reader.read_exact(&mut body)?;
    Ok(body)
}

/// Write one raw frame body with its varint length prefix and flush.
pub fn write_frame_body<W: Write>(writer: &mut W, body: &[u8]) -> Result<()> {
    write_varint(writer, body.len() as i32)?;
    writer.write_all(body)?;
    writer.flush()?;
    Ok(())
}

/// Strip the compression envelope from a frame body, yielding the packet
/// payload (`[varint packet_id][fields...]`).
pub fn decode_payload(body: &[u8], threshold: i32) -> Result<Vec<u8>> {
    if threshold == COMPRESSION_DISABLED {
        return Ok(body.to_vec());
    }

    let mut cursor = std::io::Cursor::new(body);
    let uncompressed_len = read_varint(&mut cursor)?;
    let rest = &body[cursor.position() as usize..];

    if uncompressed_len == 0 {
        return Ok(rest.to_vec());
    }
    if uncompressed_len < 0 {
        return Err(RelayError::Framing(format!(
            "negative uncompressed length: {uncompressed_len}"
        )));
    }

    let mut payload = Vec::with_capacity(uncompressed_len as usize);
    ZlibDecoder::new(rest).read_to_end(&mut payload)?;

    if payload.len() != uncompressed_len as usize {
        return Err(RelayError::Framing(format!(
            "inflated to {} bytes, envelope declared {}",
            payload.len(),
            uncompressed_len
        )));
    }

    Ok(payload)
}

/// Apply the compression envelope to a packet payload, yielding the frame
/// body to be written with [`write_frame_body`].
pub fn encode_payload(payload: &[u8], threshold: i32) -> Result<Vec<u8>> {
    if threshold == COMPRESSION_DISABLED {
        return Ok(payload.to_vec());
    }

    if (payload.len() as i32) < threshold {
        let mut body = Vec::with_capacity(payload.len() + 1);
        write_varint(&mut body, 0)?;
        body.extend_from_slice(payload);
        return Ok(body);
    }

    let mut body = Vec::new();
    write_varint(&mut body, payload.len() as i32)?;
    let mut encoder = ZlibEncoder::new(body, Compression::default());
    encoder.write_all(payload)?;
    Ok(encoder.finish()?)
}

/// Envelope-encode and frame a packet payload in one step.
pub fn write_packet<W: Write>(writer: &mut W, payload: &[u8], threshold: i32) -> Result<()> {
    let body = encode_payload(payload, threshold)?;
    write_frame_body(writer, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(payload: &[u8], threshold: i32) -> Vec<u8> {
        let mut wire = Vec::new();
        write_packet(&mut wire, payload, threshold).unwrap();

        let mut cursor = Cursor::new(&wire);
        let body = read_frame_body(&mut cursor).unwrap();
        assert_eq!(cursor.position() as usize, wire.len(), "trailing bytes");
        decode_payload(&body, threshold).unwrap()
    }

    #[test]
    fn test_roundtrip_compression_disabled() {
        for len in [0usize, 1, 255, 10_000] {
            let payload = vec![0xABu8; len];
            assert_eq!(roundtrip(&payload, COMPRESSION_DISABLED), payload);
        }
    }

    #[test]
    fn test_roundtrip_around_threshold() {
        let threshold = 256;
        for len in [0usize, 1, 255, 256, 257, 10_000] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            assert_eq!(roundtrip(&payload, threshold), payload, "len {len}");
        }
    }

    #[test]
    fn test_under_threshold_envelope_is_marked_uncompressed() {
        let payload = vec![0x42u8; 50];
        let body = encode_payload(&payload, 256).unwrap();
        assert_eq!(body[0], 0x00);
        assert_eq!(&body[1..], &payload[..]);
    }

    #[test]
    fn test_over_threshold_envelope_declares_inflated_size() {
        let payload = vec![0x42u8; 300];
        let body = encode_payload(&payload, 256).unwrap();

        let mut cursor = Cursor::new(&body[..]);
        assert_eq!(read_varint(&mut cursor).unwrap(), 300);
        // zlib beats a 300-byte run of one value comfortably
        assert!(body.len() < payload.len());
    }

    #[test]
    fn test_inflated_size_mismatch_rejected() {
        let payload = vec![0x42u8; 300];
        let mut body = encode_payload(&payload, 256).unwrap();
        // corrupt the declared size (300 = 0xAC 0x02 -> 301)
        body[0] = 0xAD;
        let err = decode_payload(&body, 256).unwrap_err();
        assert!(matches!(err, RelayError::Framing(_)));
    }

    #[test]
    fn test_truncated_frame_is_io_error() {
        let mut wire = Vec::new();
        write_varint(&mut wire, 100).unwrap();
        wire.extend_from_slice(&[0u8; 10]);
        let err = read_frame_body(&mut Cursor::new(&wire)).unwrap_err();
        assert!(matches!(err, RelayError::Io(_)));
    }
}
