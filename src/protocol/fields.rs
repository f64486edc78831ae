//! Primitive field values and their default wire codecs.
//!
//! Structured packets are described as an ordered list of [`FieldType`]
//! tokens; the registry materialises them into [`FieldValue`]s on demand.
//! `VarInt`/`VarLong` are distinct tokens from `Int`/`Long`: they share the
//! in-memory value type but encode differently.

use std::io::{Read, Write};

use uuid::Uuid;

use super::varint;
use crate::error::{RelayError, Result};

/// Semantic type token for one packet field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Bool,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    VarInt,
    VarLong,
    Uuid,
    ByteArray,
}

/// A decoded packet field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    VarInt(i32),
    VarLong(i64),
    Uuid(Uuid),
    ByteArray(Vec<u8>),
}

impl FieldValue {
    /// The type token this value encodes as.
    pub fn kind(&self) -> FieldType {
        match self {
            FieldValue::Bool(_) => FieldType::Bool,
            FieldValue::Byte(_) => FieldType::Byte,
            FieldValue::Short(_) => FieldType::Short,
            FieldValue::Int(_) => FieldType::Int,
            FieldValue::Long(_) => FieldType::Long,
            FieldValue::Float(_) => FieldType::Float,
            FieldValue::Double(_) => FieldType::Double,
            FieldValue::String(_) => FieldType::String,
            FieldValue::VarInt(_) => FieldType::VarInt,
            FieldValue::VarLong(_) => FieldType::VarLong,
            FieldValue::Uuid(_) => FieldType::Uuid,
            FieldValue::ByteArray(_) => FieldType::ByteArray,
        }
    }

    /// Borrow the string payload, if this is a string field.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The varint payload, if this is a varint field.
    pub fn as_varint(&self) -> Option<i32> {
        match self {
            FieldValue::VarInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Borrow the byte-array payload, if this is a byte-array field.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::ByteArray(b) => Some(b),
            _ => None,
        }
    }
}

/// Decode one field of the given type from a stream.
pub fn read_field<R: Read + ?Sized>(field_type: FieldType, reader: &mut R) -> Result<FieldValue> {
    Ok(match field_type {
        FieldType::Bool => FieldValue::Bool(read_exact::<1, _>(reader)?[0] == 0x01),
        FieldType::Byte => FieldValue::Byte(read_exact::<1, _>(reader)?[0] as i8),
        FieldType::Short => FieldValue::Short(i16::from_be_bytes(read_exact(reader)?)),
        FieldType::Int => FieldValue::Int(i32::from_be_bytes(read_exact(reader)?)),
        FieldType::Long => FieldValue::Long(i64::from_be_bytes(read_exact(reader)?)),
        FieldType::Float => FieldValue::Float(f32::from_be_bytes(read_exact(reader)?)),
        FieldType::Double => FieldValue::Double(f64::from_be_bytes(read_exact(reader)?)),
        FieldType::String => FieldValue::String(read_string(reader)?),
        FieldType::VarInt => FieldValue::VarInt(varint::read_varint(reader)?),
        FieldType::VarLong => FieldValue::VarLong(varint::read_varlong(reader)?),
        FieldType::Uuid => FieldValue::Uuid(Uuid::from_bytes(read_exact(reader)?)),
        FieldType::ByteArray => FieldValue::ByteArray(read_byte_array(reader)?),
    })
}

/// Encode one field to a stream. The value must match the type token.
pub fn write_field<W: Write + ?Sized>(
    field_type: FieldType,
    value: &FieldValue,
    writer: &mut W,
) -> Result<()> {
    match (field_type, value) {
        (FieldType::Bool, FieldValue::Bool(v)) => writer.write_all(&[u8::from(*v)])?,
        (FieldType::Byte, FieldValue::Byte(v)) => writer.write_all(&[*v as u8])?,
        (FieldType::Short, FieldValue::Short(v)) => writer.write_all(&v.to_be_bytes())?,
        (FieldType::Int, FieldValue::Int(v)) => writer.write_all(&v.to_be_bytes())?,
        (FieldType::Long, FieldValue::Long(v)) => writer.write_all(&v.to_be_bytes())?,
        (FieldType::Float, FieldValue::Float(v)) => writer.write_all(&v.to_be_bytes())?,
        (FieldType::Double, FieldValue::Double(v)) => writer.write_all(&v.to_be_bytes())?,
        (FieldType::String, FieldValue::String(v)) => write_string(writer, v)?,
        (FieldType::VarInt, FieldValue::VarInt(v)) => {
            varint::write_varint(writer, *v)?;
        }
        (FieldType::VarLong, FieldValue::VarLong(v)) => {
            varint::write_varlong(writer, *v)?;
        }
        (FieldType::Uuid, FieldValue::Uuid(v)) => writer.write_all(v.as_bytes())?,
        (FieldType::ByteArray, FieldValue::ByteArray(v)) => write_byte_array(writer, v)?,
        (expected, actual) => {
            return Err(RelayError::UnknownType(format!(
                "field value {:?} does not encode as {:?}",
                actual.kind(),
                expected
            )))
        }
    }
    Ok(())
}

/// Read a UTF-8 string prefixed with its byte length as a varint.
pub fn read_string<R: Read + ?Sized>(reader: &mut R) -> Result<String> {
    let bytes = read_byte_array(reader)?;
    String::from_utf8(bytes).map_err(|e| RelayError::Framing(format!("invalid UTF-8 string: {e}")))
}

/// Write a UTF-8 string prefixed with its byte length as a varint.
pub fn write_string<W: Write + ?Sized>(writer: &mut W, value: &str) -> Result<()> {
    write_byte_array(writer, value.as_bytes())
}

/// Read a raw byte array prefixed with its length as a varint.
pub fn read_byte_array<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>> {
    let length = varint::read_varint(reader)?;
    if length < 0 {
        return Err(RelayError::Framing(format!(
            "negative byte array length: {length}"
        )));
    }

    let mut bytes = vec![0u8; length as usize];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Write a raw byte array prefixed with its length as a varint.
pub fn write_byte_array<W: Write + ?Sized>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    varint::write_varint(writer, bytes.len() as i32)?;
    writer.write_all(bytes)?;
    Ok(())
}

fn read_exact<const N: usize, R: Read + ?Sized>(reader: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}
