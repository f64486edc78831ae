//! Generic packet codec registry.
//!
//! Maps numeric packet ids (per direction) to packet shapes, and shapes to
//! ordered field-type specifications with field-level codecs. The registry is
//! an explicit object constructed once at startup and passed by reference to
//! every component that needs encode/decode services; tests build a fresh
//! one per case.
//!
//! A shape decodes either through the default field-by-field mechanism or
//! through a registered custom codec, which takes over the whole payload.

pub mod builtin;

use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};

use crate::error::{RelayError, Result};
use crate::protocol::fields::{read_field, write_field, FieldType, FieldValue};
use crate::protocol::PacketDirection;

/// Identifier of a packet shape, unique across the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeKey(pub &'static str);

impl fmt::Display for ShapeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declared direction and field layout of a packet shape.
#[derive(Debug, Clone)]
pub struct PacketSpec {
    /// Direction the packet travels in.
    pub direction: PacketDirection,
    /// Ordered field-type tokens.
    pub fields: Vec<FieldType>,
}

impl PacketSpec {
    /// Build a spec from a direction and field list.
    pub fn new(direction: PacketDirection, fields: impl Into<Vec<FieldType>>) -> Self {
        Self {
            direction,
            fields: fields.into(),
        }
    }
}

/// Custom whole-payload codec for a packet shape.
pub trait PacketCodec: Send + Sync {
    /// Decode the field values from a payload stream (packet id already
    /// consumed).
    fn decode(&self, reader: &mut dyn Read) -> Result<Vec<FieldValue>>;

    /// Encode the field values to a payload stream (packet id already
    /// written).
    fn encode(&self, values: &[FieldValue], writer: &mut dyn Write) -> Result<()>;
}

type FieldEncodeFn = Box<dyn Fn(&FieldValue, &mut dyn Write) -> Result<()> + Send + Sync>;
type FieldDecodeFn = Box<dyn Fn(&mut dyn Read) -> Result<FieldValue> + Send + Sync>;

struct FieldCodec {
    encode: FieldEncodeFn,
    decode: FieldDecodeFn,
}

/// Registry of packet shapes, ids, and field codecs.
pub struct PacketRegistry {
    specs: HashMap<ShapeKey, PacketSpec>,
    custom: HashMap<ShapeKey, Box<dyn PacketCodec>>,
    field_codecs: HashMap<FieldType, FieldCodec>,
    shape_by_id: HashMap<(PacketDirection, i32), ShapeKey>,
    id_by_shape: HashMap<(PacketDirection, ShapeKey), i32>,
}

impl PacketRegistry {
    /// Create a registry with the default primitive field codecs installed.
    pub fn new() -> Self {
        let mut registry = Self {
            specs: HashMap::new(),
            custom: HashMap::new(),
            field_codecs: HashMap::new(),
            shape_by_id: HashMap::new(),
            id_by_shape: HashMap::new(),
        };
        registry.register_default_field_codecs();
        registry
    }

    /// Register a field codec for a type token, replacing any previous one.
    pub fn register_field_codec(
        &mut self,
        field_type: FieldType,
        encode: FieldEncodeFn,
        decode: FieldDecodeFn,
    ) {
        self.field_codecs
            .insert(field_type, FieldCodec { encode, decode });
    }

    fn register_default_field_codecs(&mut self) {
        for field_type in [
            FieldType::Bool,
            FieldType::Byte,
            FieldType::Short,
            FieldType::Int,
            FieldType::Long,
            FieldType::Float,
            FieldType::Double,
            FieldType::String,
            FieldType::VarInt,
            FieldType::VarLong,
            FieldType::Uuid,
            FieldType::ByteArray,
        ] {
            self.register_field_codec(
                field_type,
                Box::new(move |value, writer| write_field(field_type, value, writer)),
                Box::new(move |reader| read_field(field_type, reader)),
            );
        }
    }

    /// Register the specification for a shape.
    pub fn register_spec(&mut self, shape: ShapeKey, spec: PacketSpec) {
        self.specs.insert(shape, spec);
    }

    /// Register a custom codec for a shape, overriding field-by-field
    /// decoding.
    pub fn register_custom_codec(&mut self, shape: ShapeKey, codec: Box<dyn PacketCodec>) {
        self.custom.insert(shape, codec);
    }

    /// Bind a shape to a numeric id in one direction, optionally aliasing
    /// extra ids to the same shape. The first id stays the canonical one
    /// used for encoding.
    ///
    /// Fails fast if the binding would violate the uniqueness invariants:
    /// one shape per (direction, id), one canonical id per (direction,
    /// shape).
    pub fn register_id(
        &mut self,
        direction: PacketDirection,
        shape: ShapeKey,
        id: i32,
        additional_ids: &[i32],
    ) -> Result<()> {
        if let Some(existing) = self.id_by_shape.get(&(direction, shape)) {
            return Err(RelayError::Config(format!(
                "shape {shape} already bound to {direction} id {existing:#04x}"
            )));
        }

        for candidate in std::iter::once(id).chain(additional_ids.iter().copied()) {
            if let Some(existing) = self.shape_by_id.get(&(direction, candidate)) {
                return Err(RelayError::Config(format!(
                    "{direction} id {candidate:#04x} already bound to shape {existing}"
                )));
            }
        }

        self.id_by_shape.insert((direction, shape), id);
        self.shape_by_id.insert((direction, id), shape);
        for alias in additional_ids {
            self.shape_by_id.insert((direction, *alias), shape);
        }
        Ok(())
    }

    /// Register spec and id binding in one step, using the spec's direction.
    pub fn register(
        &mut self,
        shape: ShapeKey,
        spec: PacketSpec,
        id: i32,
        additional_ids: &[i32],
    ) -> Result<()> {
        let direction = spec.direction;
        self.register_spec(shape, spec);
        self.register_id(direction, shape, id, additional_ids)
    }

    /// Look up the shape bound to a (direction, id) pair.
    pub fn shape_for_id(&self, direction: PacketDirection, id: i32) -> Option<ShapeKey> {
        self.shape_by_id.get(&(direction, id)).copied()
    }

    /// Look up the canonical id of a shape in a direction.
    pub fn id_for_shape(&self, direction: PacketDirection, shape: ShapeKey) -> Option<i32> {
        self.id_by_shape.get(&(direction, shape)).copied()
    }

    /// The declared specification of a shape.
    pub fn spec(&self, shape: ShapeKey) -> Result<&PacketSpec> {
        self.specs
            .get(&shape)
            .ok_or_else(|| RelayError::UnknownSpecification(shape.0.to_string()))
    }

    /// Decode the ordered field values of a shape from a payload stream (the
    /// packet id has already been consumed).
    pub fn decode(&self, shape: ShapeKey, reader: &mut dyn Read) -> Result<Vec<FieldValue>> {
        if let Some(codec) = self.custom.get(&shape) {
            return codec.decode(reader);
        }

        let spec = self.spec(shape)?;
        let mut values = Vec::with_capacity(spec.fields.len());
        for field_type in &spec.fields {
            let codec = self
                .field_codecs
                .get(field_type)
                .ok_or_else(|| RelayError::UnknownType(format!("{field_type:?}")))?;
            values.push((codec.decode)(&mut *reader)?);
        }
        Ok(values)
    }

    /// Encode the ordered field values of a shape to a payload stream (the
    /// packet id is written by the caller).
    pub fn encode(
        &self,
        shape: ShapeKey,
        values: &[FieldValue],
        writer: &mut dyn Write,
    ) -> Result<()> {
        if let Some(codec) = self.custom.get(&shape) {
            return codec.encode(values, writer);
        }

        let spec = self.spec(shape)?;
        if spec.fields.len() != values.len() {
            return Err(RelayError::UnknownSpecification(format!(
                "{shape}: {} values for {} fields",
                values.len(),
                spec.fields.len()
            )));
        }

        for (field_type, value) in spec.fields.iter().zip(values) {
            let codec = self
                .field_codecs
                .get(field_type)
                .ok_or_else(|| RelayError::UnknownType(format!("{field_type:?}")))?;
            (codec.encode)(value, &mut *writer)?;
        }
        Ok(())
    }
}

impl Default for PacketRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const CHAT: ShapeKey = ShapeKey("chat_message");

    fn chat_registry() -> PacketRegistry {
        let mut registry = PacketRegistry::new();
        registry
            .register(
                CHAT,
                PacketSpec::new(
                    PacketDirection::Clientbound,
                    vec![FieldType::String, FieldType::Byte],
                ),
                0x0F,
                &[],
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_decode_in_field_order() {
        let registry = chat_registry();
        let mut payload = Vec::new();
        registry
            .encode(
                CHAT,
                &[
                    FieldValue::String("hello".to_string()),
                    FieldValue::Byte(1),
                ],
                &mut payload,
            )
            .unwrap();

        let values = registry.decode(CHAT, &mut Cursor::new(&payload)).unwrap();
        assert_eq!(
            values,
            vec![FieldValue::String("hello".to_string()), FieldValue::Byte(1)]
        );
    }

    #[test]
    fn test_unknown_spec_fails_fast() {
        let registry = PacketRegistry::new();
        let err = registry
            .decode(ShapeKey("missing"), &mut Cursor::new(&[][..]))
            .unwrap_err();
        assert!(matches!(err, RelayError::UnknownSpecification(_)));
    }

    #[test]
    fn test_id_bindings_are_unique() {
        let mut registry = chat_registry();

        // same id, different shape
        let err = registry
            .register_id(PacketDirection::Clientbound, ShapeKey("other"), 0x0F, &[])
            .unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));

        // same shape, second id
        let err = registry
            .register_id(PacketDirection::Clientbound, CHAT, 0x10, &[])
            .unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_additional_ids_alias_the_same_shape() {
        let mut registry = PacketRegistry::new();
        registry
            .register(
                CHAT,
                PacketSpec::new(PacketDirection::Clientbound, vec![FieldType::String]),
                0x0F,
                &[0x42],
            )
            .unwrap();

        assert_eq!(
            registry.shape_for_id(PacketDirection::Clientbound, 0x42),
            Some(CHAT)
        );
        // canonical id is the primary one
        assert_eq!(
            registry.id_for_shape(PacketDirection::Clientbound, CHAT),
            Some(0x0F)
        );
        // other direction stays unbound
        assert_eq!(registry.shape_for_id(PacketDirection::Serverbound, 0x0F), None);
    }

    #[test]
    fn test_custom_codec_delegation() {
        struct Reversed;
        impl PacketCodec for Reversed {
            fn decode(&self, reader: &mut dyn Read) -> Result<Vec<FieldValue>> {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes)?;
                bytes.reverse();
                Ok(vec![FieldValue::ByteArray(bytes)])
            }

            fn encode(&self, values: &[FieldValue], writer: &mut dyn Write) -> Result<()> {
                let mut bytes = values[0].as_bytes().unwrap().to_vec();
                bytes.reverse();
                writer.write_all(&bytes)?;
                Ok(())
            }
        }

        let mut registry = chat_registry();
        registry.register_custom_codec(CHAT, Box::new(Reversed));

        let mut payload = Vec::new();
        registry
            .encode(CHAT, &[FieldValue::ByteArray(vec![1, 2, 3])], &mut payload)
            .unwrap();
        assert_eq!(payload, vec![3, 2, 1]);

        let values = registry.decode(CHAT, &mut Cursor::new(&payload)).unwrap();
        assert_eq!(values, vec![FieldValue::ByteArray(vec![1, 2, 3])]);
    }

    #[test]
    fn test_value_count_mismatch_rejected() {
        let registry = chat_registry();
        let err = registry
            .encode(CHAT, &[FieldValue::Byte(1)], &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, RelayError::UnknownSpecification(_)));
    }
}
