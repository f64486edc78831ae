//! Structural packets the relay itself understands.
//!
//! Only the packets that drive the connection state machine are decoded
//! here; everything else stays opaque. Each type reads its fields from a
//! payload whose packet id has already been consumed, and encodes back to a
//! full payload including the id.

use std::io::Read;

use crate::error::Result;
use crate::packet::{PacketRegistry, PacketSpec, ShapeKey};
use crate::protocol::fields::{
    read_byte_array, read_string, write_byte_array, write_string, FieldType,
};
use crate::protocol::varint::{read_varint, write_varint};
use crate::protocol::{
    PacketDirection, PACKET_ENCRYPTION, PACKET_HANDSHAKE, PACKET_SET_COMPRESSION,
};

/// Shape key for the handshake packet.
pub const HANDSHAKE: ShapeKey = ShapeKey("handshake");
/// Shape key for the clientbound encryption request.
pub const ENCRYPTION_REQUEST: ShapeKey = ShapeKey("encryption_request");
/// Shape key for the serverbound encryption response.
pub const ENCRYPTION_RESPONSE: ShapeKey = ShapeKey("encryption_response");
/// Shape key for the clientbound set-compression packet.
pub const SET_COMPRESSION: ShapeKey = ShapeKey("set_compression");

/// A registry pre-populated with the structural shapes above.
pub fn default_registry() -> PacketRegistry {
    let mut registry = PacketRegistry::new();

    registry
        .register(
            HANDSHAKE,
            PacketSpec::new(
                PacketDirection::Serverbound,
                vec![
                    FieldType::VarInt,
                    FieldType::String,
                    FieldType::Short,
                    FieldType::VarInt,
                ],
            ),
            PACKET_HANDSHAKE,
            &[],
        )
        .expect("builtin shape bindings are conflict-free");
    registry
        .register(
            ENCRYPTION_REQUEST,
            PacketSpec::new(
                PacketDirection::Clientbound,
                vec![FieldType::String, FieldType::ByteArray, FieldType::ByteArray],
            ),
            PACKET_ENCRYPTION,
            &[],
        )
        .expect("builtin shape bindings are conflict-free");
    registry
        .register(
            ENCRYPTION_RESPONSE,
            PacketSpec::new(
                PacketDirection::Serverbound,
                vec![FieldType::ByteArray, FieldType::ByteArray],
            ),
            PACKET_ENCRYPTION,
            &[],
        )
        .expect("builtin shape bindings are conflict-free");
    registry
        .register(
            SET_COMPRESSION,
            PacketSpec::new(PacketDirection::Clientbound, vec![FieldType::VarInt]),
            PACKET_SET_COMPRESSION,
            &[],
        )
        .expect("builtin shape bindings are conflict-free");

    registry
}

/// The opening handshake: protocol version, target host/port, and the
/// requested next state (1 = status, 2 = login).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_host: String,
    pub server_port: u16,
    pub next_state: i32,
}

impl Handshake {
    /// Parse the fields following the packet id.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let protocol_version = read_varint(reader)?;
        let server_host = read_string(reader)?;
        let mut port = [0u8; 2];
        reader.read_exact(&mut port)?;
        let next_state = read_varint(reader)?;

        Ok(Self {
            protocol_version,
            server_host,
            server_port: u16::from_be_bytes(port),
            next_state,
        })
    }

    /// Encode the full payload, id included.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        write_varint(&mut payload, PACKET_HANDSHAKE)?;
        write_varint(&mut payload, self.protocol_version)?;
        write_string(&mut payload, &self.server_host)?;
        payload.extend_from_slice(&self.server_port.to_be_bytes());
        write_varint(&mut payload, self.next_state)?;
        Ok(payload)
    }

    /// Copy of this handshake with the target host replaced.
    pub fn with_host(&self, host: &str) -> Self {
        Self {
            server_host: host.to_string(),
            ..self.clone()
        }
    }
}

/// Clientbound encryption request: the server offers its public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionRequest {
    pub server_id: String,
    pub public_key: Vec<u8>,
    pub verify_token: Vec<u8>,
}

impl EncryptionRequest {
    /// Parse the fields following the packet id.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            server_id: read_string(reader)?,
            public_key: read_byte_array(reader)?,
            verify_token: read_byte_array(reader)?,
        })
    }

    /// Encode the full payload, id included.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        write_varint(&mut payload, PACKET_ENCRYPTION)?;
        write_string(&mut payload, &self.server_id)?;
        write_byte_array(&mut payload, &self.public_key)?;
        write_byte_array(&mut payload, &self.verify_token)?;
        Ok(payload)
    }
}

/// Serverbound encryption response: secret and verify token, each encrypted
/// under the public key the client was shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionResponse {
    pub shared_secret: Vec<u8>,
    pub verify_token: Vec<u8>,
}

impl EncryptionResponse {
    /// Parse the fields following the packet id.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            shared_secret: read_byte_array(reader)?,
            verify_token: read_byte_array(reader)?,
        })
    }

    /// Encode the full payload, id included.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        write_varint(&mut payload, PACKET_ENCRYPTION)?;
        write_byte_array(&mut payload, &self.shared_secret)?;
        write_byte_array(&mut payload, &self.verify_token)?;
        Ok(payload)
    }
}

/// Clientbound set-compression packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetCompression {
    pub threshold: i32,
}

impl SetCompression {
    /// Parse the fields following the packet id.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            threshold: read_varint(reader)?,
        })
    }

    /// Encode the full payload, id included.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        write_varint(&mut payload, PACKET_SET_COMPRESSION)?;
        write_varint(&mut payload, self.threshold)?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_handshake_roundtrip_and_rewrite() {
        let handshake = Handshake {
            protocol_version: 758,
            server_host: "mc.example.com".to_string(),
            server_port: 25565,
            next_state: 2,
        };

        let payload = handshake.encode().unwrap();
        let mut cursor = Cursor::new(&payload[..]);
        assert_eq!(read_varint(&mut cursor).unwrap(), PACKET_HANDSHAKE);
        let decoded = Handshake::read(&mut cursor).unwrap();
        assert_eq!(decoded, handshake);

        let rewritten = handshake.with_host("play.example.net");
        assert_eq!(rewritten.server_host, "play.example.net");
        assert_eq!(rewritten.protocol_version, 758);
        assert_eq!(rewritten.server_port, 25565);
        assert_eq!(rewritten.next_state, 2);
    }

    #[test]
    fn test_encryption_request_roundtrip() {
        let request = EncryptionRequest {
            server_id: "abc123".to_string(),
            public_key: vec![0x30; 162],
            verify_token: vec![1, 2, 3, 4, 5, 6, 7, 8],
        };

        let payload = request.encode().unwrap();
        let mut cursor = Cursor::new(&payload[..]);
        assert_eq!(read_varint(&mut cursor).unwrap(), PACKET_ENCRYPTION);
        assert_eq!(EncryptionRequest::read(&mut cursor).unwrap(), request);
    }

    #[test]
    fn test_encryption_response_roundtrip() {
        let response = EncryptionResponse {
            shared_secret: vec![0xAA; 128],
            verify_token: vec![0xBB; 128],
        };

        let payload = response.encode().unwrap();
        let mut cursor = Cursor::new(&payload[..]);
        assert_eq!(read_varint(&mut cursor).unwrap(), PACKET_ENCRYPTION);
        assert_eq!(EncryptionResponse::read(&mut cursor).unwrap(), response);
    }

    #[test]
    fn test_default_registry_bindings() {
        let registry = default_registry();

        assert_eq!(
            registry.shape_for_id(PacketDirection::Serverbound, PACKET_HANDSHAKE),
            Some(HANDSHAKE)
        );
        assert_eq!(
            registry.shape_for_id(PacketDirection::Clientbound, PACKET_ENCRYPTION),
            Some(ENCRYPTION_REQUEST)
        );
        assert_eq!(
            registry.shape_for_id(PacketDirection::Serverbound, PACKET_ENCRYPTION),
            Some(ENCRYPTION_RESPONSE)
        );
        assert_eq!(
            registry.shape_for_id(PacketDirection::Clientbound, PACKET_SET_COMPRESSION),
            Some(SET_COMPRESSION)
        );
    }
}
