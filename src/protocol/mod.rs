//! Protocol states, packet directions, and wire constants.
//!
//! The proxied protocol is a length-prefixed binary TCP protocol with four
//! connection states. Only a handful of packets are structurally understood;
//! everything else is forwarded as opaque payload.
//!
//! ## Connection states
//!
//! ```text
//!                  handshake(next=1)
//!   [Handshake] ───────────────────────> [Status]   (pure byte pump)
//!        │
//!        │ handshake(next=2)
//!        v
//!     [Login] ── login success (0x02) ──> [Play]    (dispatch to mods)
//! ```
//!
//! ## Structural packets
//!
//! | Id     | State     | Direction   | Purpose                         |
//! |--------|-----------|-------------|---------------------------------|
//! | `0x00` | Handshake | serverbound | Handshake, host rewrite         |
//! | `0x01` | Login     | clientbound | Encryption request              |
//! | `0x01` | Login     | serverbound | Encryption response             |
//! | `0x02` | Login     | clientbound | Login success, enter Play       |
//! | `0x03` | Login     | clientbound | Set compression threshold       |

pub mod fields;
pub mod framing;
pub mod varint;

/// Handshake packet id.
pub const PACKET_HANDSHAKE: i32 = 0x00;
/// Encryption request/response id (direction disambiguates).
pub const PACKET_ENCRYPTION: i32 = 0x01;
/// Login success id.
pub const PACKET_LOGIN_SUCCESS: i32 = 0x02;
/// Set compression id.
pub const PACKET_SET_COMPRESSION: i32 = 0x03;

/// Default remote port when a server address omits one.
pub const DEFAULT_PORT: u16 = 25565;

/// Compression threshold value meaning "compression disabled".
pub const COMPRESSION_DISABLED: i32 = -1;

/// Connection state shared by both halves of a proxied session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtocolState {
    /// Initial state; only the handshake packet is valid.
    Handshake = 0,
    /// Server-list ping traffic; forwarded without framing.
    Status = 1,
    /// Authentication and key exchange.
    Login = 2,
    /// Live game traffic; packets are offered to mod subscribers.
    Play = 3,
}

impl ProtocolState {
    /// Decode from the `repr(u8)` value used in the shared atomic cell.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ProtocolState::Status,
            2 => ProtocolState::Login,
            3 => ProtocolState::Play,
            _ => ProtocolState::Handshake,
        }
    }
}

/// The direction of a packet relative to the proxied session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketDirection {
    /// Traffic flowing toward the game client.
    Clientbound,
    /// Traffic flowing toward the game server.
    Serverbound,
}

impl PacketDirection {
    /// The opposite direction.
    pub fn opposite(self) -> Self {
        match self {
            PacketDirection::Clientbound => PacketDirection::Serverbound,
            PacketDirection::Serverbound => PacketDirection::Clientbound,
        }
    }
}

impl std::fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketDirection::Clientbound => write!(f, "clientbound"),
            PacketDirection::Serverbound => write!(f, "serverbound"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip() {
        for state in [
            ProtocolState::Handshake,
            ProtocolState::Status,
            ProtocolState::Login,
            ProtocolState::Play,
        ] {
            assert_eq!(ProtocolState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_direction_opposite() {
        assert_eq!(
            PacketDirection::Clientbound.opposite(),
            PacketDirection::Serverbound
        );
        assert_eq!(
            PacketDirection::Serverbound.opposite(),
            PacketDirection::Clientbound
        );
    }
}
