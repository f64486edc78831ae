//! # modrelay - Protocol-Aware Interception Proxy
//!
//! A transparent proxy for a binary, length-prefixed TCP game protocol. It
//! sits between a game client and a game server, decodes just enough of the
//! wire protocol to rewrite the handshake, broker the encryption key
//! exchange, and track the negotiated compression threshold, and forwards
//! everything else byte-for-byte, while exposing a hook so external mod
//! logic can inspect, transform, or veto individual packets in either
//! direction.
//!
//! ## Architecture
//!
//! ```text
//! Game Client            modrelay                       Game Server
//!     |                     |                                |
//!     |---- handshake ----->| rewrite target host ---------->|
//!     |                     |                                |
//!     |<-- enc. request ----| relay's own public key         |
//!     |                     |<----- enc. request ------------|
//!     |---- enc. response ->| re-wrap secret for the server  |
//!     |                     |------ enc. response ---------->|
//!     |                     |                                |
//!     |===== AES-CFB8 =====>| decrypt / inspect / re-encrypt |
//!     |<==== AES-CFB8 ======|<========= AES-CFB8 ===========>|
//! ```
//!
//! Each accepted client becomes one [`net::ConnectionPair`]: two
//! independently-threaded halves, one per direction, sharing the protocol
//! state, the compression threshold, and a one-shot rendezvous used to
//! enable encryption atomically with respect to packet boundaries.
//!
//! ## Connection states
//!
//! | State       | Behaviour                                             |
//! |-------------|-------------------------------------------------------|
//! | `Handshake` | Only the handshake packet; target host is rewritten   |
//! | `Status`    | Degrades to a raw byte pump (server-list pings)       |
//! | `Login`     | Key exchange brokering, compression negotiation       |
//! | `Play`      | Opaque forwarding, packets offered to mod subscribers |
//!
//! ## Mod hooks
//!
//! Mods implement [`mods::ModEntrypoint`]; each session that reaches the
//! play state instantiates every configured mod and hands it the session's
//! [`dispatch::Dispatcher`]. Subscribers receive packets decoded on demand
//! through the [`packet::PacketRegistry`] and may veto forwarding or inject
//! packets of their own.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use modrelay::dispatch::Dispatcher;
//! use modrelay::mods::{ModEntrypoint, ModInstance};
//! use modrelay::packet::ShapeKey;
//!
//! struct ChatFilter;
//!
//! impl ModInstance for ChatFilter {
//!     fn init(&mut self, dispatcher: &Arc<Dispatcher>) {
//!         dispatcher.register("chat-filter", [ShapeKey("chat_message")], |packet, _ctx| {
//!             packet.fields[0]
//!                 .as_str()
//!                 .is_some_and(|text| text.contains("banned"))
//!         });
//!     }
//! }
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: states, varint codec, framing, field primitives
//! - [`packet`]: packet codec registry and built-in structural packets
//! - [`crypto`]: RSA key brokering and AES-CFB8 stream filters
//! - [`auth`]: session-join collaborator
//! - [`net`]: connection halves/pairs, proxy instances, stream filters
//! - [`dispatch`]: subscriber fan-out with block aggregation
//! - [`mods`]: the extension boundary
//! - [`config`]: configuration management
//! - [`error`]: error types and result alias

pub mod auth;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod mods;
pub mod net;
pub mod packet;
pub mod protocol;

// Re-exports for convenience
pub use auth::{HttpSessionService, NoopSessionService, SessionService};
pub use config::RelayConfig;
pub use crypto::ProxyKeyPair;
pub use dispatch::{DecodedPacket, Dispatcher};
pub use error::{RelayError, Result};
pub use mods::{ModEntrypoint, ModInstance, ModSupplier};
pub use net::{
    ConnectionContext, ConnectionPair, ProxyInstance, ProxyRegistry, SessionDeps, SessionProfile,
};
pub use packet::{PacketRegistry, PacketSpec, ShapeKey};
pub use protocol::{PacketDirection, ProtocolState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
