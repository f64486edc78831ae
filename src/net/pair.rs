//! One logical proxied session: two connection halves and their shared state.
//!
//! The pair owns everything both halves must agree on: the protocol state,
//! the compression threshold, the captured key-exchange material, the
//! dispatcher, and the close flag. State and threshold are single atomic
//! cells: one write is observed identically by both halves, and only one
//! half ever triggers a given transition.

use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::auth::SessionService;
use crate::crypto::{KeyExchangeContext, ProxyKeyPair, SECRET_LEN};
use crate::dispatch::Dispatcher;
use crate::error::{RelayError, Result};
use crate::mods::ModSupplier;
use crate::net::half::{ConnectionHalf, Rendezvous};
use crate::net::stats::PairStats;
use crate::net::stream::{FrameReader, FrameWriter};
use crate::packet::PacketRegistry;
use crate::protocol::{framing, PacketDirection, ProtocolState, COMPRESSION_DISABLED};

/// The player identity the relay joins servers as.
#[derive(Clone)]
pub struct SessionProfile {
    /// Access token presented to the session backend.
    pub access_token: String,
    /// The player's profile id.
    pub profile_id: Uuid,
}

impl std::fmt::Debug for SessionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionProfile")
            .field("access_token", &"[REDACTED]")
            .field("profile_id", &self.profile_id)
            .finish()
    }
}

/// Everything a session needs beyond its sockets. All handles are shared;
/// cloning is cheap.
#[derive(Clone)]
pub struct SessionDeps {
    /// Codec registry used for dispatch and mod sends.
    pub registry: Arc<PacketRegistry>,
    /// The relay's own RSA keypair.
    pub keys: Arc<ProxyKeyPair>,
    /// Session-join backend.
    pub auth: Arc<dyn SessionService>,
    /// Player identity.
    pub profile: Arc<SessionProfile>,
    /// Ordered mod entrypoints, instantiated per session at the play
    /// transition.
    pub mods: Arc<ModSupplier>,
}

/// State shared between the two halves of one session.
pub struct PairShared {
    state: AtomicU8,
    compression: AtomicI32,
    closed: AtomicBool,
    client: TcpStream,
    server: TcpStream,
    exchange: Mutex<Option<KeyExchangeContext>>,
    dispatcher: Mutex<Option<Arc<Dispatcher>>>,
    /// Relay counters, reported at close.
    pub stats: PairStats,
}

impl PairShared {
    /// Build from socket handles kept for shutdown only.
    pub fn new(client: TcpStream, server: TcpStream) -> Self {
        Self {
            state: AtomicU8::new(ProtocolState::Handshake as u8),
            compression: AtomicI32::new(COMPRESSION_DISABLED),
            closed: AtomicBool::new(false),
            client,
            server,
            exchange: Mutex::new(None),
            dispatcher: Mutex::new(None),
            stats: PairStats::default(),
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> ProtocolState {
        ProtocolState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Transition the shared protocol state.
    pub fn set_state(&self, state: ProtocolState) {
        tracing::debug!(?state, "switching state");
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Current compression threshold, `-1` when disabled.
    pub fn compression(&self) -> i32 {
        self.compression.load(Ordering::SeqCst)
    }

    /// Update the compression threshold for both halves.
    pub fn set_compression(&self, threshold: i32) {
        tracing::trace!(threshold, "setting compression threshold");
        self.compression.store(threshold, Ordering::SeqCst);
    }

    /// Store captured key-exchange material.
    pub fn set_exchange(&self, exchange: KeyExchangeContext) {
        *self.lock_exchange() = Some(exchange);
    }

    /// Consume the key-exchange material; it lives only for the login
    /// sub-phase.
    pub fn take_exchange(&self) -> Option<KeyExchangeContext> {
        self.lock_exchange().take()
    }

    fn lock_exchange(&self) -> MutexGuard<'_, Option<KeyExchangeContext>> {
        self.exchange
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Install the session dispatcher; only the first install wins.
    pub fn set_dispatcher(&self, dispatcher: Arc<Dispatcher>) {
        let mut slot = self
            .dispatcher
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(dispatcher);
        }
    }

    /// The session dispatcher, if the session has reached play.
    pub fn dispatcher(&self) -> Option<Arc<Dispatcher>> {
        self.dispatcher
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// True until [`close`](Self::close) has run.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Idempotently shut down both sockets, unblocking both halves.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.client.shutdown(Shutdown::Both);
        let _ = self.server.shutdown(Shutdown::Both);

        let (cb_frames, cb_bytes) = self.stats.snapshot(PacketDirection::Clientbound);
        let (sb_frames, sb_bytes) = self.stats.snapshot(PacketDirection::Serverbound);
        tracing::info!(
            cb_frames,
            cb_bytes,
            sb_frames,
            sb_bytes,
            "session closed"
        );
    }
}

/// Handle addressing "the session this packet arrived on". Threaded
/// explicitly through dispatch so mod sends never rely on ambient state.
pub struct ConnectionContext {
    clientbound: Arc<Mutex<FrameWriter>>,
    serverbound: Arc<Mutex<FrameWriter>>,
    shared: Arc<PairShared>,
}

impl ConnectionContext {
    pub(crate) fn new(
        clientbound: Arc<Mutex<FrameWriter>>,
        serverbound: Arc<Mutex<FrameWriter>>,
        shared: Arc<PairShared>,
    ) -> Self {
        Self {
            clientbound,
            serverbound,
            shared,
        }
    }

    /// The pair state this context belongs to.
    pub fn shared(&self) -> &Arc<PairShared> {
        &self.shared
    }

    /// Frame and transmit a packet payload (`[varint id][fields]`) in the
    /// given direction, applying the session's current compression envelope.
    /// Holds the direction's write lock for the whole frame.
    pub fn write_packet(&self, direction: PacketDirection, payload: &[u8]) -> Result<()> {
        let writer = match direction {
            PacketDirection::Clientbound => &self.clientbound,
            PacketDirection::Serverbound => &self.serverbound,
        };
        let mut writer = lock_writer(writer)?;
        framing::write_packet(&mut *writer, payload, self.shared.compression())
    }
}

pub(crate) fn lock_writer(
    writer: &Arc<Mutex<FrameWriter>>,
) -> Result<MutexGuard<'_, FrameWriter>> {
    writer
        .lock()
        .map_err(|_| RelayError::Framing("write lock poisoned by a panicked writer".to_string()))
}

/// One proxied session: the client-facing and server-facing halves of a
/// single logical connection.
pub struct ConnectionPair {
    shared: Arc<PairShared>,
}

impl ConnectionPair {
    /// Wire up both halves over the given sockets and start their read loops
    /// on dedicated worker threads.
    ///
    /// `outbound_host` is what the handshake's target-host field is
    /// rewritten to before it reaches the real server.
    pub fn start(
        client: TcpStream,
        server: TcpStream,
        outbound_host: &str,
        deps: &SessionDeps,
    ) -> Result<Self> {
        let shared = Arc::new(PairShared::new(client.try_clone()?, server.try_clone()?));

        let to_client = Arc::new(Mutex::new(FrameWriter::new(client.try_clone()?)));
        let to_server = Arc::new(Mutex::new(FrameWriter::new(server.try_clone()?)));

        let ctx = Arc::new(ConnectionContext::new(
            Arc::clone(&to_client),
            Arc::clone(&to_server),
            Arc::clone(&shared),
        ));

        // one-shot: the server-facing half sends the negotiated secret, the
        // client-facing half parks on it
        let (secret_tx, secret_rx) = mpsc::sync_channel::<[u8; SECRET_LEN]>(1);

        let serverbound = ConnectionHalf::new(
            PacketDirection::Serverbound,
            FrameReader::new(client),
            Arc::clone(&to_server),
            Arc::clone(&shared),
            Arc::clone(&ctx),
            outbound_host.to_string(),
            deps.clone(),
            Rendezvous::ServerFacing(Some(secret_tx)),
        );
        let clientbound = ConnectionHalf::new(
            PacketDirection::Clientbound,
            FrameReader::new(server),
            Arc::clone(&to_client),
            Arc::clone(&shared),
            Arc::clone(&ctx),
            outbound_host.to_string(),
            deps.clone(),
            Rendezvous::ClientFacing(Some(secret_rx)),
        );

        spawn_half(clientbound)?;
        spawn_half(serverbound)?;

        Ok(Self { shared })
    }

    /// True while the session has not been closed.
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// The protocol state both halves currently observe.
    pub fn state(&self) -> ProtocolState {
        self.shared.state()
    }

    /// The compression threshold both halves currently observe.
    pub fn compression_threshold(&self) -> i32 {
        self.shared.compression()
    }

    /// Idempotently close both sockets; both read loops observe
    /// end-of-connection and exit.
    pub fn close(&self) {
        self.shared.close();
    }
}

fn spawn_half(half: ConnectionHalf) -> Result<()> {
    let name = format!("relay-{}", half.direction());
    std::thread::Builder::new()
        .name(name)
        .spawn(move || half.run())?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_context() -> Arc<ConnectionContext> {
    use std::net::TcpListener;

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let a = TcpStream::connect(addr).unwrap();
        let (b, _) = listener.accept().unwrap();
        (a, b)
    }

    let (client, _client_far) = socket_pair();
    let (server, _server_far) = socket_pair();
    // the far ends leak for the duration of the test; fine for unit scope
    std::mem::forget(_client_far);
    std::mem::forget(_server_far);

    let shared = Arc::new(PairShared::new(
        client.try_clone().unwrap(),
        server.try_clone().unwrap(),
    ));
    let to_client = Arc::new(Mutex::new(FrameWriter::new(client)));
    let to_server = Arc::new(Mutex::new(FrameWriter::new(server)));
    Arc::new(ConnectionContext::new(to_client, to_server, shared))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_shared_defaults() {
        let ctx = test_context();
        let shared = ctx.shared();
        assert_eq!(shared.state(), ProtocolState::Handshake);
        assert_eq!(shared.compression(), COMPRESSION_DISABLED);
        assert!(shared.is_open());
    }

    #[test]
    fn test_close_is_idempotent() {
        let ctx = test_context();
        let shared = ctx.shared();
        shared.close();
        assert!(!shared.is_open());
        shared.close();
        assert!(!shared.is_open());
    }

    #[test]
    fn test_state_and_compression_are_shared_cells() {
        let ctx = test_context();
        let shared = Arc::clone(ctx.shared());
        let observer = Arc::clone(&shared);

        shared.set_state(ProtocolState::Login);
        shared.set_compression(256);

        assert_eq!(observer.state(), ProtocolState::Login);
        assert_eq!(observer.compression(), 256);
    }
}
