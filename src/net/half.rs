//! Per-direction connection half: the read loop and protocol state machine.
//!
//! A half owns one direction of a session: it reads frames from its inbound
//! socket, structurally inspects the few packets that drive the state
//! machine, and forwards everything else byte-for-byte to its outbound
//! socket. The handshake is rewritten, the key exchange is brokered, and
//! play-state traffic is offered to mod subscribers before forwarding.
//!
//! Frames are processed strictly in arrival order. The only cross-half
//! synchronisation beyond the shared state cells is the one-shot encryption
//! rendezvous: the client-facing half parks after relaying its side of the
//! key exchange and resumes only once the server-facing half hands over the
//! negotiated secret.

use std::io::{Cursor, Read, Write};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::crypto::{secret_from_bytes, KeyExchangeContext, SECRET_LEN};
use crate::dispatch::Dispatcher;
use crate::error::{RelayError, Result};
use crate::net::pair::{lock_writer, ConnectionContext, PairShared, SessionDeps};
use crate::net::stream::{FrameReader, FrameWriter};
use crate::packet::builtin::{EncryptionRequest, EncryptionResponse, Handshake, SetCompression};
use crate::protocol::varint::read_varint;
use crate::protocol::{
    framing, PacketDirection, ProtocolState, COMPRESSION_DISABLED, PACKET_ENCRYPTION,
    PACKET_HANDSHAKE, PACKET_LOGIN_SUCCESS, PACKET_SET_COMPRESSION,
};

/// This half's side of the one-shot encryption rendezvous.
pub enum Rendezvous {
    /// The client-facing (clientbound) half parks on the receiver until the
    /// secret arrives.
    ClientFacing(Option<mpsc::Receiver<[u8; SECRET_LEN]>>),
    /// The server-facing (serverbound) half hands the secret over once the
    /// exchange toward the real server is complete.
    ServerFacing(Option<mpsc::SyncSender<[u8; SECRET_LEN]>>),
}

/// Action queued during structural handling, run after the frame has been
/// forwarded (or blocked).
enum Deferred {
    None,
    /// Park until the peer half completes the key exchange, then install
    /// this half's ciphers.
    AwaitCipher,
    /// Install this half's ciphers and wake the parked peer.
    CompleteExchange([u8; SECRET_LEN]),
    /// Enter the play state and bring up the session dispatcher.
    EnterPlay,
    /// Apply a new compression threshold to the pair.
    SetCompression(i32),
}

/// One direction's read loop.
pub struct ConnectionHalf {
    direction: PacketDirection,
    reader: FrameReader,
    writer: Arc<Mutex<FrameWriter>>,
    shared: Arc<PairShared>,
    ctx: Arc<ConnectionContext>,
    outbound_host: String,
    deps: SessionDeps,
    rendezvous: Rendezvous,
}

impl ConnectionHalf {
    /// Assemble a half; [`run`](Self::run) starts its loop.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        direction: PacketDirection,
        reader: FrameReader,
        writer: Arc<Mutex<FrameWriter>>,
        shared: Arc<PairShared>,
        ctx: Arc<ConnectionContext>,
        outbound_host: String,
        deps: SessionDeps,
        rendezvous: Rendezvous,
    ) -> Self {
        Self {
            direction,
            reader,
            writer,
            shared,
            ctx,
            outbound_host,
            deps,
            rendezvous,
        }
    }

    /// The direction this half relays.
    pub fn direction(&self) -> PacketDirection {
        self.direction
    }

    /// Run the read loop until the session ends. On exit both sockets are
    /// closed and the dispatcher's shutdown hook runs (exactly once across
    /// the pair).
    pub fn run(mut self) {
        tracing::debug!(direction = %self.direction, "connection half started");

        let result = loop {
            let step = if self.shared.state() == ProtocolState::Status {
                self.pump_raw()
            } else {
                self.process_frame()
            };

            if let Err(e) = step {
                // an error on a closed pair is the normal end of a session
                if e.is_disconnect() || !self.shared.is_open() {
                    break Ok(());
                }
                break Err(e);
            }
        };

        match result {
            Ok(()) => tracing::debug!(direction = %self.direction, "connection half closed"),
            Err(e) => {
                tracing::error!(direction = %self.direction, "error processing connection: {e}");
            }
        }

        self.shared.close();
        if let Some(dispatcher) = self.shared.dispatcher() {
            dispatcher.shutdown();
        }
    }

    /// In the status state the half degrades to a pure byte pump; server
    /// list pings are forwarded without framing.
    fn pump_raw(&mut self) -> Result<()> {
        let mut buf = [0u8; 1024];
        let n = self.reader.read(&mut buf)?;
        if n == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }

        let mut writer = lock_writer(&self.writer)?;
        writer.write_all(&buf[..n])?;
        writer.flush()?;
        self.shared.stats.record(self.direction, n);
        Ok(())
    }

    /// Read and handle exactly one frame.
    fn process_frame(&mut self) -> Result<()> {
        let body = framing::read_frame_body(&mut self.reader)?;
        let threshold = self.shared.compression();

        let mut blocked = false;
        let mut deferred = Deferred::None;
        let payload: Bytes;

        if threshold == COMPRESSION_DISABLED {
            let mut cursor = Cursor::new(&body[..]);
            let packet_id = read_varint(&mut cursor)?;
            let state = self.shared.state();

            if state != ProtocolState::Play {
                match packet_id {
                    PACKET_HANDSHAKE if state == ProtocolState::Handshake => {
                        self.handle_handshake(&mut cursor)?;
                        blocked = true;
                    }
                    PACKET_ENCRYPTION if state == ProtocolState::Login => {
                        match self.direction {
                            PacketDirection::Clientbound => {
                                self.handle_encryption_request(&mut cursor)?;
                                deferred = Deferred::AwaitCipher;
                            }
                            PacketDirection::Serverbound => {
                                let secret = self.handle_encryption_response(&mut cursor)?;
                                deferred = Deferred::CompleteExchange(secret);
                            }
                        }
                        blocked = true;
                    }
                    PACKET_LOGIN_SUCCESS if state == ProtocolState::Login => {
                        deferred = Deferred::EnterPlay;
                    }
                    _ => {}
                }
            }

            if packet_id == PACKET_SET_COMPRESSION {
                let packet = SetCompression::read(&mut cursor)?;
                deferred = Deferred::SetCompression(packet.threshold);
            }

            payload = Bytes::from(body.clone());
        } else {
            payload = Bytes::from(framing::decode_payload(&body, threshold)?);

            // compression is established during login; after that only the
            // login-success transition still needs structural inspection
            if self.shared.state() == ProtocolState::Login {
                let mut cursor = Cursor::new(&payload[..]);
                if read_varint(&mut cursor)? == PACKET_LOGIN_SUCCESS {
                    deferred = Deferred::EnterPlay;
                }
            }
        }

        if self.shared.state() == ProtocolState::Play {
            if let Some(dispatcher) = self.shared.dispatcher() {
                blocked |=
                    dispatcher.handle_raw(self.direction, payload, Arc::clone(&self.ctx));
            }
        }

        if !blocked {
            let mut writer = lock_writer(&self.writer)?;
            framing::write_frame_body(&mut *writer, &body)?;
            drop(writer);
            self.shared.stats.record(self.direction, body.len());
        }

        self.run_deferred(deferred)
    }

    /// Rewrite the handshake's target host, set the next state on the pair,
    /// and forward the replacement instead of the original bytes.
    fn handle_handshake<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        let handshake = Handshake::read(reader)?;
        let next = match handshake.next_state {
            2 => ProtocolState::Login,
            _ => ProtocolState::Status,
        };

        tracing::debug!(
            protocol_version = handshake.protocol_version,
            host = %handshake.server_host,
            next_state = handshake.next_state,
            "rewriting handshake target to {}",
            self.outbound_host
        );
        self.shared.set_state(next);

        let replacement = handshake.with_host(&self.outbound_host).encode()?;
        let mut writer = lock_writer(&self.writer)?;
        framing::write_packet(&mut *writer, &replacement, COMPRESSION_DISABLED)
    }

    /// Capture the real server's key material and offer the client our own
    /// public key instead. The server id is emptied: the client is
    /// authenticating the relay, not the real server.
    fn handle_encryption_request<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        let request = EncryptionRequest::read(reader)?;
        tracing::info!(server_id = %request.server_id, "brokering key exchange");

        let exchange = KeyExchangeContext::new(request.server_id, &request.public_key)?;
        self.shared.set_exchange(exchange);

        let replacement = EncryptionRequest {
            server_id: String::new(),
            public_key: self.deps.keys.public_key_der().to_vec(),
            verify_token: request.verify_token,
        };
        let payload = replacement.encode()?;
        let mut writer = lock_writer(&self.writer)?;
        framing::write_packet(&mut *writer, &payload, self.shared.compression())
    }

    /// Recover the secret the client encrypted for us, witness the join with
    /// the session backend, and forward the response re-encrypted under the
    /// real server's key.
    fn handle_encryption_response<R: Read>(&mut self, reader: &mut R) -> Result<[u8; SECRET_LEN]> {
        let response = EncryptionResponse::read(reader)?;

        let secret_plain = self.deps.keys.decrypt(&response.shared_secret)?;
        let token_plain = self.deps.keys.decrypt(&response.verify_token)?;
        let secret = secret_from_bytes(&secret_plain)?;

        let exchange = self.shared.take_exchange().ok_or_else(|| {
            RelayError::Encryption("encryption response without a prior request".to_string())
        })?;

        let profile = &self.deps.profile;
        match self.deps.auth.join_server(
            &profile.access_token,
            profile.profile_id,
            &exchange.server_id,
            exchange.server_public_der(),
            &secret,
        ) {
            Ok(status) if (200..300).contains(&status) => {
                tracing::debug!(status, "session backend accepted the join");
            }
            Ok(status) => {
                tracing::warn!(
                    status,
                    "session backend rejected the join; continuing; the server decides whether to kick"
                );
            }
            Err(e) => {
                tracing::warn!("could not reach the session backend: {e}; continuing");
            }
        }

        let forwarded = EncryptionResponse {
            shared_secret: exchange.encrypt_for_server(&secret)?,
            verify_token: exchange.encrypt_for_server(&token_plain)?,
        };
        let payload = forwarded.encode()?;
        {
            let mut writer = lock_writer(&self.writer)?;
            framing::write_packet(&mut *writer, &payload, self.shared.compression())?;
        }

        Ok(secret)
    }

    fn run_deferred(&mut self, deferred: Deferred) -> Result<()> {
        match deferred {
            Deferred::None => Ok(()),

            Deferred::SetCompression(threshold) => {
                // applied after the threshold frame itself was relayed, so
                // both halves frame all subsequent traffic identically
                self.shared.set_compression(threshold);
                Ok(())
            }

            Deferred::EnterPlay => {
                if self.shared.state() != ProtocolState::Play {
                    let dispatcher =
                        Dispatcher::new(Arc::clone(&self.deps.registry), &self.deps.mods)?;
                    self.shared.set_dispatcher(dispatcher);
                    self.shared.set_state(ProtocolState::Play);
                }
                Ok(())
            }

            Deferred::AwaitCipher => {
                let Rendezvous::ClientFacing(receiver) = &mut self.rendezvous else {
                    return Err(RelayError::Encryption(
                        "encryption request on the server-facing half".to_string(),
                    ));
                };
                let receiver = receiver.take().ok_or_else(|| {
                    RelayError::Encryption("second encryption request in one session".to_string())
                })?;

                tracing::debug!("parking until the key exchange completes");
                let secret = receiver.recv().map_err(|_| {
                    RelayError::Encryption("key exchange abandoned by peer half".to_string())
                })?;

                self.reader.install_cipher(&secret);
                lock_writer(&self.writer)?.install_cipher(&secret);
                tracing::debug!("stream ciphers installed, resuming");
                Ok(())
            }

            Deferred::CompleteExchange(secret) => {
                let Rendezvous::ServerFacing(sender) = &mut self.rendezvous else {
                    return Err(RelayError::Encryption(
                        "encryption response on the client-facing half".to_string(),
                    ));
                };
                let sender = sender.take().ok_or_else(|| {
                    RelayError::Encryption("second encryption response in one session".to_string())
                })?;

                self.reader.install_cipher(&secret);
                lock_writer(&self.writer)?.install_cipher(&secret);

                // wake the parked peer; if it is already gone the session is
                // tearing down and the next read will surface that
                if sender.send(secret).is_err() {
                    tracing::debug!("peer half gone before cipher handover");
                }
                tracing::debug!("stream ciphers installed, peer woken");
                Ok(())
            }
        }
    }
}
