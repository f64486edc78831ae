//! Proxy instances: one listening port per proxied server.
//!
//! An instance accepts local client connections, opens a matching outbound
//! connection to the real server, and starts one [`ConnectionPair`] per
//! accepted client. Several instances may run at once on distinct local
//! ports, tracked by a [`ProxyRegistry`].

use std::collections::HashMap;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{RelayError, Result};
use crate::net::pair::{ConnectionPair, SessionDeps};

/// A running listener relaying one configured server.
pub struct ProxyInstance {
    server_id: String,
    local_port: u16,
    remote_host: String,
    remote_port: u16,
    running: Arc<AtomicBool>,
    pairs: Arc<Mutex<Vec<ConnectionPair>>>,
}

impl ProxyInstance {
    /// Bind the local port and start the accept loop on its own thread.
    pub fn start(
        server_id: impl Into<String>,
        local_port: u16,
        remote_host: impl Into<String>,
        remote_port: u16,
        deps: SessionDeps,
    ) -> Result<Arc<Self>> {
        let server_id = server_id.into();
        let remote_host = remote_host.into();

        let listener = TcpListener::bind(("0.0.0.0", local_port))
            .map_err(|e| RelayError::Config(format!("cannot bind local port {local_port}: {e}")))?;

        tracing::info!(
            server_id = %server_id,
            local_port,
            remote = %format!("{remote_host}:{remote_port}"),
            "starting proxy instance"
        );

        let instance = Arc::new(Self {
            server_id,
            local_port,
            remote_host: remote_host.clone(),
            remote_port,
            running: Arc::new(AtomicBool::new(true)),
            pairs: Arc::new(Mutex::new(Vec::new())),
        });

        let accept_instance = Arc::clone(&instance);
        std::thread::Builder::new()
            .name(format!("relay-accept-{local_port}"))
            .spawn(move || accept_instance.accept_loop(&listener, &deps))?;

        Ok(instance)
    }

    fn accept_loop(&self, listener: &TcpListener, deps: &SessionDeps) {
        while self.running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((client, peer)) => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    tracing::debug!(%peer, "accepted client connection");
                    if let Err(e) = self.open_pair(client, deps) {
                        tracing::warn!("error connecting client to {}: {e}", self.remote_host);
                    }
                }
                Err(e) => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    tracing::warn!("accept failed: {e}");
                }
            }
        }
        tracing::info!(server_id = %self.server_id, "proxy instance stopped");
    }

    fn open_pair(&self, client: TcpStream, deps: &SessionDeps) -> Result<()> {
        let server = TcpStream::connect((self.remote_host.as_str(), self.remote_port))?;
        let pair = ConnectionPair::start(client, server, &self.remote_host, deps)?;

        let mut pairs = self.lock_pairs();
        pairs.push(pair);
        pairs.retain(ConnectionPair::is_open);
        Ok(())
    }

    /// Stop accepting and close every live session.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!(server_id = %self.server_id, "shutting down proxy instance");

        // unblock the accept loop; the dummy connection is dropped unused
        let _ = TcpStream::connect(("127.0.0.1", self.local_port));

        for pair in self.lock_pairs().drain(..) {
            pair.close();
        }
    }

    fn lock_pairs(&self) -> MutexGuard<'_, Vec<ConnectionPair>> {
        self.pairs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Id of the server this instance proxies.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Local port the instance listens on.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// True until [`stop`](Self::stop) has run.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of live sessions (pruned lazily on accept).
    pub fn live_sessions(&self) -> usize {
        self.lock_pairs().iter().filter(|p| p.is_open()).count()
    }
}

/// All currently running instances, keyed by local port.
#[derive(Default)]
pub struct ProxyRegistry {
    instances: Mutex<HashMap<u16, Arc<ProxyInstance>>>,
}

impl ProxyRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an instance on `local_port`. Fails if a running instance
    /// already owns that port (stopped instances are pruned first).
    pub fn start(
        &self,
        server_id: impl Into<String>,
        local_port: u16,
        remote_host: impl Into<String>,
        remote_port: u16,
        deps: SessionDeps,
    ) -> Result<Arc<ProxyInstance>> {
        let mut instances = self.lock_instances();
        instances.retain(|_, instance| instance.is_running());

        if instances.contains_key(&local_port) {
            return Err(RelayError::Config(format!(
                "an instance is already running on port {local_port}"
            )));
        }

        let instance = ProxyInstance::start(server_id, local_port, remote_host, remote_port, deps)?;
        instances.insert(local_port, Arc::clone(&instance));
        Ok(instance)
    }

    /// Stop and remove the instance on a port. Returns whether one existed.
    pub fn stop(&self, local_port: u16) -> bool {
        let instance = self.lock_instances().remove(&local_port);
        match instance {
            Some(instance) => {
                instance.stop();
                true
            }
            None => false,
        }
    }

    /// Stop every running instance.
    pub fn stop_all(&self) {
        for (_, instance) in self.lock_instances().drain() {
            instance.stop();
        }
    }

    /// Whether any running instance proxies the given server id.
    pub fn is_running(&self, server_id: &str) -> bool {
        self.lock_instances()
            .values()
            .any(|i| i.is_running() && i.server_id() == server_id)
    }

    /// The running instance bound to a local port, if any.
    pub fn instance_on_port(&self, local_port: u16) -> Option<Arc<ProxyInstance>> {
        self.lock_instances()
            .get(&local_port)
            .filter(|i| i.is_running())
            .cloned()
    }

    fn lock_instances(&self) -> MutexGuard<'_, HashMap<u16, Arc<ProxyInstance>>> {
        self.instances
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
