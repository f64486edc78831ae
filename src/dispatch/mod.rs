//! Packet fan-out to mod subscribers.
//!
//! Each proxied session that reaches the play state owns one `Dispatcher`.
//! Subscribers register a callback plus the set of packet shapes they accept;
//! for every play-state frame the owning connection half asks the dispatcher
//! whether any subscriber wants the frame blocked. Decoding only happens when
//! at least one subscriber accepts the frame's shape; ignored traffic is
//! never decoded.
//!
//! Callbacks run on the dispatcher's own worker thread with a bounded wait:
//! a subscriber that stalls cannot stall the relay, and a subscriber that
//! panics is logged and skipped without affecting the others or the session.

use std::collections::HashSet;
use std::io::Cursor;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{RelayError, Result};
use crate::mods::{ModEntrypoint, ModInstance};
use crate::net::pair::ConnectionContext;
use crate::packet::{PacketRegistry, ShapeKey};
use crate::protocol::fields::FieldValue;
use crate::protocol::varint::{read_varint, write_varint};
use crate::protocol::PacketDirection;

/// Upper bound on subscriber execution per frame.
pub const DISPATCH_TIMEOUT: Duration = Duration::from_millis(500);

/// A packet materialised for subscribers.
#[derive(Debug, Clone)]
pub struct DecodedPacket {
    /// Registered shape of the packet.
    pub shape: ShapeKey,
    /// Direction it was travelling.
    pub direction: PacketDirection,
    /// Numeric id it arrived under.
    pub id: i32,
    /// Field values in specification order.
    pub fields: Vec<FieldValue>,
}

type SubscriberFn = Box<dyn FnMut(&DecodedPacket, &ConnectionContext) -> bool + Send>;

struct Subscriber {
    id: String,
    accepted: HashSet<ShapeKey>,
    callback: Mutex<SubscriberFn>,
}

enum Job {
    HandleRaw {
        direction: PacketDirection,
        payload: Bytes,
        ctx: Arc<ConnectionContext>,
        reply: mpsc::SyncSender<bool>,
    },
    Stop,
}

struct Inner {
    registry: Arc<PacketRegistry>,
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
}

impl Inner {
    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<Arc<Subscriber>>> {
        // the list lock is never held across callbacks, so a poisoned lock
        // only means a panic elsewhere; the list itself stays usable
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Invoke every subscriber accepting the packet's shape, in registration
    /// order. All matching subscribers run regardless of earlier results.
    fn dispatch(&self, packet: &DecodedPacket, ctx: &ConnectionContext) -> bool {
        let snapshot: Vec<Arc<Subscriber>> = self.lock_subscribers().clone();
        let mut blocked = false;

        for subscriber in snapshot
            .iter()
            .filter(|s| s.accepted.contains(&packet.shape))
        {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                let mut callback = subscriber
                    .callback
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                (*callback)(packet, ctx)
            }));

            match outcome {
                Ok(wants_block) => blocked |= wants_block,
                Err(_) => {
                    tracing::error!(
                        subscriber = %subscriber.id,
                        shape = %packet.shape,
                        "subscriber panicked; continuing with remaining subscribers"
                    );
                }
            }
        }

        blocked
    }

    fn process_raw(
        &self,
        direction: PacketDirection,
        payload: &[u8],
        ctx: &ConnectionContext,
    ) -> bool {
        let mut cursor = Cursor::new(payload);
        let Ok(id) = read_varint(&mut cursor) else {
            return false;
        };
        let Some(shape) = self.registry.shape_for_id(direction, id) else {
            return false;
        };

        let interested = self
            .lock_subscribers()
            .iter()
            .any(|s| s.accepted.contains(&shape));
        if !interested {
            return false;
        }

        let fields = match self.registry.decode(shape, &mut cursor) {
            Ok(fields) => fields,
            Err(e) => {
                tracing::warn!(%shape, "failed to decode subscribed packet: {e}");
                return false;
            }
        };

        let packet = DecodedPacket {
            shape,
            direction,
            id,
            fields,
        };
        self.dispatch(&packet, ctx)
    }
}

/// Per-session subscriber registry and dispatch worker.
pub struct Dispatcher {
    inner: Arc<Inner>,
    job_tx: mpsc::Sender<Job>,
    worker: Mutex<Option<JoinHandle<()>>>,
    instances: Mutex<Vec<Box<dyn ModInstance>>>,
    shut: AtomicBool,
}

impl Dispatcher {
    /// Build the dispatcher for one session: spawn the worker, then create
    /// and initialise one instance of every supplied mod, in order.
    pub fn new(
        registry: Arc<PacketRegistry>,
        mods: &[Arc<dyn ModEntrypoint>],
    ) -> Result<Arc<Self>> {
        let inner = Arc::new(Inner {
            registry,
            subscribers: Mutex::new(Vec::new()),
        });

        let (job_tx, job_rx) = mpsc::channel();
        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name("relay-dispatch".to_string())
            .spawn(move || worker_loop(&worker_inner, &job_rx))?;

        let dispatcher = Arc::new(Self {
            inner,
            job_tx,
            worker: Mutex::new(Some(worker)),
            instances: Mutex::new(Vec::new()),
            shut: AtomicBool::new(false),
        });

        let mut instances: Vec<Box<dyn ModInstance>> = Vec::with_capacity(mods.len());
        for entrypoint in mods {
            tracing::debug!(mod_id = entrypoint.id(), "initialising mod");
            let mut instance = entrypoint.create();
            let init = catch_unwind(AssertUnwindSafe(|| instance.init(&dispatcher)));
            if init.is_err() {
                tracing::error!(mod_id = entrypoint.id(), "mod init panicked; mod disabled");
                continue;
            }
            instances.push(instance);
        }
        *dispatcher
            .instances
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = instances;

        Ok(dispatcher)
    }

    /// Register a callback for the given shapes. Registration is idempotent
    /// by identity: a second registration under the same id is a no-op.
    pub fn register<F>(
        &self,
        id: impl Into<String>,
        accepted: impl IntoIterator<Item = ShapeKey>,
        callback: F,
    ) where
        F: FnMut(&DecodedPacket, &ConnectionContext) -> bool + Send + 'static,
    {
        let id = id.into();
        let mut subscribers = self.inner.lock_subscribers();
        if subscribers.iter().any(|s| s.id == id) {
            tracing::debug!(subscriber = %id, "already registered; ignoring");
            return;
        }

        subscribers.push(Arc::new(Subscriber {
            id,
            accepted: accepted.into_iter().collect(),
            callback: Mutex::new(Box::new(callback)),
        }));
    }

    /// Number of active subscriber entries.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock_subscribers().len()
    }

    /// Synchronously fan a decoded packet out to matching subscribers.
    /// Returns true iff at least one requested a block.
    pub fn dispatch(&self, packet: &DecodedPacket, ctx: &ConnectionContext) -> bool {
        self.inner.dispatch(packet, ctx)
    }

    /// Offer a raw play-state payload (`[varint id][body]`) to subscribers.
    /// Decoding is skipped entirely when nobody accepts the shape. Bounded by
    /// [`DISPATCH_TIMEOUT`]; on timeout the frame is forwarded and a warning
    /// logged.
    pub fn handle_raw(
        &self,
        direction: PacketDirection,
        payload: Bytes,
        ctx: Arc<ConnectionContext>,
    ) -> bool {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let job = Job::HandleRaw {
            direction,
            payload,
            ctx,
            reply: reply_tx,
        };
        if self.job_tx.send(job).is_err() {
            return false;
        }

        match reply_rx.recv_timeout(DISPATCH_TIMEOUT) {
            Ok(blocked) => blocked,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    %direction,
                    "subscriber dispatch exceeded {DISPATCH_TIMEOUT:?}; forwarding frame"
                );
                false
            }
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Encode a packet by shape and transmit it on the session this context
    /// belongs to, in the shape's registered direction.
    pub fn send_packet(
        &self,
        ctx: &ConnectionContext,
        shape: ShapeKey,
        values: &[FieldValue],
    ) -> Result<()> {
        let direction = self.inner.registry.spec(shape)?.direction;
        let id = self
            .inner
            .registry
            .id_for_shape(direction, shape)
            .ok_or_else(|| RelayError::UnknownSpecification(format!("{shape} has no id")))?;

        let mut payload = Vec::new();
        write_varint(&mut payload, id)?;
        self.inner.registry.encode(shape, values, &mut payload)?;
        ctx.write_packet(direction, &payload)
    }

    /// Run mod teardown and stop the worker. Runs at most once; later calls
    /// are no-ops.
    pub fn shutdown(&self) {
        if self.shut.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut instances = self
            .instances
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for instance in instances.iter_mut() {
            if catch_unwind(AssertUnwindSafe(|| instance.shutdown())).is_err() {
                tracing::error!("mod shutdown panicked");
            }
        }
        instances.clear();

        // detach rather than join: a subscriber stalled mid-dispatch must
        // not be able to stall session teardown as well
        let _ = self.job_tx.send(Job::Stop);
        drop(
            self.worker
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .take(),
        );
    }
}

fn worker_loop(inner: &Inner, jobs: &mpsc::Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        match job {
            Job::HandleRaw {
                direction,
                payload,
                ctx,
                reply,
            } => {
                let blocked = inner.process_raw(direction, &payload, &ctx);
                // the caller may have timed out and gone away
                let _ = reply.send(blocked);
            }
            Job::Stop => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::pair::test_context;
    use crate::packet::PacketSpec;
    use crate::protocol::fields::FieldType;
    use std::sync::atomic::AtomicUsize;

    const CHAT: ShapeKey = ShapeKey("chat_message");

    fn chat_registry() -> Arc<PacketRegistry> {
        let mut registry = PacketRegistry::new();
        registry
            .register(
                CHAT,
                PacketSpec::new(PacketDirection::Clientbound, vec![FieldType::String]),
                0x0F,
                &[],
            )
            .unwrap();
        Arc::new(registry)
    }

    fn chat_payload(text: &str) -> Bytes {
        let mut payload = Vec::new();
        write_varint(&mut payload, 0x0F).unwrap();
        crate::protocol::fields::write_string(&mut payload, text).unwrap();
        Bytes::from(payload)
    }

    #[test]
    fn test_all_subscribers_run_and_votes_aggregate() {
        let dispatcher = Dispatcher::new(chat_registry(), &[]).unwrap();
        let ctx = test_context();

        let calls = Arc::new(AtomicUsize::new(0));
        for (name, vote) in [("a", false), ("b", true), ("c", false)] {
            let calls = Arc::clone(&calls);
            dispatcher.register(name, [CHAT], move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                vote
            });
        }

        let blocked = dispatcher.handle_raw(PacketDirection::Clientbound, chat_payload("hi"), ctx);
        assert!(blocked);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        dispatcher.shutdown();
    }

    #[test]
    fn test_registration_is_idempotent() {
        let dispatcher = Dispatcher::new(chat_registry(), &[]).unwrap();
        dispatcher.register("same", [CHAT], |_, _| false);
        dispatcher.register("same", [CHAT], |_, _| true);
        assert_eq!(dispatcher.subscriber_count(), 1);

        let ctx = test_context();
        let blocked = dispatcher.handle_raw(PacketDirection::Clientbound, chat_payload("x"), ctx);
        assert!(!blocked, "second registration must not take effect");
        dispatcher.shutdown();
    }

    #[test]
    fn test_unsubscribed_shapes_are_not_decoded() {
        struct Exploding;
        impl crate::packet::PacketCodec for Exploding {
            fn decode(&self, _: &mut dyn std::io::Read) -> Result<Vec<FieldValue>> {
                panic!("decode must not run for unsubscribed traffic");
            }
            fn encode(&self, _: &[FieldValue], _: &mut dyn std::io::Write) -> Result<()> {
                Ok(())
            }
        }

        let mut registry = PacketRegistry::new();
        registry
            .register(
                CHAT,
                PacketSpec::new(PacketDirection::Clientbound, vec![FieldType::String]),
                0x0F,
                &[],
            )
            .unwrap();
        registry.register_custom_codec(CHAT, Box::new(Exploding));

        let dispatcher = Dispatcher::new(Arc::new(registry), &[]).unwrap();
        let ctx = test_context();
        let blocked = dispatcher.handle_raw(PacketDirection::Clientbound, chat_payload("hi"), ctx);
        assert!(!blocked);
        dispatcher.shutdown();
    }

    #[test]
    fn test_panicking_subscriber_does_not_stop_others() {
        let dispatcher = Dispatcher::new(chat_registry(), &[]).unwrap();
        let ctx = test_context();

        let calls = Arc::new(AtomicUsize::new(0));
        dispatcher.register("panics", [CHAT], |_, _| panic!("boom"));
        {
            let calls = Arc::clone(&calls);
            dispatcher.register("survives", [CHAT], move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                true
            });
        }

        let blocked = dispatcher.handle_raw(PacketDirection::Clientbound, chat_payload("hi"), ctx);
        assert!(blocked);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        dispatcher.shutdown();
    }

    #[test]
    fn test_shutdown_runs_mod_teardown_once() {
        struct CountingMod {
            shutdowns: Arc<AtomicUsize>,
        }
        impl ModEntrypoint for CountingMod {
            fn id(&self) -> &str {
                "counting"
            }
            fn create(&self) -> Box<dyn ModInstance> {
                Box::new(CountingInstance {
                    shutdowns: Arc::clone(&self.shutdowns),
                })
            }
        }
        struct CountingInstance {
            shutdowns: Arc<AtomicUsize>,
        }
        impl ModInstance for CountingInstance {
            fn init(&mut self, dispatcher: &Arc<Dispatcher>) {
                dispatcher.register("counting", [CHAT], |_, _| false);
            }
            fn shutdown(&mut self) {
                self.shutdowns.fetch_add(1, Ordering::SeqCst);
            }
        }

        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mods: Vec<Arc<dyn ModEntrypoint>> = vec![Arc::new(CountingMod {
            shutdowns: Arc::clone(&shutdowns),
        })];

        let dispatcher = Dispatcher::new(chat_registry(), &mods).unwrap();
        assert_eq!(dispatcher.subscriber_count(), 1);

        dispatcher.shutdown();
        dispatcher.shutdown();
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }
}
