//! The extension boundary.
//!
//! How mod code is discovered, linked, or isolated is an integration
//! decision outside this crate; the relay consumes an ordered list of
//! pre-instantiated entrypoints. Each proxied session gets its own instance
//! of every mod: `create` runs when the session reaches the play state,
//! `init` registers the instance's subscriptions, and `shutdown` runs
//! exactly once when the session closes.

use std::sync::Arc;

use crate::dispatch::Dispatcher;

/// Factory for per-session mod instances.
pub trait ModEntrypoint: Send + Sync {
    /// Stable identifier, used in logs.
    fn id(&self) -> &str;

    /// Build the instance for one session.
    fn create(&self) -> Box<dyn ModInstance>;
}

/// One session's instance of a mod.
pub trait ModInstance: Send {
    /// Register packet subscriptions against the session's dispatcher.
    ///
    /// A callback that wants to inject packets later should capture
    /// `Arc::downgrade(dispatcher)` and upgrade at dispatch time; a strong
    /// handle inside a callback would keep the dispatcher alive in a cycle.
    fn init(&mut self, dispatcher: &Arc<Dispatcher>);

    /// Tear down. Runs exactly once, when the session closes.
    fn shutdown(&mut self) {}
}

/// Ordered list of mod entrypoints, applied in order to every session.
pub type ModSupplier = Vec<Arc<dyn ModEntrypoint>>;
