//! Connection plumbing: stream filters, connection halves and pairs, proxy
//! instances, and per-session counters.

pub mod half;
pub mod instance;
pub mod pair;
pub mod stats;
pub mod stream;

pub use instance::{ProxyInstance, ProxyRegistry};
pub use pair::{ConnectionContext, ConnectionPair, SessionDeps, SessionProfile};
pub use stream::{FrameReader, FrameWriter};
