//! Live IM session runtime.
//!
//! A [`Session`] owns the lifecycle state machine, the pending-command table
//! and the offline queue behind one lock, and a driver task applies transport
//! events to it. Observers receive lifecycle and conversation notifications
//! outside that lock.

pub mod config;
mod driver;
pub mod loopback;
pub mod observer;
pub mod session;

pub use config::{ConfigError, OfflinePolicy, SessionConfig};
pub use loopback::LoopbackTransport;
pub use observer::{ObserverId, ObserverRegistry, SessionObserver};
pub use session::{Session, SessionBuilder, SubmitOptions, SubmitOutcome};
