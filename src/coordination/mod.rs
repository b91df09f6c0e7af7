//! Process-wide coordination service: exclusive locks, ephemeral sessions,
//! and the presence event channel that fans coordination changes out to
//! interested listeners.

pub mod events;
pub mod lock;
pub mod session;

pub use events::{EventSink, NullSink, PresenceEvent, PresenceState};
pub use lock::{Lock, LockKind, LockManager};
pub use session::{Session, SessionManager};
