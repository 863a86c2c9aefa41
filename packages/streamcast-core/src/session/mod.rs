//! Session layer: per-peer state, the session state machine, and the
//! manager that owns every live session on a transport.

pub mod handle;
pub mod manager;

pub use handle::{SessionHandle, SessionHandleAllocator};
pub use manager::{Session, SessionManager, SessionRole, SessionState};
