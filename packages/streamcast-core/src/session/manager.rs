//! Session state machine and the manager that owns every live session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::handle::{SessionHandle, SessionHandleAllocator};
use crate::cipher::SessionCipher;
use crate::error::{StreamError, StreamResult};
use crate::events::{EventEmitter, SessionEvent};

/// A session's role, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Controller,
    Viewer,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    None,
    Handshake,
    Active,
    Refused,
    TimedOut,
    Terminated,
}

impl SessionState {
    /// True if `to` is a legal transition from `self`.
    #[must_use]
    pub fn can_transition_to(self, to: SessionState) -> bool {
        use SessionState::{Active, Handshake, None as SNone, Refused, TimedOut, Terminated};
        matches!(
            (self, to),
            (SNone, Handshake)
                | (Handshake, Active)
                | (Handshake, Refused)
                | (Active, TimedOut)
                | (Active, Terminated)
                | (TimedOut, Terminated)
        )
    }
}

/// Per-peer session state: peer address, peer platform, role,
/// last-activity timestamp, channel state and an optional cipher.
pub struct Session {
    pub handle: SessionHandle,
    pub peer_addr: String,
    peer_platform: Mutex<String>,
    pub role: SessionRole,
    state: Mutex<SessionState>,
    last_activity: Mutex<Instant>,
    cipher: Mutex<Option<SessionCipher>>,
    disconnect_timeout: Duration,
}

impl Session {
    fn new(handle: SessionHandle, peer_addr: String, role: SessionRole, disconnect_timeout: Duration) -> Self {
        Self {
            handle,
            peer_addr,
            peer_platform: Mutex::new(String::new()),
            role,
            state: Mutex::new(SessionState::None),
            last_activity: Mutex::new(Instant::now()),
            cipher: Mutex::new(None),
            disconnect_timeout,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    #[must_use]
    pub fn peer_platform(&self) -> String {
        self.peer_platform.lock().clone()
    }

    pub fn set_peer_platform(&self, platform: String) {
        *self.peer_platform.lock() = platform;
    }

    pub fn install_cipher(&self, cipher: SessionCipher) {
        *self.cipher.lock() = Some(cipher);
    }

    #[must_use]
    pub fn cipher(&self) -> Option<SessionCipher> {
        self.cipher.lock().clone()
    }

    /// Records activity, resetting the idle timer used by `is_expired`.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.last_activity.lock().elapsed() > self.disconnect_timeout
    }

    fn transition(&self, to: SessionState) -> StreamResult<()> {
        let mut state = self.state.lock();
        if !state.can_transition_to(to) {
            return Err(StreamError::InvalidArg(format!(
                "illegal session transition {:?} -> {:?}",
                *state, to
            )));
        }
        *state = to;
        Ok(())
    }
}

/// Owns every live session on one transport, keyed by [`SessionHandle`].
///
/// Reads snapshot the session set under a brief lock and then iterate
/// lock-free, per the concurrency model: a `DashMap` gives per-bucket
/// locking without a single contended mutex.
pub struct SessionManager {
    sessions: DashMap<SessionHandle, Arc<Session>>,
    allocator: SessionHandleAllocator,
    disconnect_timeout: Duration,
    emitter: Arc<dyn EventEmitter>,
}

impl SessionManager {
    #[must_use]
    pub fn new(disconnect_timeout: Duration, emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            sessions: DashMap::new(),
            allocator: SessionHandleAllocator::new(),
            disconnect_timeout,
            emitter,
        }
    }

    /// Creates a new session in the `None` state for a peer that just sent
    /// a HELLO or DISCOVERY. Always issues a fresh handle, even for a peer
    /// address that reconnects after a previous session timed out.
    pub fn create(&self, peer_addr: String, role: SessionRole) -> Arc<Session> {
        let handle = self.allocator.allocate();
        let session = Arc::new(Session::new(handle, peer_addr, role, self.disconnect_timeout));
        self.sessions.insert(handle, session.clone());
        session
    }

    #[must_use]
    pub fn get(&self, handle: SessionHandle) -> Option<Arc<Session>> {
        self.sessions.get(&handle).map(|entry| entry.clone())
    }

    /// Advances a session from `None`/created into `Handshake`.
    pub fn begin_handshake(&self, handle: SessionHandle) -> StreamResult<()> {
        let session = self.require(handle)?;
        session.transition(SessionState::Handshake)?;
        self.emitter.emit_session(SessionEvent::Handshaking {
            session: handle,
            timestamp: 0,
        });
        Ok(())
    }

    /// Accepts a handshake, moving the session to `Active`.
    pub fn accept(&self, handle: SessionHandle) -> StreamResult<()> {
        let session = self.require(handle)?;
        session.transition(SessionState::Active)?;
        session.touch();
        self.emitter.emit_session(SessionEvent::Active {
            session: handle,
            timestamp: 0,
        });
        Ok(())
    }

    /// Refuses a handshake; the session remains in the map only long enough
    /// to serve the single `HelloRefused` reply, then should be dropped by
    /// the caller via [`SessionManager::terminate`] or left to be evicted.
    pub fn refuse(&self, handle: SessionHandle, reason: String) -> StreamResult<()> {
        let session = self.require(handle)?;
        session.transition(SessionState::Refused)?;
        self.emitter.emit_session(SessionEvent::Refused {
            session: handle,
            reason,
            timestamp: 0,
        });
        Ok(())
    }

    /// Explicitly closes a session (client disconnect, server shutdown).
    pub fn terminate(&self, handle: SessionHandle) -> StreamResult<()> {
        let session = self.require(handle)?;
        let current = session.state();
        if current == SessionState::Active || current == SessionState::TimedOut {
            session.transition(SessionState::Terminated)?;
        }
        self.sessions.remove(&handle);
        self.emitter.emit_session(SessionEvent::Terminated {
            session: handle,
            timestamp: 0,
        });
        Ok(())
    }

    /// Per-session tick, intended to run at a fixed 1ms cadence on the
    /// acceptor. Advances any session past its idle timeout into
    /// `TimedOut`, firing the single terminal callback.
    pub fn tick(&self) {
        let expired: Vec<SessionHandle> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().state() == SessionState::Active && entry.value().is_expired())
            .map(|entry| *entry.key())
            .collect();

        for handle in expired {
            if let Some(session) = self.get(handle) {
                if session.transition(SessionState::TimedOut).is_ok() {
                    self.emitter.emit_session(SessionEvent::TimedOut {
                        session: handle,
                        timestamp: 0,
                    });
                }
            }
        }
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().state() == SessionState::Active)
            .count()
    }

    fn require(&self, handle: SessionHandle) -> StreamResult<Arc<Session>> {
        self.get(handle).ok_or_else(|| StreamError::InvalidArg(format!("unknown session {handle}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;

    fn manager() -> SessionManager {
        SessionManager::new(Duration::from_millis(50), Arc::new(NoopEventEmitter))
    }

    #[test]
    fn full_lifecycle_transitions_succeed() {
        let manager = manager();
        let session = manager.create("127.0.0.1:9000".to_string(), SessionRole::Viewer);
        assert_eq!(session.state(), SessionState::None);

        manager.begin_handshake(session.handle).unwrap();
        assert_eq!(session.state(), SessionState::Handshake);

        manager.accept(session.handle).unwrap();
        assert_eq!(session.state(), SessionState::Active);

        manager.terminate(session.handle).unwrap();
        assert!(manager.get(session.handle).is_none());
    }

    #[test]
    fn refuse_is_only_legal_from_handshake() {
        let manager = manager();
        let session = manager.create("peer".to_string(), SessionRole::Controller);
        assert!(manager.refuse(session.handle, "denied".to_string()).is_err());

        manager.begin_handshake(session.handle).unwrap();
        assert!(manager.refuse(session.handle, "denied".to_string()).is_ok());
    }

    #[test]
    fn reconnect_after_timeout_gets_a_fresh_handle() {
        let manager = manager();
        let first = manager.create("peer".to_string(), SessionRole::Viewer);
        let second = manager.create("peer".to_string(), SessionRole::Viewer);
        assert_ne!(first.handle, second.handle);
    }

    #[test]
    fn tick_times_out_inactive_sessions() {
        let manager = manager();
        let session = manager.create("peer".to_string(), SessionRole::Viewer);
        manager.begin_handshake(session.handle).unwrap();
        manager.accept(session.handle).unwrap();

        std::thread::sleep(Duration::from_millis(80));
        manager.tick();

        assert_eq!(session.state(), SessionState::TimedOut);
    }

    #[test]
    fn active_count_only_counts_active_sessions() {
        let manager = manager();
        let a = manager.create("a".to_string(), SessionRole::Viewer);
        let b = manager.create("b".to_string(), SessionRole::Viewer);
        manager.begin_handshake(a.handle).unwrap();
        manager.accept(a.handle).unwrap();
        manager.begin_handshake(b.handle).unwrap();

        assert_eq!(manager.active_count(), 1);
    }
}
