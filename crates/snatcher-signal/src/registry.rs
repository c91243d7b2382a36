//! Session registry
//!
//! Process-wide mapping from session id to session state. Backed by a
//! sharded map so mutation locks a single record without serializing
//! unrelated sessions. The registry never blocks on network I/O.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use snatcher_core::AdmissionError;
use tracing::debug;

use crate::session::{PeerHandle, Session};

/// Shared handle to the session registry
#[derive(Clone)]
pub struct Registry {
    sessions: Arc<DashMap<String, Session>>,
    max_peers: usize,
}

impl Registry {
    pub fn new(max_peers: usize) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            max_peers,
        }
    }

    /// Register a token-gated session (issuer contract)
    ///
    /// Returns false if the id is already taken.
    pub fn create(&self, id: &str, join_token: &str) -> bool {
        match self.sessions.entry(id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(Session::with_token(id.to_string(), join_token.to_string()));
                true
            }
        }
    }

    /// Admit a peer into a session
    ///
    /// Checks the join token, creates the record if absent (walk-in path,
    /// tokenless) and appends the handle, all under the record's lock so the
    /// capacity ceiling holds even against concurrent admissions. Returns the
    /// resulting peer count and a snapshot of the other peers to notify.
    pub fn admit(
        &self,
        id: &str,
        presented_token: Option<&str>,
        handle: PeerHandle,
    ) -> Result<(usize, Vec<PeerHandle>), AdmissionError> {
        let peer_id = handle.id();
        let mut session = self
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id.to_string()));

        if !session.authorize(presented_token) {
            return Err(AdmissionError::Unauthorized);
        }

        session
            .add_peer(handle, self.max_peers)
            .map_err(|_| AdmissionError::SessionFull)?;

        Ok((session.peer_count(), session.peers_except(peer_id)))
    }

    /// Remove a peer from a session; idempotent
    ///
    /// Drops the record entirely once the session is empty. Returns the
    /// remaining peer count and a snapshot of the remaining peers, or None
    /// if the session record is already gone.
    pub fn remove_peer(&self, id: &str, peer_id: u64) -> Option<(usize, Vec<PeerHandle>)> {
        let (remaining, snapshot) = {
            let mut session = self.sessions.get_mut(id)?;
            session.remove_peer(peer_id);
            (session.peer_count(), session.peers_snapshot())
        };

        if remaining == 0 {
            self.sessions.remove_if(id, |_, s| s.is_empty());
            debug!("Session {} removed (empty)", id);
        }

        Some((remaining, snapshot))
    }

    /// Snapshot of a session's peers excluding the sender (relay fan-out)
    pub fn peers_except(&self, id: &str, peer_id: u64) -> Vec<PeerHandle> {
        self.sessions
            .get(id)
            .map(|s| s.peers_except(peer_id))
            .unwrap_or_default()
    }

    /// Whether a session exists and is at capacity
    pub fn is_full(&self, id: &str) -> bool {
        self.sessions
            .get(id)
            .map(|s| s.peer_count() >= self.max_peers)
            .unwrap_or(false)
    }

    /// Peer count for one session, if it exists
    pub fn peer_count(&self, id: &str) -> Option<usize> {
        self.sessions.get(id).map(|s| s.peer_count())
    }

    /// Capacity ceiling applied at admission
    pub fn max_peers(&self) -> usize {
        self.max_peers
    }

    /// Number of live sessions (for monitoring)
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Total connected peers across all sessions (for monitoring)
    pub fn total_peer_count(&self) -> usize {
        self.sessions.iter().map(|s| s.peer_count()).sum()
    }

    /// Collect ids due for reclamation without holding any lock across the
    /// whole sweep
    ///
    /// Returns (hard-expired ids, idle empty ids). Hard-expired sessions are
    /// reclaimed regardless of occupancy; idle ids only when already empty.
    pub fn sweep_candidates(
        &self,
        idle_after: Duration,
        expire_after: Duration,
    ) -> (Vec<String>, Vec<String>) {
        let mut expired = Vec::new();
        let mut idle = Vec::new();

        for session in self.sessions.iter() {
            let age = session.age();
            if age > expire_after {
                expired.push(session.id.clone());
            } else if age > idle_after && session.is_empty() {
                idle.push(session.id.clone());
            }
        }

        (expired, idle)
    }

    /// Remove a session record, returning it for final peer notification
    pub fn remove_session(&self, id: &str) -> Option<Session> {
        self.sessions.remove(id).map(|(_, session)| session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    fn make_peer() -> (PeerHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(4);
        (PeerHandle::new(tx), rx)
    }

    #[test]
    fn test_walk_in_creates_session() {
        let registry = Registry::new(2);
        let (a, _rx) = make_peer();

        let (count, others) = registry.admit("walk-in-id", None, a).unwrap();
        assert_eq!(count, 1);
        assert!(others.is_empty());
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn test_third_admission_rejected() {
        let registry = Registry::new(2);
        let (a, _rx_a) = make_peer();
        let (b, _rx_b) = make_peer();
        let (c, _rx_c) = make_peer();

        registry.admit("some-session", None, a).unwrap();
        let (count, others) = registry.admit("some-session", None, b).unwrap();
        assert_eq!(count, 2);
        assert_eq!(others.len(), 1);

        assert_eq!(
            registry.admit("some-session", None, c),
            Err(AdmissionError::SessionFull)
        );
        assert_eq!(registry.peer_count("some-session"), Some(2));
        assert!(registry.is_full("some-session"));
    }

    #[test]
    fn test_token_mismatch_rejected() {
        let registry = Registry::new(2);
        assert!(registry.create("issued-session", "secret"));
        // Double issue of the same id fails
        assert!(!registry.create("issued-session", "other"));

        let (a, _rx_a) = make_peer();
        assert_eq!(
            registry.admit("issued-session", Some("wrong"), a),
            Err(AdmissionError::Unauthorized)
        );
        // Rejection never mutates occupancy
        assert_eq!(registry.peer_count("issued-session"), Some(0));

        let (b, _rx_b) = make_peer();
        let (count, _) = registry.admit("issued-session", Some("secret"), b).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_record_removed_when_emptied() {
        let registry = Registry::new(2);
        let (a, _rx_a) = make_peer();
        let (b, _rx_b) = make_peer();
        let a_id = a.id();
        let b_id = b.id();

        registry.admit("some-session", None, a).unwrap();
        registry.admit("some-session", None, b).unwrap();

        let (remaining, snapshot) = registry.remove_peer("some-session", a_id).unwrap();
        assert_eq!(remaining, 1);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.session_count(), 1);

        let (remaining, _) = registry.remove_peer("some-session", b_id).unwrap();
        assert_eq!(remaining, 0);
        assert_eq!(registry.session_count(), 0);

        // Idempotent once the record is gone
        assert!(registry.remove_peer("some-session", b_id).is_none());
    }

    #[test]
    fn test_sessions_independent() {
        let registry = Registry::new(2);
        let (a, _rx_a) = make_peer();
        let (b, _rx_b) = make_peer();

        registry.admit("first-session", None, a).unwrap();
        registry.admit("second-session", None, b).unwrap();

        assert_eq!(registry.session_count(), 2);
        assert_eq!(registry.total_peer_count(), 2);
        assert_eq!(registry.peer_count("first-session"), Some(1));
        assert!(!registry.is_full("first-session"));
    }

    #[test]
    fn test_sweep_candidates_split() {
        let registry = Registry::new(2);
        let (a, _rx_a) = make_peer();

        registry.admit("occupied-session", None, a).unwrap();
        registry.create("empty-session", "tok");

        std::thread::sleep(std::time::Duration::from_millis(5));

        // Nothing past the hard ceiling; only the empty session is idle
        let (expired, idle) =
            registry.sweep_candidates(Duration::ZERO, Duration::from_secs(3600));
        assert!(expired.is_empty());
        assert_eq!(idle, vec!["empty-session".to_string()]);

        // Past the hard ceiling, occupancy no longer matters
        let (expired, idle) = registry.sweep_candidates(Duration::ZERO, Duration::ZERO);
        assert_eq!(expired.len(), 2);
        assert!(idle.is_empty());
    }
}
