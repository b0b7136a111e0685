use std::net::Ipv4Addr;
use std::time::Instant;

use rand::Rng;

pub type SocketId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Ready,
    Playing,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub socket_id: SocketId,
    pub session_id: String,
    pub state: SessionState,
    pub client_addr: Ipv4Addr,
    pub client_rtp_port: u16,
    pub client_rtcp_port: u16,
    pub last_activity: Instant,
}

impl Session {
    pub fn new(socket_id: SocketId, client_addr: Ipv4Addr) -> Self {
        Session {
            socket_id,
            session_id: String::new(),
            state: SessionState::Init,
            client_addr,
            client_rtp_port: 0,
            client_rtcp_port: 0,
            last_activity: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

pub fn generate_session_id() -> String {
    let value: u32 = rand::thread_rng().gen();
    format!("{:08X}", value)
}

const IDLE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

pub struct SessionStore {
    sessions: Vec<Session>,
    max_clients: usize,
}

impl SessionStore {
    pub fn new(max_clients: usize) -> Self {
        SessionStore {
            sessions: Vec::new(),
            max_clients,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_clients
    }

    pub fn insert(&mut self, session: Session) -> bool {
        if self.is_full() {
            return false;
        }
        self.sessions.push(session);
        true
    }

    pub fn find_by_socket(&self, socket_id: SocketId) -> Option<&Session> {
        self.sessions.iter().find(|s| s.socket_id == socket_id)
    }

    pub fn find_by_socket_mut(&mut self, socket_id: SocketId) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.socket_id == socket_id)
    }

    pub fn find_by_id(&self, session_id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.session_id == session_id)
    }

    pub fn remove(&mut self, socket_id: SocketId) {
        self.sessions.retain(|s| s.socket_id != socket_id);
    }

    pub fn any_playing(&self) -> bool {
        self.sessions.iter().any(|s| s.state == SessionState::Playing)
    }

    pub fn sweep_timeouts(&mut self, now: Instant) -> Vec<SocketId> {
        let mut removed = Vec::new();
        self.sessions.retain(|s| {
            let expired = now.saturating_duration_since(s.last_activity) > IDLE_TIMEOUT;
            if expired {
                removed.push(s.socket_id);
            }
            !expired
        });
        removed
    }

    pub fn playing_destinations(&self) -> Vec<(Ipv4Addr, u16)> {
        self.sessions
            .iter()
            .filter(|s| s.state == SessionState::Playing)
            .map(|s| (s.client_addr, s.client_rtp_port))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Ipv4Addr {
        Ipv4Addr::new(127, 0, 0, 1)
    }

    #[test]
    fn insert_rejects_past_capacity() {
        let mut store = SessionStore::new(2);
        assert!(store.insert(Session::new(1, addr())));
        assert!(store.insert(Session::new(2, addr())));
        assert!(!store.insert(Session::new(3, addr())));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn find_by_socket_and_id() {
        let mut store = SessionStore::new(4);
        let mut s = Session::new(1, addr());
        s.session_id = "ABCD1234".to_string();
        store.insert(s);

        assert!(store.find_by_socket(1).is_some());
        assert!(store.find_by_socket(2).is_none());
        assert!(store.find_by_id("ABCD1234").is_some());
        assert!(store.find_by_id("nope").is_none());
    }

    #[test]
    fn remove_deletes_and_frees_capacity() {
        let mut store = SessionStore::new(1);
        store.insert(Session::new(1, addr()));
        assert!(store.is_full());
        store.remove(1);
        assert!(!store.is_full());
        assert!(store.insert(Session::new(2, addr())));
    }

    #[test]
    fn sweep_removes_idle_sessions_only() {
        let mut store = SessionStore::new(4);
        let mut stale = Session::new(1, addr());
        stale.last_activity = Instant::now() - std::time::Duration::from_secs(120);
        store.insert(stale);
        store.insert(Session::new(2, addr()));

        let removed = store.sweep_timeouts(Instant::now());
        assert_eq!(removed, vec![1]);
        assert_eq!(store.len(), 1);
        assert!(store.find_by_socket(2).is_some());
    }

    #[test]
    fn no_two_sessions_share_a_socket_handle_by_construction() {
        // insert() has no dedup, but the server is expected to key by a
        // unique accept()ed fd; verify remove() only touches the matching
        // entry when ids collide is not applicable here — this documents
        // the invariant callers must uphold.
        let mut store = SessionStore::new(4);
        store.insert(Session::new(1, addr()));
        store.remove(1);
        assert!(store.find_by_socket(1).is_none());
    }

    #[test]
    fn generate_session_id_is_8_hex_digits() {
        let id = generate_session_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn playing_destinations_only_includes_playing_sessions() {
        let mut store = SessionStore::new(4);
        let mut ready = Session::new(1, addr());
        ready.state = SessionState::Ready;
        let mut playing = Session::new(2, addr());
        playing.state = SessionState::Playing;
        playing.client_rtp_port = 5000;
        store.insert(ready);
        store.insert(playing);

        let dests = store.playing_destinations();
        assert_eq!(dests, vec![(addr(), 5000)]);
    }
}
