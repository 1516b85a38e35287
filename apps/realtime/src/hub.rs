use std::collections::{HashMap, HashSet};

use shared::ServerEvent;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

pub type SessionId = Uuid;
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

pub fn circle_room(circle_id: Uuid) -> String {
    format!("circle:{circle_id}")
}

pub fn chat_room(room_id: &str) -> String {
    format!("chat:{room_id}")
}

pub struct SessionHandle {
    pub user_id: Uuid,
    pub circle_id: Option<Uuid>,
    rooms: HashSet<String>,
    tx: EventSender,
}

impl SessionHandle {
    pub fn new(user_id: Uuid, circle_id: Option<Uuid>, tx: EventSender) -> Self {
        Self {
            user_id,
            circle_id,
            rooms: HashSet::new(),
            tx,
        }
    }
}

#[derive(Default)]
struct HubInner {
    sessions: HashMap<SessionId, SessionHandle>,
    rooms: HashMap<String, HashSet<SessionId>>,
    users: HashMap<Uuid, HashSet<SessionId>>,
}

/// Session registry and room router. One handle per open connection; a user
/// with several devices holds several handles, all reachable through the
/// per-user index. Delivery is fire-and-forget: a session whose receiver is
/// gone is skipped, never an error.
#[derive(Default)]
pub struct Hub {
    inner: Mutex<HubInner>,
}

impl Hub {
    pub async fn register(&self, handle: SessionHandle) -> SessionId {
        let session_id = Uuid::new_v4();
        let mut inner = self.inner.lock().await;
        inner
            .users
            .entry(handle.user_id)
            .or_default()
            .insert(session_id);
        inner.sessions.insert(session_id, handle);
        session_id
    }

    pub async fn unregister(&self, session_id: SessionId) -> Option<SessionHandle> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let handle = inner.sessions.remove(&session_id)?;
        for room in &handle.rooms {
            let emptied = match inner.rooms.get_mut(room) {
                Some(members) => {
                    members.remove(&session_id);
                    members.is_empty()
                }
                None => false,
            };
            if emptied {
                inner.rooms.remove(room);
            }
        }
        let emptied = match inner.users.get_mut(&handle.user_id) {
            Some(sessions) => {
                sessions.remove(&session_id);
                sessions.is_empty()
            }
            None => false,
        };
        if emptied {
            inner.users.remove(&handle.user_id);
        }
        Some(handle)
    }

    pub async fn session_info(&self, session_id: SessionId) -> Option<(Uuid, Option<Uuid>)> {
        let inner = self.inner.lock().await;
        let handle = inner.sessions.get(&session_id)?;
        Some((handle.user_id, handle.circle_id))
    }

    pub async fn join(&self, session_id: SessionId, room: &str) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let Some(handle) = inner.sessions.get_mut(&session_id) else {
            return;
        };
        handle.rooms.insert(room.to_string());
        inner
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(session_id);
    }

    pub async fn leave(&self, session_id: SessionId, room: &str) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if let Some(handle) = inner.sessions.get_mut(&session_id) {
            handle.rooms.remove(room);
        }
        let emptied = match inner.rooms.get_mut(room) {
            Some(members) => {
                members.remove(&session_id);
                members.is_empty()
            }
            None => false,
        };
        if emptied {
            inner.rooms.remove(room);
        }
    }

    pub async fn send_to_session(&self, session_id: SessionId, event: &ServerEvent) {
        let inner = self.inner.lock().await;
        if let Some(handle) = inner.sessions.get(&session_id) {
            let _ = handle.tx.send(event.clone());
        }
    }

    /// Delivers to every open session of the given user, one copy each.
    pub async fn send_to_user(&self, user_id: Uuid, event: &ServerEvent) {
        let inner = self.inner.lock().await;
        let Some(sessions) = inner.users.get(&user_id) else {
            return;
        };
        for session_id in sessions {
            if let Some(handle) = inner.sessions.get(session_id) {
                let _ = handle.tx.send(event.clone());
            }
        }
    }

    pub async fn send_to_room(&self, room: &str, event: &ServerEvent) {
        self.fan_out(room, None, event).await;
    }

    pub async fn send_to_room_except(
        &self,
        room: &str,
        except: SessionId,
        event: &ServerEvent,
    ) {
        self.fan_out(room, Some(except), event).await;
    }

    async fn fan_out(&self, room: &str, except: Option<SessionId>, event: &ServerEvent) {
        let inner = self.inner.lock().await;
        let Some(members) = inner.rooms.get(room) else {
            return;
        };
        for session_id in members {
            if Some(*session_id) == except {
                continue;
            }
            if let Some(handle) = inner.sessions.get(session_id) {
                let _ = handle.tx.send(event.clone());
            }
        }
    }
}

/// Open-session counts per user. A user is online while at least one session
/// is open; `connect` and `disconnect` report the 0→1 and 1→0 edges so the
/// caller broadcasts presence transitions exactly once, however many devices
/// the user holds.
#[derive(Default)]
pub struct Presence {
    counts: Mutex<HashMap<Uuid, usize>>,
}

impl Presence {
    /// Returns true when this is the user's first open session.
    pub async fn connect(&self, user_id: Uuid) -> bool {
        let mut counts = self.counts.lock().await;
        let count = counts.entry(user_id).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Returns true when the user's last session closed.
    pub async fn disconnect(&self, user_id: Uuid) -> bool {
        let mut counts = self.counts.lock().await;
        let Some(count) = counts.get(&user_id).copied() else {
            return false;
        };
        if count > 1 {
            counts.insert(user_id, count - 1);
            false
        } else {
            counts.remove(&user_id);
            true
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.counts.lock().await.contains_key(&user_id)
    }

    pub async fn online_users(&self) -> Vec<Uuid> {
        self.counts.lock().await.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attach() -> (SessionHandle, mpsc::UnboundedReceiver<ServerEvent>, Uuid) {
        let user_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionHandle::new(user_id, None, tx), rx, user_id)
    }

    fn error(message: &str) -> ServerEvent {
        ServerEvent::Error {
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn room_fan_out_skips_excluded_session() {
        let hub = Hub::default();
        let (a, mut rx_a, _) = attach();
        let (b, mut rx_b, _) = attach();
        let a_id = hub.register(a).await;
        let b_id = hub.register(b).await;
        hub.join(a_id, "room").await;
        hub.join(b_id, "room").await;

        hub.send_to_room_except("room", a_id, &error("hi")).await;
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), error("hi"));

        hub.send_to_room("room", &error("all")).await;
        assert_eq!(rx_a.try_recv().unwrap(), error("all"));
        assert_eq!(rx_b.try_recv().unwrap(), error("all"));
    }

    #[tokio::test]
    async fn unregister_leaves_all_rooms() {
        let hub = Hub::default();
        let (a, mut rx_a, _) = attach();
        let a_id = hub.register(a).await;
        hub.join(a_id, "room").await;

        let handle = hub.unregister(a_id).await.unwrap();
        assert!(handle.rooms.contains("room"));
        hub.send_to_room("room", &error("gone")).await;
        assert!(rx_a.try_recv().is_err());
        assert!(hub.session_info(a_id).await.is_none());
    }

    #[tokio::test]
    async fn send_to_user_reaches_every_device() {
        let hub = Hub::default();
        let user_id = Uuid::new_v4();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        hub.register(SessionHandle::new(user_id, None, tx1)).await;
        hub.register(SessionHandle::new(user_id, None, tx2)).await;

        hub.send_to_user(user_id, &error("ping")).await;
        assert_eq!(rx1.try_recv().unwrap(), error("ping"));
        assert_eq!(rx2.try_recv().unwrap(), error("ping"));
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn presence_counts_sessions_per_user() {
        let presence = Presence::default();
        let user_id = Uuid::new_v4();

        assert!(presence.connect(user_id).await);
        assert!(!presence.connect(user_id).await);
        assert!(presence.is_online(user_id).await);

        assert!(!presence.disconnect(user_id).await);
        assert!(presence.is_online(user_id).await);
        assert!(presence.disconnect(user_id).await);
        assert!(!presence.is_online(user_id).await);

        // A stray disconnect for an unknown user is a no-op.
        assert!(!presence.disconnect(user_id).await);
    }
}
