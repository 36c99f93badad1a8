//! Session bookkeeping and push routing.
//!
//! The manager owns the registry and the routing table from connection id
//! to that connection's outbound channel, both behind one mutex. Reply and
//! push frames are enqueued inside the critical section (the channels are
//! unbounded, so no await happens under the lock) and the per-connection
//! writer tasks do the actual socket writes. That gives each connection
//! FIFO replies and both players of a game a frame order consistent with
//! the game's history; a slow client only ever delays its own writer.

use crate::protocol::{Reply, ServerFrame};
use crate::server::registry::{ConnId, GameId, Registry};
use async_std::channel::Sender;
use async_std::sync::Mutex;
use log::warn;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-connection state, owned by the connection handler.
///
/// Created by the first well-formed HELLO; `game` is set while the session
/// is bound to a game. The registry's seat bindings stay authoritative for
/// routing, so a stale `game` here is harmless.
pub(crate) struct Session {
    pub user_id: u32,
    #[allow(dead_code)]
    pub protocol: u16,
    pub game: Option<GameId>,
}

#[derive(Clone)]
pub(crate) struct SessionManager {
    inner: Arc<Mutex<ManagerInner>>,
}

struct ManagerInner {
    registry: Registry,
    routes: HashMap<ConnId, Sender<ServerFrame>>,
    next_conn: ConnId,
}

impl ManagerInner {
    fn enqueue(&self, conn: ConnId, frame: ServerFrame) {
        if let Some(sender) = self.routes.get(&conn) {
            if sender.try_send(frame).is_err() {
                // the writer task already died with its socket
                warn!("dropping frame for closed connection {}", conn);
            }
        }
    }
}

impl SessionManager {
    pub fn new() -> Self {
        SessionManager {
            inner: Arc::new(Mutex::new(ManagerInner {
                registry: Registry::new(),
                routes: HashMap::new(),
                next_conn: 1,
            })),
        }
    }

    pub async fn register(&self, sender: Sender<ServerFrame>) -> ConnId {
        let mut inner = self.inner.lock().await;
        let conn = inner.next_conn;
        inner.next_conn += 1;
        inner.routes.insert(conn, sender);
        conn
    }

    /// Route a JOIN to the registry and deliver its frames.
    ///
    /// Returns the session's resulting game binding: the joined game on
    /// success, the previous binding otherwise. Success on a different
    /// game releases the old seat (the old peer sees DCONNECT).
    pub async fn join(
        &self,
        conn: ConnId,
        user: u32,
        current: Option<GameId>,
        requested: u32,
    ) -> Option<GameId> {
        let mut inner = self.inner.lock().await;
        let (reply, mut pushes) = inner.registry.join(conn, user, requested);
        let joined = match reply {
            Reply::JoinOk { game_id, .. } => Some(game_id),
            _ => None,
        };
        if let (Some(old), Some(new)) = (current, joined) {
            if old != new {
                pushes.extend(inner.registry.unbind(conn, old));
            }
        }
        inner.enqueue(conn, ServerFrame::Reply(reply));
        for (target, push) in pushes {
            inner.enqueue(target, ServerFrame::Push(push));
        }
        joined.or(current)
    }

    pub async fn play(&self, conn: ConnId, user: u32, game_id: GameId, x: u8, y: u8) {
        let mut inner = self.inner.lock().await;
        let (reply, pushes) = inner.registry.play(user, game_id, x, y);
        inner.enqueue(conn, ServerFrame::Reply(reply));
        for (target, push) in pushes {
            inner.enqueue(target, ServerFrame::Push(push));
        }
    }

    /// connection teardown: release the seat and drop the route
    pub async fn unregister(&self, conn: ConnId, game: Option<GameId>) {
        let mut inner = self.inner.lock().await;
        inner.routes.remove(&conn);
        if let Some(game_id) = game {
            let pushes = inner.registry.unbind(conn, game_id);
            for (target, push) in pushes {
                inner.enqueue(target, ServerFrame::Push(push));
            }
        }
    }
}
