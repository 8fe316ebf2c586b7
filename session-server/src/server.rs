//! Global registries, the accept loop, and the dangling mechanism's
//! server-side half: the lost-connection drain task and the periodic
//! stale-room sweep.
//!
//! Grounded in the teacher's `AppState`/`reload_config` pair
//! (`lobby.rs`) and its watchdog task in `relay-server/src/main.rs`
//! (`cleanup_dead_rooms` on a 1200s interval), generalized from one
//! `Mutex<HashMap<...>>` of rooms to three independently-churning
//! `DashMap` registries and from a periodic-only cleanup to an
//! event-driven lost-connection drain plus a defensive periodic sweep.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use dashmap::DashMap;
use protocol::{RoomId, SessionId, UserId};
use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::identity::IdentityClient;
use crate::room::Room;
use crate::session::Session;
use crate::user::User;

/// Shared state reachable from every connection task. Each registry is
/// keyed exactly as spec.md §5 describes ("Shared resources").
pub struct Server {
    config: StdRwLock<Config>,
    pub identity: IdentityClient,
    pub sessions: DashMap<SessionId, Arc<Session>>,
    pub users: DashMap<UserId, Arc<User>>,
    pub rooms: DashMap<RoomId, Arc<AsyncMutex<Room>>>,
    lost_tx: mpsc::UnboundedSender<SessionId>,
}

impl Server {
    /// Builds the shared state and returns the receiving half of the
    /// lost-connection channel for the caller to drain.
    pub fn new(config: Config) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionId>) {
        let (lost_tx, lost_rx) = mpsc::unbounded_channel();
        let identity = IdentityClient::new(config.identity_base_url.clone(), config.http_timeout_secs);
        let server = Arc::new(Self {
            config: StdRwLock::new(config),
            identity,
            sessions: DashMap::new(),
            users: DashMap::new(),
            rooms: DashMap::new(),
            lost_tx,
        });
        (server, lost_rx)
    }

    pub fn config(&self) -> Config {
        self.config.read().expect("config lock poisoned").clone()
    }

    pub async fn reload_config(&self) -> anyhow::Result<()> {
        let fresh = crate::config::load().await?;
        *self.config.write().expect("config lock poisoned") = fresh;
        Ok(())
    }

    /// Called from a connection task when its socket is gone for any
    /// reason. Non-blocking; the actual cleanup runs on the drain task.
    pub fn report_lost(&self, session_id: SessionId) {
        let _ = self.lost_tx.send(session_id);
    }

    /// Binds the listener (dual-stack when `bind_ip` is the IPv6 wildcard)
    /// and runs the accept loop forever, spawning one connection task per
    /// socket.
    pub async fn listen(self: Arc<Self>) -> std::io::Result<()> {
        let (bind_ip, port) = {
            let cfg = self.config();
            (cfg.bind_ip, cfg.port)
        };
        let ip: std::net::IpAddr = bind_ip
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let addr = SocketAddr::new(ip, port);
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "listening");

        loop {
            let (stream, peer) = listener.accept().await?;
            tracing::debug!(%peer, "accepted connection");
            let server = self.clone();
            tokio::spawn(async move {
                crate::connection::run(stream, server).await;
            });
        }
    }

    /// Drains the lost-connection channel. For each report, removes the
    /// session from the registry and — only if the user's *current*
    /// session still points at this one — dangles the user. That check is
    /// what keeps a successful reconnect from being cancelled by a
    /// straggling report from the connection it replaced.
    pub async fn drain_lost_connections(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<SessionId>) {
        while let Some(session_id) = rx.recv().await {
            let Some((_, session)) = self.sessions.remove(&session_id) else {
                continue;
            };
            let Some(user) = session.user().await else {
                continue;
            };
            if user.current_session_is(session_id) {
                self.clone().dangle(user).await;
            }
        }
    }

    /// Implements spec.md §4.4: immediate removal if the user was
    /// `Playing`, otherwise a grace-period timer guarded by the user's
    /// dangle epoch.
    async fn dangle(self: Arc<Self>, user: Arc<User>) {
        let was_playing = match user.room() {
            Some(room_id) => match self.rooms.get(&room_id) {
                Some(room) => room.lock().await.is_playing(),
                None => false,
            },
            None => false,
        };

        if was_playing {
            self.evict_from_room(&user).await;
            self.users.remove(&user.id);
            return;
        }

        let epoch = user.begin_dangle();
        let grace = Duration::from_secs(self.config().dangle_grace_secs);
        let server = self.clone();
        let user = user.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if user.epoch_is_current(epoch) {
                server.evict_from_room(&user).await;
                server.users.remove(&user.id);
            }
        });
    }

    async fn evict_from_room(&self, user: &Arc<User>) {
        let Some(room_id) = user.room() else {
            return;
        };
        let Some(room_arc) = self.rooms.get(&room_id).map(|r| r.clone()) else {
            user.set_room(None);
            return;
        };
        let outcome = {
            let mut room = room_arc.lock().await;
            room.leave(user.id)
        };
        user.set_room(None);
        if outcome.room_destroyed {
            self.rooms.remove(&room_id);
        }
    }

    /// Defensive fallback sweep (spec.md §4.6's "ADDED" note): removes any
    /// room that somehow ended up with zero players, mirroring the
    /// teacher's `cleanup_dead_rooms`/`"Removing dead room: {}"` log line.
    pub async fn sweep_stale_rooms(&self) {
        let mut dead = Vec::new();
        for entry in self.rooms.iter() {
            if entry.value().lock().await.is_empty_of_players() {
                dead.push(entry.key().clone());
            }
        }
        for id in dead {
            tracing::info!("Removing dead room: {}", id);
            self.rooms.remove(&id);
        }
    }
}
