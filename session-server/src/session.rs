//! Per-connection session: authentication gate, heartbeat bookkeeping,
//! and the dispatch table mapping each [`ClientCommand`] to a room
//! operation and a `*ResponseCommand`.
//!
//! Grounded in the teacher's `processing_module.rs` dispatch shape (match
//! on a leading tag, one branch per command), generalized from byte-tag
//! matching over passthrough bytes to a typed `ClientCommand` match that
//! actually interprets and mutates room state.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use protocol::{
    AuthenticateResult, ClientCommand, JoinRoomResult, RoomId, ServerCommand, SimpleResponse,
    UserInfo,
};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;

use crate::room::Room;
use crate::server::Server;
use crate::user::User;

pub struct Session {
    pub id: protocol::SessionId,
    pub server: Arc<Server>,
    outbound: mpsc::UnboundedSender<ServerCommand>,
    last_received: StdMutex<Instant>,
    user: AsyncMutex<Option<Arc<User>>>,
}

impl Session {
    pub fn new(server: Arc<Server>, outbound: mpsc::UnboundedSender<ServerCommand>) -> Self {
        Self {
            id: protocol::SessionId(rand::random()),
            server,
            outbound,
            last_received: StdMutex::new(Instant::now()),
            user: AsyncMutex::new(None),
        }
    }

    /// Records a byte having just arrived, resetting the heartbeat clock.
    pub fn touch(&self) {
        *self.last_received.lock().expect("last_received lock poisoned") = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_received
            .lock()
            .expect("last_received lock poisoned")
            .elapsed()
    }

    pub async fn user(&self) -> Option<Arc<User>> {
        self.user.lock().await.clone()
    }

    /// Routes one decoded command to its handler. `Ping` is normally
    /// answered inline in [`crate::connection::receive_loop`] without
    /// reaching here; handling it defensively costs nothing. Returns
    /// `None` for commands with no response: an unauthenticated drop, or
    /// the fire-and-forget `Touches`/`Judges` pair.
    pub async fn dispatch(&self, command: ClientCommand) -> Option<ServerCommand> {
        if let ClientCommand::Authenticate { token } = command {
            return Some(ServerCommand::Authenticate(self.authenticate(token).await));
        }

        let Some(user) = self.user().await else {
            tracing::debug!("dropping command received before authentication");
            return None;
        };

        match command {
            ClientCommand::Ping => Some(ServerCommand::Pong),
            ClientCommand::Authenticate { .. } => unreachable!("handled above"),
            ClientCommand::Chat { message } => Some(ServerCommand::Chat(self.chat(&user, message).await)),
            ClientCommand::Touches { frames } => {
                self.touches(&user, frames).await;
                None
            }
            ClientCommand::Judges { judges } => {
                self.judges(&user, judges).await;
                None
            }
            ClientCommand::CreateRoom { id } => {
                Some(ServerCommand::CreateRoom(self.create_room(&user, id).await))
            }
            ClientCommand::JoinRoom { id, monitor } => {
                Some(ServerCommand::JoinRoom(self.join_room(&user, id, monitor).await))
            }
            ClientCommand::LeaveRoom => Some(ServerCommand::LeaveRoom(self.leave_room(&user).await)),
            ClientCommand::LockRoom { lock } => Some(ServerCommand::LockRoom(
                self.with_room(&user, |room, id| room.lock(id, lock)).await,
            )),
            ClientCommand::CycleRoom { cycle } => Some(ServerCommand::CycleRoom(
                self.with_room(&user, |room, id| room.set_cycle(id, cycle)).await,
            )),
            ClientCommand::SelectChart { id } => {
                Some(ServerCommand::SelectChart(self.select_chart(&user, id).await))
            }
            ClientCommand::RequestStart => Some(ServerCommand::RequestStart(
                self.with_room(&user, |room, id| room.request_start(id)).await,
            )),
            ClientCommand::Ready => {
                Some(ServerCommand::Ready(self.with_room(&user, |room, id| room.ready(id)).await))
            }
            ClientCommand::CancelReady => Some(ServerCommand::CancelReady(
                self.with_room(&user, |room, id| room.cancel_ready(id)).await,
            )),
            ClientCommand::Played { record_id } => {
                Some(ServerCommand::Played(self.played(&user, record_id).await))
            }
            ClientCommand::Abort => {
                Some(ServerCommand::Abort(self.with_room(&user, |room, id| room.abort(id)).await))
            }
        }
    }

    async fn authenticate(&self, token: String) -> AuthenticateResult {
        if token.len() != protocol::AUTH_TOKEN_LEN {
            return Err(format!(
                "Authentication token must be exactly {} characters.",
                protocol::AUTH_TOKEN_LEN
            ));
        }

        let me = self
            .server
            .identity
            .me(&token)
            .await
            .map_err(|err| err.to_string())?;

        let user = match self.server.users.get(&me.id) {
            Some(existing) => existing.clone(),
            None => {
                let fresh = Arc::new(User::new(me.id, me.name.clone(), me.language.clone()));
                self.server.users.insert(me.id, fresh.clone());
                fresh
            }
        };
        let displaced_live_session = user.has_session();
        user.attach_session(self.id, self.outbound.clone());
        *self.user.lock().await = Some(user.clone());
        tracing::debug!(
            user_id = user.id,
            language = %user.language(),
            displaced_live_session,
            "authenticated"
        );

        let room_state = match user.room() {
            Some(room_id) => match self.server.rooms.get(&room_id).map(|r| r.clone()) {
                Some(room_arc) => Some(room_arc.lock().await.snapshot_for(user.id)),
                None => None,
            },
            None => None,
        };

        Ok((
            UserInfo {
                id: user.id,
                name: user.name(),
                monitor: user.is_monitor(),
            },
            room_state,
        ))
    }

    async fn chat(&self, user: &Arc<User>, message: String) -> SimpleResponse {
        if message.len() > protocol::MAX_CHAT_LEN {
            return Err(format!(
                "Chat message exceeds {} characters.",
                protocol::MAX_CHAT_LEN
            ));
        }
        let room_arc = self.room_of(user)?;
        let room = room_arc.lock().await;
        room.chat(user.id, message);
        Ok(())
    }

    async fn touches(&self, user: &Arc<User>, frames: Vec<protocol::TouchFrame>) {
        if let Some(latest) = frames.iter().map(|f| f.time).fold(None, max_time) {
            user.set_game_time(latest);
        }
        let Some(room_id) = user.room() else { return };
        let Some(room_arc) = self.server.rooms.get(&room_id).map(|r| r.clone()) else {
            return;
        };
        room_arc
            .lock()
            .await
            .broadcast_monitors(ServerCommand::Touches { player: user.id, frames });
    }

    async fn judges(&self, user: &Arc<User>, judges: Vec<protocol::JudgeEvent>) {
        if let Some(latest) = judges.iter().map(|j| j.time).fold(None, max_time) {
            user.set_game_time(latest);
        }
        let Some(room_id) = user.room() else { return };
        let Some(room_arc) = self.server.rooms.get(&room_id).map(|r| r.clone()) else {
            return;
        };
        room_arc
            .lock()
            .await
            .broadcast_monitors(ServerCommand::Judges { player: user.id, judges });
    }

    async fn create_room(&self, user: &Arc<User>, id: RoomId) -> SimpleResponse {
        if user.room().is_some() {
            return Err("You are already in a room.".to_owned());
        }
        let cfg = self.server.config();
        use dashmap::mapref::entry::Entry;
        match self.server.rooms.entry(id.clone()) {
            Entry::Occupied(_) => Err(format!("Room {id} already exists.")),
            Entry::Vacant(slot) => {
                let room = Room::create(
                    id.clone(),
                    user.clone(),
                    cfg.room_max_players,
                    cfg.monitors.clone(),
                    cfg.cycle_voting,
                );
                room.announce_create(user.id);
                slot.insert(Arc::new(AsyncMutex::new(room)));
                Ok(())
            }
        }
    }

    async fn join_room(&self, user: &Arc<User>, id: RoomId, monitor: bool) -> JoinRoomResult {
        if user.room().is_some() {
            return Err("You are already in a room.".to_owned());
        }
        let Some(room_arc) = self.server.rooms.get(&id).map(|r| r.clone()) else {
            return Err(format!("Room {id} does not exist."));
        };
        let mut room = room_arc.lock().await;
        room.join(user.clone(), monitor).map_err(|e| e.to_string())
    }

    async fn leave_room(&self, user: &Arc<User>) -> SimpleResponse {
        let Some(room_id) = user.room() else {
            return Err("You are not in a room.".to_owned());
        };
        let Some(room_arc) = self.server.rooms.get(&room_id).map(|r| r.clone()) else {
            user.set_room(None);
            return Ok(());
        };
        let outcome = room_arc.lock().await.leave(user.id);
        user.set_room(None);
        if outcome.room_destroyed {
            self.server.rooms.remove(&room_id);
        }
        Ok(())
    }

    async fn select_chart(&self, user: &Arc<User>, chart_id: i32) -> SimpleResponse {
        let room_arc = self.room_of(user)?;
        // Resolved before the room is locked, per spec.md §5's
        // suspension-point rule: an upstream HTTP call must never happen
        // while the room mutex is held.
        let chart = self
            .server
            .identity
            .chart(chart_id)
            .await
            .map_err(|err| err.to_string())?;
        room_arc
            .lock()
            .await
            .select_chart(user.id, chart)
            .map_err(|e| e.to_string())
    }

    async fn played(&self, user: &Arc<User>, record_id: i32) -> SimpleResponse {
        let room_arc = self.room_of(user)?;
        let record = self
            .server
            .identity
            .record(record_id)
            .await
            .map_err(|err| err.to_string())?;
        room_arc
            .lock()
            .await
            .played(user.id, record)
            .map_err(|e| e.to_string())
    }

    fn room_of(&self, user: &Arc<User>) -> Result<Arc<AsyncMutex<Room>>, String> {
        let room_id = user.room().ok_or_else(|| "You are not in a room.".to_owned())?;
        self.server
            .rooms
            .get(&room_id)
            .map(|r| r.clone())
            .ok_or_else(|| "Room no longer exists.".to_owned())
    }

    async fn with_room<F>(&self, user: &Arc<User>, f: F) -> SimpleResponse
    where
        F: FnOnce(&mut Room, protocol::UserId) -> Result<(), crate::room::RoomError>,
    {
        let room_arc = self.room_of(user)?;
        let mut room = room_arc.lock().await;
        f(&mut room, user.id).map_err(|e| e.to_string())
    }
}

fn max_time(acc: Option<f32>, time: f32) -> Option<f32> {
    Some(acc.map_or(time, |current| current.max(time)))
}
