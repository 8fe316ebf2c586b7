//! Identity-keyed presence record binding an active session to at most one
//! room, and the dangling-grace mechanism that survives transient socket
//! loss.
//!
//! The session reference is deliberately non-owning (spec.md §9): rather
//! than a real `Weak<T>`, we store the outbound command sender directly and
//! let a `send` on a closed channel degrade silently to a no-op — the same
//! effect, reached the way the design notes' second option suggests
//! ("storing a session id and looking it up... at send time"), generalized
//! slightly further since the channel itself tells us liveness without a
//! registry round trip.

use std::sync::Mutex;

use protocol::{RoomId, ServerCommand, SessionId, UserId};
use tokio::sync::mpsc;

struct UserInner {
    name: String,
    language: String,
    session_id: Option<SessionId>,
    sender: Option<mpsc::UnboundedSender<ServerCommand>>,
    room: Option<RoomId>,
    is_monitor: bool,
    game_time: f32,
    /// Bumped on every session attach/detach. A dangle timer captures the
    /// epoch at arm time and only acts if it is still current when the
    /// timer fires — see spec.md §9's "language-neutral formulation".
    dangle_epoch: u64,
}

/// A user's presence record. Survives across reconnects; destroyed only
/// when the dangle grace period lapses with no reclaim, or immediately on a
/// loss while `Playing`.
pub struct User {
    pub id: UserId,
    inner: Mutex<UserInner>,
}

impl User {
    pub fn new(id: UserId, name: String, language: String) -> Self {
        Self {
            id,
            inner: Mutex::new(UserInner {
                name,
                language,
                session_id: None,
                sender: None,
                room: None,
                is_monitor: false,
                game_time: f32::NEG_INFINITY,
                dangle_epoch: 0,
            }),
        }
    }

    pub fn name(&self) -> String {
        self.inner.lock().unwrap().name.clone()
    }

    pub fn language(&self) -> String {
        self.inner.lock().unwrap().language.clone()
    }

    /// Installs a freshly-accepted session, replacing any prior one and
    /// bumping the epoch so a pending dangle timer from the old session no
    /// longer matches.
    pub fn attach_session(
        &self,
        session_id: SessionId,
        sender: mpsc::UnboundedSender<ServerCommand>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.session_id = Some(session_id);
        inner.sender = Some(sender);
        inner.dangle_epoch += 1;
    }

    /// True if `session_id` is still this user's current session — the
    /// "still points at this one" check the lost-connection drain task must
    /// make before dangling (spec.md §4.6).
    pub fn current_session_is(&self, session_id: SessionId) -> bool {
        self.inner.lock().unwrap().session_id == Some(session_id)
    }

    /// Marks the user as having lost its session, returning the epoch a
    /// dangle timer should capture.
    pub fn begin_dangle(&self) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.session_id = None;
        inner.sender = None;
        inner.dangle_epoch += 1;
        inner.dangle_epoch
    }

    /// True if `epoch` is still the current epoch — called by an expiring
    /// dangle timer to decide whether a reconnect already won the race.
    pub fn epoch_is_current(&self, epoch: u64) -> bool {
        self.inner.lock().unwrap().dangle_epoch == epoch
    }

    /// Sends to the user's current session. A no-op (not an error) if the
    /// user has no live session right now.
    pub fn send(&self, command: ServerCommand) {
        let sender = self.inner.lock().unwrap().sender.clone();
        if let Some(sender) = sender {
            let _ = sender.send(command);
        }
    }

    pub fn room(&self) -> Option<RoomId> {
        self.inner.lock().unwrap().room.clone()
    }

    pub fn set_room(&self, room: Option<RoomId>) {
        self.inner.lock().unwrap().room = room;
    }

    pub fn is_monitor(&self) -> bool {
        self.inner.lock().unwrap().is_monitor
    }

    pub fn set_is_monitor(&self, is_monitor: bool) {
        self.inner.lock().unwrap().is_monitor = is_monitor;
    }

    pub fn game_time(&self) -> f32 {
        self.inner.lock().unwrap().game_time
    }

    pub fn set_game_time(&self, time: f32) {
        self.inner.lock().unwrap().game_time = time;
    }

    pub fn reset_game_time(&self) {
        self.set_game_time(f32::NEG_INFINITY);
    }

    pub fn has_session(&self) -> bool {
        self.inner.lock().unwrap().session_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attaching_a_session_bumps_the_epoch_and_invalidates_old_timers() {
        let user = User::new(1, "alice".to_owned(), "en".to_owned());
        let (tx, _rx) = mpsc::unbounded_channel();
        user.attach_session(SessionId(1), tx);

        let epoch = user.begin_dangle();
        assert!(user.epoch_is_current(epoch));

        let (tx2, _rx2) = mpsc::unbounded_channel();
        user.attach_session(SessionId(2), tx2);
        assert!(!user.epoch_is_current(epoch));
    }

    #[test]
    fn send_without_a_session_is_a_silent_no_op() {
        let user = User::new(1, "alice".to_owned(), "en".to_owned());
        user.send(ServerCommand::Pong);
    }

    #[test]
    fn current_session_is_checks_identity() {
        let user = User::new(1, "alice".to_owned(), "en".to_owned());
        let (tx, _rx) = mpsc::unbounded_channel();
        user.attach_session(SessionId(7), tx);
        assert!(user.current_session_is(SessionId(7)));
        assert!(!user.current_session_is(SessionId(8)));
    }
}
