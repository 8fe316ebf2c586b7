//! The room state machine: membership, host election, vote aggregation and
//! broadcast fan-out.
//!
//! Per spec.md §9's design note, `SelectChart | WaitingForReady{..} |
//! Playing{..}` is a tagged variant whose transitions construct a fresh
//! value rather than mutating fields in place. A `Room` lives behind a
//! single `tokio::sync::Mutex` in [`crate::server::Server`]'s room registry;
//! every method here assumes the caller already holds that lock and that any
//! HTTP lookup (chart/record) has already completed — see spec.md §5.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use protocol::{
    ChartInfo, ClientRoomState, Message, RecordInfo, RoomId, RoomStateData, ServerCommand, UserId,
    UserInfo,
};
use rand::seq::{IteratorRandom, SliceRandom};
use thiserror::Error;

use crate::user::User;

/// Protocol-state errors (spec.md §7): reported to the initiating client as
/// `{success=false, error=<message>}`, never broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("Room is locked.")]
    Locked,
    #[error("Room is not accepting joins right now.")]
    NotJoinable,
    #[error("You are not allowed to join as a monitor.")]
    MonitorNotAllowed,
    #[error("Room is full.")]
    RoomFull,
    #[error("You are not the host.")]
    NotHost,
    #[error("You are not a player in this room.")]
    NotAPlayer,
    #[error("If no one else joins, there is no reason to start.")]
    NotEnoughPlayers,
    #[error("Select a chart first.")]
    NoChartSelected,
    #[error("No one has voted for a chart yet.")]
    NoVotes,
    #[error("The room is not selecting a chart right now.")]
    NotSelectingChart,
    #[error("The room is not waiting for players to ready up.")]
    NotWaitingForReady,
    #[error("The room is not in a game right now.")]
    NotPlaying,
    #[error("That record does not belong to you.")]
    RecordMismatch,
}

type RoomResult = Result<(), RoomError>;

/// Internal per-phase data, constructed fresh on every transition.
enum Phase {
    SelectChart,
    WaitingForReady { wait: HashSet<UserId> },
    Playing {
        results: HashMap<UserId, RecordInfo>,
        aborted: HashSet<UserId>,
    },
}

enum Transition {
    ToPlaying,
    ToSelectChart,
}

pub struct Room {
    pub id: RoomId,
    host: UserId,
    phase: Phase,
    live: bool,
    locked: bool,
    cycle: bool,
    cycle_voting: bool,
    chart: Option<ChartInfo>,
    players: Vec<Arc<User>>,
    monitors: Vec<Arc<User>>,
    votes: HashMap<UserId, ChartInfo>,
    max_players: u16,
    monitor_allowlist: Vec<UserId>,
}

impl Room {
    pub fn create(
        id: RoomId,
        creator: Arc<User>,
        max_players: u16,
        monitor_allowlist: Vec<UserId>,
        cycle_voting: bool,
    ) -> Self {
        creator.set_room(Some(id.clone()));
        creator.set_is_monitor(false);
        Self {
            id,
            host: creator.id,
            phase: Phase::SelectChart,
            live: false,
            locked: false,
            cycle: false,
            cycle_voting,
            chart: None,
            players: vec![creator],
            monitors: Vec::new(),
            votes: HashMap::new(),
            max_players,
            monitor_allowlist,
        }
    }

    pub fn host(&self) -> UserId {
        self.host
    }

    pub fn is_host(&self, user_id: UserId) -> bool {
        self.host == user_id
    }

    pub fn contains_player(&self, user_id: UserId) -> bool {
        self.players.iter().any(|p| p.id == user_id)
    }

    pub fn contains_monitor(&self, user_id: UserId) -> bool {
        self.monitors.iter().any(|m| m.id == user_id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// True while the room is in the `Playing` phase — used by the dangling
    /// mechanism (spec.md §4.4) to decide between immediate removal and the
    /// grace-period timer.
    pub fn is_playing(&self) -> bool {
        matches!(self.phase, Phase::Playing { .. })
    }

    pub fn is_empty_of_players(&self) -> bool {
        self.players.is_empty()
    }

    /// Cycle+voting mode is active only when both the dynamic `cycle` flag
    /// and the room's `cycle_voting` configuration are set (spec.md §4.5's
    /// "Chart selection authority" gates voting on "cycle+voting", not on
    /// `cycle_voting` alone).
    fn voting_active(&self) -> bool {
        self.cycle && self.cycle_voting
    }

    fn room_state_data(&self) -> RoomStateData {
        match &self.phase {
            Phase::SelectChart => RoomStateData::SelectChart(self.chart.as_ref().map(|c| c.id)),
            Phase::WaitingForReady { .. } => RoomStateData::WaitingForReady,
            Phase::Playing { .. } => RoomStateData::Playing,
        }
    }

    fn all_member_ids(&self) -> Vec<UserId> {
        self.players
            .iter()
            .chain(self.monitors.iter())
            .map(|u| u.id)
            .collect()
    }

    fn all_members_info(&self) -> Vec<UserInfo> {
        self.players
            .iter()
            .map(|p| UserInfo {
                id: p.id,
                name: p.name(),
                monitor: false,
            })
            .chain(self.monitors.iter().map(|m| UserInfo {
                id: m.id,
                name: m.name(),
                monitor: true,
            }))
            .collect()
    }

    fn broadcast_all(&self, message: Message) {
        self.broadcast_all_raw(ServerCommand::Message(message));
    }

    fn broadcast_all_raw(&self, command: ServerCommand) {
        for p in &self.players {
            p.send(command.clone());
        }
        for m in &self.monitors {
            m.send(command.clone());
        }
    }

    fn broadcast_all_excluding(&self, exclude: UserId, message: Message) {
        let command = ServerCommand::Message(message);
        for p in self.players.iter().filter(|p| p.id != exclude) {
            p.send(command.clone());
        }
        for m in self.monitors.iter().filter(|m| m.id != exclude) {
            m.send(command.clone());
        }
    }

    fn send_to_excluding(&self, exclude: UserId, command: ServerCommand) {
        for p in self.players.iter().filter(|p| p.id != exclude) {
            p.send(command.clone());
        }
        for m in self.monitors.iter().filter(|m| m.id != exclude) {
            m.send(command.clone());
        }
    }

    /// Broadcasts a chat line to every room member, sender included.
    pub fn chat(&self, user_id: UserId, content: String) {
        self.broadcast_all(Message::Chat {
            user: user_id,
            content,
        });
    }

    /// Announces a freshly created room to its sole member, mirroring
    /// `Message::JoinRoom` in shape even though a fresh room has no one
    /// else to tell yet.
    pub fn announce_create(&self, user_id: UserId) {
        self.broadcast_all(Message::CreateRoom { user: user_id });
    }

    /// Mirrors telemetry to monitors only.
    pub fn broadcast_monitors(&self, command: ServerCommand) {
        for m in &self.monitors {
            m.send(command.clone());
        }
    }

    pub fn snapshot_for(&self, user_id: UserId) -> ClientRoomState {
        let is_ready = match &self.phase {
            Phase::WaitingForReady { wait } => wait.contains(&user_id),
            _ => false,
        };
        ClientRoomState {
            id: self.id.clone(),
            state: self.room_state_data(),
            live: self.live,
            locked: self.locked,
            cycle: self.cycle,
            is_host: self.is_host(user_id),
            is_ready,
            users: self
                .all_members_info()
                .into_iter()
                .map(|u| (u.id, u))
                .collect(),
        }
    }

    /// Join admission per spec.md §4.5's "Join admission". The caller is
    /// responsible for rejecting a user who is already in a room, and for
    /// resolving the target room itself — both require state this `Room`
    /// doesn't have.
    pub fn join(
        &mut self,
        user: Arc<User>,
        monitor: bool,
    ) -> Result<(RoomStateData, Vec<UserInfo>, bool), RoomError> {
        if self.locked {
            return Err(RoomError::Locked);
        }
        if !matches!(self.phase, Phase::SelectChart) {
            return Err(RoomError::NotJoinable);
        }
        if monitor && !self.monitor_allowlist.contains(&user.id) {
            return Err(RoomError::MonitorNotAllowed);
        }
        if !monitor && self.player_count() as u16 >= self.max_players {
            return Err(RoomError::RoomFull);
        }

        let existing_infos = self.all_members_info();

        user.set_room(Some(self.id.clone()));
        user.set_is_monitor(monitor);

        if monitor {
            self.monitors.push(user.clone());
            self.live = true;
        } else {
            self.players.push(user.clone());
        }

        self.broadcast_all_excluding(
            user.id,
            Message::JoinRoom {
                user: user.id,
                name: user.name(),
            },
        );
        self.send_to_excluding(
            user.id,
            ServerCommand::OnJoinRoom(UserInfo {
                id: user.id,
                name: user.name(),
                monitor,
            }),
        );

        Ok((self.room_state_data(), existing_infos, self.live))
    }

    /// Outcome of a membership loss the caller needs to act on: whether the
    /// room should now be torn down, and who the new host is (if any).
    pub fn leave(&mut self, user_id: UserId) -> LeaveOutcome {
        let was_monitor = self.contains_monitor(user_id);
        let was_player = self.contains_player(user_id);
        if !was_monitor && !was_player {
            return LeaveOutcome::default();
        }

        let name = if was_monitor {
            self.monitors
                .iter()
                .find(|m| m.id == user_id)
                .map(|m| m.name())
        } else {
            self.players
                .iter()
                .find(|p| p.id == user_id)
                .map(|p| p.name())
        }
        .unwrap_or_default();

        if was_monitor {
            self.monitors.retain(|m| m.id != user_id);
        } else {
            self.players.retain(|p| p.id != user_id);
        }
        self.votes.remove(&user_id);
        if let Phase::WaitingForReady { wait } = &mut self.phase {
            wait.remove(&user_id);
        }

        self.broadcast_all(Message::LeaveRoom {
            user: user_id,
            name,
        });

        if was_monitor {
            self.check_transition();
            return LeaveOutcome::default();
        }

        if self.players.is_empty() {
            return LeaveOutcome {
                room_destroyed: true,
                new_host: None,
            };
        }

        let mut new_host = None;
        if self.is_host(user_id) {
            let chosen = self
                .players
                .choose(&mut rand::thread_rng())
                .expect("players is non-empty")
                .clone();
            self.host = chosen.id;
            new_host = Some(chosen.id);
            self.broadcast_all(Message::NewHost { user: chosen.id });
            chosen.send(ServerCommand::ChangeHost(true));
        }

        // Preserved per spec.md §9: the source re-runs the all-ready check
        // unconditionally on every leave, not just when the leaver was the
        // last outstanding vote/result.
        self.check_transition();

        LeaveOutcome {
            room_destroyed: false,
            new_host,
        }
    }

    fn check_transition(&mut self) {
        let transition = match &self.phase {
            Phase::WaitingForReady { wait } => {
                let ids = self.all_member_ids();
                (!ids.is_empty() && ids.iter().all(|id| wait.contains(id)))
                    .then_some(Transition::ToPlaying)
            }
            Phase::Playing { results, aborted } => self
                .players
                .iter()
                .all(|p| results.contains_key(&p.id) || aborted.contains(&p.id))
                .then_some(Transition::ToSelectChart),
            Phase::SelectChart => None,
        };
        match transition {
            Some(Transition::ToPlaying) => self.start_playing(),
            Some(Transition::ToSelectChart) => self.end_game(),
            None => {}
        }
    }

    fn start_playing(&mut self) {
        for p in &self.players {
            p.reset_game_time();
        }
        self.phase = Phase::Playing {
            results: HashMap::new(),
            aborted: HashSet::new(),
        };
        self.broadcast_all(Message::StartPlaying);
        self.broadcast_all_raw(ServerCommand::ChangeState(self.room_state_data()));
    }

    fn end_game(&mut self) {
        self.phase = Phase::SelectChart;
        self.broadcast_all(Message::GameEnd);

        if self.voting_active() {
            self.chart = None;
            self.votes.clear();
            for p in self.players.iter().filter(|p| p.id != self.host) {
                p.send(ServerCommand::ChangeHost(true));
            }
        } else if self.cycle && !self.players.is_empty() {
            if let Some(idx) = self.players.iter().position(|p| p.id == self.host) {
                let next = self.players[(idx + 1) % self.players.len()].clone();
                let old_host = self.host;
                self.host = next.id;
                self.broadcast_all(Message::NewHost { user: next.id });
                if let Some(old) = self.players.iter().find(|p| p.id == old_host) {
                    old.send(ServerCommand::ChangeHost(false));
                }
                next.send(ServerCommand::ChangeHost(true));
            }
        }

        self.broadcast_all_raw(ServerCommand::ChangeState(self.room_state_data()));
    }

    /// Chart selection authority per spec.md §4.5: host-only outside
    /// cycle+voting, any player (recorded as a vote) inside it.
    pub fn select_chart(&mut self, user_id: UserId, chart: ChartInfo) -> RoomResult {
        if !matches!(self.phase, Phase::SelectChart) {
            return Err(RoomError::NotSelectingChart);
        }
        if self.voting_active() {
            if !self.contains_player(user_id) {
                return Err(RoomError::NotAPlayer);
            }
            self.votes.insert(user_id, chart.clone());
            self.chart = Some(chart.clone());
        } else {
            if !self.is_host(user_id) {
                return Err(RoomError::NotHost);
            }
            self.chart = Some(chart.clone());
        }

        self.broadcast_all(Message::SelectChart {
            user: user_id,
            name: chart.name,
            id: chart.id,
        });
        self.broadcast_all_raw(ServerCommand::ChangeState(self.room_state_data()));
        Ok(())
    }

    pub fn request_start(&mut self, user_id: UserId) -> RoomResult {
        if !matches!(self.phase, Phase::SelectChart) {
            return Err(RoomError::NotSelectingChart);
        }
        if !self.is_host(user_id) {
            return Err(RoomError::NotHost);
        }
        if self.player_count() < 2 {
            return Err(RoomError::NotEnoughPlayers);
        }

        if self.voting_active() {
            let chosen = self
                .votes
                .values()
                .choose(&mut rand::thread_rng())
                .cloned()
                .ok_or(RoomError::NoVotes)?;
            self.chart = Some(chosen);
            // Players-only, mirroring the grant paths in `end_game`/
            // `cancel_ready`: monitors were never granted pseudo-host, so
            // they must not receive the revoking `ChangeHost(false)` either.
            for p in self.players.iter().filter(|p| p.id != self.host) {
                p.send(ServerCommand::ChangeHost(false));
            }
            self.votes.clear();
        } else if self.chart.is_none() {
            return Err(RoomError::NoChartSelected);
        }

        self.phase = Phase::WaitingForReady {
            wait: std::iter::once(self.host).collect(),
        };
        self.broadcast_all(Message::GameStart { user: self.host });
        self.broadcast_all_raw(ServerCommand::ChangeState(self.room_state_data()));
        Ok(())
    }

    pub fn ready(&mut self, user_id: UserId) -> RoomResult {
        let Phase::WaitingForReady { wait } = &mut self.phase else {
            return Err(RoomError::NotWaitingForReady);
        };
        wait.insert(user_id);
        self.broadcast_all(Message::Ready { user: user_id });
        self.check_transition();
        Ok(())
    }

    pub fn cancel_ready(&mut self, user_id: UserId) -> RoomResult {
        if !matches!(self.phase, Phase::WaitingForReady { .. }) {
            return Err(RoomError::NotWaitingForReady);
        }

        if self.is_host(user_id) {
            self.phase = Phase::SelectChart;
            self.broadcast_all(Message::CancelGame { user: user_id });
            if self.voting_active() {
                self.chart = None;
                self.votes.clear();
                // Preserved per spec.md §9: pseudo-host is granted (not
                // revoked) to every non-host so all players can vote again,
                // despite the `false` the variable naming might suggest.
                for p in self.players.iter().filter(|p| p.id != self.host) {
                    p.send(ServerCommand::ChangeHost(true));
                }
            }
            self.broadcast_all_raw(ServerCommand::ChangeState(self.room_state_data()));
        } else {
            if let Phase::WaitingForReady { wait } = &mut self.phase {
                wait.remove(&user_id);
            }
            self.broadcast_all(Message::CancelReady { user: user_id });
        }
        Ok(())
    }

    pub fn played(&mut self, user_id: UserId, record: RecordInfo) -> RoomResult {
        if !matches!(self.phase, Phase::Playing { .. }) {
            return Err(RoomError::NotPlaying);
        }
        if record.player != user_id {
            return Err(RoomError::RecordMismatch);
        }
        let Phase::Playing { results, .. } = &mut self.phase else {
            unreachable!()
        };
        results.insert(user_id, record.clone());
        self.broadcast_all(Message::Played {
            user: user_id,
            score: record.score,
            accuracy: record.accuracy,
            full_combo: record.full_combo,
        });
        self.check_transition();
        Ok(())
    }

    pub fn abort(&mut self, user_id: UserId) -> RoomResult {
        if !matches!(self.phase, Phase::Playing { .. }) {
            return Err(RoomError::NotPlaying);
        }
        let Phase::Playing { aborted, .. } = &mut self.phase else {
            unreachable!()
        };
        aborted.insert(user_id);
        self.broadcast_all(Message::Abort { user: user_id });
        self.check_transition();
        Ok(())
    }

    pub fn lock(&mut self, user_id: UserId, lock: bool) -> RoomResult {
        if !self.is_host(user_id) {
            return Err(RoomError::NotHost);
        }
        self.locked = lock;
        self.broadcast_all(Message::LockRoom { lock });
        Ok(())
    }

    pub fn set_cycle(&mut self, user_id: UserId, cycle: bool) -> RoomResult {
        if !self.is_host(user_id) {
            return Err(RoomError::NotHost);
        }
        self.cycle = cycle;
        self.broadcast_all(Message::CycleRoom { cycle });
        Ok(())
    }
}

#[derive(Default)]
pub struct LeaveOutcome {
    pub room_destroyed: bool,
    pub new_host: Option<UserId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: UserId, name: &str) -> Arc<User> {
        Arc::new(User::new(id, name.to_owned(), "en".to_owned()))
    }

    fn chart(id: i32) -> ChartInfo {
        ChartInfo {
            id,
            name: format!("chart-{id}"),
        }
    }

    #[test]
    fn host_is_always_a_player() {
        let host = user(100, "alice");
        let mut room = Room::create(RoomId::new("R1").unwrap(), host.clone(), 8, vec![], false);
        let bob = user(101, "bob");
        room.join(bob.clone(), false).unwrap();

        let outcome = room.leave(100);
        assert!(!outcome.room_destroyed);
        assert_eq!(room.host(), 101);
        assert!(room.contains_player(room.host()));
    }

    #[test]
    fn room_destroyed_when_last_player_leaves() {
        let host = user(100, "alice");
        let mut room = Room::create(RoomId::new("R1").unwrap(), host, 8, vec![], false);
        let outcome = room.leave(100);
        assert!(outcome.room_destroyed);
    }

    #[test]
    fn single_player_cannot_request_start() {
        let host = user(100, "alice");
        let mut room = Room::create(RoomId::new("R1").unwrap(), host, 8, vec![], false);
        room.select_chart(100, chart(1)).unwrap();
        let err = room.request_start(100).unwrap_err();
        assert_eq!(err, RoomError::NotEnoughPlayers);
    }

    #[test]
    fn full_two_player_game_cycle() {
        let host = user(100, "alice");
        let mut room = Room::create(RoomId::new("R1").unwrap(), host, 8, vec![], false);
        let bob = user(101, "bob");
        room.join(bob, false).unwrap();

        room.select_chart(100, chart(42)).unwrap();
        room.request_start(100).unwrap();
        assert!(matches!(room.room_state_data(), RoomStateData::WaitingForReady));

        room.ready(101).unwrap();
        assert!(matches!(room.room_state_data(), RoomStateData::Playing));

        room.played(100, RecordInfo { id: 1, player: 100, score: 900000, accuracy: 0.95, full_combo: false }).unwrap();
        assert!(matches!(room.room_state_data(), RoomStateData::Playing));
        room.abort(101).unwrap();
        assert!(matches!(room.room_state_data(), RoomStateData::SelectChart));
    }

    #[test]
    fn non_host_cannot_select_chart_outside_voting() {
        let host = user(100, "alice");
        let mut room = Room::create(RoomId::new("R1").unwrap(), host, 8, vec![], false);
        let bob = user(101, "bob");
        room.join(bob, false).unwrap();
        let err = room.select_chart(101, chart(1)).unwrap_err();
        assert_eq!(err, RoomError::NotHost);
    }

    #[test]
    fn cycle_without_voting_advances_host_in_join_order() {
        let host = user(100, "alice");
        let mut room = Room::create(RoomId::new("R1").unwrap(), host, 8, vec![], false);
        room.set_cycle(100, true).unwrap();
        room.join(user(101, "bob"), false).unwrap();
        room.join(user(102, "carol"), false).unwrap();

        room.select_chart(100, chart(1)).unwrap();
        room.request_start(100).unwrap();
        room.ready(101).unwrap();
        room.ready(102).unwrap();
        assert!(matches!(room.room_state_data(), RoomStateData::Playing));

        for id in [100, 101, 102] {
            room.played(id, RecordInfo { id, player: id, score: 1, accuracy: 1.0, full_combo: true }).unwrap();
        }
        assert_eq!(room.host(), 101);
    }

    #[test]
    fn monitor_must_be_allow_listed() {
        let host = user(100, "alice");
        let mut room = Room::create(RoomId::new("R1").unwrap(), host, 8, vec![], false);
        let err = room.join(user(200, "spy"), true).unwrap_err();
        assert_eq!(err, RoomError::MonitorNotAllowed);
    }

    #[test]
    fn live_flag_is_sticky_once_a_monitor_joins() {
        let host = user(100, "alice");
        let mut room = Room::create(RoomId::new("R1").unwrap(), host, 8, vec![200], false);
        let (_, _, live) = room.join(user(200, "watcher"), true).unwrap();
        assert!(live);
        room.leave(200);
        assert!(room.live);
    }

    #[test]
    fn leave_during_waiting_for_ready_can_trigger_playing_transition() {
        // Preserves spec.md §9's documented "unconditional re-check" quirk:
        // if the leaver was the only one not yet ready, their departure
        // itself completes the ready set.
        let host = user(100, "alice");
        let mut room = Room::create(RoomId::new("R1").unwrap(), host, 8, vec![], false);
        room.join(user(101, "bob"), false).unwrap();
        room.join(user(102, "carol"), false).unwrap();
        room.select_chart(100, chart(1)).unwrap();
        room.request_start(100).unwrap();
        room.ready(101).unwrap();
        // carol (102) never readies up, then leaves.
        let outcome = room.leave(102);
        assert!(!outcome.room_destroyed);
        assert!(matches!(room.room_state_data(), RoomStateData::Playing));
    }

    #[test]
    fn voting_mode_lets_any_player_select_and_randomizes_on_start() {
        let host = user(100, "alice");
        let mut room = Room::create(RoomId::new("R1").unwrap(), host, 8, vec![], true);
        room.set_cycle(100, true).unwrap();
        room.join(user(101, "bob"), false).unwrap();

        room.select_chart(101, chart(7)).unwrap();
        room.request_start(100).unwrap();
        assert!(matches!(room.room_state_data(), RoomStateData::WaitingForReady));
    }
}
