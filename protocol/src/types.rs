//! Composite types shared by [`crate::command::ClientCommand`],
//! [`crate::command::ServerCommand`] and [`crate::message::Message`].

use std::collections::HashMap;

use bytes::{Buf, BufMut};
use half::f16;
use serde::{Deserialize, Serialize};

use crate::codec::{Decode, DecodeError, Encode};
use crate::ids::{RoomId, UserId};

/// A half-precision touch coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactPos {
    pub x: f16,
    pub y: f16,
}

impl Encode for CompactPos {
    fn encode(&self, buf: &mut impl BufMut) {
        self.x.encode(buf);
        self.y.encode(buf);
    }
}

impl Decode for CompactPos {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            x: f16::decode(buf)?,
            y: f16::decode(buf)?,
        })
    }
}

/// One touch point within a [`TouchFrame`]: a (possibly reused) finger id and
/// its compact position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPoint {
    pub id: i8,
    pub pos: CompactPos,
}

impl Encode for TouchPoint {
    fn encode(&self, buf: &mut impl BufMut) {
        self.id.encode(buf);
        self.pos.encode(buf);
    }
}

impl Decode for TouchPoint {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            id: i8::decode(buf)?,
            pos: CompactPos::decode(buf)?,
        })
    }
}

/// A single frame of touch telemetry, mirrored to monitors as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct TouchFrame {
    pub time: f32,
    pub points: Vec<TouchPoint>,
}

impl Encode for TouchFrame {
    fn encode(&self, buf: &mut impl BufMut) {
        self.time.encode(buf);
        self.points.encode(buf);
    }
}

impl Decode for TouchFrame {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            time: f32::decode(buf)?,
            points: Vec::decode(buf)?,
        })
    }
}

/// A single note judgement, mirrored to monitors as-is. `judgement` is the
/// raw wire value (`0..5`); the server does not interpret it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JudgeEvent {
    pub time: f32,
    pub line_id: u32,
    pub note_id: u32,
    pub judgement: u8,
}

impl Encode for JudgeEvent {
    fn encode(&self, buf: &mut impl BufMut) {
        self.time.encode(buf);
        self.line_id.encode(buf);
        self.note_id.encode(buf);
        self.judgement.encode(buf);
    }
}

impl Decode for JudgeEvent {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            time: f32::decode(buf)?,
            line_id: u32::decode(buf)?,
            note_id: u32::decode(buf)?,
            judgement: u8::decode(buf)?,
        })
    }
}

/// Public identity of a room member, as seen by other clients.
#[derive(Debug, Clone, PartialEq)]
pub struct UserInfo {
    pub id: UserId,
    pub name: String,
    pub monitor: bool,
}

impl Encode for UserInfo {
    fn encode(&self, buf: &mut impl BufMut) {
        self.id.encode(buf);
        self.name.encode(buf);
        self.monitor.encode(buf);
    }
}

impl Decode for UserInfo {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            id: i32::decode(buf)?,
            name: String::decode(buf)?,
            monitor: bool::decode(buf)?,
        })
    }
}

/// The coarse room state as seen from the wire: `SelectChart` carries the
/// currently-selected chart id (if any), the other two states carry no
/// payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoomState {
    #[default]
    SelectChart,
    WaitingForReady,
    Playing,
}

/// `RoomStateData` as transmitted: the state tag plus `SelectChart`'s
/// optional chart id.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomStateData {
    SelectChart(Option<i32>),
    WaitingForReady,
    Playing,
}

impl RoomStateData {
    pub fn state(&self) -> RoomState {
        match self {
            RoomStateData::SelectChart(_) => RoomState::SelectChart,
            RoomStateData::WaitingForReady => RoomState::WaitingForReady,
            RoomStateData::Playing => RoomState::Playing,
        }
    }
}

impl Encode for RoomStateData {
    fn encode(&self, buf: &mut impl BufMut) {
        match self {
            RoomStateData::SelectChart(chart_id) => {
                0u8.encode(buf);
                chart_id.encode(buf);
            }
            RoomStateData::WaitingForReady => 1u8.encode(buf),
            RoomStateData::Playing => 2u8.encode(buf),
        }
    }
}

impl Decode for RoomStateData {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        match u8::decode(buf)? {
            0 => Ok(RoomStateData::SelectChart(Option::decode(buf)?)),
            1 => Ok(RoomStateData::WaitingForReady),
            2 => Ok(RoomStateData::Playing),
            other => Err(DecodeError::UnknownTag(other)),
        }
    }
}

/// A snapshot of room state handed to a client on (re)join, so its UI can
/// resume without a round trip per field.
///
/// Per the documented source behaviour (spec.md §9), `users` includes
/// monitors as well as players.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRoomState {
    pub id: RoomId,
    pub state: RoomStateData,
    pub live: bool,
    pub locked: bool,
    pub cycle: bool,
    pub is_host: bool,
    pub is_ready: bool,
    pub users: HashMap<UserId, UserInfo>,
}

impl Encode for ClientRoomState {
    fn encode(&self, buf: &mut impl BufMut) {
        self.id.encode(buf);
        self.state.encode(buf);
        self.live.encode(buf);
        self.locked.encode(buf);
        self.cycle.encode(buf);
        self.is_host.encode(buf);
        self.is_ready.encode(buf);
        let entries: Vec<(UserId, UserInfo)> =
            self.users.iter().map(|(k, v)| (*k, v.clone())).collect();
        entries.encode(buf);
    }
}

impl Decode for ClientRoomState {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        let id = RoomId::decode(buf)?;
        let state = RoomStateData::decode(buf)?;
        let live = bool::decode(buf)?;
        let locked = bool::decode(buf)?;
        let cycle = bool::decode(buf)?;
        let is_host = bool::decode(buf)?;
        let is_ready = bool::decode(buf)?;
        let entries: Vec<(UserId, UserInfo)> = Vec::decode(buf)?;
        Ok(Self {
            id,
            state,
            live,
            locked,
            cycle,
            is_host,
            is_ready,
            users: entries.into_iter().collect(),
        })
    }
}

/// A chart as resolved from the identity service's `/chart/{id}` endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChartInfo {
    pub id: i32,
    pub name: String,
}

/// A played result as resolved from the identity service's `/record/{id}`
/// endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RecordInfo {
    pub id: i32,
    pub player: UserId,
    pub score: i32,
    pub accuracy: f32,
    pub full_combo: bool,
}
