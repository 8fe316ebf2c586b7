//! The two tagged command unions exchanged once the version handshake has
//! completed: [`ClientCommand`] flows server-bound, [`ServerCommand`] flows
//! client-bound.

use bytes::{Buf, BufMut};

use crate::codec::{Decode, DecodeError, Encode};
use crate::ids::{RoomId, UserId};
use crate::message::Message;
use crate::types::{ClientRoomState, JudgeEvent, RoomStateData, TouchFrame, UserInfo};

/// A response with no payload beyond `{success, error?}`.
pub type SimpleResponse = Result<(), String>;

/// `{true, UserInfo, optional<ClientRoomState>}` or `{false, error}`.
pub type AuthenticateResult = Result<(UserInfo, Option<ClientRoomState>), String>;

/// `{true, RoomStateData, seq<UserInfo>, live}` or `{false, error}`.
pub type JoinRoomResult = Result<(RoomStateData, Vec<UserInfo>, bool), String>;

/// Client -> Server. Tags are assigned contiguously from 0; tags above 15
/// are rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Ping,
    Authenticate { token: String },
    Chat { message: String },
    Touches { frames: Vec<TouchFrame> },
    Judges { judges: Vec<JudgeEvent> },
    CreateRoom { id: RoomId },
    JoinRoom { id: RoomId, monitor: bool },
    LeaveRoom,
    LockRoom { lock: bool },
    CycleRoom { cycle: bool },
    SelectChart { id: i32 },
    RequestStart,
    Ready,
    CancelReady,
    Played { record_id: i32 },
    Abort,
}

impl Encode for ClientCommand {
    fn encode(&self, buf: &mut impl BufMut) {
        match self {
            ClientCommand::Ping => 0u8.encode(buf),
            ClientCommand::Authenticate { token } => {
                1u8.encode(buf);
                token.encode(buf);
            }
            ClientCommand::Chat { message } => {
                2u8.encode(buf);
                message.encode(buf);
            }
            ClientCommand::Touches { frames } => {
                3u8.encode(buf);
                frames.encode(buf);
            }
            ClientCommand::Judges { judges } => {
                4u8.encode(buf);
                judges.encode(buf);
            }
            ClientCommand::CreateRoom { id } => {
                5u8.encode(buf);
                id.encode(buf);
            }
            ClientCommand::JoinRoom { id, monitor } => {
                6u8.encode(buf);
                id.encode(buf);
                monitor.encode(buf);
            }
            ClientCommand::LeaveRoom => 7u8.encode(buf),
            ClientCommand::LockRoom { lock } => {
                8u8.encode(buf);
                lock.encode(buf);
            }
            ClientCommand::CycleRoom { cycle } => {
                9u8.encode(buf);
                cycle.encode(buf);
            }
            ClientCommand::SelectChart { id } => {
                10u8.encode(buf);
                id.encode(buf);
            }
            ClientCommand::RequestStart => 11u8.encode(buf),
            ClientCommand::Ready => 12u8.encode(buf),
            ClientCommand::CancelReady => 13u8.encode(buf),
            ClientCommand::Played { record_id } => {
                14u8.encode(buf);
                record_id.encode(buf);
            }
            ClientCommand::Abort => 15u8.encode(buf),
        }
    }
}

impl Decode for ClientCommand {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        let tag = u8::decode(buf)?;
        Ok(match tag {
            0 => ClientCommand::Ping,
            1 => ClientCommand::Authenticate {
                token: String::decode(buf)?,
            },
            2 => ClientCommand::Chat {
                message: String::decode(buf)?,
            },
            3 => ClientCommand::Touches {
                frames: Vec::decode(buf)?,
            },
            4 => ClientCommand::Judges {
                judges: Vec::decode(buf)?,
            },
            5 => ClientCommand::CreateRoom {
                id: RoomId::decode(buf)?,
            },
            6 => ClientCommand::JoinRoom {
                id: RoomId::decode(buf)?,
                monitor: bool::decode(buf)?,
            },
            7 => ClientCommand::LeaveRoom,
            8 => ClientCommand::LockRoom {
                lock: bool::decode(buf)?,
            },
            9 => ClientCommand::CycleRoom {
                cycle: bool::decode(buf)?,
            },
            10 => ClientCommand::SelectChart {
                id: i32::decode(buf)?,
            },
            11 => ClientCommand::RequestStart,
            12 => ClientCommand::Ready,
            13 => ClientCommand::CancelReady,
            14 => ClientCommand::Played {
                record_id: i32::decode(buf)?,
            },
            15 => ClientCommand::Abort,
            other => return Err(DecodeError::UnknownTag(other)),
        })
    }
}

/// Server -> Client. Tags are assigned contiguously from 0; a well-behaved
/// server never emits a tag above 19.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerCommand {
    Pong,
    Authenticate(AuthenticateResult),
    Chat(SimpleResponse),
    Touches { player: UserId, frames: Vec<TouchFrame> },
    Judges { player: UserId, judges: Vec<JudgeEvent> },
    Message(Message),
    ChangeState(RoomStateData),
    ChangeHost(bool),
    CreateRoom(SimpleResponse),
    JoinRoom(JoinRoomResult),
    OnJoinRoom(UserInfo),
    LeaveRoom(SimpleResponse),
    LockRoom(SimpleResponse),
    CycleRoom(SimpleResponse),
    SelectChart(SimpleResponse),
    RequestStart(SimpleResponse),
    Ready(SimpleResponse),
    CancelReady(SimpleResponse),
    Played(SimpleResponse),
    Abort(SimpleResponse),
}

impl Encode for ServerCommand {
    fn encode(&self, buf: &mut impl BufMut) {
        match self {
            ServerCommand::Pong => 0u8.encode(buf),
            ServerCommand::Authenticate(res) => {
                1u8.encode(buf);
                res.encode(buf);
            }
            ServerCommand::Chat(res) => {
                2u8.encode(buf);
                res.encode(buf);
            }
            ServerCommand::Touches { player, frames } => {
                3u8.encode(buf);
                player.encode(buf);
                frames.encode(buf);
            }
            ServerCommand::Judges { player, judges } => {
                4u8.encode(buf);
                player.encode(buf);
                judges.encode(buf);
            }
            ServerCommand::Message(message) => {
                5u8.encode(buf);
                message.encode(buf);
            }
            ServerCommand::ChangeState(state) => {
                6u8.encode(buf);
                state.encode(buf);
            }
            ServerCommand::ChangeHost(is_host) => {
                7u8.encode(buf);
                is_host.encode(buf);
            }
            ServerCommand::CreateRoom(res) => {
                8u8.encode(buf);
                res.encode(buf);
            }
            ServerCommand::JoinRoom(res) => {
                9u8.encode(buf);
                res.encode(buf);
            }
            ServerCommand::OnJoinRoom(user) => {
                10u8.encode(buf);
                user.encode(buf);
            }
            ServerCommand::LeaveRoom(res) => {
                11u8.encode(buf);
                res.encode(buf);
            }
            ServerCommand::LockRoom(res) => {
                12u8.encode(buf);
                res.encode(buf);
            }
            ServerCommand::CycleRoom(res) => {
                13u8.encode(buf);
                res.encode(buf);
            }
            ServerCommand::SelectChart(res) => {
                14u8.encode(buf);
                res.encode(buf);
            }
            ServerCommand::RequestStart(res) => {
                15u8.encode(buf);
                res.encode(buf);
            }
            ServerCommand::Ready(res) => {
                16u8.encode(buf);
                res.encode(buf);
            }
            ServerCommand::CancelReady(res) => {
                17u8.encode(buf);
                res.encode(buf);
            }
            ServerCommand::Played(res) => {
                18u8.encode(buf);
                res.encode(buf);
            }
            ServerCommand::Abort(res) => {
                19u8.encode(buf);
                res.encode(buf);
            }
        }
    }
}

impl Decode for ServerCommand {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        let tag = u8::decode(buf)?;
        Ok(match tag {
            0 => ServerCommand::Pong,
            1 => ServerCommand::Authenticate(AuthenticateResult::decode(buf)?),
            2 => ServerCommand::Chat(SimpleResponse::decode(buf)?),
            3 => ServerCommand::Touches {
                player: UserId::decode(buf)?,
                frames: Vec::decode(buf)?,
            },
            4 => ServerCommand::Judges {
                player: UserId::decode(buf)?,
                judges: Vec::decode(buf)?,
            },
            5 => ServerCommand::Message(Message::decode(buf)?),
            6 => ServerCommand::ChangeState(RoomStateData::decode(buf)?),
            7 => ServerCommand::ChangeHost(bool::decode(buf)?),
            8 => ServerCommand::CreateRoom(SimpleResponse::decode(buf)?),
            9 => ServerCommand::JoinRoom(JoinRoomResult::decode(buf)?),
            10 => ServerCommand::OnJoinRoom(UserInfo::decode(buf)?),
            11 => ServerCommand::LeaveRoom(SimpleResponse::decode(buf)?),
            12 => ServerCommand::LockRoom(SimpleResponse::decode(buf)?),
            13 => ServerCommand::CycleRoom(SimpleResponse::decode(buf)?),
            14 => ServerCommand::SelectChart(SimpleResponse::decode(buf)?),
            15 => ServerCommand::RequestStart(SimpleResponse::decode(buf)?),
            16 => ServerCommand::Ready(SimpleResponse::decode(buf)?),
            17 => ServerCommand::CancelReady(SimpleResponse::decode(buf)?),
            18 => ServerCommand::Played(SimpleResponse::decode(buf)?),
            19 => ServerCommand::Abort(SimpleResponse::decode(buf)?),
            other => return Err(DecodeError::UnknownTag(other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use half::f16;

    fn round_trip_client(cmd: ClientCommand) {
        let mut buf = BytesMut::new();
        cmd.encode(&mut buf);
        let mut frozen = buf.freeze();
        assert_eq!(ClientCommand::decode(&mut frozen).unwrap(), cmd);
    }

    fn round_trip_server(cmd: ServerCommand) {
        let mut buf = BytesMut::new();
        cmd.encode(&mut buf);
        let mut frozen = buf.freeze();
        assert_eq!(ServerCommand::decode(&mut frozen).unwrap(), cmd);
    }

    #[test]
    fn client_commands_round_trip() {
        round_trip_client(ClientCommand::Ping);
        round_trip_client(ClientCommand::Authenticate {
            token: "a".repeat(32),
        });
        round_trip_client(ClientCommand::Chat {
            message: "hi".to_owned(),
        });
        round_trip_client(ClientCommand::Touches {
            frames: vec![TouchFrame {
                time: 1.5,
                points: vec![crate::types::TouchPoint {
                    id: 1,
                    pos: crate::types::CompactPos {
                        x: f16::from_f32(0.1),
                        y: f16::from_f32(0.9),
                    },
                }],
            }],
        });
        round_trip_client(ClientCommand::CreateRoom {
            id: RoomId::new("ROOM1").unwrap(),
        });
        round_trip_client(ClientCommand::JoinRoom {
            id: RoomId::new("ROOM1").unwrap(),
            monitor: true,
        });
        round_trip_client(ClientCommand::LeaveRoom);
        round_trip_client(ClientCommand::SelectChart { id: 42 });
        round_trip_client(ClientCommand::Played { record_id: 7 });
        round_trip_client(ClientCommand::Abort);
    }

    #[test]
    fn server_commands_round_trip() {
        round_trip_server(ServerCommand::Pong);
        round_trip_server(ServerCommand::Authenticate(Ok((
            UserInfo {
                id: 100,
                name: "alice".to_owned(),
                monitor: false,
            },
            None,
        ))));
        round_trip_server(ServerCommand::Authenticate(Err("bad token".to_owned())));
        round_trip_server(ServerCommand::JoinRoom(Ok((
            RoomStateData::SelectChart(Some(42)),
            vec![],
            false,
        ))));
        round_trip_server(ServerCommand::JoinRoom(Err("room does not exist".to_owned())));
        round_trip_server(ServerCommand::ChangeHost(true));
        round_trip_server(ServerCommand::RequestStart(Err(
            "If no one else joins, there is no reason to start.".to_owned(),
        )));
    }

    #[test]
    fn rejects_client_tag_above_15() {
        let mut bytes = bytes::Bytes::from_static(&[16]);
        assert!(matches!(
            ClientCommand::decode(&mut bytes),
            Err(DecodeError::UnknownTag(16))
        ));
    }

    #[test]
    fn rejects_server_tag_above_19() {
        let mut bytes = bytes::Bytes::from_static(&[20]);
        assert!(matches!(
            ServerCommand::decode(&mut bytes),
            Err(DecodeError::UnknownTag(20))
        ));
    }
}
