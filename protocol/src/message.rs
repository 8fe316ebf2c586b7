//! Broadcast notifications: the payload of `ServerCommand::Message`.

use bytes::{Buf, BufMut};

use crate::codec::{Decode, DecodeError, Encode};
use crate::ids::UserId;

/// A notification fanned out to some or all room members. Sub-tags are
/// assigned contiguously from 0, exactly like top-level command tags.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Chat { user: UserId, content: String },
    CreateRoom { user: UserId },
    JoinRoom { user: UserId, name: String },
    LeaveRoom { user: UserId, name: String },
    NewHost { user: UserId },
    SelectChart { user: UserId, name: String, id: i32 },
    GameStart { user: UserId },
    Ready { user: UserId },
    CancelReady { user: UserId },
    CancelGame { user: UserId },
    StartPlaying,
    Played {
        user: UserId,
        score: i32,
        accuracy: f32,
        full_combo: bool,
    },
    GameEnd,
    Abort { user: UserId },
    LockRoom { lock: bool },
    CycleRoom { cycle: bool },
}

impl Encode for Message {
    fn encode(&self, buf: &mut impl BufMut) {
        match self {
            Message::Chat { user, content } => {
                0u8.encode(buf);
                user.encode(buf);
                content.encode(buf);
            }
            Message::CreateRoom { user } => {
                1u8.encode(buf);
                user.encode(buf);
            }
            Message::JoinRoom { user, name } => {
                2u8.encode(buf);
                user.encode(buf);
                name.encode(buf);
            }
            Message::LeaveRoom { user, name } => {
                3u8.encode(buf);
                user.encode(buf);
                name.encode(buf);
            }
            Message::NewHost { user } => {
                4u8.encode(buf);
                user.encode(buf);
            }
            Message::SelectChart { user, name, id } => {
                5u8.encode(buf);
                user.encode(buf);
                name.encode(buf);
                id.encode(buf);
            }
            Message::GameStart { user } => {
                6u8.encode(buf);
                user.encode(buf);
            }
            Message::Ready { user } => {
                7u8.encode(buf);
                user.encode(buf);
            }
            Message::CancelReady { user } => {
                8u8.encode(buf);
                user.encode(buf);
            }
            Message::CancelGame { user } => {
                9u8.encode(buf);
                user.encode(buf);
            }
            Message::StartPlaying => {
                10u8.encode(buf);
            }
            Message::Played {
                user,
                score,
                accuracy,
                full_combo,
            } => {
                11u8.encode(buf);
                user.encode(buf);
                score.encode(buf);
                accuracy.encode(buf);
                full_combo.encode(buf);
            }
            Message::GameEnd => {
                12u8.encode(buf);
            }
            Message::Abort { user } => {
                13u8.encode(buf);
                user.encode(buf);
            }
            Message::LockRoom { lock } => {
                14u8.encode(buf);
                lock.encode(buf);
            }
            Message::CycleRoom { cycle } => {
                15u8.encode(buf);
                cycle.encode(buf);
            }
        }
    }
}

impl Decode for Message {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        let tag = u8::decode(buf)?;
        Ok(match tag {
            0 => Message::Chat {
                user: UserId::decode(buf)?,
                content: String::decode(buf)?,
            },
            1 => Message::CreateRoom {
                user: UserId::decode(buf)?,
            },
            2 => Message::JoinRoom {
                user: UserId::decode(buf)?,
                name: String::decode(buf)?,
            },
            3 => Message::LeaveRoom {
                user: UserId::decode(buf)?,
                name: String::decode(buf)?,
            },
            4 => Message::NewHost {
                user: UserId::decode(buf)?,
            },
            5 => Message::SelectChart {
                user: UserId::decode(buf)?,
                name: String::decode(buf)?,
                id: i32::decode(buf)?,
            },
            6 => Message::GameStart {
                user: UserId::decode(buf)?,
            },
            7 => Message::Ready {
                user: UserId::decode(buf)?,
            },
            8 => Message::CancelReady {
                user: UserId::decode(buf)?,
            },
            9 => Message::CancelGame {
                user: UserId::decode(buf)?,
            },
            10 => Message::StartPlaying,
            11 => Message::Played {
                user: UserId::decode(buf)?,
                score: i32::decode(buf)?,
                accuracy: f32::decode(buf)?,
                full_combo: bool::decode(buf)?,
            },
            12 => Message::GameEnd,
            13 => Message::Abort {
                user: UserId::decode(buf)?,
            },
            14 => Message::LockRoom {
                lock: bool::decode(buf)?,
            },
            15 => Message::CycleRoom {
                cycle: bool::decode(buf)?,
            },
            other => return Err(DecodeError::UnknownTag(other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn round_trip(message: Message) {
        let mut buf = BytesMut::new();
        message.encode(&mut buf);
        let mut frozen = buf.freeze();
        assert_eq!(Message::decode(&mut frozen).unwrap(), message);
    }

    #[test]
    fn every_variant_round_trips() {
        round_trip(Message::Chat {
            user: 101,
            content: "hi".to_owned(),
        });
        round_trip(Message::SelectChart {
            user: 100,
            name: "X".to_owned(),
            id: 42,
        });
        round_trip(Message::StartPlaying);
        round_trip(Message::Played {
            user: 101,
            score: 990000,
            accuracy: 0.998,
            full_combo: true,
        });
        round_trip(Message::GameEnd);
        round_trip(Message::LockRoom { lock: true });
        round_trip(Message::CycleRoom { cycle: false });
    }

    #[test]
    fn rejects_tag_above_15() {
        let mut bytes = bytes::Bytes::from_static(&[16]);
        assert!(matches!(
            Message::decode(&mut bytes),
            Err(DecodeError::UnknownTag(16))
        ));
    }
}
