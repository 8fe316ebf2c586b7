//! Identifiers used throughout the protocol and the server.

use std::fmt;

use bytes::{Buf, BufMut};

use crate::codec::{Decode, DecodeError, Encode};

/// Assigned by the identity service; never generated locally.
pub type UserId = i32;

/// A 1-20 character room name over `[A-Za-z0-9_-]`.
///
/// Constructed only through [`RoomId::new`], which rejects anything outside
/// that alphabet or length range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(String);

/// A room id did not satisfy the 1-20 character `[A-Za-z0-9_-]` constraint.
#[derive(Debug, thiserror::Error)]
#[error("room id {0:?} must be 1-20 characters of [A-Za-z0-9_-]")]
pub struct InvalidRoomId(pub String);

impl RoomId {
    pub fn new(raw: impl Into<String>) -> Result<Self, InvalidRoomId> {
        let raw = raw.into();
        let valid = (1..=20).contains(&raw.len())
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if valid {
            Ok(Self(raw))
        } else {
            Err(InvalidRoomId(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Encode for RoomId {
    fn encode(&self, buf: &mut impl BufMut) {
        self.0.encode(buf);
    }
}

impl Decode for RoomId {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        let raw = String::decode(buf)?;
        RoomId::new(raw).map_err(|_| DecodeError::InvalidRoomId)
    }
}

/// Server-generated, opaque to clients. 128 bits of randomness minted once
/// per accepted connection, never transmitted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u128);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_room_ids() {
        assert!(RoomId::new("a").is_ok());
        assert!(RoomId::new("ROOM1").is_ok());
        assert!(RoomId::new("room-id_42").is_ok());
        assert!(RoomId::new("a".repeat(20)).is_ok());
    }

    #[test]
    fn rejects_invalid_room_ids() {
        assert!(RoomId::new("").is_err());
        assert!(RoomId::new("a".repeat(21)).is_err());
        assert!(RoomId::new("room id").is_err());
        assert!(RoomId::new("room#1").is_err());
    }
}
