//! The wire protocol shared between the session server and its clients.
//!
//! This crate owns the tagged command unions, their primitive encodings and
//! the variable-length integer scheme used for frame lengths and
//! length-prefixed strings/sequences. It is deliberately free of any I/O: the
//! session server reads a frame's bytes off the socket and hands them here to
//! decode, and encodes outgoing commands here before writing the frame.

mod codec;
mod command;
mod ids;
mod message;
mod types;
mod varint;

pub use codec::{Decode, DecodeError, Encode, MAX_PAYLOAD_LEN};
pub use command::{
    AuthenticateResult, ClientCommand, JoinRoomResult, ServerCommand, SimpleResponse,
};
pub use ids::{InvalidRoomId, RoomId, SessionId, UserId};
pub use message::Message;
pub use types::{
    ChartInfo, ClientRoomState, CompactPos, JudgeEvent, RecordInfo, RoomState, RoomStateData,
    TouchFrame, TouchPoint, UserInfo,
};
pub use varint::{decode_varint, encode_varint, MAX_VARINT_BYTES};

/// The current server protocol version, exchanged as the first byte on
/// either side of a freshly accepted connection.
pub const PROTOCOL_VERSION: u8 = 0;

/// Exact length an `Authenticate` token must have; other lengths are
/// rejected before any upstream identity call is made.
pub const AUTH_TOKEN_LEN: usize = 32;

/// Maximum length of a `Chat` message.
pub const MAX_CHAT_LEN: usize = 200;
