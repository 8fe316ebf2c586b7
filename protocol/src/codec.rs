//! Primitive encoders/decoders shared by every message in the wire protocol.
//!
//! Fixed-width integers are little-endian. Strings and sequences are
//! varint-length-prefixed. Optionals are a `bool` discriminant followed by
//! the value when present.

use bytes::{Buf, BufMut};
use half::f16;

use crate::varint::{decode_varint, encode_varint};

/// Payloads above this size are rejected at the frame layer and the
/// connection is torn down without attempting to read the payload.
pub const MAX_PAYLOAD_LEN: usize = 2 * 1024 * 1024;

/// Everything that can go wrong decoding a value out of an in-memory buffer.
///
/// `Truncated`/`VarIntTooLong`/`NonCanonicalVarInt` on a frame *length* are
/// frame-transport errors (the connection is torn down); every other variant,
/// encountered while decoding an already fully-buffered payload, is a
/// frame-local decode error (the frame is logged and discarded, the
/// connection continues).
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("buffer ended before value was fully read")]
    Truncated,
    #[error("variable-length integer used more than 5 bytes")]
    VarIntTooLong,
    #[error("variable-length integer was not in canonical (minimal) form")]
    NonCanonicalVarInt,
    #[error("boolean byte was neither 0x00 nor 0x01")]
    InvalidBool(u8),
    #[error("string was not valid UTF-8")]
    InvalidUtf8,
    #[error("room id was not 1-20 characters of [A-Za-z0-9_-]")]
    InvalidRoomId,
    #[error("command tag {0} is out of range")]
    UnknownTag(u8),
    #[error("payload of {0} bytes exceeds the maximum of {max}", max = MAX_PAYLOAD_LEN)]
    PayloadTooLarge(usize),
}

/// A type that can be serialized into the wire format.
pub trait Encode {
    fn encode(&self, buf: &mut impl BufMut);
}

/// A type that can be parsed out of the wire format.
pub trait Decode: Sized {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError>;
}

macro_rules! impl_fixed_width {
    ($ty:ty, $put:ident, $get:ident) => {
        impl Encode for $ty {
            fn encode(&self, buf: &mut impl BufMut) {
                buf.$put(*self);
            }
        }

        impl Decode for $ty {
            fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
                let needed = std::mem::size_of::<$ty>();
                if buf.remaining() < needed {
                    return Err(DecodeError::Truncated);
                }
                Ok(buf.$get())
            }
        }
    };
}

impl_fixed_width!(u16, put_u16_le, get_u16_le);
impl_fixed_width!(u32, put_u32_le, get_u32_le);
impl_fixed_width!(u64, put_u64_le, get_u64_le);
impl_fixed_width!(i8, put_i8, get_i8);
impl_fixed_width!(i32, put_i32_le, get_i32_le);
impl_fixed_width!(i64, put_i64_le, get_i64_le);
impl_fixed_width!(f32, put_f32_le, get_f32_le);

impl Encode for u8 {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(*self);
    }
}

impl Decode for u8 {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        if !buf.has_remaining() {
            return Err(DecodeError::Truncated);
        }
        Ok(buf.get_u8())
    }
}

impl Encode for bool {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(if *self { 0x01 } else { 0x00 });
    }
}

impl Decode for bool {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        let byte = u8::decode(buf)?;
        match byte {
            0x00 => Ok(false),
            0x01 => Ok(true),
            other => Err(DecodeError::InvalidBool(other)),
        }
    }
}

impl Encode for f16 {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(self.to_bits());
    }
}

impl Decode for f16 {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        let bits = u16::decode(buf)?;
        Ok(f16::from_bits(bits))
    }
}

impl Encode for String {
    fn encode(&self, buf: &mut impl BufMut) {
        encode_varint(buf, self.len() as u32);
        buf.put_slice(self.as_bytes());
    }
}

impl Decode for String {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        let len = decode_varint(buf)? as usize;
        if buf.remaining() < len {
            return Err(DecodeError::Truncated);
        }
        let mut raw = vec![0u8; len];
        buf.copy_to_slice(&mut raw);
        String::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8)
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, buf: &mut impl BufMut) {
        encode_varint(buf, self.len() as u32);
        for item in self {
            item.encode(buf);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        let len = decode_varint(buf)? as usize;
        let mut items = Vec::with_capacity(len.min(1 << 16));
        for _ in 0..len {
            items.push(T::decode(buf)?);
        }
        Ok(items)
    }
}

impl Encode for () {
    fn encode(&self, _buf: &mut impl BufMut) {}
}

impl Decode for () {
    fn decode(_buf: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(())
    }
}

/// Every `*ResponseCommand` is `{success: bool, error?: string}` on failure,
/// or `{success: true, T}` on success, per spec.md §6 — modelled directly as
/// `Result<T, String>` so both the uniform `{success,error}` shape (`T = ()`)
/// and the two payload-carrying responses (`AuthenticateResponse`,
/// `JoinRoomResponse`) share one encoding.
impl<T: Encode> Encode for Result<T, String> {
    fn encode(&self, buf: &mut impl BufMut) {
        match self {
            Ok(value) => {
                true.encode(buf);
                value.encode(buf);
            }
            Err(error) => {
                false.encode(buf);
                error.encode(buf);
            }
        }
    }
}

impl<T: Decode> Decode for Result<T, String> {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        if bool::decode(buf)? {
            Ok(Ok(T::decode(buf)?))
        } else {
            Ok(Err(String::decode(buf)?))
        }
    }
}

impl<A: Encode, B: Encode> Encode for (A, B) {
    fn encode(&self, buf: &mut impl BufMut) {
        self.0.encode(buf);
        self.1.encode(buf);
    }
}

impl<A: Decode, B: Decode> Decode for (A, B) {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        let a = A::decode(buf)?;
        let b = B::decode(buf)?;
        Ok((a, b))
    }
}

impl<A: Encode, B: Encode, C: Encode> Encode for (A, B, C) {
    fn encode(&self, buf: &mut impl BufMut) {
        self.0.encode(buf);
        self.1.encode(buf);
        self.2.encode(buf);
    }
}

impl<A: Decode, B: Decode, C: Decode> Decode for (A, B, C) {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        let a = A::decode(buf)?;
        let b = B::decode(buf)?;
        let c = C::decode(buf)?;
        Ok((a, b, c))
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, buf: &mut impl BufMut) {
        match self {
            Some(value) => {
                true.encode(buf);
                value.encode(buf);
            }
            None => false.encode(buf),
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        if bool::decode(buf)? {
            Ok(Some(T::decode(buf)?))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};

    fn round_trip<T: Encode + Decode + PartialEq + std::fmt::Debug>(value: T) {
        let mut buf = BytesMut::new();
        value.encode(&mut buf);
        let mut frozen: Bytes = buf.freeze();
        let decoded = T::decode(&mut frozen).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn primitives_round_trip() {
        round_trip(42u8);
        round_trip(-7i8);
        round_trip(65000u16);
        round_trip(3_000_000_000u32);
        round_trip(-123_456i32);
        round_trip(true);
        round_trip(false);
        round_trip(1.5f32);
        round_trip(f16::from_f32(0.5));
    }

    #[test]
    fn strings_preserve_utf8() {
        round_trip("hello".to_owned());
        round_trip("こんにちは".to_owned());
        round_trip(String::new());
    }

    #[test]
    fn rejects_invalid_bool_byte() {
        let mut bytes = Bytes::from_static(&[0x02]);
        assert!(matches!(
            bool::decode(&mut bytes),
            Err(DecodeError::InvalidBool(0x02))
        ));
    }

    #[test]
    fn sequences_and_optionals_round_trip() {
        round_trip(vec![1i32, 2, 3]);
        round_trip(Vec::<i32>::new());
        round_trip(Some(5i32));
        round_trip(None::<i32>);
    }
}
