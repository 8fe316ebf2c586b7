//! Variable-length unsigned integer encoding used for frame lengths and for
//! every length-prefixed string/sequence/optional in the wire protocol.
//!
//! Groups of 7 bits, least-significant group first, high bit set on every
//! byte but the last. A value must always be encoded with the minimal
//! number of groups; decoding a longer-than-necessary encoding is rejected.

use bytes::{Buf, BufMut};

use crate::codec::DecodeError;

/// No varint we ever encode needs more than five 7-bit groups (35 bits of
/// payload covers every `u32`).
pub const MAX_VARINT_BYTES: usize = 5;

/// Encodes `value` as a canonical variable-length integer.
pub fn encode_varint(buf: &mut impl BufMut, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

/// Decodes a canonical variable-length integer, advancing `buf` past it.
pub fn decode_varint(buf: &mut impl Buf) -> Result<u32, DecodeError> {
    let mut result: u32 = 0;
    let mut shift: u32 = 0;
    let mut bytes_read = 0usize;

    loop {
        if bytes_read >= MAX_VARINT_BYTES {
            return Err(DecodeError::VarIntTooLong);
        }
        if !buf.has_remaining() {
            return Err(DecodeError::Truncated);
        }
        let byte = buf.get_u8();
        bytes_read += 1;
        result |= ((byte & 0x7f) as u32) << shift;
        if byte & 0x80 == 0 {
            if bytes_read > minimal_varint_len(result) {
                return Err(DecodeError::NonCanonicalVarInt);
            }
            return Ok(result);
        }
        shift += 7;
    }
}

/// The number of 7-bit groups a canonical encoding of `value` must use.
fn minimal_varint_len(value: u32) -> usize {
    match value {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x1f_ffff => 3,
        0x20_0000..=0xfff_ffff => 4,
        _ => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn round_trip(value: u32) {
        let mut buf = BytesMut::new();
        encode_varint(&mut buf, value);
        let mut frozen = buf.freeze();
        let decoded = decode_varint(&mut frozen).unwrap();
        assert_eq!(decoded, value);
        assert!(!frozen.has_remaining());
    }

    #[test]
    fn round_trips_representative_values() {
        for v in [0u32, 1, 127, 128, 300, 16384, 2_097_151, 2_097_152, u32::MAX] {
            round_trip(v);
        }
    }

    #[test]
    fn uses_minimal_encoding() {
        let mut buf = BytesMut::new();
        encode_varint(&mut buf, 300);
        assert_eq!(buf.len(), 2);

        let mut buf = BytesMut::new();
        encode_varint(&mut buf, 0);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn rejects_non_canonical_form() {
        // 0x00 with continuation bit set, followed by a terminating 0x00:
        // decodes to 0 but uses two bytes where one suffices.
        let mut bytes = bytes::Bytes::from_static(&[0x80, 0x00]);
        assert!(matches!(
            decode_varint(&mut bytes),
            Err(DecodeError::NonCanonicalVarInt)
        ));
    }

    #[test]
    fn rejects_sixth_continuation_byte() {
        let mut bytes = bytes::Bytes::from_static(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x00]);
        assert!(matches!(
            decode_varint(&mut bytes),
            Err(DecodeError::VarIntTooLong)
        ));
    }

    #[test]
    fn rejects_truncated_varint() {
        let mut bytes = bytes::Bytes::from_static(&[0x80]);
        assert!(matches!(
            decode_varint(&mut bytes),
            Err(DecodeError::Truncated)
        ));
    }
}
