//! Length-prefixed frame I/O: the async counterpart to
//! [`protocol::decode_varint`]/[`protocol::encode_varint`], which operate on
//! already-buffered bytes. This module is the only place that reads a
//! varint directly off the socket, one byte at a time, because only here do
//! we not yet know how many bytes to expect.

use bytes::{BufMut, Bytes, BytesMut};
use protocol::MAX_PAYLOAD_LEN;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame-transport errors: every variant here tears the connection down.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("peer closed the connection")]
    Eof,
    #[error("frame length used more than 5 varint bytes")]
    MalformedLength,
    #[error("frame of {0} bytes exceeds the {MAX_PAYLOAD_LEN} byte limit")]
    Oversized(usize),
}

/// Reads one length-prefixed frame's payload. Reads the length one byte at
/// a time (at most 5); a 6th continuation byte is [`FrameError::MalformedLength`].
/// A declared length over [`MAX_PAYLOAD_LEN`] is [`FrameError::Oversized`] and
/// the payload is never read.
pub async fn read_frame(reader: &mut (impl AsyncRead + Unpin)) -> Result<Bytes, FrameError> {
    let len = read_varint_len(reader).await?;
    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::Oversized(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::Eof
        } else {
            FrameError::Io(e)
        }
    })?;
    Ok(Bytes::from(payload))
}

async fn read_varint_len(reader: &mut (impl AsyncRead + Unpin)) -> Result<usize, FrameError> {
    let mut result: u32 = 0;
    let mut shift = 0u32;
    for _ in 0..protocol::MAX_VARINT_BYTES {
        let mut byte = [0u8; 1];
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            return Err(FrameError::Eof);
        }
        let byte = byte[0];
        result |= ((byte & 0x7f) as u32) << shift;
        if byte & 0x80 == 0 {
            return Ok(result as usize);
        }
        shift += 7;
    }
    Err(FrameError::MalformedLength)
}

/// Writes one length-prefixed frame and flushes.
pub async fn write_frame(
    writer: &mut (impl AsyncWrite + Unpin),
    payload: &[u8],
) -> Result<(), FrameError> {
    let mut framed = BytesMut::with_capacity(protocol::MAX_VARINT_BYTES + payload.len());
    protocol::encode_varint(&mut framed, payload.len() as u32);
    framed.put_slice(payload);
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn concatenated_frames_decode_independently_of_chunking() {
        let mut raw = BytesMut::new();
        for payload in [b"abc".as_slice(), b"", b"hello world"] {
            protocol::encode_varint(&mut raw, payload.len() as u32);
            raw.put_slice(payload);
        }

        // Simulate an arbitrary split across `read` calls by wrapping a
        // cursor that returns data one byte at a time.
        struct OneByteAtATime(Cursor<Vec<u8>>);
        impl AsyncRead for OneByteAtATime {
            fn poll_read(
                mut self: std::pin::Pin<&mut Self>,
                cx: &mut std::task::Context<'_>,
                buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                let mut one = [0u8; 1];
                let mut tmp = tokio::io::ReadBuf::new(&mut one);
                match std::pin::Pin::new(&mut self.0).poll_read(cx, &mut tmp) {
                    std::task::Poll::Ready(Ok(())) => {
                        if tmp.filled().len() == 1 {
                            buf.put_slice(tmp.filled());
                        }
                        std::task::Poll::Ready(Ok(()))
                    }
                    other => other,
                }
            }
        }

        let mut reader = OneByteAtATime(Cursor::new(raw.to_vec()));
        let a = read_frame(&mut reader).await.unwrap();
        let b = read_frame(&mut reader).await.unwrap();
        let c = read_frame(&mut reader).await.unwrap();
        assert_eq!(&a[..], b"abc");
        assert_eq!(&b[..], b"");
        assert_eq!(&c[..], b"hello world");
    }

    #[tokio::test]
    async fn oversized_length_is_rejected_without_reading_payload() {
        let mut raw = BytesMut::new();
        protocol::encode_varint(&mut raw, (3 * 1024 * 1024) as u32);
        let mut reader = Cursor::new(raw.to_vec());
        let result = read_frame(&mut reader).await;
        assert!(matches!(result, Err(FrameError::Oversized(_))));
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"payload").await.unwrap();
        let mut cursor = Cursor::new(buf);
        let frame = read_frame(&mut cursor).await.unwrap();
        assert_eq!(&frame[..], b"payload");
    }
}
