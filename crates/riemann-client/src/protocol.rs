//! Framing for the collector protocol.
//!
//! Stream transports prefix every encoded [`Msg`] with its length as a
//! 4-byte big-endian integer. Datagram transports send one bare encoded
//! message per packet, capped by the transport's maximum size.

use bytes::{BufMut, Bytes, BytesMut};
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::message::Msg;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest frame accepted in either direction unless configured otherwise.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Largest datagram the UDP transport sends unless configured otherwise.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 16384;

/// Encodes a message as one length-prefixed frame.
pub fn encode_frame(msg: &Msg, max_frame_size: usize) -> Result<Bytes> {
    let len = msg.encoded_len();
    if len > max_frame_size || len > u32::MAX as usize {
        return Err(Error::MessageTooLarge {
            size: len,
            max_size: max_frame_size,
        });
    }
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + len);
    buf.put_u32(len as u32);
    msg.encode(&mut buf)
        .map_err(|e| Error::InvalidFrame {
            reason: e.to_string(),
        })?;
    Ok(buf.freeze())
}

/// Writes one frame and flushes the writer.
pub async fn write_frame<W>(writer: &mut W, msg: &Msg, max_frame_size: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(msg, max_frame_size)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly on a frame
/// boundary; a stream that ends mid-frame is an error.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Msg>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(prefix) as usize;
    if len > max_frame_size {
        return Err(Error::InvalidFrame {
            reason: format!("frame of {} bytes exceeds limit of {}", len, max_frame_size),
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    let msg = Msg::decode(payload.as_slice())?;
    Ok(Some(msg))
}

/// Encodes a message for a single datagram, refusing anything over `max_size`.
pub fn encode_datagram(msg: &Msg, max_size: usize) -> Result<Vec<u8>> {
    let len = msg.encoded_len();
    if len > max_size {
        return Err(Error::MessageTooLarge {
            size: len,
            max_size,
        });
    }
    Ok(msg.encode_to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Event;

    fn sample() -> Msg {
        Msg::with_events(vec![Event {
            service: Some("disk".into()),
            metric_d: Some(0.5),
            ..Default::default()
        }])
    }

    #[test]
    fn test_frame_prefix_is_big_endian_length() {
        let msg = sample();
        let frame = encode_frame(&msg, DEFAULT_MAX_FRAME_SIZE).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, msg.encoded_len());
        assert_eq!(frame.len(), LENGTH_PREFIX_SIZE + len);
    }

    #[test]
    fn test_frame_over_limit_rejected() {
        let err = encode_frame(&sample(), 2).unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge { max_size: 2, .. }));
    }

    #[tokio::test]
    async fn test_write_then_read_frames() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let msg = sample();
        write_frame(&mut client, &msg, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        write_frame(&mut client, &Msg::ack(), DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        drop(client);

        let first = read_frame(&mut server, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(first, Some(msg));
        let second = read_frame(&mut server, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(second, Some(Msg::ack()));
        let end = read_frame(&mut server, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn test_truncated_frame_is_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0, 0, 10, 1, 2]).await.unwrap();
        drop(client);
        assert!(read_frame(&mut server, DEFAULT_MAX_FRAME_SIZE).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_incoming_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0, 1, 0]).await.unwrap();
        let err = read_frame(&mut server, 16).await.unwrap_err();
        assert!(matches!(err, Error::InvalidFrame { .. }));
    }

    #[test]
    fn test_datagram_size_cap() {
        let msg = sample();
        assert!(encode_datagram(&msg, DEFAULT_MAX_DATAGRAM_SIZE).is_ok());
        let err = encode_datagram(&msg, 1).unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge { .. }));
    }
}
