//! Length-delimited packet framing over a reliable byte stream.
//!
//! Every frame is a 4-byte big-endian payload length followed by the
//! bincode-encoded [`Packet`]. The length guard keeps a corrupt or hostile
//! prefix from driving an unbounded allocation.

use crate::Packet;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame's payload. Generous: the largest real
/// message is a `GameOver` carrying one username per player.
pub const MAX_FRAME_LEN: u32 = 64 * 1024;

#[derive(Debug)]
pub enum WireError {
    /// The stream itself failed; the connection is done.
    Io(std::io::Error),
    /// The payload did not decode as a `Packet`. The frame boundary was
    /// intact, so the stream stays usable.
    Decode(bincode::Error),
    /// The length prefix exceeded `MAX_FRAME_LEN`; there is no way to
    /// resynchronize, so the connection is done.
    FrameTooLarge(u32),
}

impl WireError {
    /// True when only the offending frame is lost and the stream can keep
    /// being read.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, WireError::Decode(_))
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Io(e) => write!(f, "stream error: {}", e),
            WireError::Decode(e) => write!(f, "malformed packet payload: {}", e),
            WireError::FrameTooLarge(len) => {
                write!(f, "frame of {} bytes exceeds limit of {}", len, MAX_FRAME_LEN)
            }
        }
    }
}

impl std::error::Error for WireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WireError::Io(e) => Some(e),
            WireError::Decode(e) => Some(e),
            WireError::FrameTooLarge(_) => None,
        }
    }
}

impl From<std::io::Error> for WireError {
    fn from(e: std::io::Error) -> Self {
        WireError::Io(e)
    }
}

impl From<bincode::Error> for WireError {
    fn from(e: bincode::Error) -> Self {
        WireError::Decode(e)
    }
}

/// Serializes `packet` and writes it as one frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    packet: &Packet,
) -> Result<(), WireError> {
    let payload = bincode::serialize(packet)?;
    if payload.len() > MAX_FRAME_LEN as usize {
        return Err(WireError::FrameTooLarge(payload.len() as u32));
    }

    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame and decodes its payload.
///
/// An `Io` error (including `UnexpectedEof` on a half-read frame) means the
/// peer is gone; a `Decode` error consumes exactly the bad frame.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet, WireError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;

    Ok(bincode::deserialize(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vec2;
    use std::io::Cursor;

    #[tokio::test]
    async fn roundtrip_over_a_buffer() {
        let packet = Packet::UpdatePosition {
            username: "niki".to_string(),
            position: Vec2::new(512.0, 97.5),
            heading: 270.0,
        };

        let mut buf = Cursor::new(Vec::new());
        write_frame(&mut buf, &packet).await.unwrap();

        let mut cursor = Cursor::new(buf.into_inner());
        let decoded = read_frame(&mut cursor).await.unwrap();
        assert_eq!(decoded, packet);
    }

    #[tokio::test]
    async fn frames_read_back_in_sequence() {
        let packets = vec![
            Packet::FirstConnection {
                username: "niki".to_string(),
            },
            Packet::StartGame,
            Packet::LapCompleted,
        ];

        let mut buf = Cursor::new(Vec::new());
        for packet in &packets {
            write_frame(&mut buf, packet).await.unwrap();
        }

        let mut cursor = Cursor::new(buf.into_inner());
        for expected in &packets {
            let decoded = read_frame(&mut cursor).await.unwrap();
            assert_eq!(&decoded, expected);
        }
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let mut bytes = (MAX_FRAME_LEN + 1).to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 16]);

        let mut cursor = Cursor::new(bytes);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge(_)));
        assert!(!err.is_frame_local());
    }

    #[tokio::test]
    async fn truncated_frame_is_an_io_error() {
        let packet = Packet::StartGame;
        let mut buf = Cursor::new(Vec::new());
        write_frame(&mut buf, &packet).await.unwrap();

        let mut bytes = buf.into_inner();
        bytes.truncate(bytes.len() - 1);

        let mut cursor = Cursor::new(bytes);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, WireError::Io(_)));
    }

    #[tokio::test]
    async fn garbage_payload_is_a_frame_local_decode_error() {
        // A well-formed prefix around a payload that is not a Packet.
        let garbage = [0xFFu8; 8];
        let mut bytes = (garbage.len() as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(&garbage);
        // A valid frame after the bad one must still be readable.
        let mut buf = Cursor::new(Vec::new());
        write_frame(&mut buf, &Packet::StartGame).await.unwrap();
        bytes.extend_from_slice(&buf.into_inner());

        let mut cursor = Cursor::new(bytes);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(err.is_frame_local());

        let decoded = read_frame(&mut cursor).await.unwrap();
        assert_eq!(decoded, Packet::StartGame);
    }
}
