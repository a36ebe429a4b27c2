//! Network layer for peer and directory communication
//!
//! Every exchange uses a fresh TCP connection carrying one request frame and
//! at most one response frame. Frames are a 4-byte big-endian length
//! followed by a bincode payload.

pub mod transport;

pub use transport::*;

use std::fmt;
use std::net::SocketAddr;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::p2p::cluster::Membership;
use crate::p2p::{P2PError, P2PResult, PriorityKey};

/// Messages exchanged between nodes and with the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkMessage {
    /// Register with the directory
    Join { key: PriorityKey, address: SocketAddr },
    /// Directory reply to `Join`
    Members(Membership),
    /// Start or contend in an election, carrying the sender's view
    Elect(Membership),
    /// Acknowledgement of `Elect` and `Probe`
    GotIt,
    /// Leader announcement, no reply expected
    IAmLeader(PriorityKey),
    /// Liveness check sent to the believed leader
    Probe,
}

impl NetworkMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            NetworkMessage::Join { .. } => MessageKind::Join,
            NetworkMessage::Members(_) => MessageKind::Members,
            NetworkMessage::Elect(_) => MessageKind::Elect,
            NetworkMessage::GotIt => MessageKind::GotIt,
            NetworkMessage::IAmLeader(_) => MessageKind::IAmLeader,
            NetworkMessage::Probe => MessageKind::Probe,
        }
    }
}

/// Message kind as it appears in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Join,
    Members,
    Elect,
    GotIt,
    IAmLeader,
    Probe,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Join => "JOIN",
            MessageKind::Members => "MEMBERS",
            MessageKind::Elect => "ELECT",
            MessageKind::GotIt => "GOT_IT",
            MessageKind::IAmLeader => "I_AM_LEADER",
            MessageKind::Probe => "PROBE",
        };
        f.write_str(name)
    }
}

/// Protocol for encoding/decoding messages over TCP
pub struct MessageProtocol;

impl MessageProtocol {
    /// Encode a message for network transmission.
    ///
    /// Payloads over `max_size` are refused here, before any peer sees them.
    pub fn encode(message: &NetworkMessage, max_size: usize) -> P2PResult<BytesMut> {
        let serialized = bincode::serialize(message)?;
        let length = u32::try_from(serialized.len())
            .ok()
            .filter(|len| *len as usize <= max_size)
            .ok_or_else(|| {
                P2PError::MalformedMessage(format!(
                    "{} too large to send: {} bytes",
                    message.kind(),
                    serialized.len()
                ))
            })?;

        let mut encoded = BytesMut::with_capacity(4 + serialized.len());
        encoded.put_u32(length);
        encoded.put_slice(&serialized);
        Ok(encoded)
    }

    /// Decode a message payload (without the length prefix)
    pub fn decode(data: &[u8]) -> P2PResult<NetworkMessage> {
        bincode::deserialize(data).map_err(|e| P2PError::MalformedMessage(e.to_string()))
    }

    /// Read one frame.
    ///
    /// `Ok(None)` means the peer closed the connection before sending
    /// anything; a frame cut short or undecodable is `MalformedMessage`.
    pub async fn read_message<R: AsyncReadExt + Unpin>(
        reader: &mut R,
        max_size: usize,
    ) -> P2PResult<Option<NetworkMessage>> {
        let mut length_bytes = [0u8; 4];
        let mut filled = 0;
        while filled < length_bytes.len() {
            let n = reader.read(&mut length_bytes[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(P2PError::MalformedMessage("truncated length prefix".to_string()));
            }
            filled += n;
        }

        let message_length = u32::from_be_bytes(length_bytes) as usize;
        if message_length > max_size {
            return Err(P2PError::MalformedMessage(format!(
                "message too large: {} bytes",
                message_length
            )));
        }

        let mut buffer = BytesMut::zeroed(message_length);
        reader.read_exact(&mut buffer).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => P2PError::MalformedMessage("truncated frame".to_string()),
            _ => P2PError::from(e),
        })?;

        Self::decode(&buffer).map(Some)
    }

    /// Write one frame and flush
    pub async fn write_message<W: AsyncWriteExt + Unpin>(
        writer: &mut W,
        message: &NetworkMessage,
        max_size: usize,
    ) -> P2PResult<()> {
        let encoded = Self::encode(message, max_size)?;
        Self::write_frame(writer, &encoded).await
    }

    /// Write an already encoded frame and flush
    pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, frame: &[u8]) -> P2PResult<()> {
        writer.write_all(frame).await?;
        writer.flush().await?;
        Ok(())
    }
}
