// Frame - Wire format for the TCP router
//
// Every frame is a 4-byte big-endian length followed by a postcard body.
// - Hello: handshake (identity + password digest)
// - Gossip: full-state exchange for one channel
// - Broadcast: incremental delta relayed through the mesh
// - Unicast: delta for one destination peer

use super::{PeerName, SubstrateError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Digest of the shared mesh password, exchanged in Hello
pub fn password_digest(password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"meshcache:password:");
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

/// A message between two routers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    Hello {
        peer: PeerName,
        nickname: String,
        auth: [u8; 32],
    },
    Gossip {
        channel: String,
        payload: Vec<u8>,
    },
    Broadcast {
        channel: String,
        origin: PeerName,
        payload: Vec<u8>,
    },
    Unicast {
        channel: String,
        src: PeerName,
        dst: PeerName,
        payload: Vec<u8>,
    },
}

impl Frame {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "hello",
            Frame::Gossip { .. } => "gossip",
            Frame::Broadcast { .. } => "broadcast",
            Frame::Unicast { .. } => "unicast",
        }
    }

    /// Serialize to bytes (without length prefix)
    pub fn to_bytes(&self) -> Result<Vec<u8>, SubstrateError> {
        postcard::to_allocvec(self).map_err(|e| SubstrateError::ProtocolViolation(e.to_string()))
    }

    /// Deserialize from bytes (without length prefix)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SubstrateError> {
        postcard::from_bytes(bytes).map_err(|e| SubstrateError::ProtocolViolation(e.to_string()))
    }
}

/// Write one length-prefixed frame
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), SubstrateError>
where
    W: AsyncWrite + Unpin,
{
    let body = frame.to_bytes()?;
    let len = u32::try_from(body.len()).map_err(|_| SubstrateError::FrameTooLarge(body.len()))?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame, rejecting bodies over `max_len`
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Frame, SubstrateError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > max_len {
        return Err(SubstrateError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Frame::from_bytes(&body)
}
