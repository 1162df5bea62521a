use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a frame body; anything larger is treated as a corrupt stream.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Frame type tag of the heartbeat transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Heartbeat = 1,
    Response = 2,
}

impl TryFrom<u8> for FrameType {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(FrameType::Heartbeat),
            2 => Ok(FrameType::Response),
            other => Err(anyhow!("unknown frame type: {}", other)),
        }
    }
}

/// Wire frame: `[len:u32][type:u8][payload:bytes]`, payload is bincode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new<T: Serialize>(frame_type: FrameType, message: &T) -> Result<Self> {
        Ok(Self {
            frame_type,
            payload: bincode::serialize(message).context("serialize frame payload failed")?,
        })
    }

    /// Decode the payload, checking the frame carries the expected type.
    pub fn message<T: DeserializeOwned>(&self, expected: FrameType) -> Result<T> {
        if self.frame_type != expected {
            return Err(anyhow!(
                "expected {:?} frame, got {:?}",
                expected,
                self.frame_type
            ));
        }
        bincode::deserialize(&self.payload).context("deserialize frame payload failed")
    }

    pub fn encode(&self) -> Vec<u8> {
        let body_len = 1 + self.payload.len();
        let mut out = Vec::with_capacity(4 + body_len);
        out.extend_from_slice(&(body_len as u32).to_be_bytes());
        out.push(self.frame_type as u8);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let (&tag, payload) = body
            .split_first()
            .ok_or_else(|| anyhow!("empty frame body"))?;
        Ok(Self {
            frame_type: FrameType::try_from(tag)?,
            payload: payload.to_vec(),
        })
    }
}

pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let body_len = u32::from_be_bytes(len_buf) as usize;
    if body_len > MAX_FRAME_LEN {
        return Err(anyhow!("frame of {} bytes exceeds limit", body_len));
    }
    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body).await?;
    Frame::decode(&body)
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/frame_tests.rs"]
mod tests;
