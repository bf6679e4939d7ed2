use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::error::FrameError;
use crate::transport::packet::Packet;

pub struct PacketWriter<T>
where
    T: AsyncWrite + Unpin + Send,
{
    writer: BufWriter<T>,
}

impl<T: AsyncWrite + Unpin + Send> PacketWriter<T> {
    pub fn new(writer: T) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Writes and flushes one packet so small side messages are not held back by buffering.
    pub async fn write(&mut self, packet: &Packet) -> Result<(), FrameError> {
        self.writer
            .write_all(&packet.encode())
            .await
            .map_err(FrameError::Write)?;
        self.writer.flush().await.map_err(FrameError::Write)
    }

    pub async fn shutdown(&mut self) -> Result<(), FrameError> {
        self.writer.shutdown().await.map_err(FrameError::Write)
    }
}
