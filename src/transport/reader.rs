use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tracing::debug;

use crate::error::FrameError;
use crate::transport::packet::{Packet, LENGTH_BYTES, MAX_PACKET_BYTES};

pub struct PacketReader<T>
where
    T: AsyncRead + Unpin + Send,
{
    reader: BufReader<T>,
}

impl<T: AsyncRead + Unpin + Send> PacketReader<T> {
    pub fn new(stream: T) -> Self {
        Self {
            reader: BufReader::new(stream),
        }
    }

    /// Reads the next packet. `Ok(None)` means the peer closed the stream between packets.
    pub async fn read(&mut self) -> Result<Option<Packet>, FrameError> {
        // [length][tag][data]
        let mut length_buffer = [0u8; LENGTH_BYTES];
        match self.reader.read_exact(&mut length_buffer).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                debug!("Connection closed while waiting for a packet");
                return Ok(None);
            }
            Err(e) => return Err(FrameError::Read(e)),
        }

        let expected_length = u32::from_le_bytes(length_buffer) as usize;
        if expected_length > MAX_PACKET_BYTES {
            return Err(FrameError::TooLarge(expected_length));
        }

        let mut body = vec![0u8; expected_length];
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(FrameError::Read)?;
        Packet::try_from(body.as_slice()).map(Some)
    }
}
