use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::common::Frame;
use crate::error::{AppError, FrameError};
use crate::transport::packet::Packet;
use crate::transport::reader::PacketReader;
use crate::transport::writer::PacketWriter;

pub const PROTOCOL_VERSION: u32 = 1;

const FRAME_QUEUE: usize = 4;
const SIDE_QUEUE: usize = 64;
const OUTGOING_QUEUE: usize = 16;

/// Receiving half for decoded frames, in arrival order.
pub struct FrameReceiver {
    rx: mpsc::Receiver<Frame>,
}

impl FrameReceiver {
    /// Returns `None` at end of stream.
    pub async fn pull_frame(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Packet>,
}

impl FrameSender {
    /// Waits for room in the outgoing queue, which paces the producer to the transport.
    pub async fn push_frame(&self, frame: &Frame) -> Result<(), AppError> {
        self.tx
            .send(Packet::from(frame))
            .await
            .map_err(|_| AppError::SessionClosed("outgoing frame queue closed".to_string()))
    }
}

/// Sending half of the side channel. Cheap to clone.
#[derive(Clone)]
pub struct SideSender {
    tx: mpsc::Sender<Packet>,
}

impl SideSender {
    pub(crate) fn new(tx: mpsc::Sender<Packet>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, bytes: Vec<u8>) -> Result<(), AppError> {
        self.tx
            .send(Packet::Message(bytes))
            .await
            .map_err(|_| AppError::SessionClosed("side channel closed".to_string()))
    }

    /// Like `send`, but gives up with `AppError::SendTimeout` if the outgoing queue stays
    /// full for `timeout`. A closed channel fails immediately.
    pub async fn send_within(&self, bytes: Vec<u8>, timeout: Duration) -> Result<(), AppError> {
        self.tx
            .send_timeout(Packet::Message(bytes), timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => AppError::SendTimeout(timeout),
                SendTimeoutError::Closed(_) => {
                    AppError::SessionClosed("side channel closed".to_string())
                }
            })
    }
}

pub struct SideReceiver {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl SideReceiver {
    /// Returns `None` once the peer is gone.
    pub async fn receive(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

/// A point-to-point media session: an ordered frame stream plus a small-message side channel.
///
/// The halves are public fields so a caller can wait on frames and side messages in one
/// `select!` while handing the side sender to another task.
pub struct MediaSession {
    pub id: Uuid,
    pub frames: FrameReceiver,
    pub outbound: FrameSender,
    pub side_tx: SideSender,
    pub side_rx: SideReceiver,
    fault: Arc<Mutex<Option<FrameError>>>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<Result<(), FrameError>>,
}

impl MediaSession {
    /// Runs a session over an already established byte stream.
    pub fn from_stream<R, W>(id: Uuid, read: R, write: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::start(id, PacketReader::new(read), PacketWriter::new(write))
    }

    /// Two connected in-memory sessions, producer side first.
    pub fn pair(buffer: usize) -> (Self, Self) {
        let id = Uuid::new_v4();
        let (a, b) = tokio::io::duplex(buffer);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        (
            Self::from_stream(id, a_read, a_write),
            Self::from_stream(id, b_read, b_write),
        )
    }

    /// Accepts a single peer and waits for its handshake.
    pub async fn listen(address: &str) -> Result<Self, AppError> {
        info!("Waiting for a consumer on {}", address);
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| AppError::Bind(e, address.to_string()))?;
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| AppError::Connect(e, address.to_string()))?;
        debug!("Peer connected from {:?}", peer);
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Could not disable Nagle on {:?}: {}", peer, e);
        }

        let (stream_rx, stream_tx) = stream.into_split();
        let mut reader = PacketReader::new(stream_rx);
        let mut writer = PacketWriter::new(stream_tx);
        let session_id = match reader.read().await? {
            Some(Packet::Handshake {
                session_id,
                version,
            }) if version == PROTOCOL_VERSION => session_id,
            other => {
                return Err(AppError::Handshake(format!(
                    "expected handshake version {}, got {:?}",
                    PROTOCOL_VERSION, other
                )))
            }
        };
        writer
            .write(&Packet::Handshake {
                session_id,
                version: PROTOCOL_VERSION,
            })
            .await?;
        info!("Session {} established with {:?}", session_id, peer);
        Ok(Self::start(session_id, reader, writer))
    }

    pub async fn connect(address: &str) -> Result<Self, AppError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| AppError::Connect(e, address.to_string()))?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Could not disable Nagle on {}: {}", address, e);
        }

        let (stream_rx, stream_tx) = stream.into_split();
        let mut reader = PacketReader::new(stream_rx);
        let mut writer = PacketWriter::new(stream_tx);
        let session_id = Uuid::new_v4();
        writer
            .write(&Packet::Handshake {
                session_id,
                version: PROTOCOL_VERSION,
            })
            .await?;
        match reader.read().await? {
            Some(Packet::Handshake { session_id: id, .. }) if id == session_id => {}
            other => {
                return Err(AppError::Handshake(format!(
                    "peer did not confirm session {}: {:?}",
                    session_id, other
                )))
            }
        }
        info!("Session {} established with {}", session_id, address);
        Ok(Self::start(session_id, reader, writer))
    }

    fn start<R, W>(id: Uuid, mut reader: PacketReader<R>, mut writer: PacketWriter<W>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (frame_tx, frame_rx) = mpsc::channel::<Frame>(FRAME_QUEUE);
        let (side_in_tx, side_in_rx) = mpsc::channel::<Vec<u8>>(SIDE_QUEUE);
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Packet>(OUTGOING_QUEUE);
        let fault = Arc::new(Mutex::new(None));

        let reader_fault = Arc::clone(&fault);
        let reader_task = tokio::spawn(async move {
            loop {
                let packet = match reader.read().await {
                    Ok(Some(packet)) => packet,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Session {} read failed: {}", id, e);
                        // Recorded before the queues close so readers of `None` can see it.
                        *reader_fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                        break;
                    }
                };
                match packet {
                    Packet::Image { .. } => match packet.into_frame() {
                        Ok(Some(frame)) => {
                            if frame_tx.send(frame).await.is_err() {
                                debug!("Session {} frame receiver dropped", id);
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Session {} skipping malformed frame: {}", id, e),
                    },
                    Packet::Message(bytes) => {
                        if side_in_tx.send(bytes).await.is_err() {
                            debug!("Session {} side receiver dropped", id);
                        }
                    }
                    Packet::Handshake { .. } => {
                        debug!("Session {} ignoring repeated handshake", id);
                    }
                    Packet::Shutdown => {
                        info!("Session {} closed by peer", id);
                        break;
                    }
                }
            }
            debug!("Session {} reader finished", id);
        });

        let writer_task = tokio::spawn(async move {
            while let Some(packet) = outgoing_rx.recv().await {
                let closing = matches!(packet, Packet::Shutdown);
                if let Err(e) = writer.write(&packet).await {
                    error!("Session {} write failed: {}", id, e);
                    return Err(e);
                }
                if closing {
                    break;
                }
            }
            debug!("Session {} writer finished", id);
            writer.shutdown().await
        });

        Self {
            id,
            frames: FrameReceiver { rx: frame_rx },
            outbound: FrameSender {
                tx: outgoing_tx.clone(),
            },
            side_tx: SideSender::new(outgoing_tx),
            side_rx: SideReceiver { rx: side_in_rx },
            fault,
            reader_task,
            writer_task,
        }
    }

    /// Why the incoming stream stopped, if it was not a clean end. Check it after
    /// `pull_frame` or `receive` returns `None`.
    pub fn take_fault(&self) -> Option<FrameError> {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Tells the peer we are leaving and waits up to `timeout` for the writer to drain.
    pub async fn close(self, timeout: Duration) {
        let MediaSession {
            id,
            outbound,
            side_tx,
            reader_task,
            writer_task,
            ..
        } = self;
        if outbound.tx.send(Packet::Shutdown).await.is_err() {
            debug!("Session {} writer already gone", id);
        }
        drop(outbound);
        drop(side_tx);
        match tokio::time::timeout(timeout, writer_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => debug!("Session {} writer ended with {}", id, e),
            Ok(Err(e)) => error!("Session {} writer task failed: {}", id, e),
            Err(_) => warn!("Session {} writer did not drain within {:?}", id, timeout),
        }
        reader_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use image::{Rgb, RgbImage};

    fn frame(sequence_id: u64) -> Frame {
        Frame::new(sequence_id, RgbImage::from_pixel(4, 4, Rgb([1, 1, 1])), Utc::now())
    }

    #[tokio::test]
    async fn frames_arrive_in_push_order() {
        let (producer, mut consumer) = MediaSession::pair(64 * 1024);
        for id in 0..10 {
            producer.outbound.push_frame(&frame(id)).await.unwrap();
        }
        for id in 0..10 {
            let received = consumer.frames.pull_frame().await.unwrap();
            assert_eq!(received.sequence_id(), id);
        }
    }

    #[tokio::test]
    async fn side_channel_is_bidirectional() {
        let (mut producer, mut consumer) = MediaSession::pair(4096);
        consumer.side_tx.send(b"ping".to_vec()).await.unwrap();
        assert_eq!(producer.side_rx.receive().await.unwrap(), b"ping".to_vec());
        producer.side_tx.send(b"pong".to_vec()).await.unwrap();
        assert_eq!(consumer.side_rx.receive().await.unwrap(), b"pong".to_vec());
    }

    #[tokio::test]
    async fn close_ends_the_peer_stream() {
        let (producer, mut consumer) = MediaSession::pair(4096);
        producer.outbound.push_frame(&frame(0)).await.unwrap();
        producer.close(Duration::from_secs(1)).await;
        assert_eq!(consumer.frames.pull_frame().await.unwrap().sequence_id(), 0);
        assert!(consumer.frames.pull_frame().await.is_none());
        assert!(consumer.side_rx.receive().await.is_none());
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let (producer, mut consumer) = MediaSession::pair(4096);
        producer
            .side_tx
            .tx
            .send(Packet::Image {
                sequence_id: 0,
                capture_ms: 0,
                width: 10,
                height: 10,
                pixels: vec![0; 3],
            })
            .await
            .unwrap();
        producer.outbound.push_frame(&frame(1)).await.unwrap();
        assert_eq!(consumer.frames.pull_frame().await.unwrap().sequence_id(), 1);
    }

    #[tokio::test]
    async fn framing_error_is_kept_as_the_fault() {
        use tokio::io::AsyncWriteExt;

        let (mut raw, stream) = tokio::io::duplex(4096);
        let (read, write) = tokio::io::split(stream);
        let mut session = MediaSession::from_stream(Uuid::new_v4(), read, write);
        // length 1, unknown tag 9
        raw.write_all(&[1, 0, 0, 0, 9]).await.unwrap();

        assert!(session.frames.pull_frame().await.is_none());
        assert!(matches!(
            session.take_fault(),
            Some(FrameError::InvalidFrameTag(9))
        ));
        assert!(session.take_fault().is_none());
    }

    #[tokio::test]
    async fn clean_close_leaves_no_fault() {
        let (producer, mut consumer) = MediaSession::pair(4096);
        producer.close(Duration::from_secs(1)).await;
        assert!(consumer.frames.pull_frame().await.is_none());
        assert!(consumer.take_fault().is_none());
    }

    #[tokio::test]
    async fn send_within_times_out_on_a_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let sender = SideSender::new(tx);
        sender.send(b"first".to_vec()).await.unwrap();
        assert!(matches!(
            sender
                .send_within(b"second".to_vec(), Duration::from_millis(5))
                .await,
            Err(AppError::SendTimeout(_))
        ));

        rx.recv().await.unwrap();
        sender
            .send_within(b"third".to_vec(), Duration::from_millis(5))
            .await
            .unwrap();
        drop(rx);
        assert!(matches!(
            sender
                .send_within(b"fourth".to_vec(), Duration::from_millis(5))
                .await,
            Err(AppError::SessionClosed(_))
        ));
    }

    #[tokio::test]
    async fn tcp_handshake_establishes_shared_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let server_address = address.clone();
        let server = tokio::spawn(async move { MediaSession::listen(&server_address).await });
        let client = loop {
            match MediaSession::connect(&address).await {
                Ok(session) => break session,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        };
        let server = server.await.unwrap().unwrap();
        assert_eq!(server.id, client.id);
    }
}
