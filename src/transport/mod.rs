pub mod packet;
pub mod reader;
pub mod session;
pub mod writer;

use async_trait::async_trait;

use crate::common::Frame;

pub use packet::Packet;
pub use session::{FrameReceiver, FrameSender, MediaSession, SideReceiver, SideSender};

/// Pull interface a media session uses to obtain outgoing frames.
#[async_trait]
pub trait VideoTrack: Send {
    /// Next frame, or `None` when the track has ended.
    async fn recv(&mut self) -> Option<Frame>;
}
