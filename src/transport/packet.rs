use chrono::{DateTime, Utc};
use image::RgbImage;
use uuid::Uuid;

use crate::common::Frame;
use crate::error::FrameError;

pub const LENGTH_BYTES: usize = 4;
pub const MAX_PACKET_BYTES: usize = 64 * 1024 * 1024;

const TAG_HANDSHAKE: u8 = 0;
const TAG_IMAGE: u8 = 1;
const TAG_MESSAGE: u8 = 2;
const TAG_SHUTDOWN: u8 = 3;

// [tag][session id: 16][version: 4]
const HANDSHAKE_BODY: usize = 1 + 16 + 4;
// [tag][sequence: 8][capture ms: 8][width: 4][height: 4]
const IMAGE_HEADER: usize = 1 + 8 + 8 + 4 + 4;

/// Unit of exchange on the media session: `[u32 LE length][u8 tag][payload]`.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Handshake {
        session_id: Uuid,
        version: u32,
    },
    Image {
        sequence_id: u64,
        capture_ms: i64,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
    Message(Vec<u8>),
    Shutdown,
}

impl Packet {
    /// Serializes the packet including its length prefix.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            Packet::Handshake {
                session_id,
                version,
            } => {
                body.push(TAG_HANDSHAKE);
                body.extend_from_slice(session_id.as_bytes());
                body.extend_from_slice(&version.to_le_bytes());
            }
            Packet::Image {
                sequence_id,
                capture_ms,
                width,
                height,
                pixels,
            } => {
                body.reserve(IMAGE_HEADER + pixels.len());
                body.push(TAG_IMAGE);
                body.extend_from_slice(&sequence_id.to_le_bytes());
                body.extend_from_slice(&capture_ms.to_le_bytes());
                body.extend_from_slice(&width.to_le_bytes());
                body.extend_from_slice(&height.to_le_bytes());
                body.extend_from_slice(pixels);
            }
            Packet::Message(bytes) => {
                body.push(TAG_MESSAGE);
                body.extend_from_slice(bytes);
            }
            Packet::Shutdown => body.push(TAG_SHUTDOWN),
        }
        let mut out = Vec::with_capacity(LENGTH_BYTES + body.len());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// Converts an image packet into a frame, checking the pixel buffer against its size.
    pub fn into_frame(self) -> Result<Option<Frame>, FrameError> {
        let Packet::Image {
            sequence_id,
            capture_ms,
            width,
            height,
            pixels,
        } = self
        else {
            return Ok(None);
        };
        let len = pixels.len();
        let image = RgbImage::from_raw(width, height, pixels).ok_or(FrameError::MalformedImage {
            width,
            height,
            len,
        })?;
        let capture_time = DateTime::<Utc>::from_timestamp_millis(capture_ms).unwrap_or_else(Utc::now);
        Ok(Some(Frame::new(sequence_id, image, capture_time)))
    }
}

impl From<&Frame> for Packet {
    fn from(frame: &Frame) -> Self {
        let (width, height) = frame.dimensions();
        Packet::Image {
            sequence_id: frame.sequence_id(),
            capture_ms: frame.capture_time().timestamp_millis(),
            width,
            height,
            pixels: frame.image().as_raw().clone(),
        }
    }
}

impl TryFrom<&[u8]> for Packet {
    type Error = FrameError;

    /// Parses a packet body, i.e. everything after the length prefix.
    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let Some(&tag) = slice.first() else {
            return Err(FrameError::InvalidFrameLength(1, 0));
        };
        match tag {
            TAG_HANDSHAKE => {
                if slice.len() != HANDSHAKE_BODY {
                    return Err(FrameError::InvalidFrameLength(HANDSHAKE_BODY, slice.len()));
                }
                let session_id = Uuid::from_slice(&slice[1..17])
                    .map_err(|_| FrameError::InvalidFrameLength(HANDSHAKE_BODY, slice.len()))?;
                let version = u32::from_le_bytes(read_array(&slice[17..21])?);
                Ok(Packet::Handshake {
                    session_id,
                    version,
                })
            }
            TAG_IMAGE => {
                if slice.len() < IMAGE_HEADER {
                    return Err(FrameError::InvalidFrameLength(IMAGE_HEADER, slice.len()));
                }
                Ok(Packet::Image {
                    sequence_id: u64::from_le_bytes(read_array(&slice[1..9])?),
                    capture_ms: i64::from_le_bytes(read_array(&slice[9..17])?),
                    width: u32::from_le_bytes(read_array(&slice[17..21])?),
                    height: u32::from_le_bytes(read_array(&slice[21..25])?),
                    pixels: slice[IMAGE_HEADER..].to_vec(),
                })
            }
            TAG_MESSAGE => Ok(Packet::Message(slice[1..].to_vec())),
            TAG_SHUTDOWN => Ok(Packet::Shutdown),
            _ => Err(FrameError::InvalidFrameTag(tag)),
        }
    }
}

fn read_array<const N: usize>(slice: &[u8]) -> Result<[u8; N], FrameError> {
    slice
        .try_into()
        .map_err(|_| FrameError::InvalidFrameLength(N, slice.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn body(packet: &Packet) -> Vec<u8> {
        packet.encode()[LENGTH_BYTES..].to_vec()
    }

    #[test]
    fn length_prefix_covers_tag_and_payload() {
        let encoded = Packet::Message(b"hello".to_vec()).encode();
        let length = u32::from_le_bytes(encoded[..4].try_into().unwrap());
        assert_eq!(length as usize, encoded.len() - LENGTH_BYTES);
        assert_eq!(encoded[4], TAG_MESSAGE);
    }

    #[test]
    fn image_packet_carries_the_frame() {
        let image = RgbImage::from_pixel(3, 2, Rgb([9, 8, 7]));
        let frame = Frame::new(12, image, Utc::now());
        let parsed = Packet::try_from(body(&Packet::from(&frame)).as_slice()).unwrap();
        let decoded = parsed.into_frame().unwrap().unwrap();
        assert_eq!(decoded.sequence_id(), 12);
        assert_eq!(decoded.image(), frame.image());
        assert_eq!(
            decoded.capture_time().timestamp_millis(),
            frame.capture_time().timestamp_millis()
        );
    }

    #[test]
    fn mismatched_pixels_are_malformed() {
        let packet = Packet::Image {
            sequence_id: 1,
            capture_ms: 0,
            width: 4,
            height: 4,
            pixels: vec![0; 5],
        };
        assert!(matches!(
            packet.into_frame(),
            Err(FrameError::MalformedImage { len: 5, .. })
        ));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(matches!(
            Packet::try_from(&[9u8, 0, 0][..]),
            Err(FrameError::InvalidFrameTag(9))
        ));
    }

    #[test]
    fn truncated_bodies_are_rejected() {
        assert!(Packet::try_from(&[0u8; 0][..]).is_err());
        assert!(Packet::try_from(&[TAG_IMAGE, 0, 0, 0][..]).is_err());
        assert!(Packet::try_from(&[TAG_HANDSHAKE, 1, 2][..]).is_err());
    }

    #[test]
    fn non_image_packets_are_not_frames() {
        assert!(Packet::Shutdown.into_frame().unwrap().is_none());
    }
}
