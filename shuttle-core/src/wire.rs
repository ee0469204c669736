//! Peer link framing: a u32 LE body length, then the bincode-encoded `Frame`.
//!
//! Every `Message` carries a sequence number and is answered by exactly one `Ack` or
//! `Nack` echoing it, so a reply can never be credited to the wrong message.

use serde::{Deserialize, Serialize};

use crate::protocol::AppMessage;

pub const HEADER_LEN: usize = 4;
pub const MAX_BODY_LEN: usize = 64 * 1024; // peer inboxes are far smaller

/// Pairs a message with its reply. Per session, per direction.
pub type Seq = u32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    Message { seq: Seq, msg: AppMessage },
    Ack { seq: Seq },
    Nack { seq: Seq },
}

impl Frame {
    pub fn seq(&self) -> Seq {
        match self {
            Frame::Message { seq, .. } | Frame::Ack { seq } | Frame::Nack { seq } => *seq,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameEncodeError> {
        let body_len = bincode::serialized_size(self)? as usize;
        if body_len > MAX_BODY_LEN {
            return Err(FrameEncodeError::TooLarge(body_len));
        }
        let mut out = Vec::with_capacity(HEADER_LEN + body_len);
        out.extend_from_slice(&(body_len as u32).to_le_bytes());
        bincode::serialize_into(&mut out, self)?;
        Ok(out)
    }

    /// Parse the frame at the front of `buf`, returning it with the bytes it used.
    /// `Ok(None)` while the frame is still incomplete.
    pub fn parse(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameDecodeError> {
        let Some(head) = buf.get(..HEADER_LEN) else {
            return Ok(None);
        };
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(head);
        let end = HEADER_LEN + body_len(header)?;
        let Some(body) = buf.get(HEADER_LEN..end) else {
            return Ok(None);
        };
        Ok(Some((bincode::deserialize(body)?, end)))
    }
}

/// Body length announced by a header, checked against `MAX_BODY_LEN`.
pub fn body_len(header: [u8; HEADER_LEN]) -> Result<usize, FrameDecodeError> {
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_BODY_LEN {
        return Err(FrameDecodeError::TooLarge(len));
    }
    Ok(len)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame body of {0} bytes over limit")]
    TooLarge(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("frame body of {0} bytes over limit")]
    TooLarge(usize),
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Key, MessageType};

    fn pattern_request(seq: Seq) -> Frame {
        Frame::Message {
            seq,
            msg: AppMessage::new(MessageType::RoutePattern).with(Key::RouteShortName, "12"),
        }
    }

    #[test]
    fn message_survives_framing() {
        let frame = pattern_request(7);
        let bytes = frame.to_bytes().unwrap();
        let (parsed, used) = Frame::parse(&bytes).unwrap().unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(parsed, frame);
        assert_eq!(parsed.seq(), 7);
    }

    #[test]
    fn incomplete_frame_waits() {
        let bytes = pattern_request(0).to_bytes().unwrap();
        assert!(Frame::parse(&bytes[..2]).unwrap().is_none());
        assert!(Frame::parse(&bytes[..bytes.len() - 1]).unwrap().is_none());
    }

    #[test]
    fn reply_follows_message_in_one_buffer() {
        let first = pattern_request(3).to_bytes().unwrap();
        let second = Frame::Nack { seq: 3 }.to_bytes().unwrap();
        let buf = [first.as_slice(), second.as_slice()].concat();
        let (m, n) = Frame::parse(&buf).unwrap().unwrap();
        assert_eq!(n, first.len());
        let (reply, rest) = Frame::parse(&buf[n..]).unwrap().unwrap();
        assert_eq!(rest, second.len());
        assert_eq!(reply.seq(), m.seq());
        assert_eq!(reply, Frame::Nack { seq: 3 });
    }

    #[test]
    fn oversized_header_rejected() {
        let header = ((MAX_BODY_LEN + 1) as u32).to_le_bytes();
        assert!(matches!(body_len(header), Err(FrameDecodeError::TooLarge(_))));
        let buf = [header.as_slice(), &[0u8; 8]].concat();
        assert!(matches!(Frame::parse(&buf), Err(FrameDecodeError::TooLarge(_))));
    }

    #[test]
    fn garbage_body_is_decode_error() {
        let buf = [2u32.to_le_bytes().as_slice(), &[0xff, 0xff]].concat();
        assert!(matches!(Frame::parse(&buf), Err(FrameDecodeError::Decode(_))));
    }
}
