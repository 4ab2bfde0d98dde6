//! Stream codec for the signaling channel.
//!
//! TCP is a byte stream, so each packet is framed as
//! `[u32 frame_len_le][Header][Payload]`.

use crate::{
    constants::{HEADER_LEN, TCP_LEN_PREFIX},
    error::ProtoError,
    header::Header,
    limits::{MAX_TCP_FRAME, max_payload_for},
    messages::Message,
    msg_id::MsgId,
    packet::PacketView,
};

/// Encode a message into a single TCP frame. The payload limit is selected
/// from the message type's class (control vs bulk).
pub fn encode_tcp_frame<T: Message>(mut header: Header, payload: &T) -> Result<Vec<u8>, ProtoError> {
    let msg_id = T::msg_id();
    let payload_bytes = postcard::to_stdvec(payload)?;
    if payload_bytes.len() > max_payload_for(msg_id) {
        return Err(ProtoError::PayloadTooLarge(payload_bytes.len()));
    }

    header.msg_id = msg_id as u8;
    header.payload_len = payload_bytes.len() as u16;

    let frame_len = HEADER_LEN + payload_bytes.len();
    if frame_len > MAX_TCP_FRAME {
        return Err(ProtoError::FrameTooLarge(frame_len));
    }

    let mut out = Vec::with_capacity(TCP_LEN_PREFIX + frame_len);
    out.extend_from_slice(&(frame_len as u32).to_le_bytes());

    let mut hbuf = [0u8; HEADER_LEN];
    header.encode_into(&mut hbuf);
    out.extend_from_slice(&hbuf);
    out.extend_from_slice(&payload_bytes);
    Ok(out)
}

/// Decode as many complete frames as `in_buf` holds.
///
/// Returns the decoded packets and the number of consumed bytes; the caller
/// advances its receive buffer by that amount and retries once more data
/// arrives.
pub fn try_decode_tcp_frames(in_buf: &[u8]) -> Result<(Vec<PacketView<'_>>, usize), ProtoError> {
    let mut frames = Vec::new();
    let mut offset = 0usize;

    loop {
        if in_buf.len().saturating_sub(offset) < TCP_LEN_PREFIX {
            break;
        }
        let len_bytes = &in_buf[offset..offset + TCP_LEN_PREFIX];
        let frame_len =
            u32::from_le_bytes(len_bytes.try_into().expect("slice length is 4")) as usize;

        if frame_len < HEADER_LEN {
            return Err(ProtoError::LengthMismatch);
        }
        if frame_len > MAX_TCP_FRAME {
            return Err(ProtoError::FrameTooLarge(frame_len));
        }

        let total_needed = TCP_LEN_PREFIX + frame_len;
        if in_buf.len().saturating_sub(offset) < total_needed {
            break;
        }

        let frame = &in_buf[offset + TCP_LEN_PREFIX..offset + total_needed];
        let (h, payload) = Header::decode(frame)?;
        let msg = MsgId::from_repr(h.msg_id).ok_or(ProtoError::UnknownMsgId(h.msg_id))?;

        frames.push(PacketView::new(h, msg, payload));
        offset += total_needed;
    }

    Ok((frames, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::signal::{Join, JoinAck};

    #[test]
    fn tcp_frames_decode_incrementally() {
        let join = Join {
            session_code: 4242,
            nonce: 7,
        };
        let ack = JoinAck {
            ok: true,
            peer_id: 1,
            session_code: 4242,
            peer_count: 1,
        };
        let mut stream = encode_tcp_frame(Header::new(0), &join).unwrap();
        stream.extend_from_slice(&encode_tcp_frame(Header::new(0), &ack).unwrap());

        // A partial first frame decodes nothing and consumes nothing.
        let (packets, consumed) = try_decode_tcp_frames(&stream[..5]).unwrap();
        assert!(packets.is_empty());
        assert_eq!(consumed, 0);

        // The full buffer yields both frames.
        let (packets, consumed) = try_decode_tcp_frames(&stream).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(consumed, stream.len());
        assert_eq!(packets[0].msg_id, MsgId::Join);
        assert_eq!(packets[1].msg_id, MsgId::JoinAck);

        let decoded: Join = packets[0].decode_payload().unwrap();
        assert_eq!(decoded.session_code, 4242);
    }

    #[test]
    fn oversized_frame_length_is_rejected() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&(u32::MAX).to_le_bytes());
        stream.extend_from_slice(&[0u8; 64]);
        assert!(matches!(
            try_decode_tcp_frames(&stream),
            Err(ProtoError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn undersized_frame_length_is_rejected() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&4u32.to_le_bytes());
        stream.extend_from_slice(&[0u8; 8]);
        assert!(matches!(
            try_decode_tcp_frames(&stream),
            Err(ProtoError::LengthMismatch)
        ));
    }
}
