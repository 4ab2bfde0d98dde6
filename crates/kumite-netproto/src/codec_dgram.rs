//! Datagram codec for peer-to-peer match traffic.
//!
//! One packet per datagram, payload capped below path MTU so nothing
//! fragments.

use crate::{
    constants::{HEADER_LEN, MAX_DGRAM_PAYLOAD},
    error::ProtoError,
    header::Header,
    messages::Message,
    msg_id::MsgId,
    packet::PacketView,
};

/// Encode a message into a single datagram. The header's `msg_id` and
/// `payload_len` are filled in from the message type.
pub fn encode_datagram<T: Message>(mut header: Header, payload: &T) -> Result<Vec<u8>, ProtoError> {
    let payload_bytes = postcard::to_stdvec(payload)?;
    if payload_bytes.len() > MAX_DGRAM_PAYLOAD {
        return Err(ProtoError::PayloadTooLarge(payload_bytes.len()));
    }

    header.msg_id = T::msg_id() as u8;
    header.payload_len = payload_bytes.len() as u16;

    let mut out = vec![0u8; HEADER_LEN + payload_bytes.len()];
    let mut hbuf = [0u8; HEADER_LEN];
    header.encode_into(&mut hbuf);
    out[..HEADER_LEN].copy_from_slice(&hbuf);
    out[HEADER_LEN..].copy_from_slice(&payload_bytes);
    Ok(out)
}

pub fn decode_datagram(datagram: &[u8]) -> Result<PacketView<'_>, ProtoError> {
    if datagram.len() < HEADER_LEN {
        return Err(ProtoError::TooShort);
    }
    if datagram.len() > HEADER_LEN + MAX_DGRAM_PAYLOAD {
        return Err(ProtoError::FrameTooLarge(datagram.len()));
    }

    let (h, payload) = Header::decode(datagram)?;
    let msg = MsgId::from_repr(h.msg_id).ok_or(ProtoError::UnknownMsgId(h.msg_id))?;
    Ok(PacketView::new(h, msg, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{input::InputBurst, sync::Ping};

    #[test]
    fn datagram_round_trip() {
        let mut header = Header::new(0);
        header.session_id = 77;
        header.peer_id = 2;
        header.seq = 9;

        let burst = InputBurst {
            start_frame: 100,
            bits: vec![0x01, 0x02, 0x03],
            ack_frame: 98,
            checksum: Some(crate::messages::input::FrameChecksum {
                frame: 97,
                sum: 0xDEAD_BEEF,
            }),
        };
        let bytes = encode_datagram(header, &burst).unwrap();

        let view = decode_datagram(&bytes).unwrap();
        assert_eq!(view.msg_id, MsgId::InputBurst);
        assert_eq!(view.header.session_id, 77);
        assert_eq!(view.header.seq, 9);

        let decoded: InputBurst = view.decode_payload().unwrap();
        assert_eq!(decoded.start_frame, 100);
        assert_eq!(decoded.bits, vec![0x01, 0x02, 0x03]);
        assert_eq!(decoded.checksum.map(|c| c.sum), Some(0xDEAD_BEEF));
    }

    #[test]
    fn decode_rejects_unknown_msg_id() {
        let bytes = encode_datagram(Header::new(0), &Ping { t_ms: 5 }).unwrap();
        let mut corrupted = bytes.clone();
        corrupted[3] = 0xEE;
        assert!(matches!(
            decode_datagram(&corrupted),
            Err(ProtoError::UnknownMsgId(0xEE))
        ));
    }

    #[test]
    fn decode_rejects_truncated_datagram() {
        let bytes = encode_datagram(Header::new(0), &Ping { t_ms: 5 }).unwrap();
        assert!(decode_datagram(&bytes[..bytes.len() - 1]).is_err());
        assert!(decode_datagram(&bytes[..4]).is_err());
    }
}
