use serde::de::DeserializeOwned;

use crate::{error::ProtoError, header::Header, msg_id::MsgId};

/// A decoded packet borrowing its payload from the receive buffer.
#[derive(Debug, Clone, Copy)]
pub struct PacketView<'a> {
    pub header: Header,
    pub msg_id: MsgId,
    pub payload: &'a [u8],
}

impl<'a> PacketView<'a> {
    pub fn new(header: Header, msg_id: MsgId, payload: &'a [u8]) -> Self {
        Self {
            header,
            msg_id,
            payload,
        }
    }

    /// Deserialize the payload as `T`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, ProtoError> {
        Ok(postcard::from_bytes(self.payload)?)
    }
}
