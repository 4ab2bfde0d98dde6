//! Message size limits: a single source of truth for every codec.

use crate::msg_id::MsgId;

/// Maximum payload size for control messages (4 KiB).
///
/// Control messages include: signaling, input bursts, ping/pong and every
/// other small protocol message.
pub const MAX_CONTROL_PAYLOAD: usize = 4 * 1024;

/// Maximum payload size for bulk messages: the largest length the
/// header's u16 payload field can express (just under 64 KiB).
///
/// Bulk messages are state-resync fragments sent over the signaling stream;
/// anything larger must be chunked by the sender.
pub const MAX_BULK_PAYLOAD: usize = u16::MAX as usize;

/// Maximum TCP frame size (header + payload).
pub const MAX_TCP_FRAME: usize = crate::constants::HEADER_LEN + MAX_BULK_PAYLOAD;

/// Returns `true` if the given message ID may carry a bulk payload.
#[inline]
pub const fn is_bulk_message(msg_id: MsgId) -> bool {
    matches!(msg_id, MsgId::StateFrag)
}

/// Returns the maximum payload size allowed for the given message ID.
#[inline]
pub const fn max_payload_for(msg_id: MsgId) -> usize {
    if is_bulk_message(msg_id) {
        MAX_BULK_PAYLOAD
    } else {
        MAX_CONTROL_PAYLOAD
    }
}
