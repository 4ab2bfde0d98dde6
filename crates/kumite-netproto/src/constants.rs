/// Magic bytes at the beginning of every packet.
/// Used to quickly reject unrelated or corrupted data.
pub const MAGIC: [u8; 2] = *b"KM";

/// Wire-format protocol version.
/// Bump this only for breaking changes to the header layout or message formats.
pub const VERSION: u8 = 1;

/// Fixed header length in bytes (wire format).
pub const HEADER_LEN: usize = 28;

/// Maximum payload size allowed for peer-to-peer datagrams (in bytes).
/// Keep this below typical path MTU so a datagram never fragments.
pub const MAX_DGRAM_PAYLOAD: usize = 1200;

/// TCP framing prefix length in bytes.
///
/// TCP is a byte stream, so each packet is framed as
/// `[u32 frame_len_le][Header][Payload]`, where `frame_len_le` is the
/// length of `[Header][Payload]` in bytes.
pub const TCP_LEN_PREFIX: usize = 4;
