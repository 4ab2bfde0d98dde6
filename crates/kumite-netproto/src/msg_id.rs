use strum::FromRepr;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
pub enum MsgId {
    Join = 1,
    JoinAck = 2,
    PeerJoined = 3,
    PeerLeft = 4,
    Bye = 5,
    Error = 6,

    Offer = 10,
    Answer = 11,
    Candidate = 12,

    InputBurst = 20,

    Ping = 30,
    Pong = 31,

    ResyncRequest = 40,
    StateFrag = 41,
}
