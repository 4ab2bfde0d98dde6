use serde::de::DeserializeOwned;

use crate::msg_id::MsgId;

pub mod input;
pub mod resync;
pub mod signal;
pub mod sync;

/// A trait for all protocol messages.
///
/// Each message type declares its associated `MsgId`, enabling automatic
/// header construction during encoding. Implemented for every payload type
/// by the `protocol_messages!` table below.
pub trait Message: serde::Serialize + DeserializeOwned + Send + 'static {
    /// Returns the message identifier for this message type.
    fn msg_id() -> MsgId;
}

macro_rules! protocol_messages {
    ($($ty:ty => $id:ident),+ $(,)?) => {
        $(
            impl Message for $ty {
                fn msg_id() -> MsgId {
                    MsgId::$id
                }
            }
        )+
    };
}

protocol_messages! {
    signal::Join => Join,
    signal::JoinAck => JoinAck,
    signal::PeerJoined => PeerJoined,
    signal::PeerLeft => PeerLeft,
    signal::Bye => Bye,
    signal::ErrorMsg => Error,
    signal::Offer => Offer,
    signal::Answer => Answer,
    signal::Candidate => Candidate,
    input::InputBurst => InputBurst,
    sync::Ping => Ping,
    sync::Pong => Pong,
    resync::ResyncRequest => ResyncRequest,
    resync::StateFrag => StateFrag,
}
