use serde::{Deserialize, Serialize};

/// RTT probe; the peer echoes `t_ms` back in a [`Pong`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct Ping {
    pub t_ms: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct Pong {
    pub t_ms: u32,
}
