use super::*;

#[derive(Debug, Clone)]
pub enum Event {
    Notify(Notify),
    SetDifficulty(Difficulty),
    /// `client.reconnect`: the pool is asking the client to reconnect,
    /// optionally to a different `host`/`port`, after `wait_seconds`.
    /// A missing host/port means "reconnect to the same endpoint".
    ClientReconnect {
        host: Option<String>,
        port: Option<u16>,
        wait_seconds: Option<u64>,
    },
    Disconnected,
}
