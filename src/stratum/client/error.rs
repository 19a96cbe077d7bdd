use super::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ClientError {
    #[snafu(display("connection timed out: {source}"))]
    Timeout { source: tokio::time::error::Elapsed },

    #[snafu(display("io error: {source}"))]
    Io { source: std::io::Error },

    #[snafu(display("channel receive error: {source}"))]
    ChannelRecv {
        source: tokio::sync::oneshot::error::RecvError,
    },

    #[snafu(display("serialization error: {source}"))]
    Serialization { source: serde_json::Error },

    #[snafu(display("{message}"))]
    Protocol { message: String },

    #[snafu(display("not connected to stratum server"))]
    NotConnected,

    #[snafu(display("stratum error: {response}"))]
    Stratum { response: JsonRpcError },

    #[snafu(display("event receiver lagged, missed {count} messages"))]
    EventsLagged { count: u64 },

    #[snafu(display("event channel closed"))]
    EventChannelClosed,

    #[snafu(display("submission dropped, {in_flight} submissions already in flight"))]
    RateLimited { in_flight: usize },

    #[snafu(display("no response to submission after {after:?}, assuming lost"))]
    Lost { after: Duration },
}
