use super::*;

pub type Result<T, E = InternalError> = std::result::Result<T, E>;

/// Errors raised while parsing or constructing Stratum wire types, independent
/// of any particular connection (see [`client::ClientError`](super::client::ClientError)
/// for connection-lifecycle errors).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum InternalError {
    #[snafu(display("{message}"))]
    Parse { message: String },

    #[snafu(display("{reason}"))]
    InvalidValue { reason: String },

    #[snafu(display("invalid hex integer '{input}': {source}"))]
    ParseHexInt {
        source: std::num::ParseIntError,
        input: String,
    },

    #[snafu(display("{source}"), context(false))]
    Hex { source: hex::FromHexError },

    #[snafu(display("username carries no address component"))]
    EmptyUsername,

    #[snafu(display("invalid address: {source}"))]
    InvalidAddress {
        source: bitcoin::address::ParseError,
    },

    #[snafu(display("address {address} does not belong to {expected:?}"))]
    NetworkMismatch { expected: Network, address: String },

    #[snafu(display("could not infer a network for this address"))]
    UnknownNetwork,
}

/// Standard Stratum mining error codes, per the de facto convention
/// established by stratum-mining/stratum and followed by most pool software.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StratumErrorCode {
    Other,
    JobNotFound,
    DuplicateShare,
    LowDifficultyShare,
    UnauthorizedWorker,
    NotSubscribed,
}

impl StratumErrorCode {
    pub fn code(self) -> i32 {
        match self {
            StratumErrorCode::Other => 20,
            StratumErrorCode::JobNotFound => 21,
            StratumErrorCode::DuplicateShare => 22,
            StratumErrorCode::LowDifficultyShare => 23,
            StratumErrorCode::UnauthorizedWorker => 24,
            StratumErrorCode::NotSubscribed => 25,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            StratumErrorCode::Other => "Other/Unknown",
            StratumErrorCode::JobNotFound => "Job not found",
            StratumErrorCode::DuplicateShare => "Duplicate share",
            StratumErrorCode::LowDifficultyShare => "Low difficulty share",
            StratumErrorCode::UnauthorizedWorker => "Unauthorized worker",
            StratumErrorCode::NotSubscribed => "Not subscribed",
        }
    }
}

impl From<StratumErrorCode> for JsonRpcError {
    fn from(code: StratumErrorCode) -> Self {
        JsonRpcError {
            error_code: code.code(),
            message: code.message().to_string(),
            traceback: None,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub error_code: i32,
    pub message: String,
    pub traceback: Option<Value>,
}

impl Serialize for JsonRpcError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (&self.error_code, &self.message, &self.traceback).serialize(serializer)
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.traceback {
            Some(traceback) => write!(
                f,
                "Stratum error {}: {} (traceback: {})",
                self.error_code,
                self.message,
                serde_json::to_string(traceback).unwrap_or_else(|_| "<invalid traceback>".into())
            ),
            None => write!(f, "Stratum error {}: {}", self.error_code, self.message),
        }
    }
}
