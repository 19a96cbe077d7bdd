#![allow(clippy::too_many_arguments)]
use {
    anyhow::{Context, Error, anyhow, bail, ensure},
    arguments::Arguments,
    bitcoin::{
        Address, BlockHash, CompactTarget, Network, Target, TxMerkleNode,
        block::{self, Header},
        hashes::{Hash, sha256d},
    },
    clap::Parser,
    hash_rate::HashRate,
    primitive_types::U256,
    rand::RngCore,
    serde::{
        Deserialize, Serialize, Serializer,
        de::{self, Deserializer},
        ser::SerializeSeq,
    },
    serde_json::Value,
    serde_with::{DeserializeFromStr, SerializeDisplay},
    std::{
        env,
        fmt::{self, Display, Formatter},
        io::{self, Write},
        net::SocketAddr,
        ops::{Add, AddAssign, Div, Mul, Sub, SubAssign},
        path::PathBuf,
        process,
        str::FromStr,
        sync::{
            Arc, LazyLock,
            atomic::{AtomicU64, Ordering},
        },
        time::{Duration, Instant},
    },
    stratum::{
        Authorize, ClientError, Configure, ConfigureResponse, Difficulty, Event, Extranonce, Id,
        JobId, Message, Nbits, Notify, Nonce, Ntime, PrevHash, SetDifficulty, Submit, Subscribe,
        SubscribeResult, Username, Version,
    },
    sysinfo::System,
    throbber::{StatusLine, spawn_throbber},
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter},
        net::TcpStream,
        runtime::Runtime,
        signal::ctrl_c,
        sync::{Mutex, broadcast, mpsc, oneshot, watch},
        task::{self, JoinSet},
        time::{MissedTickBehavior, interval, sleep, timeout},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
    tracing_subscriber::EnvFilter,
};

mod algorithm;
mod arguments;
mod options;
mod randomx;
mod scrypt_algo;
mod settings;
mod signal;
pub mod stratum;
mod subcommand;
mod throbber;

pub mod hash_rate;

pub use {
    algorithm::{Algorithm, Coin},
    subcommand::miner::Share,
};

/// Default identifier the client announces during `mining.subscribe`.
pub const USER_AGENT: &str = "paraminer/0.1.0";

/// Length, in bytes, of the client-chosen half of the extranonce.
pub const EXTRANONCE2_SIZE: usize = 8;

type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Set by integration tests so the binary can suppress interactive output
/// (the terminal throbber) that would otherwise corrupt captured stdout.
pub(crate) fn integration_test() -> bool {
    env::var_os("PARA_INTEGRATION_TEST").is_some()
}

/// Whether structured logging has been asked for. The interactive throbber is
/// suppressed in that case so it doesn't interleave with log lines.
pub(crate) fn logs_enabled() -> bool {
    env::var_os("RUST_LOG").is_some()
}

/// Resolves a `host:port` Stratum endpoint to a single socket address.
pub(crate) async fn resolve_stratum_endpoint(endpoint: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(endpoint)
        .await
        .with_context(|| format!("failed to resolve stratum endpoint {endpoint}"))?
        .next()
        .ok_or_else(|| anyhow!("stratum endpoint {endpoint} resolved to no addresses"))
}

pub fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Arguments::parse();

    let runtime = Runtime::new().expect("failed to start tokio runtime");

    let result = runtime.block_on(async {
        let cancel = signal::setup_signal_handler();
        args.run(cancel).await
    });

    match result {
        Err(err) => {
            error!("error: {err}");

            if env::var_os("RUST_BACKTRACE")
                .map(|val| val == "1")
                .unwrap_or_default()
            {
                error!("{}", err.backtrace());
            }
            process::exit(1);
        }
        Ok(_) => {
            process::exit(0);
        }
    }
}
