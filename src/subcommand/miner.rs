use {
    super::*,
    controller::Controller,
    hasher::Hasher,
    metrics::Metrics,
    settings::Settings,
    stratum::{Client, ClientConfig},
    version_rolling::VersionRoller,
};

mod controller;
mod hasher;
mod metrics;
mod version_rolling;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum Mode {
    Continuous,
    ShareFound,
    BlockFound,
}

#[derive(Debug, Parser)]
pub(crate) struct Miner {
    #[arg(help = "Stratum <HOST:PORT>.")]
    stratum_endpoint: Option<String>,
    #[arg(long, help = "Stratum <USERNAME>.")]
    username: Option<String>,
    #[arg(long, help = "Stratum <PASSWORD>.")]
    password: Option<String>,
    #[arg(
        long,
        value_enum,
        help = "Mining mode: <continuous|share-found|block-found>."
    )]
    mode: Option<Mode>,
    #[arg(long, value_enum, help = "Coin to mine: <bitcoin|litecoin|monero>.")]
    coin: Option<Coin>,
    #[arg(long, help = "Number of <CPU_CORES> to use.")]
    cpu_cores: Option<usize>,
    #[arg(long, help = "Hash rate to <THROTTLE> to.")]
    throttle: Option<HashRate>,
    #[arg(long, help = "Disable BIP 320 version rolling.")]
    disable_version_rolling: bool,
    #[arg(long, help = "Disable ntime rolling.")]
    disable_ntime_rolling: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Share {
    pub enonce1: Extranonce,
    pub enonce2: Extranonce,
    pub job_id: JobId,
    pub nonce: Nonce,
    pub ntime: Ntime,
    pub username: Username,
    pub version_bits: Option<Version>,
}

impl Miner {
    pub(crate) async fn run(self, settings: Settings, cancel_token: CancellationToken) -> Result {
        let stratum_endpoint = self
            .stratum_endpoint
            .or(settings.miner_stratum_endpoint.clone())
            .ok_or_else(|| anyhow!("stratum endpoint required"))?;

        let username = self
            .username
            .or(settings.miner_username.clone())
            .ok_or_else(|| anyhow!("username required"))?;

        let password = self.password.or(settings.miner_password.clone());

        let mode_str = self
            .mode
            .map(|m| match m {
                Mode::Continuous => "continuous",
                Mode::ShareFound => "share-found",
                Mode::BlockFound => "block-found",
            })
            .or(settings.miner_mode.as_deref())
            .unwrap_or("continuous");

        let mode = match mode_str {
            "share-found" => Mode::ShareFound,
            "block-found" => Mode::BlockFound,
            _ => Mode::Continuous,
        };

        let coin = self.coin.or(settings.miner_coin).unwrap_or(Coin::Bitcoin);

        let disable_version_rolling =
            self.disable_version_rolling || settings.miner_disable_version_rolling;

        let disable_ntime_rolling =
            self.disable_ntime_rolling || settings.miner_disable_ntime_rolling;

        let cpu_cores = self.cpu_cores.or(settings.miner_cpu_cores);

        let throttle = self.throttle.or_else(|| {
            settings
                .miner_throttle
                .as_ref()
                .and_then(|s| s.parse::<HashRate>().ok())
        });

        let username: Username = username.into();

        info!("Connecting to {stratum_endpoint} with user {username}");

        let address = resolve_stratum_endpoint(&stratum_endpoint).await?;

        let config = ClientConfig {
            address: address.to_string(),
            username: username.to_string(),
            user_agent: USER_AGENT.into(),
            password,
            timeout: Duration::from_secs(10),
        };

        let client = Client::new(config);

        let mut system = System::new();
        system.refresh_cpu_all();
        let available_cpu_cores = system.cpus().len();

        let cpu_cores = if let Some(cpu_cores) = cpu_cores {
            std::cmp::min(cpu_cores, available_cpu_cores)
        } else {
            available_cpu_cores
        };

        info!("Available CPU cores: {}", available_cpu_cores);
        info!("CPU cores to use: {}", cpu_cores);
        info!("Mining {coin} ({})", coin.algorithm());

        let shares = Controller::run(
            client,
            username,
            cpu_cores,
            throttle,
            mode,
            coin,
            disable_version_rolling,
            disable_ntime_rolling,
            cancel_token,
        )
        .await?;

        println!("{}", serde_json::to_string_pretty(&shares)?);

        Ok(())
    }
}
