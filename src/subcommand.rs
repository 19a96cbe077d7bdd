use {super::*, settings::Settings};

pub(crate) mod miner;
mod ping;

#[derive(Debug, Parser)]
pub(crate) enum Subcommand {
    #[command(about = "Run the mining node")]
    Miner(miner::Miner),
    #[command(about = "Measure Stratum message ping")]
    Ping(ping::Ping),
}

impl Subcommand {
    pub(crate) async fn run(self, settings: Settings, cancel_token: CancellationToken) -> Result {
        match self {
            Self::Miner(miner) => miner.run(settings, cancel_token).await,
            Self::Ping(ping) => ping.run().await,
        }
    }
}
