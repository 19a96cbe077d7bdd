use {super::*, crate::options::Options};

/// Resolved configuration for the miner subcommand, merging CLI flags over
/// environment-variable fallbacks. There is no config-file layer: every
/// field here is either passed on the command line or read from the
/// process environment at startup.
#[derive(Clone, Debug, Default)]
pub(crate) struct Settings {
    pub(crate) miner_stratum_endpoint: Option<String>,
    pub(crate) miner_username: Option<String>,
    pub(crate) miner_password: Option<String>,
    pub(crate) miner_mode: Option<String>,
    pub(crate) miner_coin: Option<Coin>,
    pub(crate) miner_cpu_cores: Option<usize>,
    pub(crate) miner_throttle: Option<String>,
    pub(crate) miner_disable_version_rolling: bool,
    pub(crate) miner_disable_ntime_rolling: bool,
    pub(crate) data_dir: Option<PathBuf>,
}

impl Settings {
    /// Merges the global `Options` with environment-variable fallbacks for
    /// fields the CLI doesn't resolve itself. Per-subcommand flags (e.g.
    /// `miner --username`) always win over the corresponding environment
    /// variable; `Settings` only fills in what the user didn't pass.
    pub(crate) fn load(options: Options) -> Result<Self> {
        let miner_coin = env::var("PARA_MINER_COIN")
            .ok()
            .map(|s| <Coin as clap::ValueEnum>::from_str(&s, true).map_err(|e| anyhow!(e)))
            .transpose()
            .context("invalid PARA_MINER_COIN")?;

        let miner_cpu_cores = env::var("PARA_MINER_CPU_CORES")
            .ok()
            .map(|s| s.parse())
            .transpose()
            .context("invalid PARA_MINER_CPU_CORES")?;

        Ok(Self {
            miner_stratum_endpoint: env::var("PARA_MINER_STRATUM_ENDPOINT").ok(),
            miner_username: env::var("PARA_MINER_USERNAME").ok(),
            miner_password: env::var("PARA_MINER_PASSWORD").ok(),
            miner_mode: env::var("PARA_MINER_MODE").ok(),
            miner_coin,
            miner_cpu_cores,
            miner_throttle: env::var("PARA_MINER_THROTTLE").ok(),
            miner_disable_version_rolling: env::var_os("PARA_MINER_DISABLE_VERSION_ROLLING")
                .is_some(),
            miner_disable_ntime_rolling: env::var_os("PARA_MINER_DISABLE_NTIME_ROLLING").is_some(),
            data_dir: options.data_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_without_env_leaves_everything_unset() {
        let settings = Settings::load(Options::default()).unwrap();
        assert!(settings.miner_stratum_endpoint.is_none());
        assert!(settings.miner_username.is_none());
        assert!(settings.miner_coin.is_none());
        assert!(!settings.miner_disable_version_rolling);
    }

    #[test]
    fn load_carries_data_dir_from_options() {
        let options = Options {
            data_dir: Some(PathBuf::from("/tmp/para")),
            ..Options::default()
        };
        let settings = Settings::load(options).unwrap();
        assert_eq!(settings.data_dir, Some(PathBuf::from("/tmp/para")));
    }
}
