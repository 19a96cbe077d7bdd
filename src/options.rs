use super::*;

/// Global flags, shared by every subcommand, that aren't specific to mining
/// against one particular pool.
#[derive(Clone, Default, Debug, Parser)]
pub struct Options {
    #[arg(long, alias = "datadir", help = "Store runtime state in <DATA_DIR>.")]
    pub data_dir: Option<PathBuf>,

    #[arg(
        long,
        help = "Log level, passed through to `RUST_LOG` if that's unset: <LOG_LEVEL>."
    )]
    pub log_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let opts = Options::default();
        assert!(opts.data_dir.is_none());
        assert!(opts.log_level.is_none());
    }

    #[test]
    fn parse_data_dir() {
        let opts = Options::try_parse_from(["para", "--data-dir", "/tmp/para"]).unwrap();
        assert_eq!(opts.data_dir, Some(PathBuf::from("/tmp/para")));
    }

    #[test]
    fn parse_log_level() {
        let opts = Options::try_parse_from(["para", "--log-level", "debug"]).unwrap();
        assert_eq!(opts.log_level, Some("debug".into()));
    }
}
