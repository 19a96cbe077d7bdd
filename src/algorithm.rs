use super::*;

/// A proof-of-work hash function a worker can be asked to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Algorithm {
    /// Double SHA-256, as used by Bitcoin.
    Sha256d,
    /// Scrypt(N=1024, r=1, p=1) per RFC 7914, as used by Litecoin and its forks.
    Scrypt,
    /// RandomX, as used by Monero.
    RandomX,
}

impl Algorithm {
    /// Evaluates the algorithm over `input`, returning a 32-byte digest meant
    /// to be interpreted little-endian against a target.
    ///
    /// `randomx_vm` must be `Some` when `self == RandomX`; the evaluator
    /// amortizes cache/dataset construction across many calls and is built
    /// once per job seed by the caller (see [`randomx`](crate::randomx)).
    pub fn hash(
        self,
        input: &[u8],
        randomx_vm: Option<&crate::randomx::Vm>,
    ) -> crate::Result<[u8; 32]> {
        match self {
            Algorithm::Sha256d => {
                let digest = sha256d::Hash::hash(input);
                Ok(*digest.as_byte_array())
            }
            Algorithm::Scrypt => crate::scrypt_algo::hash(input),
            Algorithm::RandomX => {
                let vm = randomx_vm.context("randomx algorithm requires a VM")?;
                vm.hash(input)
            }
        }
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Algorithm::Sha256d => "sha256d",
            Algorithm::Scrypt => "scrypt",
            Algorithm::RandomX => "randomx",
        })
    }
}

/// A coin this miner knows how to work, binding it to an [`Algorithm`] and a
/// conventional difficulty-1 target.
///
/// These `diff1` constants are the ones used by the respective reference
/// pool software at time of writing. They are not re-derived from any coin
/// daemon here; an implementer integrating a new coin, or auditing this one,
/// must cross-check them against that coin's own reference source before
/// relying on them in production (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Coin {
    Bitcoin,
    Litecoin,
    Monero,
}

impl Coin {
    pub fn algorithm(self) -> Algorithm {
        match self {
            Coin::Bitcoin => Algorithm::Sha256d,
            Coin::Litecoin => Algorithm::Scrypt,
            Coin::Monero => Algorithm::RandomX,
        }
    }

    /// The 256-bit target corresponding to difficulty 1 for this coin.
    pub fn diff1_target(self) -> U256 {
        match self {
            // Bitcoin and Litecoin share the same SHA-256-family diff1,
            // corresponding to nbits 0x1d00ffff, despite Litecoin hashing
            // headers with Scrypt rather than SHA-256d.
            Coin::Bitcoin | Coin::Litecoin => {
                U256::from_big_endian(&Target::MAX.to_be_bytes())
            }
            // Monero's RandomX diff1 accepts any hash: the full 256-bit range.
            Coin::Monero => U256::MAX,
        }
    }

    /// The share target for `difficulty` against this coin's `diff1_target`,
    /// i.e. `floor(diff1_target / difficulty)`. Scales both operands by the
    /// same factor before dividing so that fractional difficulties below 1
    /// don't collapse to zero precision in the division.
    pub fn target_for_difficulty(self, difficulty: f64) -> U256 {
        target_for_difficulty(self.diff1_target(), difficulty)
    }
}

/// See [`Coin::target_for_difficulty`].
pub fn target_for_difficulty(diff1_target: U256, difficulty: f64) -> U256 {
    if difficulty <= 0.0 || !difficulty.is_finite() {
        return diff1_target;
    }

    const MAX_SCALE_NUM: u64 = 0xFFFF_FFFF;

    // The largest scale that keeps `diff1_target * scale` from overflowing
    // 256 bits. For Bitcoin/Litecoin's diff1 (2^224) this is always at least
    // `MAX_SCALE_NUM`, but Monero's diff1 is `U256::MAX`, where any scale
    // above 1 would overflow and saturate back to `U256::MAX`, turning the
    // division into `U256::MAX / (difficulty * scale)` instead of the
    // intended `U256::MAX / difficulty`.
    let max_scale_by_overflow = if diff1_target.is_zero() {
        u64::MAX
    } else {
        (U256::MAX / diff1_target).min(U256::from(u64::MAX)).low_u64()
    };
    let max_scale = max_scale_by_overflow.min(MAX_SCALE_NUM).max(1);

    let max_scale_by_den = (u64::MAX as f64 / difficulty).floor().max(1.0);
    let scale = (max_scale as f64).min(max_scale_by_den).max(1.0) as u64;

    let numerator = diff1_target.saturating_mul(U256::from(scale));
    let denominator = U256::from((difficulty * scale as f64).round() as u128);

    if denominator.is_zero() {
        U256::MAX
    } else {
        numerator / denominator
    }
}

impl Display for Coin {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Coin::Bitcoin => "bitcoin",
            Coin::Litecoin => "litecoin",
            Coin::Monero => "monero",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coin_algorithm_mapping() {
        assert_eq!(Coin::Bitcoin.algorithm(), Algorithm::Sha256d);
        assert_eq!(Coin::Litecoin.algorithm(), Algorithm::Scrypt);
        assert_eq!(Coin::Monero.algorithm(), Algorithm::RandomX);
    }

    #[test]
    fn bitcoin_and_litecoin_share_diff1() {
        assert_eq!(Coin::Bitcoin.diff1_target(), Coin::Litecoin.diff1_target());
    }

    #[test]
    fn monero_diff1_is_full_range() {
        assert_eq!(Coin::Monero.diff1_target(), U256::MAX);
    }

    #[test]
    fn target_for_difficulty_one_is_diff1() {
        assert_eq!(
            Coin::Bitcoin.target_for_difficulty(1.0),
            Coin::Bitcoin.diff1_target()
        );
    }

    #[test]
    fn target_for_difficulty_halves_on_double_difficulty() {
        let diff1 = Coin::Bitcoin.diff1_target();
        let target = Coin::Bitcoin.target_for_difficulty(2.0);
        assert_eq!(target, diff1 / 2);
    }

    #[test]
    fn target_for_difficulty_fractional_difficulty_roughly_doubles() {
        let diff1 = Coin::Bitcoin.diff1_target();
        let target = Coin::Bitcoin.target_for_difficulty(0.5);
        assert!(target > diff1);
    }

    #[test]
    fn monero_target_for_difficulty_one_is_diff1() {
        assert_eq!(
            Coin::Monero.target_for_difficulty(1.0),
            Coin::Monero.diff1_target()
        );
    }

    #[test]
    fn monero_target_for_difficulty_halves_on_double_difficulty() {
        let diff1 = Coin::Monero.diff1_target();
        let target = Coin::Monero.target_for_difficulty(2.0);
        assert_eq!(target, diff1 / 2);
    }

    #[test]
    fn monero_target_for_difficulty_matches_plain_division_at_real_pool_difficulty() {
        // Regression test: scaling the near-U256::MAX diff1 by anything above
        // 1 used to overflow and saturate, making the target ~4.3 billion
        // times stricter than it should be at any real pool difficulty.
        let diff1 = Coin::Monero.diff1_target();
        let target = Coin::Monero.target_for_difficulty(50_000.0);
        assert_eq!(target, diff1 / 50_000u64);
    }

    #[test]
    fn monero_target_for_difficulty_below_one_widens_the_target() {
        let diff1 = Coin::Monero.diff1_target();
        let target = Coin::Monero.target_for_difficulty(0.5);
        assert_eq!(target, diff1);
    }

    #[test]
    fn sha256d_matches_bitcoin_hashes_sha256d() {
        let input = b"hello world";
        let got = Algorithm::Sha256d.hash(input, None).unwrap();
        let want = sha256d::Hash::hash(input);
        assert_eq!(&got, want.as_byte_array());
    }
}
