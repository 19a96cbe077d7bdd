use {super::*, std::time::SystemTime};

/// Hashes are sampled into `Metrics` roughly this often.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// Maximum amount a worker may roll `ntime` forward from the job's original
/// value before it must request a fresh slice (stratum §4.3).
const MAX_NTIME_ROLL_SECS: u32 = 60;

/// Skew tolerance above current wall-clock a rolled `ntime` may not exceed
/// (stratum §4.3).
const NTIME_SKEW_TOLERANCE_SECS: u32 = 7200;

#[derive(Debug)]
pub(crate) struct Hasher {
    pub(crate) algorithm: Algorithm,
    pub(crate) header: Header,
    /// The job's original `ntime`, kept alongside the mutable `header` so
    /// ntime rolling can bound itself against the job's value rather than
    /// the already-rolled one.
    pub(crate) job_ntime: u32,
    pub(crate) ntime_rolling_allowed: bool,
    pub(crate) version_mask: Option<Version>,
    pub(crate) enonce2: Extranonce,
    pub(crate) job_id: JobId,
    pub(crate) pool_target: U256,
    pub(crate) randomx_vm: Option<Arc<crate::randomx::Vm>>,
}

impl Hasher {
    /// Iterates nonces (and, once the nonce space is exhausted, version bits
    /// within `version_mask`) until a hash meets `pool_target`, `cancel`
    /// fires, or the search space is exhausted.
    pub(crate) fn hash(
        &mut self,
        cancel: CancellationToken,
        metrics: Arc<Metrics>,
        throttle: f64,
    ) -> Result<(JobId, Header, Extranonce, Option<Version>)> {
        let mut roller = self
            .version_mask
            .map(|mask| VersionRoller::new(self.header.version.to_consensus(), mask.to_consensus()))
            .filter(|roller| roller.is_enabled());

        let span = tracing::info_span!("hasher", job_id = %self.job_id, enonce2 = %self.enonce2);
        let _enter = span.enter();

        let mut hashes_since_sample = 0u64;
        let mut sample_start = Instant::now();
        let run_start = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Err(anyhow!("hasher cancelled"));
            }

            let bytes = bitcoin::consensus::encode::serialize(&self.header);

            let digest = self.algorithm.hash(&bytes, self.randomx_vm.as_deref())?;

            hashes_since_sample += 1;

            if U256::from_little_endian(&digest) <= self.pool_target {
                let version_bits = roller
                    .as_ref()
                    .and_then(|roller| roller.rolled_bits())
                    .map(|bits| Version::from(bits as i32));

                metrics.add(hashes_since_sample);

                return Ok((
                    self.job_id,
                    self.header,
                    self.enonce2.clone(),
                    version_bits,
                ));
            }

            match self.header.nonce.checked_add(1) {
                Some(nonce) => self.header.nonce = nonce,
                None => match &mut roller {
                    Some(roller) if roller.roll() => {
                        self.header.version = Version::from(roller.current_version()).into();
                        self.header.nonce = 0;
                    }
                    _ => {
                        if let Some(roller) = &mut roller {
                            roller.reset();
                        }
                        if self.roll_ntime() {
                            if let Some(roller) = &mut roller {
                                self.header.version = Version::from(roller.current_version()).into();
                            }
                            self.header.nonce = 0;
                        } else {
                            return Err(anyhow!("nonce space exhausted"));
                        }
                    }
                },
            }

            if sample_start.elapsed() >= SAMPLE_INTERVAL {
                metrics.add(hashes_since_sample);

                if throttle.is_finite() {
                    let elapsed = run_start.elapsed().as_secs_f64().max(1e-9);
                    let allowed = throttle * elapsed;
                    if (metrics.total() as f64) > allowed {
                        std::thread::sleep(SAMPLE_INTERVAL);
                    }
                }

                hashes_since_sample = 0;
                sample_start = Instant::now();
            }
        }
    }

    /// Advances `header.time` by one second if the pool allows ntime rolling
    /// and doing so stays within both bounds in stratum §4.3: no more than
    /// [`MAX_NTIME_ROLL_SECS`] past the job's original `ntime`, and no more
    /// than [`NTIME_SKEW_TOLERANCE_SECS`] ahead of wall-clock. Returns
    /// `false` (leaving `header.time` unchanged) if rolling is disabled or
    /// either bound would be exceeded.
    fn roll_ntime(&mut self) -> bool {
        if !self.ntime_rolling_allowed {
            return false;
        }

        let next = match self.header.time.checked_add(1) {
            Some(next) => next,
            None => return false,
        };

        if next > self.job_ntime.saturating_add(MAX_NTIME_ROLL_SECS) {
            return false;
        }

        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(self.job_ntime);

        if next > now.saturating_add(NTIME_SKEW_TOLERANCE_SECS) {
            return false;
        }

        self.header.time = next;
        true
    }
}
