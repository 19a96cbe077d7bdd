use super::*;

/// Per-job state the hasher tasks watch for. Carries the RandomX VM for the
/// job's seed alongside the job itself so hashers never build one on the hot
/// path; the I/O task rebuilds it only when the seed (prevhash) changes.
type JobState = (Notify, CancellationToken, Option<Arc<crate::randomx::Vm>>);

pub(crate) struct Controller {
    client: Client,
    coin: Coin,
    cpu_cores: usize,
    enonce1: Extranonce,
    enonce2: Arc<Mutex<Extranonce>>,
    hasher_cancel: Option<CancellationToken>,
    hashers: JoinSet<()>,
    metrics: Arc<Metrics>,
    notify_tx: watch::Sender<Option<JobState>>,
    notify_rx: watch::Receiver<Option<JobState>>,
    mode: Mode,
    ntime_rolling_allowed: bool,
    pool_difficulty: Arc<Mutex<Difficulty>>,
    randomx_vm: Option<Arc<crate::randomx::Vm>>,
    randomx_seed: Option<PrevHash>,
    cancel: CancellationToken,
    share_tx: mpsc::Sender<(JobId, Header, Extranonce, Option<Version>)>,
    share_rx: mpsc::Receiver<(JobId, Header, Extranonce, Option<Version>)>,
    shares: Vec<Share>,
    throttle: f64,
    username: Username,
    version_mask: Option<Version>,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn run(
        mut client: Client,
        username: Username,
        cpu_cores: usize,
        throttle: Option<HashRate>,
        mode: Mode,
        coin: Coin,
        disable_version_rolling: bool,
        disable_ntime_rolling: bool,
        cancel_token: CancellationToken,
    ) -> Result<Vec<Share>> {
        let events = client
            .connect()
            .await
            .context("failed to connect to stratum server")?;

        let version_mask = if disable_version_rolling || coin.algorithm() != Algorithm::Sha256d {
            if coin.algorithm() != Algorithm::Sha256d {
                info!("Version rolling not applicable to {coin}");
            } else {
                info!("Version rolling disabled");
            }
            None
        } else {
            match client
                .configure(
                    vec!["version-rolling".to_string()],
                    Some(Version::from_str("ffffffff")?),
                )
                .await
            {
                Ok((response, _, _)) => {
                    if response.version_rolling {
                        info!(
                            "Version rolling enabled: mask={:?}",
                            response.version_rolling_mask
                        );
                        response.version_rolling_mask
                    } else {
                        info!("Server does not support version rolling");
                        None
                    }
                }
                Err(e) => {
                    warn!("Failed to configure version rolling: {e}");
                    None
                }
            }
        };

        let (subscribe, _, _) = client
            .subscribe()
            .await
            .context("stratum mining.subscribe failed")?;

        const AUTHORIZE_ATTEMPTS: u32 = 3;

        let mut authorize_err = None;
        for attempt in 1..=AUTHORIZE_ATTEMPTS {
            match client.authorize().await {
                Ok(_) => {
                    authorize_err = None;
                    break;
                }
                Err(err) => {
                    warn!("mining.authorize attempt {attempt}/{AUTHORIZE_ATTEMPTS} failed: {err}");
                    authorize_err = Some(err);
                }
            }
        }

        if let Some(err) = authorize_err {
            error!("mining.authorize rejected after {AUTHORIZE_ATTEMPTS} attempts: {err}");
            return Err(err).context("stratum mining.authorize failed");
        }

        info!(
            "Authorized: enonce1={}, enonce2_size={}",
            subscribe.enonce1, subscribe.enonce2_size
        );

        info!("Controller initialized with {} CPU cores", cpu_cores);

        let (share_tx, share_rx) = mpsc::channel(256);
        let (notify_tx, notify_rx) = watch::channel(None);

        let throttle = throttle
            .map(|hash_rate| hash_rate.0 / cpu_cores as f64)
            .unwrap_or(f64::MAX);

        let mut controller = Self {
            client,
            coin,
            cpu_cores,
            enonce1: subscribe.enonce1,
            enonce2: Arc::new(Mutex::new(Extranonce::zeros(subscribe.enonce2_size))),
            hasher_cancel: None,
            hashers: JoinSet::new(),
            metrics: Arc::new(Metrics::new()),
            notify_rx,
            notify_tx,
            mode,
            ntime_rolling_allowed: !disable_ntime_rolling,
            pool_difficulty: Arc::new(Mutex::new(Difficulty::default())),
            randomx_vm: None,
            randomx_seed: None,
            cancel: cancel_token.clone(),
            share_rx,
            share_tx,
            shares: Vec::new(),
            throttle,
            username,
            version_mask,
        };

        controller.spawn_hashers();

        if !integration_test() && !logs_enabled() {
            spawn_throbber(
                controller.metrics.clone(),
                cancel_token.clone(),
                &mut controller.hashers,
            );
        }

        controller.event_loop(events, cancel_token).await?;

        controller.cancel.cancel();
        drop(controller.notify_tx);
        while controller.hashers.join_next().await.is_some() {}
        controller.client.disconnect().await;

        Ok(controller.shares)
    }

    async fn event_loop(
        &mut self,
        mut events: stratum::EventReceiver,
        cancel_token: CancellationToken,
    ) -> Result {
        let mut recommend_interval = interval(super::metrics::RECOMMENDATION_PERIOD);
        recommend_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut telemetry_interval = interval(super::metrics::TELEMETRY_SAMPLE_PERIOD);
        telemetry_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut system = System::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    info!("Shutting down stratum client and hasher");
                    break;
                },
                event = events.recv() => {
                    match event {
                        Ok(stratum::Event::Notify(notify)) => {
                            self.handle_notify(notify).await?;
                        }
                        Ok(stratum::Event::SetDifficulty(difficulty)) => {
                            self.handle_set_difficulty(difficulty).await;
                        }
                        Ok(stratum::Event::Disconnected) => {
                            warn!("disconnected from stratum server, reconnecting");
                            self.metrics.record_error("network", "disconnected from stratum server");
                            self.cancel_hashers();
                            self.metrics.record_reconnect();
                            match self.client.reconnect_with_backoff(&cancel_token).await {
                                Ok(new_events) => events = new_events,
                                Err(_) => {
                                    info!("giving up on stratum server, shutting down");
                                    break;
                                }
                            }
                        }
                        Ok(stratum::Event::ClientReconnect { host, port, wait_seconds }) => {
                            if let (Some(host), Some(port)) = (&host, port) {
                                info!("pool asked us to reconnect to {host}:{port}");
                                self.client.set_address(format!("{host}:{port}"));
                            } else {
                                info!("pool asked us to reconnect");
                            }

                            if let Some(wait) = wait_seconds.filter(|w| *w > 0) {
                                tokio::select! {
                                    _ = tokio::time::sleep(Duration::from_secs(wait)) => {}
                                    _ = cancel_token.cancelled() => break,
                                }
                            }

                            self.cancel_hashers();
                            self.metrics.record_reconnect();
                            match self.client.reconnect_with_backoff(&cancel_token).await {
                                Ok(new_events) => events = new_events,
                                Err(_) => {
                                    info!("giving up on stratum server, shutting down");
                                    break;
                                }
                            }
                        }
                        Err(stratum::ClientError::EventsLagged { count }) => {
                            warn!("Event loop lagged, missed {count} messages");
                            self.metrics.record_error("protocol", format!("event loop lagged, missed {count} messages"));
                        }
                        Err(stratum::ClientError::EventChannelClosed) => {
                            info!("Client event channel closed, shutting down");
                            break;
                        }
                        Err(e) => {
                            warn!("Unexpected event error: {e}");
                        }
                    }
                },
                maybe = self.share_rx.recv() => match maybe {
                    Some((job_id, header, enonce2, version_bits)) => {
                        info!(
                            "Valid share found with difficulty={} version_bits={:?}",
                            Difficulty::from(header.block_hash()),
                            version_bits
                        );

                        let share = Share {
                            enonce1: self.enonce1.clone(),
                            enonce2: enonce2.clone(),
                            job_id,
                            nonce: header.nonce.into(),
                            ntime: header.time.into(),
                            username: self.username.clone(),
                            version_bits,
                        };

                        self.shares.push(share);

                        match self.client.submit(job_id, enonce2, header.time.into(), header.nonce.into(), version_bits).await {
                            Err(stratum::ClientError::RateLimited { in_flight }) => {
                                warn!("Submission for job {job_id} dropped, rate limited ({in_flight} in flight)");
                                self.metrics.record_rate_limited();
                            }
                            Err(stratum::ClientError::Lost { after }) => {
                                warn!("No response for job {job_id} submission after {after:?}, counting as lost");
                                self.metrics.record_lost();
                            }
                            Err(stratum::ClientError::Stratum { response })
                                if response.error_code == stratum::StratumErrorCode::JobNotFound.code() =>
                            {
                                info!("Stale share for job {job_id}: {response}");
                                self.metrics.record_stale();
                            }
                            Err(stratum::ClientError::Stratum { response })
                                if response.error_code == stratum::StratumErrorCode::LowDifficultyShare.code() =>
                            {
                                error!(
                                    "Low-difficulty share rejected for job {job_id}: {response} \
                                     (this usually indicates a header/target construction bug)"
                                );
                                self.metrics.record_error(
                                    "algorithmic",
                                    format!("job {job_id} rejected as low_diff: {response}"),
                                );
                                self.metrics.record_rejected();
                            }
                            Err(err) => {
                                warn!("Failed to submit share for job {job_id}: {err}");
                                self.metrics.record_rejected();
                            }
                            Ok(_) => {
                                info!("Share for job {job_id} submitted successfully");
                                self.metrics.record_accepted();
                            }
                        }

                        match self.mode {
                            Mode::ShareFound => {
                                info!("Share found, exiting");
                                break;
                            },
                            Mode::BlockFound => {
                                if header.validate_pow(header.bits.into()).is_ok() {
                                    info!("Block found, exiting");
                                    break;
                                }
                            }
                            Mode::Continuous => continue,
                        }
                    }
                    None => {
                        info!("Share channel closed");
                        break;
                    }
                },
                _ = telemetry_interval.tick() => {
                    system.refresh_cpu_all();
                    system.refresh_memory();
                    let cpu_percent = system.global_cpu_usage() as f64;
                    let memory_mb = system.used_memory() / (1024 * 1024);
                    self.metrics.record_resource_sample(cpu_percent, memory_mb);
                }
                _ = recommend_interval.tick() => {
                    let cpu_percent = self.metrics.last_cpu_percent();
                    let hash_rate = self.metrics.hash_rate().await;
                    let recommendation = self.metrics.recommend(cpu_percent, hash_rate).await;
                    info!(
                        "Telemetry: hashrate={hash_rate} cpu={cpu_percent:.1}% recommendation={recommendation}"
                    );
                }
            }
        }

        Ok(())
    }

    fn spawn_hashers(&mut self) {
        for core_id in 0..self.cpu_cores {
            let mut notify_rx = self.notify_rx.clone();
            let share_tx = self.share_tx.clone();
            let enonce1 = self.enonce1.clone();
            let enonce2 = self.enonce2.clone();
            let pool_difficulty = self.pool_difficulty.clone();
            let metrics = self.metrics.clone();
            let throttle = self.throttle;
            let version_mask = self.version_mask;
            let algorithm = self.coin.algorithm();
            let diff1_target = self.coin.diff1_target();
            let ntime_rolling_allowed = self.ntime_rolling_allowed;

            info!("Starting hasher for core {core_id}",);
            self.hashers.spawn(async move {
                loop {
                    if notify_rx.changed().await.is_err() {
                        break;
                    }

                    let Some((notify, cancel, randomx_vm)) = notify_rx.borrow().clone() else {
                        continue;
                    };

                    loop {
                        if cancel.is_cancelled() {
                            break;
                        }

                        let enonce2 = {
                            let mut guard = enonce2.lock().await;
                            let enonce2 = guard.clone();
                            guard.increment_wrapping();
                            enonce2
                        };

                        let merkle_root = match stratum::merkle_root(
                            &notify.coinb1,
                            &notify.coinb2,
                            &enonce1,
                            &enonce2,
                            &notify.merkle_branches,
                        ) {
                            Ok(merkle_root) => merkle_root,
                            Err(err) => {
                                warn!(
                                    "malformed coinbase in job {}: {err}, skipping",
                                    notify.job_id
                                );
                                metrics.record_error(
                                    "protocol",
                                    format!("malformed coinbase in job {}: {err}", notify.job_id),
                                );
                                break;
                            }
                        };

                        let job_ntime: u32 = notify.ntime.into();

                        let header = Header {
                            version: notify.version.into(),
                            prev_blockhash: notify.prevhash.clone().into(),
                            merkle_root: merkle_root.into(),
                            time: job_ntime,
                            bits: notify.nbits.into(),
                            nonce: 0,
                        };

                        let pool_target = {
                            let difficulty = pool_difficulty.lock().await.as_f64();
                            crate::algorithm::target_for_difficulty(diff1_target, difficulty)
                        };

                        let mut hasher = Hasher {
                            algorithm,
                            header,
                            job_ntime,
                            ntime_rolling_allowed,
                            pool_target,
                            enonce2: enonce2.clone(),
                            job_id: notify.job_id,
                            version_mask,
                            randomx_vm: randomx_vm.clone(),
                        };

                        let cancel_clone = cancel.clone();
                        let metrics_clone = metrics.clone();

                        let result = task::spawn_blocking(move || {
                            hasher.hash(cancel_clone, metrics_clone, throttle)
                        })
                        .await;

                        match result {
                            Ok(Ok(share)) => {
                                let _ = share_tx.send(share).await;
                            }
                            Ok(Err(err)) => {
                                warn!("Hasher failed on core {core_id}: {err}");
                                if cancel.is_cancelled() {
                                    break;
                                }
                                continue;
                            }
                            Err(_) => break,
                        }
                    }
                }
            });
        }
    }

    async fn handle_notify(&mut self, notify: Notify) -> Result {
        info!("New job: job_id={}", notify.job_id,);

        let cancel = if notify.clean_jobs {
            self.cancel_hashers()
        } else {
            self.hasher_cancel
                .clone()
                .unwrap_or_else(|| self.cancel_hashers())
        };

        let randomx_vm = if self.coin.algorithm() == Algorithm::RandomX {
            Some(self.randomx_vm_for_seed(&notify.prevhash).await?)
        } else {
            None
        };

        self.notify_tx
            .send_replace(Some((notify, cancel, randomx_vm)));
        Ok(())
    }

    /// Returns the cached RandomX VM for `seed`, rebuilding it off the event
    /// loop only when the seed has changed since the last job.
    async fn randomx_vm_for_seed(&mut self, seed: &PrevHash) -> Result<Arc<crate::randomx::Vm>> {
        if self.randomx_seed.as_ref() == Some(seed) {
            if let Some(vm) = &self.randomx_vm {
                return Ok(vm.clone());
            }
        }

        let seed_bytes = *seed.as_byte_array();
        let vm = match task::spawn_blocking(move || crate::randomx::Vm::new(&seed_bytes))
            .await
            .context("randomx vm builder task panicked")?
        {
            Ok(vm) => vm,
            Err(err) => {
                self.metrics
                    .record_error("resource", format!("randomx vm allocation failed: {err}"));
                return Err(err);
            }
        };
        let vm = Arc::new(vm);

        self.randomx_seed = Some(seed.clone());
        self.randomx_vm = Some(vm.clone());

        Ok(vm)
    }

    async fn handle_set_difficulty(&mut self, difficulty: Difficulty) {
        *self.pool_difficulty.lock().await = difficulty;
        let target = self
            .coin
            .target_for_difficulty(difficulty.as_f64());
        info!("Updated pool difficulty: {difficulty}");
        info!("Updated pool target:\t{target:064x}");
    }

    fn cancel_hashers(&mut self) -> CancellationToken {
        if let Some(cancel) = &self.hasher_cancel {
            cancel.cancel();
        }
        let cancel = self.cancel.child_token();
        self.hasher_cancel = Some(cancel.clone());
        cancel
    }
}
