use {
    super::*,
    error::ClientError,
    rand::Rng,
    std::{
        collections::BTreeMap,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::{Duration, Instant},
    },
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter},
        net::TcpStream,
        sync::{Semaphore, broadcast, mpsc, oneshot},
    },
    tracing::{error, warn},
};

mod error;

pub type Result<T = (), E = ClientError> = std::result::Result<T, E>;

/// Initial and maximum delay for the reconnect backoff, per stratum §4.4.
const RECONNECT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Maximum number of `mining.submit` requests allowed to be in flight at
/// once; additional submissions are dropped with [`ClientError::RateLimited`]
/// rather than queued indefinitely.
const MAX_IN_FLIGHT_SUBMISSIONS: usize = 32;

/// How long to wait for a response to a submitted share before giving up and
/// counting it as lost.
const SUBMISSION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub address: String,
    pub username: String,
    pub password: Option<String>,
    pub user_agent: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    id_counter: Arc<AtomicU64>,
    tx: mpsc::Sender<ActorMessage>,
    events: broadcast::Sender<Event>,
    submit_permits: Arc<Semaphore>,
}

/// Wraps a [`broadcast::Receiver`] of server-pushed [`Event`]s, translating
/// channel-level failures into [`ClientError`] variants the caller can match
/// on alongside protocol errors.
pub struct EventReceiver(broadcast::Receiver<Event>);

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<Event> {
        match self.0.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(count)) => {
                Err(ClientError::EventsLagged { count })
            }
            Err(broadcast::error::RecvError::Closed) => Err(ClientError::EventChannelClosed),
        }
    }
}

enum ActorMessage {
    Request {
        id: Id,
        method: String,
        params: Value,
        tx: oneshot::Sender<Result<(Message, usize)>>,
    },
    Disconnect,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let (tx, _) = mpsc::channel(32);
        let (events, _) = broadcast::channel(32);

        Self {
            config: Arc::new(config),
            id_counter: Arc::new(AtomicU64::new(0)),
            tx,
            events,
            submit_permits: Arc::new(Semaphore::new(MAX_IN_FLIGHT_SUBMISSIONS)),
        }
    }

    pub async fn connect(&mut self) -> Result<EventReceiver> {
        let (tx, rx) = mpsc::channel(32);
        self.tx = tx;

        let receiver = EventReceiver(self.events.subscribe());

        let connection = Connection::new(self.config.clone(), rx, self.events.clone());

        tokio::spawn(async move {
            if let Err(e) = connection.run().await {
                error!("connection actor failed: {e}");
            }
        });

        Ok(receiver)
    }

    /// Reconnects and replays `mining.subscribe`/`mining.authorize`, retrying
    /// with exponential backoff (1s up to 60s, +/-20% jitter) until it succeeds
    /// or `cancel` fires.
    pub async fn reconnect_with_backoff(&mut self, cancel: &CancellationToken) -> Result<EventReceiver> {
        let mut backoff = RECONNECT_INITIAL_BACKOFF;

        loop {
            if cancel.is_cancelled() {
                return Err(ClientError::NotConnected);
            }

            let _ = self.disconnect().await;

            let attempt = async {
                let events = self.connect().await?;
                self.subscribe().await?;
                self.authorize().await?;
                Result::Ok(events)
            }
            .await;

            match attempt {
                Ok(events) => return Ok(events),
                Err(err) => {
                    warn!("reconnect failed: {err}, retrying in {backoff:?}");

                    let jitter = rand::rng().random_range(0.8..1.2);
                    let delay = backoff.mul_f64(jitter);

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(ClientError::NotConnected),
                    }

                    backoff = (backoff * 2).min(RECONNECT_MAX_BACKOFF);
                }
            }
        }
    }

    /// Repoints future connections at a different `host:port`, as requested
    /// by a `client.reconnect` notification. Takes effect on the next
    /// [`Client::connect`]/[`Client::reconnect_with_backoff`] call.
    pub fn set_address(&mut self, address: String) {
        let mut config = (*self.config).clone();
        config.address = address;
        self.config = Arc::new(config);
    }

    pub async fn disconnect(&self) -> Result<()> {
        let _ = self.tx.send(ActorMessage::Disconnect).await;
        Ok(())
    }

    async fn send_request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<(oneshot::Receiver<Result<(Message, usize)>>, Instant)> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();

        let instant = Instant::now();

        self.tx
            .send(ActorMessage::Request {
                id,
                method: method.to_string(),
                params,
                tx,
            })
            .await
            .map_err(|_| ClientError::NotConnected)?;

        Ok((rx, instant))
    }

    fn next_id(&self) -> Id {
        Id::Number(self.id_counter.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn configure(
        &self,
        extensions: Vec<String>,
        version_rolling_mask: Option<Version>,
    ) -> Result<(ConfigureResponse, Duration, usize)> {
        let (rx, instant) = self
            .send_request(
                "mining.configure",
                serde_json::to_value(Configure {
                    extensions,
                    minimum_difficulty_value: None,
                    version_rolling_mask,
                    version_rolling_min_bit_count: None,
                })
                .context(error::SerializationSnafu)?,
            )
            .await?;

        let (message, bytes_read) = rx
            .await
            .map_err(|e| ClientError::ChannelRecv { source: e })??;

        let duration = instant.elapsed();

        match message {
            Message::Response {
                result: Some(result),
                error: None,
                ..
            } => Ok((
                serde_json::from_value(result).context(error::SerializationSnafu)?,
                duration,
                bytes_read,
            )),
            Message::Response {
                error: Some(response),
                ..
            } => Err(ClientError::Stratum { response }),
            _ => Err(ClientError::Protocol {
                message: "unhandled response to mining.configure".to_string(),
            }),
        }
    }

    pub async fn subscribe(&self) -> Result<(SubscribeResult, Duration, usize)> {
        let (rx, instant) = self
            .send_request(
                "mining.subscribe",
                serde_json::to_value(Subscribe {
                    user_agent: self.config.user_agent.clone(),
                    enonce1: None,
                })
                .context(error::SerializationSnafu)?,
            )
            .await?;

        let (message, bytes_read) = rx
            .await
            .map_err(|e| ClientError::ChannelRecv { source: e })??;

        let duration = instant.elapsed();

        match message {
            Message::Response {
                result: Some(result),
                error: None,
                ..
            } => Ok((
                serde_json::from_value(result).context(error::SerializationSnafu)?,
                duration,
                bytes_read,
            )),
            Message::Response {
                error: Some(response),
                ..
            } => Err(ClientError::Stratum { response }),
            _ => Err(ClientError::Protocol {
                message: "unhandled response to mining.subscribe".to_string(),
            }),
        }
    }

    pub async fn authorize(&self) -> Result<(Duration, usize)> {
        let (rx, instant) = self
            .send_request(
                "mining.authorize",
                serde_json::to_value(Authorize {
                    username: self.config.username.clone(),
                    password: Some(
                        self.config
                            .password
                            .clone()
                            .unwrap_or_else(|| "x".to_string()),
                    ),
                })
                .context(error::SerializationSnafu)?,
            )
            .await?;

        let (message, bytes_read) = rx
            .await
            .map_err(|e| ClientError::ChannelRecv { source: e })??;

        let duration = instant.elapsed();

        match message {
            Message::Response {
                result: Some(result),
                error: None,
                ..
            } => {
                if serde_json::from_value(result).context(error::SerializationSnafu)? {
                    Ok((duration, bytes_read))
                } else {
                    Err(ClientError::Protocol {
                        message: "unauthorized".to_string(),
                    })
                }
            }
            Message::Response {
                error: Some(response),
                ..
            } => Err(ClientError::Stratum { response }),
            _ => Err(ClientError::Protocol {
                message: "unhandled response to mining.authorize".to_string(),
            }),
        }
    }

    pub async fn submit(
        &self,
        job_id: JobId,
        extranonce2: Extranonce,
        ntime: Ntime,
        nonce: Nonce,
        version_bits: Option<Version>,
    ) -> Result<Submit> {
        let permit = self.submit_permits.clone().try_acquire_owned().map_err(|_| {
            ClientError::RateLimited {
                in_flight: MAX_IN_FLIGHT_SUBMISSIONS,
            }
        })?;

        let submit = Submit {
            username: self.config.username.clone(),
            job_id,
            extranonce2,
            ntime,
            nonce,
            version_bits,
        };

        let (rx, _) = self
            .send_request(
                "mining.submit",
                serde_json::to_value(&submit).context(error::SerializationSnafu)?,
            )
            .await?;

        let (message, _) = match tokio::time::timeout(SUBMISSION_TIMEOUT, rx).await {
            Ok(recv) => recv.map_err(|e| ClientError::ChannelRecv { source: e })??,
            Err(_) => {
                return Err(ClientError::Lost {
                    after: SUBMISSION_TIMEOUT,
                });
            }
        };

        drop(permit);

        match message {
            Message::Response {
                result: Some(result),
                error: None,
                reject_reason: None,
                ..
            } => {
                serde_json::from_value::<Value>(result).context(error::SerializationSnafu)?;
            }
            Message::Response {
                error: Some(response),
                ..
            } => return Err(ClientError::Stratum { response }),
            Message::Response {
                reject_reason: Some(reason),
                ..
            } => {
                return Err(ClientError::Protocol {
                    message: format!("share rejected: {reason}"),
                });
            }
            _ => {
                return Err(ClientError::Protocol {
                    message: "unhandled response to mining.submit".to_string(),
                });
            }
        }

        Ok(submit)
    }
}

struct Connection {
    config: Arc<ClientConfig>,
    rx: mpsc::Receiver<ActorMessage>,
    events: broadcast::Sender<Event>,
    pending: BTreeMap<Id, oneshot::Sender<Result<(Message, usize)>>>,
}

impl Connection {
    fn new(
        config: Arc<ClientConfig>,
        rx: mpsc::Receiver<ActorMessage>,
        events: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            config,
            rx,
            events,
            pending: BTreeMap::new(),
        }
    }

    async fn run(mut self) -> Result<()> {
        let stream = tokio::time::timeout(
            self.config.timeout,
            TcpStream::connect(&self.config.address),
        )
        .await
        .context(error::TimeoutSnafu)?
        .context(error::IoSnafu)?;

        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);

        let mut line = String::new();

        loop {
            line.clear();

            tokio::select! {
                msg = self.rx.recv() => {
                    match msg {
                        Some(ActorMessage::Request { id, method, params, tx }) => {
                            let msg = Message::Request {
                                id: id.clone(),
                                method,
                                params,
                            };
                            let frame = match serde_json::to_string(&msg) {
                                Ok(f) => f + "\n",
                                Err(e) => {
                                    let _ = tx.send(Err(ClientError::Serialization { source: e }));
                                    continue;
                                }
                            };

                            if let Err(e) = writer.write_all(frame.as_bytes()).await {
                                let _ = tx.send(Err(ClientError::Io { source: e }));
                                break;
                            }
                            if let Err(e) = writer.flush().await {
                                let _ = tx.send(Err(ClientError::Io { source: e }));
                                break;
                            }

                            self.pending.insert(id, tx);
                        }
                        Some(ActorMessage::Disconnect) => break,
                        None => break,
                    }
                }

                // Stratum servers are not required to send anything but
                // `mining.notify` periodically; a read that sits idle far past
                // that cadence indicates a dead connection.
                read_result = tokio::time::timeout(Duration::from_secs(240), reader.read_line(&mut line)) => {
                    let read_result = match read_result {
                        Ok(r) => r,
                        Err(_) => {
                            warn!("no data from stratum server in 240s, disconnecting");
                            break;
                        }
                    };

                    let bytes_read = match read_result {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(e) => {
                            error!("read error: {e}");
                            break;
                        }
                    };

                    let msg: Message = match serde_json::from_str(&line) {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!("invalid JSON message: {line:?} - {e}");
                            continue;
                        }
                    };

                    match msg {
                        Message::Response { id, result, error, reject_reason } => {
                            if let Some(tx) = self.pending.remove(&id) {
                                let _ = tx.send(Ok((
                                    Message::Response { id, result, error, reject_reason },
                                    bytes_read
                                )));
                            } else {
                                warn!("unmatched response id={id}: {line}");
                            }
                        }
                        Message::Notification { method, params } => {
                            self.handle_notification(method, params).await;
                        }
                        _ => warn!("unexpected message type: {msg:?}"),
                    }
                }
            }
        }

        let pending = std::mem::take(&mut self.pending);
        for (_, tx) in pending {
            let _ = tx.send(Err(ClientError::NotConnected));
        }

        let _ = self.events.send(Event::Disconnected);

        Ok(())
    }

    async fn handle_notification(&self, method: String, params: Value) {
        match method.as_str() {
            "mining.notify" => match serde_json::from_value::<Notify>(params) {
                Ok(notify) => {
                    let _ = self.events.send(Event::Notify(notify));
                }
                Err(e) => warn!("failed to parse mining.notify: {e}"),
            },
            "mining.set_difficulty" => match serde_json::from_value::<SetDifficulty>(params) {
                Ok(set_diff) => {
                    let _ = self
                        .events
                        .send(Event::SetDifficulty(set_diff.difficulty()));
                }
                Err(e) => warn!("failed to parse mining.set_difficulty: {e}"),
            },
            "client.reconnect" => match serde_json::from_value::<Vec<Value>>(params) {
                Ok(fields) => {
                    let host = fields
                        .first()
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string);
                    let port = fields.get(1).and_then(|v| {
                        v.as_u64().map(|n| n as u16).or_else(|| {
                            v.as_str().and_then(|s| s.parse().ok())
                        })
                    });
                    let wait_seconds = fields.get(2).and_then(Value::as_u64);

                    let _ = self.events.send(Event::ClientReconnect {
                        host,
                        port,
                        wait_seconds,
                    });
                }
                Err(e) => warn!("failed to parse client.reconnect: {e}"),
            },
            _ => warn!("unhandled notification: {method}"),
        }
    }
}
