use super::*;

/// A scripted Stratum server: binds an ephemeral port, accepts a single
/// connection, and lets a test drive the wire conversation line by line.
/// Stands in for the "mock Stratum server" referenced throughout the
/// design's end-to-end scenarios.
pub(crate) struct MockPool {
    listener: TcpListener,
}

pub(crate) struct MockConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl MockPool {
    pub(crate) async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self { listener }
    }

    pub(crate) fn address(&self) -> String {
        self.listener.local_addr().unwrap().to_string()
    }

    pub(crate) async fn accept(&self) -> MockConnection {
        let (stream, _) = self.listener.accept().await.unwrap();
        let (reader, writer) = stream.into_split();
        MockConnection {
            reader: BufReader::new(reader),
            writer,
        }
    }
}

impl MockConnection {
    /// Reads and parses the next `\n`-terminated JSON line the client sent.
    pub(crate) async fn recv(&mut self) -> Value {
        let mut line = String::new();
        let bytes = self.reader.read_line(&mut line).await.unwrap();
        assert!(bytes > 0, "connection closed before a line arrived");
        serde_json::from_str(&line).unwrap()
    }

    pub(crate) async fn send(&mut self, value: Value) {
        let mut line = serde_json::to_string(&value).unwrap();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    /// Responds to the request most recently read from `recv`, echoing its
    /// `id` alongside `result`.
    pub(crate) async fn respond(&mut self, request: &Value, result: Value) {
        self.send(json!({"id": request["id"], "result": result, "error": null}))
            .await;
    }

    pub(crate) async fn respond_with_error(&mut self, request: &Value, code: StratumErrorCode) {
        self.send(json!({
            "id": request["id"],
            "result": null,
            "error": [code.code(), code.message(), null],
        }))
        .await;
    }

    pub(crate) async fn notify(&mut self, params: Value) {
        self.send(json!({"id": null, "method": "mining.notify", "params": params}))
            .await;
    }

    pub(crate) async fn set_difficulty(&mut self, difficulty: f64) {
        self.send(json!({"id": null, "method": "mining.set_difficulty", "params": [difficulty]}))
            .await;
    }

    /// Completes `mining.subscribe` then `mining.authorize` with the given
    /// extranonce1/extranonce2_size, as every scenario needs this pair done
    /// before anything else is interesting.
    pub(crate) async fn subscribe_and_authorize(&mut self, enonce1: &str, enonce2_size: usize) {
        let subscribe = self.recv().await;
        assert_eq!(subscribe["method"], "mining.subscribe");
        self.respond(
            &subscribe,
            json!([[["mining.notify", "deadbeef"]], enonce1, enonce2_size]),
        )
        .await;

        let authorize = self.recv().await;
        assert_eq!(authorize["method"], "mining.authorize");
        self.respond(&authorize, json!(true)).await;
    }

    pub(crate) async fn close(self) {
        drop(self);
    }
}
