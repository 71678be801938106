// Jetstream source: live commit events over WebSocket.
//
// Jetstream (github.com/bluesky-social/jetstream) re-encodes the relay
// firehose as JSON frames and supports server-side collection filtering
// via `wantedCollections`. We subscribe to exactly the collections that
// have handlers registered.
//
// The source owns reconnection: on any disconnect it backs off and
// reconnects with `cursor=<last time_us>` so the stream resumes where it
// left off. With a CursorCheckpoint attached the cursor also survives
// process restarts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::model::{Collection, CommitEvent};
use super::source::{CommitHandler, CursorCheckpoint, EventSource, HandlerRegistry, StreamObserver};
use crate::retry::Backoff;

/// Default public Jetstream endpoint.
pub const DEFAULT_JETSTREAM_URL: &str = "wss://jetstream2.us-east.bsky.network/subscribe";

/// Minimum time between cursor checkpoints while streaming.
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(5);

/// How long `close()` waits for the reader task before aborting it.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A parsed Jetstream frame.
#[derive(Debug)]
pub enum Frame {
    /// A record creation in a known collection.
    Create(CommitEvent),
    /// Anything else (identity/account events, updates, deletes, other
    /// collections). Only the stream position is of interest.
    Skipped { time_us: Option<i64> },
}

impl Frame {
    pub fn time_us(&self) -> Option<i64> {
        match self {
            Frame::Create(event) => event.time_us,
            Frame::Skipped { time_us } => *time_us,
        }
    }
}

#[derive(Deserialize)]
struct RawFrame {
    did: String,
    time_us: Option<i64>,
    kind: String,
    commit: Option<RawCommit>,
}

#[derive(Deserialize)]
struct RawCommit {
    operation: String,
    collection: String,
    rkey: String,
    record: Option<serde_json::Value>,
    cid: Option<String>,
}

/// Parse one Jetstream JSON frame. Returns `None` if the text is not a
/// frame at all; frames we don't care about come back as `Skipped`.
pub fn parse_frame(text: &str) -> Option<Frame> {
    let raw: RawFrame = serde_json::from_str(text).ok()?;

    let skipped = Frame::Skipped {
        time_us: raw.time_us,
    };

    if raw.kind != "commit" {
        return Some(skipped);
    }
    let Some(commit) = raw.commit else {
        return Some(skipped);
    };
    if commit.operation != "create" {
        return Some(skipped);
    }
    let Some(collection) = Collection::from_nsid(&commit.collection) else {
        return Some(skipped);
    };

    Some(Frame::Create(CommitEvent {
        actor_did: raw.did,
        collection,
        record_key: commit.rkey,
        cid: commit.cid,
        record: commit.record.unwrap_or(serde_json::Value::Null),
        time_us: raw.time_us,
    }))
}

/// Build the subscribe URL for the given collections and resume cursor.
pub fn subscribe_url(
    endpoint: &str,
    collections: &[Collection],
    cursor: Option<i64>,
) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(endpoint)
        .with_context(|| format!("Invalid Jetstream URL: {endpoint}"))?;
    {
        let mut query = url.query_pairs_mut();
        for collection in collections {
            query.append_pair("wantedCollections", collection.nsid());
        }
        if let Some(cursor) = cursor {
            query.append_pair("cursor", &cursor.to_string());
        }
    }
    Ok(url)
}

struct RunningStream {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Live Jetstream event source with reconnection and optional checkpointing.
pub struct JetstreamSource {
    endpoint: String,
    registry: Arc<HandlerRegistry>,
    checkpoint: Option<Arc<dyn CursorCheckpoint>>,
    /// Ignore any saved cursor and start at the live edge.
    from_live_edge: bool,
    /// How long `close()` waits before aborting the reader task.
    close_timeout: Duration,
    running: Mutex<Option<RunningStream>>,
}

impl JetstreamSource {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            registry: Arc::new(HandlerRegistry::new()),
            checkpoint: None,
            from_live_edge: false,
            close_timeout: CLOSE_TIMEOUT,
            running: Mutex::new(None),
        }
    }

    /// Persist the stream cursor through `checkpoint` and resume from it on start.
    pub fn with_checkpoint(mut self, checkpoint: Arc<dyn CursorCheckpoint>) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Skip the saved cursor on the next start (it is still written).
    pub fn from_live_edge(mut self, live: bool) -> Self {
        self.from_live_edge = live;
        self
    }

    async fn initial_cursor(&self) -> Option<i64> {
        if self.from_live_edge {
            return None;
        }
        let checkpoint = self.checkpoint.as_ref()?;
        match checkpoint.load_cursor().await {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(error = %e, "Failed to load saved cursor, starting at live edge");
                None
            }
        }
    }
}

#[async_trait]
impl EventSource for JetstreamSource {
    fn on_create(&self, collection: Collection, handler: Arc<dyn CommitHandler>) {
        self.registry.register(collection, handler);
    }

    fn observe(&self, observer: Arc<dyn StreamObserver>) {
        self.registry.observe(observer);
    }

    async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        // Validate the endpoint up front so misconfiguration fails loudly
        subscribe_url(&self.endpoint, &self.registry.collections(), None)?;

        let cursor = self.initial_cursor().await;
        if let Some(cursor) = cursor {
            info!(cursor, "Resuming Jetstream from saved cursor");
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let stream = StreamLoop {
            endpoint: self.endpoint.clone(),
            registry: self.registry.clone(),
            checkpoint: self.checkpoint.clone(),
            cursor,
        };
        let handle = tokio::spawn(stream.run(shutdown_rx));

        *running = Some(RunningStream { shutdown, handle });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let Some(mut stream) = self.running.lock().await.take() else {
            return Ok(());
        };

        let _ = stream.shutdown.send(true);
        match tokio::time::timeout(self.close_timeout, &mut stream.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Jetstream task ended abnormally"),
            Err(_) => {
                // A handler is stuck; the task must not outlive close()
                warn!(
                    "Jetstream task did not stop within {:?}, aborting",
                    self.close_timeout
                );
                stream.handle.abort();
                let _ = stream.handle.await;
            }
        }
        Ok(())
    }
}

/// Why a single connection ended.
enum Disconnect {
    Shutdown,
    Remote,
}

/// State owned by the background reader task.
struct StreamLoop {
    endpoint: String,
    registry: Arc<HandlerRegistry>,
    checkpoint: Option<Arc<dyn CursorCheckpoint>>,
    cursor: Option<i64>,
}

impl StreamLoop {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let url = match subscribe_url(&self.endpoint, &self.registry.collections(), self.cursor)
            {
                Ok(url) => url,
                Err(e) => {
                    self.registry.signal_error(&e, self.cursor);
                    break;
                }
            };

            debug!(url = %url, "Connecting to Jetstream");

            let connected = tokio::select! {
                result = connect_async(url.as_str()) => result,
                _ = shutdown.changed() => break,
            };

            match connected {
                Ok((ws, _response)) => {
                    attempt = 0;
                    self.registry.signal_open();

                    let outcome = self.pump(ws, &mut shutdown).await;
                    self.registry.signal_close();
                    self.save_cursor().await;

                    match outcome {
                        Ok(Disconnect::Shutdown) => break,
                        Ok(Disconnect::Remote) => {}
                        Err(e) => self.registry.signal_error(&e, self.cursor),
                    }
                }
                Err(e) => {
                    let e = anyhow::Error::new(e).context("Failed to connect to Jetstream");
                    self.registry.signal_error(&e, self.cursor);
                }
            }

            attempt = attempt.saturating_add(1);
            let delay = Backoff::RECONNECT.delay(attempt);
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to Jetstream"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.save_cursor().await;
    }

    /// Read frames until the connection drops or shutdown is requested.
    async fn pump(
        &mut self,
        mut ws: WsStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Disconnect> {
        let mut last_checkpoint = Instant::now();

        loop {
            let message = tokio::select! {
                message = ws.next() => message,
                _ = shutdown.changed() => {
                    let _ = ws.close(None).await;
                    return Ok(Disconnect::Shutdown);
                }
            };

            let Some(message) = message else {
                return Ok(Disconnect::Remote);
            };

            match message.context("Jetstream read failed")? {
                Message::Text(text) => self.handle_text(&text).await,
                Message::Close(frame) => {
                    debug!(frame = ?frame, "Jetstream sent close frame");
                    return Ok(Disconnect::Remote);
                }
                // Pings are answered by tungstenite itself
                _ => {}
            }

            if last_checkpoint.elapsed() >= CHECKPOINT_INTERVAL {
                self.save_cursor().await;
                last_checkpoint = Instant::now();
            }
        }
    }

    async fn handle_text(&mut self, text: &str) {
        let Some(frame) = parse_frame(text) else {
            debug!(len = text.len(), "Unparsable Jetstream frame");
            return;
        };

        if let Some(time_us) = frame.time_us() {
            self.cursor = Some(time_us);
        }

        if let Frame::Create(event) = frame {
            self.registry.dispatch(event).await;
        }
    }

    async fn save_cursor(&self) {
        let (Some(checkpoint), Some(cursor)) = (&self.checkpoint, self.cursor) else {
            return;
        };
        if let Err(e) = checkpoint.save_cursor(cursor).await {
            warn!(error = %e, cursor, "Failed to save Jetstream cursor");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures::SinkExt;
    use tokio::net::TcpListener;
    use tokio::sync::Notify;
    use tokio_tungstenite::accept_hdr_async;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    #[test]
    fn test_parse_like_create() {
        let text = r#"{
            "did": "did:plc:alice",
            "time_us": 1725911162329308,
            "kind": "commit",
            "commit": {
                "rev": "3l3qo2vutsw2b",
                "operation": "create",
                "collection": "app.bsky.feed.like",
                "rkey": "3l3qo2vuowo2b",
                "record": {
                    "$type": "app.bsky.feed.like",
                    "createdAt": "2024-09-09T19:46:02.102Z",
                    "subject": {
                        "cid": "bafyreidc6sydkkbchcyg62v77wbhzvb2mvytlmsychqgwf2xojjtirmzj4",
                        "uri": "at://did:plc:bob/app.bsky.feed.post/3l3pte3p2e325"
                    }
                },
                "cid": "bafyreidwaivazkwu67xztlmuobx35hs2lnfh3kolmgfmucldvhd3sgzcqi"
            }
        }"#;

        let Some(Frame::Create(event)) = parse_frame(text) else {
            panic!("expected a create frame");
        };
        assert_eq!(event.actor_did, "did:plc:alice");
        assert_eq!(event.collection, Collection::Like);
        assert_eq!(event.record_key, "3l3qo2vuowo2b");
        assert_eq!(event.time_us, Some(1725911162329308));
        assert!(event.cid.is_some());
        assert_eq!(
            event.record["subject"]["uri"],
            "at://did:plc:bob/app.bsky.feed.post/3l3pte3p2e325"
        );
    }

    #[test]
    fn test_parse_delete_is_skipped() {
        let text = r#"{"did":"did:plc:a","time_us":42,"kind":"commit",
            "commit":{"operation":"delete","collection":"app.bsky.feed.like","rkey":"x"}}"#;
        let frame = parse_frame(text).unwrap();
        assert!(matches!(frame, Frame::Skipped { time_us: Some(42) }));
    }

    #[test]
    fn test_parse_identity_event_is_skipped() {
        let text = r#"{"did":"did:plc:a","time_us":7,"kind":"identity",
            "identity":{"did":"did:plc:a","handle":"a.bsky.social","seq":1}}"#;
        let frame = parse_frame(text).unwrap();
        assert_eq!(frame.time_us(), Some(7));
        assert!(matches!(frame, Frame::Skipped { .. }));
    }

    #[test]
    fn test_parse_unknown_collection_is_skipped() {
        let text = r#"{"did":"did:plc:a","time_us":9,"kind":"commit",
            "commit":{"operation":"create","collection":"app.bsky.graph.block","rkey":"x","record":{}}}"#;
        assert!(matches!(parse_frame(text), Some(Frame::Skipped { .. })));
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(parse_frame("").is_none());
        assert!(parse_frame("not json").is_none());
        assert!(parse_frame(r#"{"kind":"commit"}"#).is_none());
    }

    #[test]
    fn test_subscribe_url_lists_collections_and_cursor() {
        let url = subscribe_url(
            DEFAULT_JETSTREAM_URL,
            &[Collection::Follow, Collection::Post],
            Some(1234),
        )
        .unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("wantedCollections=app.bsky.graph.follow"));
        assert!(query.contains("wantedCollections=app.bsky.feed.post"));
        assert!(query.contains("cursor=1234"));
    }

    #[test]
    fn test_subscribe_url_without_cursor() {
        let url = subscribe_url(DEFAULT_JETSTREAM_URL, &Collection::ALL, None).unwrap();
        assert!(!url.query().unwrap().contains("cursor"));
    }

    #[test]
    fn test_subscribe_url_rejects_garbage() {
        assert!(subscribe_url("not a url", &Collection::ALL, None).is_err());
    }

    // -- Local Jetstream stand-in --

    /// Serve scripted sessions on 127.0.0.1. Each accepted connection gets
    /// the next batch of frames and is then closed; connections beyond the
    /// script get `then` and stay open. Returns the endpoint and the request
    /// URIs seen so far.
    async fn serve(
        sessions: Vec<Vec<String>>,
        then: Vec<String>,
    ) -> (String, Arc<std::sync::Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let uris = Arc::new(std::sync::Mutex::new(Vec::new()));

        let seen = uris.clone();
        tokio::spawn(async move {
            let mut sessions = sessions.into_iter();
            let mut idle = Vec::new();
            while let Ok((tcp, _)) = listener.accept().await {
                let seen = seen.clone();
                let record_uri = move |request: &Request, response: Response| {
                    seen.lock().unwrap().push(request.uri().to_string());
                    Ok::<_, ErrorResponse>(response)
                };
                let Ok(mut ws) = accept_hdr_async(tcp, record_uri).await else {
                    continue;
                };
                match sessions.next() {
                    Some(frames) => {
                        for frame in frames {
                            ws.send(Message::Text(frame.into())).await.unwrap();
                        }
                        let _ = ws.close(None).await;
                        while let Some(Ok(_)) = ws.next().await {}
                    }
                    None => {
                        for frame in &then {
                            ws.send(Message::Text(frame.clone().into())).await.unwrap();
                        }
                        idle.push(ws);
                    }
                }
            }
        });

        (format!("ws://{addr}/subscribe"), uris)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async move {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    struct MemoryCheckpoint {
        initial: Option<i64>,
        saved: std::sync::Mutex<Vec<i64>>,
    }

    impl MemoryCheckpoint {
        fn starting_at(initial: Option<i64>) -> Self {
            Self {
                initial,
                saved: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn saved(&self) -> Vec<i64> {
            self.saved.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CursorCheckpoint for MemoryCheckpoint {
        async fn load_cursor(&self) -> Result<Option<i64>> {
            Ok(self.initial)
        }

        async fn save_cursor(&self, cursor: i64) -> Result<()> {
            self.saved.lock().unwrap().push(cursor);
            Ok(())
        }
    }

    #[derive(Default)]
    struct SignalLog {
        signals: std::sync::Mutex<Vec<&'static str>>,
        error_cursors: std::sync::Mutex<Vec<Option<i64>>>,
    }

    impl SignalLog {
        fn signals(&self) -> Vec<&'static str> {
            self.signals.lock().unwrap().clone()
        }

        fn error_cursors(&self) -> Vec<Option<i64>> {
            self.error_cursors.lock().unwrap().clone()
        }
    }

    impl StreamObserver for SignalLog {
        fn on_open(&self) {
            self.signals.lock().unwrap().push("open");
        }

        fn on_close(&self) {
            self.signals.lock().unwrap().push("close");
        }

        fn on_error(&self, _error: &anyhow::Error, cursor: Option<i64>) {
            self.error_cursors.lock().unwrap().push(cursor);
        }
    }

    #[derive(Default)]
    struct Collect(std::sync::Mutex<Vec<CommitEvent>>);

    #[async_trait]
    impl CommitHandler for Collect {
        async fn on_commit(&self, event: CommitEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    const LIKE_AT_100: &str = r#"{"did":"did:plc:a","time_us":100,"kind":"commit","commit":{"operation":"create","collection":"app.bsky.feed.like","rkey":"l1","record":{"subject":{"uri":"at://did:plc:b/app.bsky.feed.post/p"}}}}"#;
    const IDENTITY_AT_200: &str = r#"{"did":"did:plc:a","time_us":200,"kind":"identity"}"#;

    #[tokio::test]
    async fn test_reconnects_from_last_cursor_and_checkpoints() {
        let (endpoint, uris) =
            serve(vec![vec![LIKE_AT_100.to_string(), IDENTITY_AT_200.to_string()]], Vec::new())
                .await;
        let checkpoint = Arc::new(MemoryCheckpoint::starting_at(Some(50)));
        let signals = Arc::new(SignalLog::default());
        let collect = Arc::new(Collect::default());

        let source = JetstreamSource::new(&endpoint).with_checkpoint(checkpoint.clone());
        source.on_create(Collection::Like, collect.clone());
        source.observe(signals.clone());
        source.start().await.unwrap();

        wait_for(|| uris.lock().unwrap().len() >= 2 && signals.signals().len() >= 3).await;

        let uris = uris.lock().unwrap().clone();
        assert!(uris[0].contains("cursor=50"), "resumes from saved cursor: {}", uris[0]);
        assert!(uris[0].contains("wantedCollections=app.bsky.feed.like"));
        // Skipped frames still advance the cursor
        assert!(uris[1].contains("cursor=200"), "reconnects from last seen: {}", uris[1]);
        assert_eq!(signals.signals(), vec!["open", "close", "open"]);
        assert!(checkpoint.saved().contains(&200));

        let events = collect.0.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time_us, Some(100));

        source.close().await.unwrap();
        assert_eq!(signals.signals().last(), Some(&"close"));
        assert_eq!(checkpoint.saved().last(), Some(&200));
    }

    #[tokio::test]
    async fn test_from_live_edge_skips_saved_cursor() {
        let (endpoint, uris) = serve(Vec::new(), Vec::new()).await;
        let source = JetstreamSource::new(&endpoint)
            .with_checkpoint(Arc::new(MemoryCheckpoint::starting_at(Some(50))))
            .from_live_edge(true);
        source.start().await.unwrap();

        wait_for(|| !uris.lock().unwrap().is_empty()).await;
        source.close().await.unwrap();

        assert!(!uris.lock().unwrap()[0].contains("cursor="));
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error_with_cursor() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let signals = Arc::new(SignalLog::default());
        let source = JetstreamSource::new(&format!("ws://{addr}/subscribe"))
            .with_checkpoint(Arc::new(MemoryCheckpoint::starting_at(Some(77))));
        source.observe(signals.clone());
        source.start().await.unwrap();

        wait_for(|| !signals.error_cursors().is_empty()).await;
        source.close().await.unwrap();

        assert_eq!(signals.error_cursors()[0], Some(77));
        assert!(signals.signals().is_empty());
    }

    /// Blocks forever on the first event; records when its future is dropped.
    struct StuckHandler {
        started: Notify,
        dropped: Arc<AtomicBool>,
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl CommitHandler for StuckHandler {
        async fn on_commit(&self, _event: CommitEvent) {
            let _flag = SetOnDrop(self.dropped.clone());
            self.started.notify_one();
            std::future::pending::<()>().await;
        }
    }

    #[tokio::test]
    async fn test_close_aborts_task_stuck_in_handler() {
        // A connection that delivers one like and then stays open
        let (endpoint, _uris) = serve(Vec::new(), vec![LIKE_AT_100.to_string()]).await;
        let handler = Arc::new(StuckHandler {
            started: Notify::new(),
            dropped: Arc::new(AtomicBool::new(false)),
        });

        let mut source = JetstreamSource::new(&endpoint);
        source.close_timeout = Duration::from_millis(100);
        source.on_create(Collection::Like, handler.clone());
        source.start().await.unwrap();

        tokio::time::timeout(Duration::from_secs(10), handler.started.notified())
            .await
            .expect("handler never ran");

        source.close().await.unwrap();
        assert!(handler.dropped.load(Ordering::SeqCst));
        assert!(source.running.lock().await.is_none());
    }
}
