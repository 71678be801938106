// Composition tests: verifying that the stages chain together correctly.
//
// These tests exercise the data flow between modules:
//   Jetstream frame -> CommitEvent -> classify -> compose -> push payload
// and the SQLite store behind the dispatcher, using an in-memory database.
// No network calls.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::json;

use firebell::classify::classify;
use firebell::events::jetstream::{parse_frame, Frame};
use firebell::events::replay::ReplaySource;
use firebell::events::CursorCheckpoint;
use firebell::notify::compose::compose;
use firebell::notify::gateway::PushRequest;
use firebell::notify::{InteractionReason, NotificationMessage, PushNotifier};
use firebell::pipeline::Dispatcher;
use firebell::subscriptions::{schema, PushSubscription, SqliteStore, SubscriptionStore};

fn memory_store() -> SqliteStore {
    let conn = Connection::open_in_memory().unwrap();
    schema::create_tables(&conn).unwrap();
    SqliteStore::new(conn)
}

// ============================================================
// Chain: frame -> classify -> compose -> wire payload
// ============================================================

#[test]
fn like_frame_becomes_gateway_payload() {
    let frame = r#"{
        "did": "did:plc:eygmaihciaxprqvxpfvl6flk",
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
                    "uri": "at://did:plc:wa7b35aakoll7hugkrjtf3xf/app.bsky.feed.post/3l3pte3p2e325"
                }
            },
            "cid": "bafyreidwaivazkwu67xztlmuobx35hs2lnfh3kolmgfmucldvhd3sgzcqi"
        }
    }"#;

    let Some(Frame::Create(event)) = parse_frame(frame) else {
        panic!("expected a create frame");
    };
    let interaction = classify(&event).unwrap();
    assert_eq!(interaction.reason, InteractionReason::Like);
    assert_eq!(interaction.targets, vec!["did:plc:wa7b35aakoll7hugkrjtf3xf"]);

    let message = compose(
        interaction.reason,
        &interaction.actor_did,
        "@alice.bsky.social",
        &interaction.context,
    );
    assert_eq!(message.body, "@alice.bsky.social liked your post");

    let request =
        serde_json::to_value(PushRequest::new("ExponentPushToken[xyz]", &message)).unwrap();
    assert_eq!(request["to"], "ExponentPushToken[xyz]");
    assert_eq!(request["title"], "New like");
    assert_eq!(request["data"]["reason"], "like");
    assert_eq!(request["data"]["actorDid"], "did:plc:eygmaihciaxprqvxpfvl6flk");
    assert_eq!(
        request["data"]["subjectUri"],
        "at://did:plc:wa7b35aakoll7hugkrjtf3xf/app.bsky.feed.post/3l3pte3p2e325"
    );
    assert!(request["data"].get("replyUri").is_none());
}

#[test]
fn blank_reply_text_uses_generic_body() {
    let frame = json!({
        "did": "did:plc:a",
        "time_us": 5,
        "kind": "commit",
        "commit": {
            "operation": "create",
            "collection": "app.bsky.feed.post",
            "rkey": "r1",
            "record": {
                "text": "   ",
                "reply": {
                    "parent": {"uri": "at://did:plc:c/app.bsky.feed.post/p1"},
                    "root": {"uri": "at://did:plc:c/app.bsky.feed.post/p1"}
                }
            }
        }
    })
    .to_string();

    let Some(Frame::Create(event)) = parse_frame(&frame) else {
        panic!("expected a create frame");
    };
    let interaction = classify(&event).unwrap();
    let message = compose(
        interaction.reason,
        &interaction.actor_did,
        &interaction.actor_did,
        &interaction.context,
    );
    assert_eq!(message.title, "New reply");
    assert_eq!(message.body, "did:plc:a replied to your post");
}

// ============================================================
// Chain: SQLite store -> dispatcher -> notifier
// ============================================================

#[derive(Default)]
struct TokenRecorder {
    tokens: Mutex<Vec<(String, InteractionReason)>>,
}

#[async_trait]
impl PushNotifier<PushSubscription> for TokenRecorder {
    async fn send(
        &self,
        subscription: &PushSubscription,
        message: &NotificationMessage,
    ) -> Result<()> {
        self.tokens
            .lock()
            .unwrap()
            .push((subscription.push_token.clone(), message.data.reason));
        Ok(())
    }
}

#[tokio::test]
async fn registered_device_receives_follow() {
    let store = Arc::new(memory_store());
    store
        .register("did:plc:B", "ExponentPushToken[b]", "ios")
        .await
        .unwrap();

    let frames = vec![
        r#"{"did":"did:plc:a","time_us":1,"kind":"commit","commit":{"operation":"create","collection":"app.bsky.graph.follow","rkey":"f1","record":{"subject":"did:plc:b"}}}"#,
    ];
    let notifier = Arc::new(TokenRecorder::default());
    let dispatcher = Dispatcher::new(
        Arc::new(ReplaySource::from_lines(frames)),
        store.clone(),
        notifier.clone(),
    );

    dispatcher.start().await.unwrap();
    dispatcher.wait_idle().await;

    let tokens = notifier.tokens.lock().unwrap().clone();
    assert_eq!(
        tokens,
        vec![("ExponentPushToken[b]".to_string(), InteractionReason::Follow)]
    );
}

#[tokio::test]
async fn unregistered_device_receives_nothing() {
    let store = Arc::new(memory_store());
    store.register("did:plc:b", "tok", "expo").await.unwrap();
    assert!(store.unregister("did:plc:b").await.unwrap());
    assert!(store.get(Some("did:plc:b")).await.unwrap().is_none());

    let frames = vec![
        r#"{"did":"did:plc:a","time_us":1,"kind":"commit","commit":{"operation":"create","collection":"app.bsky.graph.follow","rkey":"f1","record":{"subject":"did:plc:b"}}}"#,
    ];
    let notifier = Arc::new(TokenRecorder::default());
    let dispatcher = Dispatcher::new(
        Arc::new(ReplaySource::from_lines(frames)),
        store,
        notifier.clone(),
    );
    dispatcher.start().await.unwrap();
    dispatcher.wait_idle().await;

    assert!(notifier.tokens.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cursor_checkpoint_survives_reopen() {
    let path = std::env::temp_dir().join(format!("firebell-cursor-{}.db", std::process::id()));
    let db_path = path.to_string_lossy().to_string();
    std::fs::remove_file(&path).ok();

    {
        let store = firebell::subscriptions::initialize(&db_path).unwrap();
        assert_eq!(store.load_cursor().await.unwrap(), None);
        store.save_cursor(1725911162329308).await.unwrap();
        store.save_cursor(1725911162329999).await.unwrap();
    }

    let store = firebell::subscriptions::open(&db_path).unwrap();
    assert_eq!(store.load_cursor().await.unwrap(), Some(1725911162329999));

    drop(store);
    for suffix in ["", "-wal", "-shm"] {
        std::fs::remove_file(format!("{db_path}{suffix}")).ok();
    }
}

#[test]
fn open_missing_database_fails() {
    let path = std::env::temp_dir().join("firebell-does-not-exist.db");
    let err = firebell::subscriptions::open(&path.to_string_lossy())
        .err()
        .expect("missing database should fail");
    assert!(err.to_string().contains("firebell init"));
}
