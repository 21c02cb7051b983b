// tests/relay_server.rs - Relay behavior over real WebSocket connections

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use chatsim::bot::{BroadcastRelay, ChatSink, UsernameAuditLog};
use chatsim::types::ChatEnvelope;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_relay(dir: &std::path::Path) -> (Arc<BroadcastRelay>, String) {
    let audit_log = Arc::new(UsernameAuditLog::open(dir.join("logs").join("usernames.log")).await);
    let relay = Arc::new(BroadcastRelay::new(audit_log));
    let listener = BroadcastRelay::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(Arc::clone(&relay).serve(listener));
    (relay, url)
}

async fn connect(relay: &BroadcastRelay, url: &str, expected_viewers: usize) -> Client {
    let (client, _) = connect_async(url).await.unwrap();
    for _ in 0..100 {
        if relay.viewer_count().await >= expected_viewers {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    client
}

async fn next_envelope(client: &mut Client) -> ChatEnvelope {
    let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out waiting for a frame")
        .unwrap()
        .unwrap();
    match frame {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("unexpected frame {:?}", other),
    }
}

#[test_log::test(tokio::test)]
async fn client_frame_reaches_every_viewer_and_is_logged_once() {
    let temp_dir = tempdir().unwrap();
    let (relay, url) = start_relay(temp_dir.path()).await;
    let mut sender = connect(&relay, &url, 1).await;
    let mut watcher = connect(&relay, &url, 2).await;

    let frame = r#"{"type":"chat","payload":{"username":"Alice","usernameClass":"text-red-600","text":"hi all"}}"#;
    sender.send(Message::Text(frame.to_string())).await.unwrap();
    sender.send(Message::Text(frame.replace("Alice", "alice"))).await.unwrap();

    for client in [&mut sender, &mut watcher] {
        let first = next_envelope(client).await;
        let second = next_envelope(client).await;
        assert_eq!(first.payload().username.as_deref(), Some("Alice"));
        assert_eq!(first.payload().username_class, "text-red-600");
        assert_eq!(second.payload().username.as_deref(), Some("alice"));
    }

    let content = tokio::fs::read_to_string(temp_dir.path().join("logs").join("usernames.log"))
        .await
        .unwrap();
    assert_eq!(content, "Alice\n");
}

#[test_log::test(tokio::test)]
async fn published_batches_keep_order() {
    let temp_dir = tempdir().unwrap();
    let (relay, url) = start_relay(temp_dir.path()).await;
    let mut viewer = connect(&relay, &url, 1).await;

    let batch: Vec<ChatEnvelope> = (0..5)
        .map(|i| ChatEnvelope::chat(Some(format!("user{}", i)), "text-sky-600", format!("line {}", i)))
        .collect();
    assert_eq!(relay.publish(&batch).await, 5);

    for i in 0..5 {
        assert_eq!(next_envelope(&mut viewer).await.payload().text, format!("line {}", i));
    }
    assert!(relay.audit_log().contains("USER3").await);
}

#[test_log::test(tokio::test)]
async fn disconnected_viewer_is_dropped() {
    let temp_dir = tempdir().unwrap();
    let (relay, url) = start_relay(temp_dir.path()).await;
    let mut leaving = connect(&relay, &url, 1).await;
    let mut staying = connect(&relay, &url, 2).await;

    leaving.close(None).await.unwrap();
    for _ in 0..100 {
        if relay.viewer_count().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(relay.viewer_count().await, 1);

    relay.broadcast(&ChatEnvelope::chat(None, "", "still live")).await;
    let envelope = next_envelope(&mut staying).await;
    assert_eq!(envelope.payload().username, None);
    assert_eq!(envelope.payload().text, "still live");
}

#[test_log::test(tokio::test)]
async fn malformed_frames_are_ignored() {
    let temp_dir = tempdir().unwrap();
    let (relay, url) = start_relay(temp_dir.path()).await;
    let mut client = connect(&relay, &url, 1).await;

    client.send(Message::Text("{not json".to_string())).await.unwrap();
    client
        .send(Message::Text(r#"{"type":"chat","payload":{"username":null,"text":"ok"}}"#.to_string()))
        .await
        .unwrap();

    let envelope = next_envelope(&mut client).await;
    assert_eq!(envelope.payload().text, "ok");
    assert_eq!(relay.audit_log().len().await, 0);
}
