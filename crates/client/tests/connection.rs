//! Connection-level scenarios against a loopback WebSocket server.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

use parlor_client::protocol::{Envelope, PlayerId};
use parlor_client::{topics, ClientConfig, ConnectionManager, EventBus, SyncClient};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

async fn ws_server() -> Result<(TcpListener, String)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("ws://{}", listener.local_addr()?);
    Ok((listener, url))
}

async fn accept(listener: &TcpListener) -> Result<WebSocketStream<TcpStream>> {
    let (stream, _) = listener.accept().await?;
    Ok(accept_async(stream).await?)
}

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Result<Value> {
    loop {
        let message = timeout(Duration::from_secs(10), ws.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("connection closed"))??;
        if let Message::Text(text) = message {
            return Ok(serde_json::from_str(&text)?);
        }
    }
}

#[tokio::test]
async fn connect_identifies_and_reports_status() -> Result<()> {
    init_tracing();
    let (listener, url) = ws_server().await?;
    let bus = EventBus::new();

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    let _status_sub = bus.on(topics::STATUS, move |v| sink.lock().unwrap().push(v));

    let manager = ConnectionManager::new(url, bus);
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await?;
        next_json(&mut ws).await
    });

    manager.connect(Some(PlayerId::from("player-42"))).await;
    assert!(manager.is_connected());

    let identify = timeout(Duration::from_secs(10), server).await???;
    assert_eq!(
        identify,
        json!({ "type": "identify", "payload": { "player_id": "player-42" } })
    );

    let statuses = statuses.lock().unwrap().clone();
    assert_eq!(
        statuses.first(),
        Some(&json!({ "connected": false, "reconnecting": false, "attempt": 0 }))
    );
    assert!(statuses
        .iter()
        .any(|s| s == &json!({ "connected": true, "reconnecting": false, "attempt": 0 })));

    manager.shutdown();
    Ok(())
}

#[tokio::test]
async fn reconnects_with_backoff_and_reidentifies() -> Result<()> {
    init_tracing();
    let (listener, url) = ws_server().await?;
    let bus = EventBus::new();

    let reconnects = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&reconnects);
    let _reconnect_sub = bus.on(topics::RECONNECT, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let manager = ConnectionManager::new(url, bus);

    let server = tokio::spawn(async move {
        let mut first = accept(&listener).await?;
        let identify = next_json(&mut first).await?;
        first.close(None).await?;

        // The client schedules attempt 0 after the drop (1.5s), then opens a
        // second socket and identifies again.
        let mut second = accept(&listener).await?;
        let reidentify = next_json(&mut second).await?;
        Ok::<_, anyhow::Error>((identify, reidentify, second))
    });

    manager.connect(Some(PlayerId::from("player-retry"))).await;
    // The very first open is not a reconnection.
    assert_eq!(reconnects.load(Ordering::SeqCst), 0);

    let (identify, reidentify, _keep_alive) = timeout(Duration::from_secs(15), server).await???;
    let expected = json!({ "type": "identify", "payload": { "player_id": "player-retry" } });
    assert_eq!(identify, expected);
    assert_eq!(reidentify, expected);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(reconnects.load(Ordering::SeqCst), 1);
    assert!(manager.is_connected());

    manager.shutdown();
    Ok(())
}

#[tokio::test]
async fn inbound_frames_are_routed_and_bad_frames_dropped() -> Result<()> {
    init_tracing();
    let (listener, url) = ws_server().await?;
    let bus = EventBus::new();

    let kinded = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&kinded);
    let _kinded_sub = bus.on("event:envelopes_update", move |v| {
        sink.lock().unwrap().push(v)
    });
    let generic = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&generic);
    let _generic_sub = bus.on(topics::EVENT, move |v| sink.lock().unwrap().push(v));
    let notices = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&notices);
    let _notice_sub = bus.on("party_status", move |v| sink.lock().unwrap().push(v));

    let manager = ConnectionManager::new(url, bus);
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await?;
        ws.send(Message::Text("definitely not json".into())).await?;
        ws.send(Message::Text(
            json!({ "type": "event", "payload": { "kind": "envelopes_update", "id": "e1" } })
                .to_string(),
        ))
        .await?;
        ws.send(Message::Text(
            json!({ "type": "party_status", "payload": { "players_count": 6 } }).to_string(),
        ))
        .await?;
        Ok::<_, anyhow::Error>(ws)
    });

    manager.connect(None).await;
    let _keep_alive = timeout(Duration::from_secs(10), server).await???;
    tokio::time::sleep(Duration::from_millis(300)).await;

    // The malformed frame was dropped without killing the connection.
    assert!(manager.is_connected());
    let payload = json!({ "kind": "envelopes_update", "id": "e1" });
    assert_eq!(*kinded.lock().unwrap(), vec![payload.clone()]);
    assert_eq!(*generic.lock().unwrap(), vec![payload]);
    assert_eq!(
        *notices.lock().unwrap(),
        vec![json!({ "players_count": 6 })]
    );

    manager.shutdown();
    Ok(())
}

#[tokio::test]
async fn send_reaches_the_server_once_connected() -> Result<()> {
    init_tracing();
    let (listener, url) = ws_server().await?;
    let bus = EventBus::new();
    let manager = ConnectionManager::new(url, bus);

    // Nothing live yet: best-effort send reports failure without blocking.
    assert!(!manager.send(Envelope::new("chat", json!({ "text": "early" }))));

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await?;
        next_json(&mut ws).await
    });

    manager.connect(None).await;
    assert!(manager.send(Envelope::new("chat", json!({ "text": "hello" }))));

    let received = timeout(Duration::from_secs(10), server).await???;
    assert_eq!(
        received,
        json!({ "type": "chat", "payload": { "text": "hello" } })
    );

    manager.shutdown();
    Ok(())
}

#[tokio::test]
async fn sync_client_merges_pushed_events() -> Result<()> {
    init_tracing();
    let (listener, url) = ws_server().await?;
    let config = ClientConfig {
        ws_url: url,
        // No pull endpoint in this scenario; snapshot fetches fail and are
        // logged, which must not disturb the push path.
        api_base: "http://127.0.0.1:9".to_string(),
        ..ClientConfig::default()
    };
    let client = SyncClient::new(config);

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await?;
        let identify = next_json(&mut ws).await?;
        for (id, kind) in [("e1", "clue_found"), ("e1", "clue_found"), ("e2", "phase_change")] {
            ws.send(Message::Text(
                json!({ "type": "event", "payload": { "kind": kind, "id": id, "ts": 100 } })
                    .to_string(),
            ))
            .await?;
        }
        Ok::<_, anyhow::Error>((identify, ws))
    });

    client.connect(Some(PlayerId::from("p-1"))).await;
    let (identify, _keep_alive) = timeout(Duration::from_secs(10), server).await???;
    assert_eq!(
        identify,
        json!({ "type": "identify", "payload": { "player_id": "p-1" } })
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    let log = client.events();
    assert_eq!(log.len(), 2, "duplicate push ids must collapse");
    assert_eq!(log[0].id, "e1");
    assert_eq!(log[0].event_type, "clue_found");
    assert_eq!(log[1].id, "e2");

    client.shutdown();
    Ok(())
}
