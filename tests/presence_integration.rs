//! Presence lifecycle over the wire: join notices, roster snapshots,
//! idempotent re-joins, clean and abrupt disconnects.

use std::sync::Arc;
use std::time::Duration;

use murmur_relay::{
    ClientEvent, ClientFrame, Identity, MemoryAttachmentStore, RelayClient, RelayConfig,
    RelayServer, ServerFrame,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn start_test_server() -> u16 {
    let port = free_port().await;
    let config = RelayConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        broadcast_capacity: 64,
        default_channel: "general".to_string(),
    };
    let server = RelayServer::new(config, Arc::new(MemoryAttachmentStore::default()));
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

async fn connect_as(identity: Identity, port: u16) -> (RelayClient, mpsc::Receiver<ClientEvent>) {
    let mut client = RelayClient::new(identity, format!("ws://127.0.0.1:{port}"));
    let mut events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    // Wait for the Welcome so join ordering is deterministic across tests
    await_frame(&mut events, |f| matches!(f, ServerFrame::Welcome { .. })).await;
    (client, events)
}

async fn await_frame<F>(events: &mut mpsc::Receiver<ClientEvent>, mut want: F) -> ServerFrame
where
    F: FnMut(&ServerFrame) -> bool,
{
    loop {
        match timeout(Duration::from_secs(2), events.recv()).await {
            Ok(Some(ClientEvent::Server(frame))) if want(&frame) => return frame,
            Ok(Some(_)) => continue,
            Ok(None) => panic!("event stream ended before the expected frame"),
            Err(_) => panic!("timed out waiting for the expected frame"),
        }
    }
}

async fn assert_no_frame<F>(events: &mut mpsc::Receiver<ClientEvent>, mut unwanted: F, wait: Duration)
where
    F: FnMut(&ServerFrame) -> bool,
{
    let saw = timeout(wait, async {
        loop {
            match events.recv().await {
                Some(ClientEvent::Server(frame)) if unwanted(&frame) => return frame,
                Some(_) => continue,
                None => std::future::pending().await,
            }
        }
    })
    .await;
    assert!(saw.is_err(), "unexpected frame arrived: {saw:?}");
}

fn is_joined_notice(frame: &ServerFrame, name: &str) -> bool {
    matches!(frame, ServerFrame::Notice { text, .. } if text == &format!("{name} joined"))
}

#[tokio::test]
async fn test_join_announces_to_everyone() {
    let port = start_test_server().await;
    let (_alice, mut alice_events) = connect_as(Identity::new("Alice"), port).await;

    let (_bob, _bob_events) = connect_as(Identity::new("Bob"), port).await;

    // Alice sees the updated roster, then the notice
    let presence = await_frame(&mut alice_events, |f| {
        matches!(f, ServerFrame::Presence { .. })
    })
    .await;
    match presence {
        ServerFrame::Presence { identities } => {
            let names: Vec<&str> = identities.iter().map(|i| i.display_name.as_str()).collect();
            assert_eq!(names, vec!["Alice", "Bob"]);
        }
        _ => unreachable!(),
    }
    await_frame(&mut alice_events, |f| is_joined_notice(f, "Bob")).await;
}

#[tokio::test]
async fn test_welcome_lists_existing_presence() {
    let port = start_test_server().await;
    let (_alice, _alice_events) = connect_as(Identity::new("Alice"), port).await;

    let mut bob = RelayClient::new(Identity::new("Bob"), format!("ws://127.0.0.1:{port}"));
    let mut bob_events = bob.take_event_rx().unwrap();
    bob.connect().await.unwrap();

    let welcome = await_frame(&mut bob_events, |f| matches!(f, ServerFrame::Welcome { .. })).await;
    match welcome {
        ServerFrame::Welcome { presence, .. } => {
            let names: Vec<&str> = presence.iter().map(|i| i.display_name.as_str()).collect();
            assert_eq!(names, vec!["Alice", "Bob"]);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_rejoining_identity_emits_no_duplicate_notice() {
    let port = start_test_server().await;
    let (_alice, mut alice_events) = connect_as(Identity::new("Alice"), port).await;

    // Bob connects twice with the same persisted identity
    let bob = Identity::new("Bob");
    let (_bob1, _bob1_events) = connect_as(bob.clone(), port).await;
    await_frame(&mut alice_events, |f| is_joined_notice(f, "Bob")).await;

    let (_bob2, _bob2_events) = connect_as(bob.clone(), port).await;
    assert_no_frame(
        &mut alice_events,
        |f| is_joined_notice(f, "Bob") || matches!(f, ServerFrame::Presence { .. }),
        Duration::from_millis(300),
    )
    .await;

    // And the roster still has exactly one Bob: Carol's join pushes a
    // fresh Presence snapshot to Alice
    let (_carol, _carol_events) = connect_as(Identity::new("Carol"), port).await;
    let presence = await_frame(&mut alice_events, |f| {
        matches!(f, ServerFrame::Presence { .. })
    })
    .await;
    match presence {
        ServerFrame::Presence { identities } => {
            let bobs = identities.iter().filter(|i| i.id == bob.id).count();
            assert_eq!(bobs, 1);
            assert_eq!(identities.len(), 3);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_clean_disconnect_announces_leave() {
    let port = start_test_server().await;
    let (_alice, mut alice_events) = connect_as(Identity::new("Alice"), port).await;
    let (mut bob, _bob_events) = connect_as(Identity::new("Bob"), port).await;
    await_frame(&mut alice_events, |f| is_joined_notice(f, "Bob")).await;

    bob.disconnect().await;

    let presence = await_frame(&mut alice_events, |f| {
        matches!(f, ServerFrame::Presence { .. })
    })
    .await;
    match presence {
        ServerFrame::Presence { identities } => {
            assert_eq!(identities.len(), 1);
            assert_eq!(identities[0].display_name, "Alice");
        }
        _ => unreachable!(),
    }
    await_frame(&mut alice_events, |f| {
        matches!(f, ServerFrame::Notice { text, .. } if text == "Bob left")
    })
    .await;
}

#[tokio::test]
async fn test_abrupt_disconnect_cleans_presence() {
    let port = start_test_server().await;
    let (_alice, mut alice_events) = connect_as(Identity::new("Alice"), port).await;

    // Raw connection that joins and then vanishes without a close frame
    let url = format!("ws://127.0.0.1:{port}");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut tx, rx) = futures_util::StreamExt::split(ws);
    let join = ClientFrame::Join {
        identity: Identity::new("Ghost"),
    };
    futures_util::SinkExt::send(
        &mut tx,
        tokio_tungstenite::tungstenite::Message::Binary(join.encode().unwrap().into()),
    )
    .await
    .unwrap();
    await_frame(&mut alice_events, |f| is_joined_notice(f, "Ghost")).await;

    // Drop both halves: the TCP connection dies mid-session
    drop(tx);
    drop(rx);

    // The roster update lands first, then the notice
    let presence = await_frame(&mut alice_events, |f| {
        matches!(f, ServerFrame::Presence { .. })
    })
    .await;
    match presence {
        ServerFrame::Presence { identities } => assert_eq!(identities.len(), 1),
        _ => unreachable!(),
    }
    await_frame(&mut alice_events, |f| {
        matches!(f, ServerFrame::Notice { text, .. } if text == "Ghost left")
    })
    .await;
}

#[tokio::test]
async fn test_notices_carry_timestamps() {
    let port = start_test_server().await;
    let (_alice, mut alice_events) = connect_as(Identity::new("Alice"), port).await;

    let before = chrono::Utc::now();
    let (_bob, _bob_events) = connect_as(Identity::new("Bob"), port).await;

    let notice = await_frame(&mut alice_events, |f| is_joined_notice(f, "Bob")).await;
    match notice {
        ServerFrame::Notice { at, .. } => {
            assert!(at >= before - chrono::Duration::seconds(1));
            assert!(at <= chrono::Utc::now() + chrono::Duration::seconds(1));
        }
        _ => unreachable!(),
    }
}
