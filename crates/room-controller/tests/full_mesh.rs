//! End-to-end mesh convergence against the real registry and relay.
//!
//! Each test client is a real `MeshOrchestrator` whose signaling sender
//! loops straight back into `relay::dispatch`, standing in for the
//! WebSocket layer. Server events land on the client's connection
//! channel and are pumped into the orchestrator in arrival order.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

use anyhow::Result;
use async_trait::async_trait;
use common::protocol::{ClientEvent, ErrorCode, ServerEvent};
use common::types::{RoomId, RoomSettings, UserId};
use mesh_client::coordinator::SignalingPhase;
use mesh_client::media::LocalMedia;
use mesh_client::signaling::SignalingSender;
use mesh_client::testing::{MockMediaSource, MockPeerFactory};
use mesh_client::{ClientError, EndReason, MeshEvent, MeshOrchestrator};
use room_controller::config::{Config, MIN_BCRYPT_COST};
use room_controller::registry::{ConnectionHandle, RoomRegistryHandle};
use room_controller::relay::{dispatch, ConnectionSession};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Signaling sender that short-circuits the WebSocket layer and feeds
/// client events straight into the relay.
struct LoopbackSignals {
    registry: RoomRegistryHandle,
    connection: ConnectionHandle,
    session: Mutex<Option<ConnectionSession>>,
}

#[async_trait]
impl SignalingSender for LoopbackSignals {
    async fn send(&self, event: ClientEvent) -> Result<(), ClientError> {
        let mut session = self.session.lock().await;
        dispatch(&self.registry, &self.connection, &mut session, event).await;
        Ok(())
    }
}

struct TestClient {
    id: UserId,
    mesh: MeshOrchestrator,
    inbox: mpsc::UnboundedReceiver<ServerEvent>,
    events: mpsc::UnboundedReceiver<MeshEvent>,
}

fn test_registry() -> RoomRegistryHandle {
    RoomRegistryHandle::new(Config {
        bcrypt_cost: MIN_BCRYPT_COST,
        ..Config::default()
    })
}

fn client(registry: &RoomRegistryHandle, id: &str) -> TestClient {
    let (connection, inbox) = mpsc::unbounded_channel();
    let signals = Arc::new(LoopbackSignals {
        registry: registry.clone(),
        connection,
        session: Mutex::new(None),
    });
    let (mesh, events) = MeshOrchestrator::new(
        UserId::from(id),
        id.to_string(),
        Box::new(MockPeerFactory::new()),
        LocalMedia::new(Box::new(MockMediaSource::new())),
        signals,
    );
    TestClient {
        id: UserId::from(id),
        mesh,
        inbox,
        events,
    }
}

/// Deliver queued server events into each orchestrator until every
/// inbox is empty and nothing new was produced.
///
/// Registry sends are fire-and-forget, so each round first awaits a
/// `status` round-trip; once it answers, everything queued ahead of it
/// in the mailbox has been dispatched and the inboxes are current.
async fn pump(registry: &RoomRegistryHandle, clients: &mut [TestClient]) -> Result<()> {
    loop {
        registry.status().await?;
        let mut progressed = false;
        for i in 0..clients.len() {
            while let Ok(event) = clients[i].inbox.try_recv() {
                clients[i].mesh.handle_server_event(event).await?;
                progressed = true;
            }
        }
        if !progressed {
            return Ok(());
        }
    }
}

fn drain_events(client: &mut TestClient) -> Vec<MeshEvent> {
    let mut out = Vec::new();
    while let Ok(event) = client.events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn three_clients_converge_to_a_full_mesh() -> Result<()> {
    let registry = test_registry();
    let mut clients = vec![
        client(&registry, "alice"),
        client(&registry, "bob"),
        client(&registry, "carol"),
    ];

    for i in 0..clients.len() {
        clients[i]
            .mesh
            .join(RoomId::from("standup"), None, None)
            .await?;
        pump(&registry, &mut clients).await?;
    }

    // Every pair holds exactly one stable session in each direction.
    let ids: Vec<UserId> = clients.iter().map(|c| c.id.clone()).collect();
    for client in &clients {
        assert_eq!(client.mesh.session_count(), 2);
        for other in ids.iter().filter(|id| **id != client.id) {
            assert_eq!(
                client.mesh.session_phase(other),
                Some(SignalingPhase::Stable),
                "{} -> {} should be stable",
                client.id,
                other
            );
        }
    }
    for client in &mut clients {
        let connected = drain_events(client)
            .into_iter()
            .filter(|e| matches!(e, MeshEvent::PeerConnected { .. }))
            .count();
        assert_eq!(connected, 2);
    }

    let status = registry.status().await?;
    assert_eq!(status.rooms, 1);
    assert_eq!(status.participants, 3);
    Ok(())
}

#[tokio::test]
async fn password_gate_challenges_then_admits() -> Result<()> {
    let registry = test_registry();
    let info = registry
        .create_room(
            RoomSettings {
                password_enabled: true,
                password_hint: Some("the usual".to_string()),
                ..Default::default()
            },
            Some("secret123".to_string()),
        )
        .await?;

    let mut clients = vec![client(&registry, "alice")];

    // No password: challenged with the hint, session not established.
    clients[0]
        .mesh
        .join(info.room_id.clone(), None, None)
        .await?;
    pump(&registry, &mut clients).await?;
    let events = drain_events(&mut clients[0]);
    assert!(events.iter().any(|e| matches!(
        e,
        MeshEvent::ServerError {
            error: ErrorCode::AuthRequired { hint: Some(h) }
        } if h == "the usual"
    )));

    // Wrong password: fatal for this attempt.
    clients[0]
        .mesh
        .join(info.room_id.clone(), Some("letmein".to_string()), None)
        .await?;
    pump(&registry, &mut clients).await?;
    let events = drain_events(&mut clients[0]);
    assert!(events.contains(&MeshEvent::SessionEnded {
        reason: EndReason::AuthFailed
    }));

    // Correct password: admitted.
    clients[0]
        .mesh
        .join(info.room_id.clone(), Some("secret123".to_string()), None)
        .await?;
    pump(&registry, &mut clients).await?;

    let status = registry.status().await?;
    assert_eq!(status.participants, 1);
    Ok(())
}

#[tokio::test]
async fn leave_shrinks_the_mesh_and_empties_the_room() -> Result<()> {
    let registry = test_registry();
    let mut clients = vec![client(&registry, "alice"), client(&registry, "bob")];

    for i in 0..clients.len() {
        clients[i].mesh.join(RoomId::from("r1"), None, None).await?;
        pump(&registry, &mut clients).await?;
    }
    assert_eq!(clients[0].mesh.session_count(), 1);

    clients[1].mesh.leave().await?;
    pump(&registry, &mut clients).await?;

    assert_eq!(clients[0].mesh.session_count(), 0);
    let alice_events = drain_events(&mut clients[0]);
    assert!(alice_events.contains(&MeshEvent::PeerLeft {
        peer_id: UserId::from("bob")
    }));

    clients[0].mesh.leave().await?;
    pump(&registry, &mut clients).await?;

    // Last member out deletes the room.
    let meta = registry.room_meta(RoomId::from("r1")).await?;
    assert!(!meta.exists);

    // Rejoining starts from an empty session set in a fresh room.
    clients[0].mesh.join(RoomId::from("r1"), None, None).await?;
    pump(&registry, &mut clients).await?;
    assert_eq!(clients[0].mesh.session_count(), 0);
    let meta = registry.room_meta(RoomId::from("r1")).await?;
    assert!(meta.exists);
    Ok(())
}

#[tokio::test]
async fn server_close_evicts_every_client() -> Result<()> {
    let registry = test_registry();
    let mut clients = vec![client(&registry, "alice"), client(&registry, "bob")];
    for i in 0..clients.len() {
        clients[i].mesh.join(RoomId::from("r1"), None, None).await?;
        pump(&registry, &mut clients).await?;
    }

    registry.close_room(RoomId::from("r1")).await?;
    pump(&registry, &mut clients).await?;

    for client in &mut clients {
        assert_eq!(client.mesh.session_count(), 0);
        assert!(drain_events(client).contains(&MeshEvent::SessionEnded {
            reason: EndReason::RoomClosed
        }));
    }
    let status = registry.status().await?;
    assert_eq!(status.rooms, 0);
    Ok(())
}
