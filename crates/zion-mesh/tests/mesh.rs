//! Integration tests for the mesh, run over the in-memory signaling hub.
//!
//! Every test uses a paused clock. Tokio only auto-advances a paused
//! clock once every task is idle, so `settle()` doubles as "wait until
//! all in-flight frames have been delivered and processed".

use std::time::Duration;

use serde_json::json;
use zion_mesh::{
    FederationEvent, FederationStatus, Mesh, MeshConfig, MeshError, MeshEvent, MeshEvents,
    MeshHandle, MeshState,
};
use zion_protocol::{Body, Codec, Envelope, JsonCodec, PeerId, Position};
use zion_transport::{Connection, MemoryConnection, MemorySignaling, Signaling};

// =========================================================================
// Helpers
// =========================================================================

fn config() -> MeshConfig {
    MeshConfig {
        announce_jitter: Duration::ZERO,
        ..MeshConfig::default()
    }
}

fn pid(s: &str) -> PeerId {
    PeerId::from(s)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn node(hub: &MemorySignaling, id: &str) -> (MeshHandle, MeshEvents) {
    Mesh::init(hub.clone(), id, config())
}

fn drain(events: &mut MeshEvents) -> Vec<MeshEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn messages(events: &mut MeshEvents) -> Vec<Envelope> {
    drain(events)
        .into_iter()
        .filter_map(|e| match e {
            MeshEvent::Message(env) => Some(env),
            _ => None,
        })
        .collect()
}

fn federation_events(events: &mut MeshEvents) -> Vec<FederationEvent> {
    drain(events)
        .into_iter()
        .filter_map(|e| match e {
            MeshEvent::Federation(f) => Some(f),
            _ => None,
        })
        .collect()
}

/// `n` nodes, every pair directly connected.
async fn full_mesh(hub: &MemorySignaling, n: usize) -> Vec<(MeshHandle, MeshEvents)> {
    let nodes: Vec<_> = (0..n)
        .map(|i| node(hub, &format!("zion-p{i:02}-1")))
        .collect();
    for i in 0..n {
        for j in (i + 1)..n {
            nodes[i].0.connect_to_peer(nodes[j].0.self_id().clone()).await;
        }
    }
    settle().await;
    nodes
}

/// A bare connection into `target`, standing in for a remote peer.
async fn raw_peer(hub: &MemorySignaling, id: &str, target: &PeerId) -> MemoryConnection {
    hub.dial(&pid(id), target).await.unwrap()
}

fn chat(from: &str, timestamp: u64, nonce: &str) -> Envelope {
    Envelope {
        kind: "chat".into(),
        from: pid(from),
        timestamp,
        nonce: nonce.into(),
        payload: json!({ "message": "hi" }),
        hops: 0,
    }
}

// =========================================================================
// Initialization and state
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_init_binds_identity_and_opens() {
    let hub = MemorySignaling::new();
    let (alice, _events) = node(&hub, "zion-alice-1000");

    assert_eq!(alice.state().await, MeshState::Open);
    assert!(hub.is_bound(&pid("zion-alice-1000")));
    assert_eq!(alice.peers().await.unwrap(), Vec::<PeerId>::new());
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_transport_runs_offline() {
    let hub = MemorySignaling::new();
    hub.set_unavailable(true);
    let (alice, _events) = node(&hub, "zion-alice-1000");

    assert_eq!(alice.state().await, MeshState::Offline);

    // Sends are no-ops rather than errors.
    alice.publish("chat", json!({})).await;
    alice.connect_to_peer("zion-bob-1").await;
    settle().await;
    assert!(alice.peers().await.unwrap().is_empty());
    assert_eq!(hub.bind_attempts(&pid("zion-alice-1000")), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_to_peer_is_idempotent() {
    let hub = MemorySignaling::new();
    let (alice, mut alice_events) = node(&hub, "zion-alice-1");
    let (bob, _bob_events) = node(&hub, "zion-bob-1");

    alice.connect_to_peer(bob.self_id().clone()).await;
    alice.connect_to_peer(bob.self_id().clone()).await;
    alice.connect_to_peer(alice.self_id().clone()).await;
    settle().await;
    alice.connect_to_peer(bob.self_id().clone()).await;
    settle().await;

    let connected = drain(&mut alice_events)
        .into_iter()
        .filter(|e| matches!(e, MeshEvent::PeerConnected(_)))
        .count();
    assert_eq!(connected, 1);
    assert_eq!(alice.peers().await.unwrap(), vec![pid("zion-bob-1")]);
    assert_eq!(bob.peers().await.unwrap(), vec![pid("zion-alice-1")]);
}

#[tokio::test(start_paused = true)]
async fn test_dialing_unclaimed_id_is_silent() {
    let hub = MemorySignaling::new();
    let (alice, mut events) = node(&hub, "zion-alice-1");

    alice.connect_to_peer("nobody").await;
    settle().await;

    assert!(alice.peers().await.unwrap().is_empty());
    assert!(drain(&mut events).is_empty());
    assert_eq!(alice.state().await, MeshState::Open);
}

// =========================================================================
// Broadcast, relay, dedup
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_end_to_end_chat_reaches_everyone_once() {
    let hub = MemorySignaling::new();
    let (alice, mut alice_events) = node(&hub, "zion-alice-1000");
    let (bob, mut bob_events) = node(&hub, "bob");
    let (carol, mut carol_events) = node(&hub, "carol");
    let (_dave, mut dave_events) = node(&hub, "dave");

    alice.connect_to_peer("bob").await;
    alice.connect_to_peer("carol").await;
    bob.connect_to_peer("carol").await;
    bob.connect_to_peer("dave").await;
    settle().await;
    assert_eq!(carol.peers().await.unwrap().len(), 2);

    alice
        .broadcast(Envelope::app("zion-alice-1000", "chat", json!({ "message": "hi" })))
        .await;
    settle().await;

    for events in [&mut bob_events, &mut carol_events, &mut dave_events] {
        let got = messages(events);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].kind(), "chat");
        assert_eq!(got[0].from, pid("zion-alice-1000"));
        assert_eq!(got[0].payload, json!({ "message": "hi" }));
    }
    assert!(messages(&mut alice_events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_flood_coverage_in_full_meshes() {
    for n in [3, 10, 50] {
        let hub = MemorySignaling::new();
        let mut nodes = full_mesh(&hub, n).await;
        for (handle, _) in &nodes {
            assert_eq!(handle.peers().await.unwrap().len(), n - 1, "mesh of {n}");
        }

        nodes[0].0.publish("chat", json!({ "n": n })).await;
        settle().await;

        let (_, sender_events) = &mut nodes[0];
        assert!(messages(sender_events).is_empty(), "sender saw its own message (n={n})");
        for (handle, events) in nodes.iter_mut().skip(1) {
            assert_eq!(
                messages(events).len(),
                1,
                "{} in mesh of {n}",
                handle.self_id()
            );
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_relay_crosses_a_chain() {
    let hub = MemorySignaling::new();
    let ids = ["n0", "n1", "n2", "n3", "n4", "n5"];
    let mut nodes: Vec<_> = ids.iter().map(|id| node(&hub, id)).collect();
    for i in 0..ids.len() - 1 {
        nodes[i].0.connect_to_peer(ids[i + 1]).await;
    }
    settle().await;

    nodes[0].0.publish("move", json!({ "dx": 1 })).await;
    settle().await;

    let last = &mut nodes[5].1;
    let got = messages(last);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].hops, 4, "relayed by n1..n4");
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_frames_are_delivered_once() {
    let hub = MemorySignaling::new();
    let (alice, mut events) = node(&hub, "zion-alice-1");
    let fake = raw_peer(&hub, "fake", alice.self_id()).await;
    settle().await;

    let frame = JsonCodec.encode_envelope(&chat("fake", 1, "n1")).unwrap();
    fake.send(&frame).await.unwrap();
    fake.send(&frame).await.unwrap();

    // Same identity, different payload and hop count: still a duplicate.
    let mut variant = chat("fake", 1, "n1");
    variant.hops = 3;
    variant.payload = json!({ "message": "changed" });
    fake.send(&JsonCodec.encode_envelope(&variant).unwrap())
        .await
        .unwrap();
    settle().await;

    assert_eq!(messages(&mut events).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_own_broadcast_echo_is_suppressed() {
    let hub = MemorySignaling::new();
    let (alice, mut events) = node(&hub, "zion-alice-1");
    let echo = raw_peer(&hub, "echo", alice.self_id()).await;
    settle().await;

    alice.publish("chat", json!({ "message": "ping" })).await;
    let frame = echo.recv().await.unwrap().unwrap();
    echo.send(&frame).await.unwrap();
    settle().await;

    assert!(messages(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_evicted_fingerprint_is_delivered_again() {
    let hub = MemorySignaling::new();
    let (alice, mut events) = Mesh::init(
        hub.clone(),
        "zion-alice-1",
        MeshConfig {
            dedup_capacity: 2,
            ..config()
        },
    );
    let fake = raw_peer(&hub, "fake", alice.self_id()).await;
    settle().await;

    for env in [chat("fake", 1, "a"), chat("fake", 2, "b"), chat("fake", 1, "a")] {
        fake.send(&JsonCodec.encode_envelope(&env).unwrap()).await.unwrap();
    }
    settle().await;
    assert_eq!(messages(&mut events).len(), 2, "still cached");

    fake.send(&JsonCodec.encode_envelope(&chat("fake", 3, "c")).unwrap())
        .await
        .unwrap();
    fake.send(&JsonCodec.encode_envelope(&chat("fake", 1, "a")).unwrap())
        .await
        .unwrap();
    settle().await;
    assert_eq!(messages(&mut events).len(), 2, "third message plus the evicted one");
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frame_keeps_link_up() {
    let hub = MemorySignaling::new();
    let (alice, mut events) = node(&hub, "zion-alice-1");
    let fake = raw_peer(&hub, "fake", alice.self_id()).await;
    settle().await;

    fake.send(b"{ not json").await.unwrap();
    fake.send(br#"{"type":"_lobby_announce","from":"fake","timestamp":1,"nonce":"x","payload":{}}"#)
        .await
        .unwrap();
    fake.send(&JsonCodec.encode_envelope(&chat("fake", 1, "ok")).unwrap())
        .await
        .unwrap();
    settle().await;

    assert_eq!(messages(&mut events).len(), 1);
    assert_eq!(alice.peers().await.unwrap(), vec![pid("fake")]);
}

#[tokio::test(start_paused = true)]
async fn test_control_frames_are_relayed_with_payload_untouched() {
    let hub = MemorySignaling::new();
    let (alice, mut events) = node(&hub, "zion-alice-1");
    alice
        .init_federation("home", "Home", "wss://home.example")
        .await
        .unwrap();
    let sender = raw_peer(&hub, "sender", alice.self_id()).await;
    let observer = raw_peer(&hub, "observer", alice.self_id()).await;
    settle().await;

    let warp = json!({
        "type": "warp_fork", "from": "sender", "timestamp": 1, "nonce": "w",
        "payload": { "target_world": "beta", "position": null }
    });
    let announce = json!({
        "type": "federation_announce", "from": "zion-beta-lobby", "timestamp": 2, "nonce": "a",
        "payload": {
            "worldId": "beta",
            "worldName": "Beta",
            "endpoint": "wss://beta.example",
            "protocolVersion": 1,
            "peerId": "zion-beta-lobby",
            "motd": "hello"
        }
    });
    for frame in [&warp, &announce] {
        sender.send(&serde_json::to_vec(frame).unwrap()).await.unwrap();
    }
    settle().await;

    let mut relayed = Vec::new();
    while let Ok(Ok(Some(frame))) =
        tokio::time::timeout(Duration::from_millis(10), observer.recv()).await
    {
        let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        if value["from"] != "zion-alice-1" {
            relayed.push(value);
        }
    }

    let mut expected = vec![warp, announce];
    for value in &mut expected {
        value["hops"] = json!(1);
    }
    assert_eq!(relayed, expected);

    // The readable announce is still consumed; the unreadable warp is not.
    let fed = federation_events(&mut events);
    assert_eq!(fed.len(), 1, "{fed:?}");
    assert!(matches!(&fed[0], FederationEvent::WorldDiscovered(w) if w.world_id == "beta"));
    assert_eq!(alice.peers().await.unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_hop_limit_stops_relay() {
    let hub = MemorySignaling::new();
    let limited = MeshConfig {
        relay_hop_limit: Some(1),
        ..config()
    };
    let (a, _ae) = Mesh::init(hub.clone(), "a", limited.clone());
    let (b, mut be) = Mesh::init(hub.clone(), "b", limited.clone());
    let (c, mut ce) = Mesh::init(hub.clone(), "c", limited.clone());
    let (_d, mut de) = Mesh::init(hub.clone(), "d", limited);
    a.connect_to_peer("b").await;
    b.connect_to_peer("c").await;
    c.connect_to_peer("d").await;
    settle().await;

    a.publish("chat", json!({})).await;
    settle().await;

    assert_eq!(messages(&mut be).len(), 1);
    assert_eq!(messages(&mut ce).len(), 1, "c is processed locally");
    assert!(messages(&mut de).is_empty(), "c must not relay past the limit");
}

#[tokio::test(start_paused = true)]
async fn test_send_to_reaches_only_that_neighbour() {
    let hub = MemorySignaling::new();
    let (alice, _) = node(&hub, "alice");
    let (_bob, mut bob_events) = node(&hub, "bob");
    let (_carol, mut carol_events) = node(&hub, "carol");
    alice.connect_to_peer("bob").await;
    alice.connect_to_peer("carol").await;
    settle().await;

    alice
        .send_to("bob", Envelope::app("alice", "whisper", json!({ "text": "psst" })))
        .await;
    settle().await;

    assert_eq!(messages(&mut bob_events).len(), 1);
    assert!(messages(&mut carol_events).is_empty());
}

// =========================================================================
// Link lifecycle
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_disconnect_closes_links_and_releases_identity() {
    let hub = MemorySignaling::new();
    let (alice, _alice_events) = node(&hub, "alice");
    let (bob, mut bob_events) = node(&hub, "bob");
    alice.connect_to_peer("bob").await;
    settle().await;
    drain(&mut bob_events);

    alice.disconnect().await;
    settle().await;

    assert_eq!(alice.state().await, MeshState::Disconnected);
    assert_eq!(alice.peers().await, Err(MeshError::Closed));
    assert_eq!(alice.join_lobby("alpha", "alice", "spawn").await, Err(MeshError::Closed));
    assert!(!hub.is_bound(&pid("alice")));
    assert!(drain(&mut bob_events).contains(&MeshEvent::PeerDisconnected(pid("alice"))));
    assert!(bob.peers().await.unwrap().is_empty());

    // No-ops after disconnect.
    alice.publish("chat", json!({})).await;
    alice.connect_to_peer("bob").await;
    alice.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_hung_up_neighbour_is_dropped_without_reconnecting() {
    let hub = MemorySignaling::new();
    let (alice, mut alice_events) = node(&hub, "alice");
    let (_carol, mut carol_events) = node(&hub, "carol");
    let bob = raw_peer(&hub, "bob", alice.self_id()).await;
    alice.connect_to_peer("carol").await;
    settle().await;
    assert_eq!(alice.peers().await.unwrap(), vec![pid("bob"), pid("carol")]);
    drain(&mut alice_events);

    // Bob's end goes away; alice only finds out when she next writes or reads.
    drop(bob);
    alice.publish("chat", json!({ "message": "hi" })).await;
    settle().await;

    assert_eq!(messages(&mut carol_events).len(), 1);

    let events = drain(&mut alice_events);
    let disconnects: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, MeshEvent::PeerDisconnected(_)))
        .collect();
    assert_eq!(disconnects, vec![&MeshEvent::PeerDisconnected(pid("bob"))]);
    assert!(!events.iter().any(|e| matches!(e, MeshEvent::Reconnecting { .. })));

    assert_eq!(alice.peers().await.unwrap(), vec![pid("carol")]);
    assert_eq!(alice.state().await, MeshState::Open);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(hub.bind_attempts(&pid("alice")), 1);
}

#[tokio::test(start_paused = true)]
async fn test_identity_can_rejoin_after_disconnect() {
    let hub = MemorySignaling::new();
    let (first, _) = node(&hub, "alice");
    first.disconnect().await;
    settle().await;

    let (second, _) = node(&hub, "alice");
    assert_eq!(second.state().await, MeshState::Open);
}

// =========================================================================
// Lobby and discovery
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_discovery_converges_through_gossip() {
    let hub = MemorySignaling::new();
    let (a, mut ae) = node(&hub, "zion-a-1");
    let (b, _be) = node(&hub, "zion-b-1");
    let (c, mut ce) = node(&hub, "zion-c-1");
    a.connect_to_peer("zion-b-1").await;
    b.connect_to_peer("zion-c-1").await;
    settle().await;
    assert!(!a.peers().await.unwrap().contains(&pid("zion-c-1")));

    for (handle, name) in [(&a, "a"), (&b, "b"), (&c, "c")] {
        handle.join_lobby("alpha", name, "spawn").await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(11)).await;

    assert_eq!(a.peers().await.unwrap(), vec![pid("zion-b-1"), pid("zion-c-1")]);
    assert_eq!(c.peers().await.unwrap(), vec![pid("zion-a-1"), pid("zion-b-1")]);
    assert!(a.known_peers().await.unwrap().contains(&pid("zion-c-1")));

    // Lobby traffic never reaches the application.
    assert!(messages(&mut ae).is_empty());
    assert!(messages(&mut ce).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_peer_list_request_pulls_announces() {
    let hub = MemorySignaling::new();
    let quiet = MeshConfig {
        announce_interval: Duration::from_secs(3600),
        heartbeat_interval: Duration::from_secs(3600),
        ..config()
    };
    let (a, _) = Mesh::init(hub.clone(), "zion-a-1", quiet.clone());
    let (b, _) = Mesh::init(hub.clone(), "zion-b-1", quiet.clone());
    let (c, _) = Mesh::init(hub.clone(), "zion-c-1", quiet);

    // Join before linking so the join-time announces reach nobody.
    for (handle, name) in [(&a, "a"), (&b, "b"), (&c, "c")] {
        handle.join_lobby("alpha", name, "spawn").await.unwrap();
    }
    a.connect_to_peer("zion-b-1").await;
    b.connect_to_peer("zion-c-1").await;
    settle().await;
    assert_eq!(a.peers().await.unwrap(), vec![pid("zion-b-1")]);

    a.request_peer_list().await.unwrap();
    settle().await;

    // a and c may dial each other at the same time; exactly one link survives.
    assert_eq!(a.peers().await.unwrap(), vec![pid("zion-b-1"), pid("zion-c-1")]);
    assert_eq!(c.peers().await.unwrap(), vec![pid("zion-a-1"), pid("zion-b-1")]);
}

#[tokio::test(start_paused = true)]
async fn test_join_lobby_dials_rendezvous_ids() {
    let hub = MemorySignaling::new();
    let (lobby_host, _) = node(&hub, "zion-alpha-lobby");
    let (seed, _) = node(&hub, "zion-alpha-seed-2");
    let (alice, _) = node(&hub, "zion-alice-1");

    lobby_host.join_lobby("alpha", "host", "spawn").await.unwrap();
    alice.join_lobby("alpha", "alice", "spawn").await.unwrap();
    settle().await;

    assert_eq!(
        alice.peers().await.unwrap(),
        vec![pid("zion-alpha-lobby"), pid("zion-alpha-seed-2")]
    );
    // The lobby host dialed the seed itself, and never itself.
    assert!(lobby_host.peers().await.unwrap().contains(&pid("zion-alpha-seed-2")));
    assert!(seed.peers().await.unwrap().contains(&pid("zion-alice-1")));
}

#[tokio::test(start_paused = true)]
async fn test_gossip_respects_max_peers() {
    let hub = MemorySignaling::new();
    let (a, _) = Mesh::init(
        hub.clone(),
        "zion-a-1",
        MeshConfig {
            max_peers: 1,
            ..config()
        },
    );
    let (b, _) = node(&hub, "zion-b-1");
    let (_c, _) = node(&hub, "zion-c-1");
    a.connect_to_peer("zion-b-1").await;
    b.connect_to_peer("zion-c-1").await;
    settle().await;

    // c stays out of the lobby so it never dials a on its own.
    a.join_lobby("alpha", "a", "spawn").await.unwrap();
    b.join_lobby("alpha", "b", "spawn").await.unwrap();
    tokio::time::sleep(Duration::from_secs(11)).await;

    assert_eq!(a.peers().await.unwrap(), vec![pid("zion-b-1")]);
    // a is still told about c.
    assert!(a.known_peers().await.unwrap().contains(&pid("zion-c-1")));
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_record_last_seen() {
    let hub = MemorySignaling::new();
    let (a, _) = node(&hub, "zion-a-1");
    let (b, _) = node(&hub, "zion-b-1");
    a.connect_to_peer("zion-b-1").await;
    settle().await;
    a.join_lobby("alpha", "a", "spawn").await.unwrap();
    b.join_lobby("alpha", "b", "spawn").await.unwrap();

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(a.last_seen("zion-b-1").await.unwrap(), None, "no heartbeat yet");

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(a.last_seen("zion-b-1").await.unwrap().is_some());
    assert_eq!(a.last_seen("zion-nobody-1").await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_lobby_operations_need_a_lobby() {
    let hub = MemorySignaling::new();
    let (alice, _) = node(&hub, "alice");

    assert_eq!(alice.leave_lobby().await, Err(MeshError::NotInLobby));
    assert_eq!(alice.request_peer_list().await, Err(MeshError::NotInLobby));
    assert_eq!(alice.set_zone("market").await, Err(MeshError::NotInLobby));
    assert_eq!(alice.known_peers().await, Err(MeshError::NotInLobby));
    assert_eq!(alice.last_seen("bob").await, Err(MeshError::NotInLobby));

    alice.join_lobby("alpha", "alice", "spawn").await.unwrap();
    alice.set_zone("market").await.unwrap();
    alice.leave_lobby().await.unwrap();
    assert_eq!(alice.leave_lobby().await, Err(MeshError::NotInLobby));
}

#[tokio::test(start_paused = true)]
async fn test_announce_carries_zone_and_cadence() {
    let hub = MemorySignaling::new();
    let (alice, _) = node(&hub, "zion-alice-1");
    let observer = raw_peer(&hub, "observer", alice.self_id()).await;
    settle().await;

    alice.join_lobby("alpha", "alice", "spawn").await.unwrap();
    alice.set_zone("market").await.unwrap();

    let mut announces = Vec::new();
    let mut heartbeats = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(31);
    while let Ok(Ok(Some(frame))) = tokio::time::timeout_at(deadline, observer.recv()).await {
        match JsonCodec.decode_envelope(&frame).unwrap().body().unwrap() {
            Body::LobbyAnnounce(a) => announces.push(a),
            Body::Heartbeat(h) => {
                assert_eq!(h.zone, "market");
                assert_eq!(h.peer_count, 1);
                heartbeats += 1;
            }
            _ => {}
        }
    }

    // Immediate announce plus ticks at 10, 20 and 30 seconds.
    assert_eq!(announces.len(), 4);
    assert_eq!(announces[0].zone, "spawn");
    assert_eq!(announces[1].zone, "market");
    assert_eq!(announces[1].peers, vec![pid("observer")]);
    assert_eq!(heartbeats, 1);
}

// =========================================================================
// Reconnection
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_reconnection_makes_exactly_three_attempts() {
    let hub = MemorySignaling::new();
    let id = pid("zion-alice-1");
    let (alice, mut events) = node(&hub, id.as_str());
    settle().await;
    assert_eq!(hub.bind_attempts(&id), 1);

    hub.set_offline(true);
    hub.sever(&id);

    let checkpoints = [(500, 1), (1_000, 2), (2_000, 3), (4_000, 4), (60_000, 4)];
    for (wait_ms, expected) in checkpoints {
        tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        assert_eq!(hub.bind_attempts(&id), expected, "after +{wait_ms}ms");
    }

    assert_eq!(alice.state().await, MeshState::Initializing);
    let attempts: Vec<u32> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            MeshEvent::Reconnecting { attempt } => Some(attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_announce_tick_starts_new_episode_and_recovers() {
    let hub = MemorySignaling::new();
    let id = pid("zion-alice-1");
    let (alice, mut events) = node(&hub, id.as_str());
    settle().await;
    alice.join_lobby("alpha", "alice", "spawn").await.unwrap();
    settle().await;

    hub.set_offline(true);
    hub.sever(&id);

    // First episode is over by ~7 s; the announce tick at ~10 s starts a
    // second one whose first retry is ~1 s later.
    tokio::time::sleep(Duration::from_millis(10_300)).await;
    assert_eq!(hub.bind_attempts(&id), 4);

    hub.set_offline(false);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(hub.bind_attempts(&id), 5);
    assert_eq!(alice.state().await, MeshState::Open);
    assert!(hub.is_bound(&id));
    assert!(drain(&mut events).contains(&MeshEvent::Reconnected));
}

#[tokio::test(start_paused = true)]
async fn test_links_survive_signaling_loss() {
    let hub = MemorySignaling::new();
    let (alice, _) = node(&hub, "alice");
    let (_bob, mut bob_events) = node(&hub, "bob");
    alice.connect_to_peer("bob").await;
    settle().await;

    hub.sever(&pid("alice"));
    settle().await;
    alice.publish("chat", json!({})).await;
    settle().await;

    assert_eq!(messages(&mut bob_events).len(), 1);
}

// =========================================================================
// Federation
// =========================================================================

async fn two_worlds(hub: &MemorySignaling) -> ((MeshHandle, MeshEvents), (MeshHandle, MeshEvents)) {
    let a = node(hub, "zion-alpha-host-1");
    let b = node(hub, "zion-beta-host-1");
    a.0.connect_to_peer(b.0.self_id().clone()).await;
    a.0.init_federation("alpha", "Alpha", "wss://alpha.example").await.unwrap();
    b.0.init_federation("beta", "Beta", "wss://beta.example").await.unwrap();
    settle().await;
    (a, b)
}

#[tokio::test(start_paused = true)]
async fn test_federation_handshake_is_asymmetric() {
    let hub = MemorySignaling::new();
    let ((a, mut ae), (b, mut be)) = two_worlds(&hub).await;

    a.federation_handshake("beta", None).await.unwrap();
    settle().await;

    assert!(!a.is_federated_with("beta").await.unwrap());
    assert!(b.is_federated_with("alpha").await.unwrap());
    assert_eq!(a.federated_worlds().await.unwrap()[0].status, FederationStatus::HandshakeSent);

    let established = federation_events(&mut be);
    assert!(matches!(
        established.as_slice(),
        [FederationEvent::FederationEstablished(w)] if w.world_id == "alpha" && w.endpoint == "wss://alpha.example"
    ));
    assert!(federation_events(&mut ae).is_empty());

    // Handshaking back completes the pair.
    b.federation_handshake("alpha", None).await.unwrap();
    settle().await;
    assert!(a.is_federated_with("beta").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_federation_announce_is_discovered() {
    let hub = MemorySignaling::new();
    let ((a, mut ae), (b, mut be)) = two_worlds(&hub).await;

    a.announce_federation().await.unwrap();
    settle().await;

    let worlds = b.discovered_worlds().await.unwrap();
    assert_eq!(worlds.len(), 1);
    assert_eq!(worlds[0].world_id, "alpha");
    assert_eq!(worlds[0].player_count, 2);
    assert!(matches!(
        federation_events(&mut be).as_slice(),
        [FederationEvent::WorldDiscovered(_)]
    ));
    assert!(a.discovered_worlds().await.unwrap().is_empty());
    assert!(messages(&mut ae).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_federation_announces_repeat() {
    let hub = MemorySignaling::new();
    let ((_a, _), (_b, mut be)) = two_worlds(&hub).await;

    tokio::time::sleep(Duration::from_secs(121)).await;

    let discovered = federation_events(&mut be)
        .into_iter()
        .filter(|e| matches!(e, FederationEvent::WorldDiscovered(w) if w.world_id == "alpha"))
        .count();
    assert_eq!(discovered, 2);
}

#[tokio::test(start_paused = true)]
async fn test_federation_requires_init() {
    let hub = MemorySignaling::new();
    let (alice, _) = node(&hub, "alice");

    assert_eq!(alice.announce_federation().await, Err(MeshError::FederationNotInitialized));
    assert_eq!(
        alice.federation_handshake("beta", None).await,
        Err(MeshError::FederationNotInitialized)
    );
    assert!(!alice.is_federated_with("beta").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_warp_and_return_become_events() {
    let hub = MemorySignaling::new();
    let ((a, _), (_b, mut be)) = two_worlds(&hub).await;

    a.warp_fork("beta", Position::new(1.0, 2.0, 3.0)).await;
    a.return_home(Position::new(0.0, 0.0, 0.0)).await;
    settle().await;

    let events = federation_events(&mut be);
    assert_eq!(
        events,
        vec![
            FederationEvent::CrossWorldWarp {
                from: a.self_id().clone(),
                target_world: "beta".into(),
                position: Position::new(1.0, 2.0, 3.0),
            },
            FederationEvent::PlayerReturned {
                from: a.self_id().clone(),
                position: Position::default(),
            },
        ]
    );
}
