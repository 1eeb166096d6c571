use std::time::Duration;

use serde::{Deserialize, Serialize};
use zion::prelude::*;

// ---------------------------------------------------------------------------
// Chat payload
// ---------------------------------------------------------------------------

const CHAT: &str = "chat";

#[derive(Clone, Serialize, Deserialize)]
struct Chat {
    name: String,
    message: String,
}

/// One chat line as a player saw it.
#[derive(Debug, Clone, PartialEq)]
struct Heard {
    listener: String,
    from: String,
    message: String,
}

// ---------------------------------------------------------------------------
// Players
// ---------------------------------------------------------------------------

struct Player {
    name: &'static str,
    node: ZionNode,
}

impl Player {
    async fn join(
        hub: &MemorySignaling,
        name: &'static str,
        peer_id: PeerId,
        world: &str,
    ) -> Result<Self, ZionError> {
        let node = ZionNode::builder(name)
            .peer_id(peer_id)
            .world(world)
            .config(MeshConfig {
                announce_jitter: Duration::ZERO,
                ..MeshConfig::default()
            })
            .start(hub.clone())
            .await?;
        Ok(Self { name, node })
    }

    async fn say(&self, message: &str) {
        let chat = Chat {
            name: self.name.to_string(),
            message: message.to_string(),
        };
        match serde_json::to_value(chat) {
            Ok(payload) => self.node.handle().publish(CHAT, payload).await,
            Err(e) => tracing::warn!(error = %e, "could not encode chat"),
        }
    }

    /// Drains queued events, logging them and collecting chat lines.
    fn listen(&mut self, heard: &mut Vec<Heard>) {
        while let Some(event) = self.node.try_next_event() {
            match event {
                MeshEvent::Message(env) if env.kind() == CHAT => {
                    match serde_json::from_value::<Chat>(env.payload) {
                        Ok(chat) => {
                            tracing::info!(listener = self.name, from = %chat.name, "{}", chat.message);
                            heard.push(Heard {
                                listener: self.name.to_string(),
                                from: chat.name,
                                message: chat.message,
                            });
                        }
                        Err(e) => tracing::debug!(error = %e, "ignoring malformed chat"),
                    }
                }
                MeshEvent::PeerConnected(peer) => {
                    tracing::info!(player = self.name, %peer, "linked");
                }
                MeshEvent::Federation(event) => {
                    tracing::info!(player = self.name, ?event, "federation");
                }
                other => tracing::debug!(player = self.name, ?other, "event"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

/// Lets the mesh deliver everything in flight.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

/// Two worlds on one signaling hub. Players of `alpha` meet through the
/// lobby, chat, and the world hosts federate.
async fn run(hub: MemorySignaling) -> Result<Vec<Heard>, ZionError> {
    let alpha_lobby = zion::protocol::identity::lobby_peer_id("alpha");
    let beta_lobby = zion::protocol::identity::lobby_peer_id("beta");

    let alpha_host = ZionNode::builder("alpha-host")
        .peer_id(alpha_lobby)
        .world("alpha")
        .federation("Alpha", "wss://alpha.example")
        .start(hub.clone())
        .await?;
    let mut beta_host = ZionNode::builder("beta-host")
        .peer_id(beta_lobby)
        .world("beta")
        .federation("Beta", "wss://beta.example")
        .start(hub.clone())
        .await?;

    let mut players = vec![
        Player::join(&hub, "alice", PeerId::from("zion-alice-1000"), "alpha").await?,
        Player::join(&hub, "bob", PeerId::from("zion-bob-1000"), "alpha").await?,
        Player::join(&hub, "carol", PeerId::from("zion-carol-1000"), "alpha").await?,
    ];

    // One announce round so gossip links the players directly.
    tokio::time::sleep(Duration::from_secs(11)).await;
    for player in &players {
        let peers = player.node.handle().peers().await?;
        tracing::info!(player = player.name, peers = peers.len(), "mesh view");
    }

    let mut heard = Vec::new();
    players[0].say("hi").await;
    players[1].say("hello alice").await;
    settle().await;
    for player in &mut players {
        player.listen(&mut heard);
    }

    alpha_host
        .handle()
        .connect_to_peer(beta_host.peer_id().clone())
        .await;
    settle().await;
    alpha_host.handle().announce_federation().await?;
    alpha_host
        .handle()
        .federation_handshake("beta", None)
        .await?;
    settle().await;

    let federated = beta_host.handle().is_federated_with("alpha").await?;
    tracing::info!(federated, "beta federated with alpha");
    while let Some(event) = beta_host.try_next_event() {
        if let MeshEvent::Federation(event) = event {
            tracing::info!(?event, "beta host");
        }
    }

    for player in players {
        player.node.shutdown().await;
    }
    alpha_host.shutdown().await;
    beta_host.shutdown().await;
    Ok(heard)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    zion::init_tracing();
    let heard = run(MemorySignaling::new()).await?;
    tracing::info!(lines = heard.len(), "done");
    Ok(())
}
