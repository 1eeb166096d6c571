//! Peer identity derivation.
//!
//! Session identities are unique per run (`zion-alice-1700000000000`).
//! Rendezvous identities are deterministic per world, so two nodes that
//! know nothing but the world id can still find each other: whoever
//! binds `zion-{world}-lobby` first becomes the lobby, and the seed ids
//! give late joiners a few more doors to knock on.

use std::time::{SystemTime, UNIX_EPOCH};

use zion_transport::PeerId;

const PREFIX: &str = "zion";

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Lowercases ASCII alphanumerics and collapses every other run of
/// characters into a single `-`. Leading and trailing dashes are dropped.
pub fn slug(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

fn slug_or(input: &str, fallback: &str) -> String {
    let s = slug(input);
    if s.is_empty() { fallback.to_owned() } else { s }
}

/// `zion-{player}-{timestamp_ms}`.
pub fn session_peer_id(player: &str, timestamp_ms: u64) -> PeerId {
    PeerId::new(format!(
        "{PREFIX}-{}-{timestamp_ms}",
        slug_or(player, "player")
    ))
}

/// `zion-{world}-lobby`.
pub fn lobby_peer_id(world_id: &str) -> PeerId {
    PeerId::new(format!("{PREFIX}-{}-lobby", slug_or(world_id, "world")))
}

/// `zion-{world}-seed-{n}`.
pub fn seed_peer_id(world_id: &str, n: usize) -> PeerId {
    PeerId::new(format!("{PREFIX}-{}-seed-{n}", slug_or(world_id, "world")))
}

/// Seed ids `0..count` for a world.
pub fn seed_peer_ids(world_id: &str, count: usize) -> Vec<PeerId> {
    (0..count).map(|n| seed_peer_id(world_id, n)).collect()
}

/// Derives a stable world id from a public URL.
///
/// Scheme, a leading `www.`, query, fragment and trailing slashes are
/// stripped before slugging, so `https://www.Zion.example/w/?x=1` and
/// `http://zion.example/w` give the same id.
pub fn world_id_from_url(url: &str) -> String {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    let rest = rest.trim_end_matches('/');
    let rest = match rest.get(..4) {
        Some(p) if p.eq_ignore_ascii_case("www.") => &rest[4..],
        _ => rest,
    };
    slug_or(rest, "world")
}
