//! Shared fixtures for engine integration tests
#![allow(dead_code)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use varsync_engine::{
    OwnedVar, Peer, Proposal, SharedVar, SyncConfig, SyncError, SyncSession, SyncSessionBuilder,
};
use varsync_transport::{MemoryHub, Transport};

pub const SESSION: &str = "arena";

/// Route engine logs to the test harness; `RUST_LOG` selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

pub fn peer(id: &str) -> Peer {
    Peer::new(id, format!("Player {id}"))
}

/// Poll `check` until it holds, failing the test after two seconds
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Let queued deliveries settle before asserting that something did not happen
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// One peer's view of the test game
pub struct Player {
    pub session: SyncSession,
    /// Validated: the host only accepts non-negative scores
    pub score: SharedVar<i64>,
    /// Unguarded last-writer-wins text
    pub motd: SharedVar<String>,
    /// Unguarded per-peer position
    pub pos: OwnedVar<f64>,
    /// Validated per-peer readiness flag; the host refuses to un-ready
    pub ready: OwnedVar<bool>,
    pub errors: Arc<Mutex<Vec<SyncError>>>,
}

impl Player {
    pub fn id(&self) -> &varsync_engine::PeerId {
        &self.session.local_peer().id
    }
}

pub fn non_negative(proposal: &Proposal<i64>) -> bool {
    proposal.new_value >= 0
}

pub fn game_builder(
    config: SyncConfig,
    score_validator: impl Fn(&Proposal<i64>) -> bool + Send + Sync + 'static,
) -> (
    SyncSessionBuilder,
    SharedVar<i64>,
    SharedVar<String>,
    OwnedVar<f64>,
    OwnedVar<bool>,
) {
    let mut builder = SyncSessionBuilder::new(config).unwrap();
    let score = builder
        .register_shared_with_validator("score", 0i64, score_validator)
        .unwrap();
    let motd = builder.register_shared("motd", String::new()).unwrap();
    let pos = builder.register_owned("pos", 0.0f64).unwrap();
    let ready = builder
        .register_owned_with_validator("ready", false, |p: &Proposal<bool>| {
            p.new_value || !p.old_value
        })
        .unwrap();
    (builder, score, motd, pos, ready)
}

pub async fn join_with(
    hub: &MemoryHub,
    id: &str,
    config: SyncConfig,
    score_validator: impl Fn(&Proposal<i64>) -> bool + Send + Sync + 'static,
) -> Player {
    let (builder, score, motd, pos, ready) = game_builder(config, score_validator);
    let transport: Arc<dyn Transport> = Arc::new(hub.transport(peer(id)));
    let session = builder.join(transport, SESSION).await.unwrap();

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    session
        .on_error(move |err| sink.lock().push(err.clone()))
        .forget();

    Player {
        session,
        score,
        motd,
        pos,
        ready,
        errors,
    }
}

/// Join with the default test configuration and wait for the snapshot
pub async fn join(hub: &MemoryHub, id: &str) -> Player {
    let player = join_with(hub, id, SyncConfig::testing(), non_negative).await;
    player.session.handshake_complete().await.unwrap();
    player
}
