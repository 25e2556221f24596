//! Late-join snapshot handshake
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use assert_matches::assert_matches;
use async_trait::async_trait;
use common::{eventually, game_builder, init_tracing, join, join_with, non_negative, peer, SESSION};
use parking_lot::Mutex;
use std::sync::Arc;
use varsync_engine::{HandshakePhase, PeerId, SyncConfig, SyncError, ValidationStatus, VarKey};
use varsync_transport::{
    JoinedSession, MemoryHub, MemoryTransport, OpCode, Transport, TransportError, TransportEvent,
    TransportResult,
};

/// Memory transport whose `leave` always fails
struct BrokenLeave(MemoryTransport);

#[async_trait]
impl Transport for BrokenLeave {
    async fn join(&self, session_id: &str) -> TransportResult<JoinedSession> {
        self.0.join(session_id).await
    }

    async fn leave(&self) -> TransportResult<()> {
        Err(TransportError::Backend {
            reason: "link down".into(),
        })
    }

    async fn send(
        &self,
        opcode: OpCode,
        payload: Vec<u8>,
        targets: Option<Vec<PeerId>>,
    ) -> TransportResult<()> {
        self.0.send(opcode, payload, targets).await
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.0.next_event().await
    }

    fn transport_type(&self) -> &'static str {
        "broken-leave"
    }
}

/// A late joiner starts from the host's values, versions and statuses
#[tokio::test]
async fn test_snapshot_carries_current_state() {
    init_tracing();
    let hub = MemoryHub::new();
    let host = join(&hub, "a").await;
    let early = join(&hub, "b").await;

    host.session.set(&host.motd, "welcome".to_string()).unwrap();
    host.session.set(&host.score, 12).unwrap();
    early.session.set_own(&early.pos, 2.5).unwrap();
    eventually("host state", || host.pos.get(early.id()) == Some(2.5)).await;

    let late = join(&hub, "c").await;
    assert_eq!(late.session.phase(), HandshakePhase::Ready);
    assert_eq!(late.motd.get(), "welcome");
    assert_eq!(late.score.get(), 12);
    assert_eq!(late.pos.get(early.id()), Some(2.5));
    assert_eq!(late.pos.get(late.id()), Some(0.0));

    for key in [
        VarKey::shared("motd"),
        VarKey::shared("score"),
        VarKey::owned("pos", early.id().clone()),
    ] {
        assert_eq!(
            late.session.lock_version(&key).unwrap(),
            host.session.lock_version(&key).unwrap(),
            "{key}"
        );
    }
    assert_eq!(
        late.session.validation_status(&VarKey::shared("score")).unwrap(),
        ValidationStatus::Validated
    );
    assert_eq!(late.session.host(), Some(host.id().clone()));
    assert!(late.errors.lock().is_empty());
}

/// Writes racing the handshake still reach the joiner
#[tokio::test]
async fn test_writes_during_handshake_are_not_lost() {
    init_tracing();
    let hub = MemoryHub::new();
    let host = join(&hub, "a").await;

    let late = join_with(&hub, "b", SyncConfig::testing(), non_negative).await;
    for step in 0..10 {
        host.session.set(&host.motd, format!("tick {step}")).unwrap();
    }
    late.session.handshake_complete().await.unwrap();

    eventually("last tick", || late.motd.get() == "tick 9").await;
}

/// Writing before the snapshot arrives is refused
#[tokio::test]
async fn test_local_writes_wait_for_handshake() {
    init_tracing();
    let hub = MemoryHub::new();
    // A bare transport member that never answers keeps the joiner syncing.
    let silent = hub.transport(peer("0"));
    silent.join(SESSION).await.unwrap();

    let late = join_with(&hub, "b", SyncConfig::testing(), non_negative).await;
    assert_eq!(late.session.phase(), HandshakePhase::Syncing);
    assert!(!late.session.is_host());
    assert_matches!(
        late.session.set(&late.motd, "early".to_string()),
        Err(SyncError::HandshakePending)
    );
    assert_eq!(late.motd.get(), "");
}

/// Without an answering host the handshake times out and the joiner leaves
#[tokio::test]
async fn test_handshake_times_out() {
    init_tracing();
    let hub = MemoryHub::new();
    let silent = hub.transport(peer("0"));
    silent.join(SESSION).await.unwrap();

    let config = SyncConfig {
        handshake_timeout_ms: 100,
        ..SyncConfig::testing()
    };
    let late = join_with(&hub, "b", config, non_negative).await;
    assert_matches!(
        late.session.handshake_complete().await,
        Err(SyncError::HandshakeTimeout { timeout_ms: 100 })
    );
    eventually("joiner gone", || hub.members(SESSION) == vec![peer("0").id]).await;
    assert!(late
        .errors
        .lock()
        .iter()
        .any(|e| matches!(e, SyncError::HandshakeTimeout { .. })));
    assert_matches!(
        late.session.set(&late.motd, "late".to_string()),
        Err(SyncError::HandshakeTimeout { .. })
    );
    late.session.leave().await.unwrap();
}

/// A failing leave after a handshake timeout is reported, not swallowed
#[tokio::test]
async fn test_failed_leave_after_timeout_is_reported() {
    init_tracing();
    let hub = MemoryHub::new();
    let silent = hub.transport(peer("0"));
    silent.join(SESSION).await.unwrap();

    let config = SyncConfig {
        handshake_timeout_ms: 100,
        ..SyncConfig::testing()
    };
    let (builder, _, _, _, _) = game_builder(config, non_negative);
    let transport: Arc<dyn Transport> = Arc::new(BrokenLeave(hub.transport(peer("b"))));
    let late = builder.join(transport, SESSION).await.unwrap();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    let _sub = late.on_error(move |err| sink.lock().push(err.clone()));

    assert_matches!(
        late.handshake_complete().await,
        Err(SyncError::HandshakeTimeout { .. })
    );
    eventually("leave failure reported", || {
        errors.lock().iter().any(|e| {
            matches!(e, SyncError::Transport(TransportError::Backend { reason }) if reason == "link down")
        })
    })
    .await;
}

/// A joiner declaring different variables is refused with the difference
#[tokio::test]
async fn test_key_mismatch_is_rejected() {
    init_tracing();
    let hub = MemoryHub::new();
    let host = join(&hub, "a").await;

    let (mut builder, _, motd, _, _) = game_builder(SyncConfig::testing(), non_negative);
    builder.register_shared("speed", 1.0f64).unwrap();
    let transport: Arc<dyn Transport> = Arc::new(hub.transport(peer("b")));
    let late = builder.join(transport, SESSION).await.unwrap();

    let err = late.handshake_complete().await.unwrap_err();
    assert_matches!(&err, SyncError::HandshakeMismatch { reason } if reason.contains("unexpected keys: speed"));
    assert_matches!(
        late.set(&motd, "nope".to_string()),
        Err(SyncError::HandshakeMismatch { .. })
    );
    eventually("joiner gone", || hub.members(SESSION) == vec![host.id().clone()]).await;
    eventually("host roster", || host.session.peers().len() == 1).await;
}

/// A changed value type is a mismatch as well
#[tokio::test]
async fn test_kind_mismatch_is_rejected() {
    init_tracing();
    let hub = MemoryHub::new();
    let _host = join(&hub, "a").await;

    let mut builder = varsync_engine::SyncSessionBuilder::new(SyncConfig::testing()).unwrap();
    builder.register_shared("score", 0.0f64).unwrap();
    builder.register_shared("motd", String::new()).unwrap();
    builder.register_owned("pos", 0.0f64).unwrap();
    builder.register_owned("ready", false).unwrap();
    let transport: Arc<dyn Transport> = Arc::new(hub.transport(peer("b")));
    let late = builder.join(transport, SESSION).await.unwrap();

    assert_matches!(
        late.handshake_complete().await,
        Err(SyncError::HandshakeMismatch { reason })
            if reason.contains("missing keys: score") && reason.contains("unexpected keys: score")
    );
}
