use async_trait::async_trait;
use looply_core::auth::AuthError;
use looply_core::{
    ControlFailure, CredentialStore, NowPlayingSession, PlaybackGateway, PlaybackSnapshot,
    SessionConfig, SessionEvent, SyncError, Track,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time;

struct ScriptedGateway {
    snapshot: Mutex<Result<Option<PlaybackSnapshot>, SyncError>>,
    control: Mutex<Result<(), ControlFailure>>,
    gate: Option<Arc<Notify>>,
    fetches: AtomicUsize,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
}

impl ScriptedGateway {
    fn new(snapshot: Result<Option<PlaybackSnapshot>, SyncError>) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            control: Mutex::new(Ok(())),
            gate: None,
            fetches: AtomicUsize::new(0),
            pauses: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
        }
    }

    fn gated(snapshot: Result<Option<PlaybackSnapshot>, SyncError>, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(snapshot)
        }
    }

    fn set_snapshot(&self, snapshot: Result<Option<PlaybackSnapshot>, SyncError>) {
        *self.snapshot.lock().unwrap() = snapshot;
    }

    fn set_control(&self, result: Result<(), ControlFailure>) {
        *self.control.lock().unwrap() = result;
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaybackGateway for ScriptedGateway {
    async fn fetch_snapshot(&self) -> Result<Option<PlaybackSnapshot>, SyncError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.snapshot.lock().unwrap().clone()
    }

    async fn pause(&self) -> Result<(), ControlFailure> {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        self.control.lock().unwrap().clone()
    }

    async fn resume(&self) -> Result<(), ControlFailure> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        self.control.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct RecordingStore {
    discards: AtomicUsize,
}

#[async_trait]
impl CredentialStore for RecordingStore {
    async fn discard(&self) -> Result<(), AuthError> {
        self.discards.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn snapshot(is_playing: bool, progress_ms: Option<u64>) -> PlaybackSnapshot {
    PlaybackSnapshot {
        is_playing,
        progress_ms,
        track: Some(Track {
            name: "Song".to_string(),
            artist_name: "Artist".to_string(),
            duration_ms: Some(180_000),
            artwork_url: Some("https://i.scdn.co/image/cover".to_string()),
        }),
    }
}

fn session(
    gateway: &Arc<ScriptedGateway>,
    store: &Arc<RecordingStore>,
) -> (NowPlayingSession, mpsc::UnboundedReceiver<SessionEvent>) {
    let gateway: Arc<dyn PlaybackGateway> = gateway.clone();
    let store: Arc<dyn CredentialStore> = store.clone();
    NowPlayingSession::new(gateway, store, SessionConfig::default())
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    time::timeout(Duration::from_secs(120), events.recv())
        .await
        .expect("timed out waiting for a session event")
        .expect("event channel closed")
}

async fn next_non_tick(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    loop {
        match next_event(events).await {
            SessionEvent::Tick(_) => continue,
            other => return other,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_fetches_immediately_and_ticks_while_playing() {
    let gateway = Arc::new(ScriptedGateway::new(Ok(Some(snapshot(true, Some(5_000))))));
    let store = Arc::new(RecordingStore::default());
    let (mut session, mut events) = session(&gateway, &store);

    session.start();

    match next_event(&mut events).await {
        SessionEvent::Updated(view) => {
            assert!(view.is_playing);
            assert_eq!(view.progress_ms, 5_000);
            assert_eq!(view.duration_ms, Some(180_000));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    match next_event(&mut events).await {
        SessionEvent::Tick(view) => {
            assert_eq!(view.progress_ms, 6_000);
            assert_eq!(view.elapsed_label(), "0:06");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_start_is_idempotent() {
    let gateway = Arc::new(ScriptedGateway::new(Ok(None)));
    let store = Arc::new(RecordingStore::default());
    let (mut session, _events) = session(&gateway, &store);

    session.start();
    session.start();
    assert!(session.is_running());

    time::sleep(Duration::from_secs(25)).await;
    assert_eq!(gateway.fetches(), 3);

    session.shutdown().await;
    assert!(!session.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_stop_when_not_started_is_safe() {
    let gateway = Arc::new(ScriptedGateway::new(Ok(None)));
    let store = Arc::new(RecordingStore::default());
    let (mut session, mut events) = session(&gateway, &store);

    session.stop();
    session.shutdown().await;
    session.toggle();

    time::sleep(Duration::from_secs(30)).await;
    assert_eq!(gateway.fetches(), 0);
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_nothing_playing_is_idle_without_ticks() {
    let gateway = Arc::new(ScriptedGateway::new(Ok(None)));
    let store = Arc::new(RecordingStore::default());
    let (mut session, mut events) = session(&gateway, &store);

    session.start();
    assert_eq!(next_event(&mut events).await, SessionEvent::Idle);

    time::sleep(Duration::from_secs(5)).await;
    assert!(events.try_recv().is_err());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_pause_rejected_for_free_account_keeps_playing() {
    let gateway = Arc::new(ScriptedGateway::new(Ok(Some(snapshot(true, Some(5_000))))));
    gateway.set_control(Err(ControlFailure::NeedsPremiumAccount));
    let store = Arc::new(RecordingStore::default());
    let (mut session, mut events) = session(&gateway, &store);

    session.start();
    assert!(matches!(next_event(&mut events).await, SessionEvent::Updated(_)));

    session.pause();
    assert_eq!(
        next_non_tick(&mut events).await,
        SessionEvent::ControlFailed(ControlFailure::NeedsPremiumAccount)
    );
    assert_eq!(gateway.pauses.load(Ordering::SeqCst), 1);

    match next_event(&mut events).await {
        SessionEvent::Tick(view) => assert!(view.is_playing),
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(store.discards.load(Ordering::SeqCst), 0);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_successful_pause_is_optimistic_and_refetches() {
    let gateway = Arc::new(ScriptedGateway::new(Ok(Some(snapshot(true, Some(5_000))))));
    let store = Arc::new(RecordingStore::default());
    let (mut session, mut events) = session(&gateway, &store);

    session.start();
    assert!(matches!(next_event(&mut events).await, SessionEvent::Updated(_)));

    gateway.set_snapshot(Ok(Some(snapshot(false, Some(5_000)))));
    session.toggle();

    match next_non_tick(&mut events).await {
        SessionEvent::PlaybackChanged(view) => {
            assert!(!view.is_playing);
            assert_eq!(view.progress_ms, 5_000);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(gateway.pauses.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.resumes.load(Ordering::SeqCst), 0);

    match next_non_tick(&mut events).await {
        SessionEvent::Updated(view) => assert!(!view.is_playing),
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(gateway.fetches(), 2);

    time::sleep(Duration::from_secs(5)).await;
    assert!(events.try_recv().is_err());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_expired_credential_is_discarded() {
    let gateway = Arc::new(ScriptedGateway::new(Err(SyncError::CredentialExpired)));
    let store = Arc::new(RecordingStore::default());
    let (mut session, mut events) = session(&gateway, &store);

    session.start();
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::PollFailed(SyncError::CredentialExpired)
    );
    assert_eq!(store.discards.load(Ordering::SeqCst), 1);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_poll_failure_keeps_last_known_state() {
    let gateway = Arc::new(ScriptedGateway::new(Ok(Some(snapshot(true, Some(5_000))))));
    let store = Arc::new(RecordingStore::default());
    let (mut session, mut events) = session(&gateway, &store);

    session.start();
    assert!(matches!(next_event(&mut events).await, SessionEvent::Updated(_)));

    gateway.set_snapshot(Err(SyncError::Transport("connection reset".to_string())));
    assert_eq!(
        next_non_tick(&mut events).await,
        SessionEvent::PollFailed(SyncError::Transport("connection reset".to_string()))
    );

    match next_event(&mut events).await {
        SessionEvent::Tick(view) => {
            assert!(view.is_playing);
            assert!(view.progress_ms >= 15_000);
            assert_eq!(view.track.map(|t| t.name).as_deref(), Some("Song"));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_response_arriving_after_stop_is_dropped() {
    let gate = Arc::new(Notify::new());
    let gateway = Arc::new(ScriptedGateway::gated(
        Ok(Some(snapshot(true, Some(5_000)))),
        Arc::clone(&gate),
    ));
    let store = Arc::new(RecordingStore::default());
    let (mut session, mut events) = session(&gateway, &store);

    session.start();
    time::sleep(Duration::from_millis(10)).await;
    assert_eq!(gateway.fetches(), 1);

    session.shutdown().await;
    gate.notify_waiters();

    time::sleep(Duration::from_secs(30)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(gateway.fetches(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_event_after_stop_returns() {
    let gate = Arc::new(Notify::new());
    let gateway = Arc::new(ScriptedGateway::gated(
        Ok(Some(snapshot(true, Some(5_000)))),
        Arc::clone(&gate),
    ));
    let store = Arc::new(RecordingStore::default());
    let (mut session, mut events) = session(&gateway, &store);

    session.start();
    time::sleep(Duration::from_millis(10)).await;
    assert_eq!(gateway.fetches(), 1);

    // Let the response land in the driver's queue, then stop without awaiting.
    gate.notify_waiters();
    tokio::task::yield_now().await;
    session.stop();
    assert!(!session.is_running());

    time::sleep(Duration::from_secs(30)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_queued_ticks_are_dropped_after_stop() {
    let gateway = Arc::new(ScriptedGateway::new(Ok(Some(snapshot(true, Some(5_000))))));
    let store = Arc::new(RecordingStore::default());
    let (mut session, mut events) = session(&gateway, &store);

    session.start();
    assert!(matches!(next_event(&mut events).await, SessionEvent::Updated(_)));
    assert!(matches!(next_event(&mut events).await, SessionEvent::Tick(_)));

    session.stop();
    while events.try_recv().is_ok() {}

    time::sleep(Duration::from_secs(30)).await;
    assert!(events.try_recv().is_err());
}
