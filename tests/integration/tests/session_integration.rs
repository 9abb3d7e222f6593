//! Integration tests for the podsession session controller
//!
//! These tests drive the controller through its public surface with
//! recording adapters and verify:
//! - Command issuance and phase transitions
//! - Ordering of progress writes across episode switches
//! - Engine-driven transitions and failures
//! - Release, reconnect and shutdown

use anyhow::Result;
use parking_lot::Mutex;
use podsession::{
    EngineCommand, EngineEvent, EpisodeId, EpisodeStore, EpisodeUpdate, Intent, JsonFileEpisodeStore,
    Phase, PlaybackEngine, SessionConfig, SessionController,
};
use podsession_integration_tests::{episode, is_load_of, test_config, RecordingEngine, RecordingStore};
use std::sync::Arc;
use std::time::Duration;

/// Poll and persist slowly enough that no periodic write lands mid-test
fn quiet_config() -> SessionConfig {
    SessionConfig {
        poll_interval_ms: 5_000,
        persist_interval_ms: 60_000,
        ..SessionConfig::default()
    }
}

fn update(position_ms: u64, is_playing: bool, finished: bool) -> EpisodeUpdate {
    EpisodeUpdate {
        position_ms,
        is_playing,
        finished,
    }
}

#[tokio::test]
async fn test_play_pause_switch_scenario() -> Result<()> {
    let x = episode("x", 100_000);
    let y = episode("y", 100_000);
    let store = RecordingStore::with_episodes([x.clone(), y.clone()]);
    let engine = RecordingEngine::new();
    let controller = SessionController::new(store.clone(), &quiet_config());
    controller.connect(engine.clone()).await?;

    let phase = controller.submit(Intent::Play(x.clone()), None).await;
    assert_eq!(phase, Phase::Playing { position_ms: 0 });
    let commands = engine.commands();
    assert_eq!(commands.len(), 3);
    assert!(is_load_of(&commands[0], "x"));
    assert_eq!(&commands[1..], &[EngineCommand::Prepare, EngineCommand::Play]);

    let phase = controller.submit(Intent::Pause, None).await;
    assert_eq!(phase, Phase::Paused { position_ms: 0 });

    controller.submit(Intent::Play(y.clone()), None).await;
    controller.shutdown().await?;

    assert_eq!(
        store.writes(),
        vec![
            (x.id.clone(), update(0, true, false)),
            (x.id.clone(), update(0, false, false)),
            (x.id.clone(), update(0, false, false)),
            (y.id.clone(), update(0, true, false)),
            (y.id.clone(), update(0, false, false)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_switch_attributes_position_to_old_episode() -> Result<()> {
    let a = episode("a", 600_000);
    let b = episode("b", 600_000);
    let store = RecordingStore::with_episodes([a.clone(), b.clone()]);
    let engine = RecordingEngine::new();
    let controller = SessionController::new(store.clone(), &quiet_config());
    controller.connect(engine.clone()).await?;

    controller.submit(Intent::Play(a.clone()), None).await;
    engine.set_position(30_000);
    engine.clear_commands();

    controller.submit(Intent::Play(b.clone()), None).await;
    let commands = engine.commands();
    assert_eq!(commands[0], EngineCommand::Pause);
    assert!(is_load_of(&commands[1], "b"));

    controller.shutdown().await?;

    let writes = store.writes();
    let quiesce_a = writes
        .iter()
        .position(|(id, u)| *id == a.id && *u == update(30_000, false, false))
        .expect("write for the old episode");
    let first_b = writes
        .iter()
        .position(|(id, _)| *id == b.id)
        .expect("write for the new episode");
    assert!(quiesce_a < first_b);
    assert!(writes[first_b..].iter().all(|(id, _)| *id == b.id));
    Ok(())
}

#[tokio::test]
async fn test_seek_while_paused_stays_paused() -> Result<()> {
    let a = episode("a", 600_000);
    let store = RecordingStore::with_episodes([a.clone()]);
    let engine = RecordingEngine::new();
    let controller = SessionController::new(store, &quiet_config());
    controller.connect(engine.clone()).await?;

    controller.submit(Intent::Play(a.clone()), None).await;
    engine.set_position(5_000);
    controller.submit(Intent::Pause, None).await;
    engine.clear_commands();

    let phase = controller.submit(Intent::Seek(20_000), Some(a.clone())).await;
    assert_eq!(phase, Phase::Paused { position_ms: 20_000 });
    assert_eq!(engine.commands(), vec![EngineCommand::SeekTo(20_000)]);

    let phase = controller.submit(Intent::skip_back(&quiet_config()), None).await;
    assert_eq!(phase, Phase::Paused { position_ms: 10_000 });

    controller.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_release_is_idempotent() -> Result<()> {
    let a = episode("a", 600_000);
    let store = RecordingStore::with_episodes([a.clone()]);
    let engine = RecordingEngine::new();
    let controller = SessionController::new(store.clone(), &quiet_config());
    controller.connect(engine.clone()).await?;

    controller.submit(Intent::Play(a.clone()), None).await;
    engine.set_position(7_000);

    controller.release().await?;
    controller.release().await?;
    assert!(!engine.is_attached());
    assert!(!engine.is_playing());
    assert_eq!(
        engine.commands().iter().filter(|c| **c == EngineCommand::Pause).count(),
        1
    );
    assert_eq!(controller.query_state(&a.id).await, Phase::Idle);

    controller.shutdown().await?;
    let stops: Vec<_> = store
        .writes_for(&a.id)
        .into_iter()
        .filter(|u| !u.is_playing)
        .collect();
    assert_eq!(stops, vec![update(7_000, false, false)]);
    Ok(())
}

#[tokio::test]
async fn test_intents_before_connect_are_dropped() -> Result<()> {
    let a = episode("a", 600_000);
    let store = RecordingStore::with_episodes([a.clone()]);
    let engine = RecordingEngine::new();
    let controller = SessionController::new(store.clone(), &quiet_config());

    assert_eq!(controller.submit(Intent::Play(a.clone()), None).await, Phase::Idle);
    assert!(engine.commands().is_empty());

    controller.connect(engine.clone()).await?;
    assert!(controller.submit(Intent::Play(a), None).await.is_playing());

    controller.shutdown().await?;
    assert_eq!(store.writes().first().map(|(_, u)| u.is_playing), Some(true));
    Ok(())
}

#[tokio::test]
async fn test_engine_failure_and_recovery() -> Result<()> {
    let a = episode("a", 600_000);
    let store = RecordingStore::with_episodes([a.clone()]);
    let engine = RecordingEngine::new();
    let controller = SessionController::new(store.clone(), &quiet_config());
    controller.connect(engine.clone()).await?;

    controller.submit(Intent::Play(a.clone()), None).await;
    engine.set_position(12_000);
    engine.set_playing(false);
    assert!(engine.emit(EngineEvent::Error { cause: "network lost".to_string() }));

    assert_eq!(controller.state().await?.phase, Phase::Error);
    assert_eq!(controller.query_state(&a.id).await, Phase::Error);

    engine.clear_commands();
    assert_eq!(controller.submit(Intent::Pause, None).await, Phase::Error);
    assert_eq!(controller.submit(Intent::Resume, None).await, Phase::Error);
    assert!(engine.commands().is_empty());

    let phase = controller.submit(Intent::Play(a.clone()), None).await;
    assert!(phase.is_playing());
    assert!(engine.commands().iter().any(|c| is_load_of(c, "a")));

    controller.shutdown().await?;
    assert_eq!(
        store.writes_for(&a.id)[..2],
        [update(0, true, false), update(12_000, false, false)]
    );
    Ok(())
}

#[tokio::test]
async fn test_events_from_previous_connection_are_dropped() -> Result<()> {
    let a = episode("a", 600_000);
    let b = episode("b", 600_000);
    let store = RecordingStore::with_episodes([a.clone(), b.clone()]);
    let first = RecordingEngine::new();
    let second = RecordingEngine::new();
    let controller = SessionController::new(store, &quiet_config());

    controller.connect(first.clone()).await?;
    controller.submit(Intent::Play(a), None).await;
    let stale_sink = first.take_sink().expect("sink attached");

    controller.connect(second.clone()).await?;
    assert!(!first.is_attached());
    controller.submit(Intent::Play(b.clone()), None).await;

    stale_sink.emit(EngineEvent::Error { cause: "old engine".to_string() });
    stale_sink.emit(EngineEvent::IsPlayingChanged(false));

    let state = controller.state().await?;
    assert!(state.phase.is_playing());
    assert_eq!(state.current.map(|e| e.id), Some(b.id));

    controller.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_end_of_media_marks_finished() -> Result<()> {
    let a = episode("a", 60_000);
    let store = RecordingStore::with_episodes([a.clone()]);
    let engine = RecordingEngine::new();
    engine.register_duration("a", 60_000);
    let controller = SessionController::new(store.clone(), &quiet_config());
    controller.connect(engine.clone()).await?;

    controller.submit(Intent::Play(a.clone()), None).await;
    engine.set_position(60_000);
    engine.set_playing(false);
    engine.emit(EngineEvent::IsPlayingChanged(false));

    assert_eq!(controller.state().await?.phase, Phase::Paused { position_ms: 60_000 });

    controller.shutdown().await?;
    let stored = store.snapshot(&a.id).expect("episode kept");
    assert!(stored.finished);
    assert_eq!(stored.position_ms, 0);
    assert!(!stored.is_playing);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_hidden_by_seek_is_caught_by_ticks() -> Result<()> {
    let a = episode("a", 60_000);
    let store = RecordingStore::with_episodes([a.clone()]);
    let engine = RecordingEngine::new();
    engine.register_duration("a", 60_000);
    let controller = SessionController::new(store.clone(), &test_config());
    controller.connect(engine.clone()).await?;

    controller.submit(Intent::Play(a.clone()), None).await;
    assert_eq!(
        controller.submit(Intent::Seek(60_000), None).await,
        Phase::Playing { position_ms: 60_000 }
    );
    engine.set_playing(false);
    engine.emit(EngineEvent::IsPlayingChanged(false));
    assert!(controller.state().await?.phase.is_playing());

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(controller.state().await?.phase, Phase::Paused { position_ms: 60_000 });
    assert_eq!(store.writes_for(&a.id).last(), Some(&update(0, false, true)));

    engine.clear_commands();
    assert_eq!(
        controller.submit(Intent::Resume, None).await,
        Phase::Playing { position_ms: 0 }
    );
    assert_eq!(engine.commands(), vec![EngineCommand::SeekTo(0), EngineCommand::Resume]);

    controller.shutdown().await?;
    assert!(!store.snapshot(&a.id).expect("episode kept").is_playing);
    Ok(())
}

#[tokio::test]
async fn test_intent_for_inactive_episode_is_ignored() -> Result<()> {
    let a = episode("a", 600_000);
    let b = episode("b", 600_000);
    let store = RecordingStore::with_episodes([a.clone(), b.clone()]);
    let engine = RecordingEngine::new();
    let controller = SessionController::new(store, &quiet_config());
    controller.connect(engine.clone()).await?;

    controller.submit(Intent::Play(a.clone()), None).await;
    engine.clear_commands();

    assert_eq!(controller.submit(Intent::Pause, Some(b.clone())).await, Phase::Idle);
    assert!(engine.commands().is_empty());
    assert!(controller.query_state(&a.id).await.is_playing());
    assert_eq!(controller.query_state(&b.id).await, Phase::Idle);

    controller.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_missing_record_does_not_break_session() -> Result<()> {
    let a = episode("a", 600_000);
    let store = RecordingStore::with_episodes([a.clone()]);
    let engine = RecordingEngine::new();
    let controller = SessionController::new(store.clone(), &quiet_config());
    controller.connect(engine.clone()).await?;

    controller.submit(Intent::Play(a.clone()), None).await;
    store.remove(&a.id);
    engine.set_position(3_000);

    assert_eq!(
        controller.submit(Intent::Pause, None).await,
        Phase::Paused { position_ms: 3_000 }
    );
    assert!(controller.submit(Intent::Resume, None).await.is_playing());

    controller.shutdown().await?;
    assert!(store.writes_for(&a.id).contains(&update(3_000, false, false)));
    assert!(store.get(&a.id).await.is_err());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_tracker_reports_positions_and_checkpoints() -> Result<()> {
    let a = episode("a", 600_000);
    let store = RecordingStore::with_episodes([a.clone()]);
    let engine = RecordingEngine::new();
    let controller = SessionController::new(store.clone(), &test_config());
    controller.connect(engine.clone()).await?;

    let positions = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&positions);
    controller.bind(move |_: &EpisodeId, position_ms: u64| seen.lock().push(position_ms));

    controller.submit(Intent::Play(a.clone()), None).await;

    // Move the playhead halfway between ticks so each tick reads a settled value.
    tokio::time::sleep(Duration::from_millis(500)).await;
    for second in 1..=6u64 {
        engine.set_position(second * 1_000);
        tokio::time::sleep(Duration::from_millis(1_000)).await;
    }
    controller.state().await?;

    let reported = positions.lock().clone();
    assert_eq!(reported, vec![1_000, 2_000, 3_000, 4_000, 5_000, 6_000]);

    controller.submit(Intent::Pause, None).await;
    tokio::time::sleep(Duration::from_millis(3_000)).await;
    controller.state().await?;
    assert_eq!(positions.lock().len(), 6);

    controller.shutdown().await?;
    assert!(store.writes_for(&a.id).contains(&update(5_000, true, false)));
    Ok(())
}

#[tokio::test]
async fn test_progress_survives_reopen_of_json_store() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("episodes.json");
    let a = episode("https://example.com/a.mp3", 600_000);

    let store = Arc::new(JsonFileEpisodeStore::open(&path));
    store.insert(a.clone()).await?;

    let engine = RecordingEngine::new();
    let controller = SessionController::new(store, &quiet_config());
    controller.connect(engine.clone()).await?;
    controller.submit(Intent::Play(a.clone()), None).await;
    engine.set_position(42_000);
    controller.submit(Intent::Pause, None).await;
    controller.shutdown().await?;

    let reopened = JsonFileEpisodeStore::open(&path);
    let stored = reopened.get(&a.id).await?;
    assert_eq!(stored.position_ms, 42_000);
    assert!(!stored.is_playing);
    assert_eq!(stored.podcast_name, "Integration Cast");

    // The next session resumes where the last one stopped.
    let engine = RecordingEngine::new();
    let controller = SessionController::new(Arc::new(reopened), &quiet_config());
    controller.connect(engine.clone()).await?;
    let phase = controller.submit(Intent::Play(stored), None).await;
    assert_eq!(phase, Phase::Playing { position_ms: 42_000 });
    assert!(engine.commands().contains(&EngineCommand::SeekTo(42_000)));
    controller.shutdown().await?;
    Ok(())
}
