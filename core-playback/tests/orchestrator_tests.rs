mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_desktop::JsonPlaybackStateStore;
use bridge_traits::engine::{EngineCapabilities, EngineSignal};
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::library::LibraryStore;
use bridge_traits::storage::{LastPlayed, PlaybackStateStore};
use common::*;
use core_playback::{
    HandlerTable, PlaybackError, RemovalConfirmer, RepeatMode, Track, TransitionMode,
};
use core_runtime::events::{CoreEvent, EngineEvent, LibraryEvent, PlaybackEvent};
use mockall::mock;

mock! {
    Library {}

    #[async_trait]
    impl LibraryStore for Library {
        async fn remove_track(&self, track_id: &str) -> BridgeResult<()>;
    }
}

struct Confirmer {
    answer: bool,
    delay: Duration,
    asked: AtomicUsize,
}

#[async_trait]
impl RemovalConfirmer for Confirmer {
    async fn confirm_removal(&self, _track: &Track, _reason: &str) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.answer
    }
}

fn has_event(events: &[CoreEvent], predicate: impl Fn(&CoreEvent) -> bool) -> bool {
    events.iter().any(predicate)
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_rapid_selection_only_latest_track_plays() {
    let engine = FakeEngine::polled();
    let list = tracks(&[200.0, 180.0, 240.0]);
    register(&engine, &list);
    engine
        .state
        .lock()
        .load_delays
        .insert("/music/t0.flac".into(), Duration::from_millis(300));

    let orchestrator = orchestrator(core_config(engine.clone()));
    let mut rx = orchestrator.subscribe();
    orchestrator.set_tracks(list).await;

    let first = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.select_track(0).await }
    });
    settle().await;
    orchestrator.select_track(2).await.unwrap();
    first.await.unwrap().unwrap();

    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.current_track.unwrap().id, "t2");
    assert!(snapshot.intent.playing);
    assert_eq!(snapshot.engine.duration, 240.0);
    assert_eq!(now_playing(&drain(&mut rx)), vec!["t2".to_string()]);
    assert_eq!(engine.count(&Call::Play), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pause_during_load_keeps_track_paused() {
    let engine = FakeEngine::polled();
    let list = tracks(&[200.0, 180.0]);
    register(&engine, &list);
    engine
        .state
        .lock()
        .load_delays
        .insert("/music/t0.flac".into(), Duration::from_millis(300));
    let orchestrator = orchestrator(core_config(engine.clone()));
    orchestrator.set_tracks(list).await;

    let select = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.select_track(0).await }
    });
    settle().await;
    orchestrator.pause().await.unwrap();
    select.await.unwrap().unwrap();

    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.current_track.unwrap().id, "t0");
    assert!(!snapshot.intent.playing);
    assert!(!snapshot.engine.is_playing);
    assert_eq!(engine.count(&Call::Play), 0);

    // The loaded track resumes without another load.
    orchestrator.play().await.unwrap();
    assert_eq!(engine.count(&Call::Play), 1);
    assert_eq!(engine.count_loads(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_play_twice_issues_one_engine_call() {
    let engine = FakeEngine::polled();
    let list = tracks(&[200.0, 180.0]);
    register(&engine, &list);
    let orchestrator = orchestrator(core_config(engine.clone()));
    orchestrator.set_tracks(list).await;

    orchestrator.play().await.unwrap();
    orchestrator.play().await.unwrap();
    assert_eq!(engine.count(&Call::Play), 1);
    assert_eq!(engine.count_loads(), 1);
    assert_eq!(engine.volumes(), vec![0.7]);

    // Resume after pause reuses the loaded track.
    orchestrator.pause().await.unwrap();
    orchestrator.play().await.unwrap();
    assert_eq!(engine.count(&Call::Play), 2);
    assert_eq!(engine.count_loads(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_previous_restarts_after_threshold() {
    let engine = FakeEngine::polled();
    let list = tracks(&[200.0, 180.0]);
    register(&engine, &list);
    let orchestrator = orchestrator(core_config(engine.clone()));
    orchestrator.set_tracks(list).await;

    orchestrator.select_track(1).await.unwrap();
    orchestrator.seek(10.0).await.unwrap();
    orchestrator.previous().await.unwrap();

    assert_eq!(engine.seeks(), vec![10.0, 0.0]);
    assert_eq!(orchestrator.snapshot().intent.current_index, Some(1));

    // At the start of the track, previous steps back.
    orchestrator.previous().await.unwrap();
    assert_eq!(orchestrator.snapshot().intent.current_index, Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_queue_takes_precedence_over_order() {
    let engine = FakeEngine::polled();
    let list = tracks(&[200.0, 180.0, 240.0]);
    register(&engine, &list);
    let orchestrator = orchestrator(core_config(engine.clone()));
    orchestrator.set_tracks(list).await;

    orchestrator.select_track(0).await.unwrap();
    orchestrator.enqueue("t2").unwrap();
    assert_eq!(
        orchestrator.enqueue("missing").unwrap_err(),
        PlaybackError::TrackNotFound("missing".into())
    );

    assert_eq!(orchestrator.next().await.unwrap(), Some(2));
    let snapshot = orchestrator.snapshot();
    assert!(snapshot.queue.is_empty());
    assert_eq!(snapshot.current_track.unwrap().id, "t2");

    // End of list with repeat off.
    assert_eq!(orchestrator.next().await.unwrap(), None);
    orchestrator.set_repeat(RepeatMode::All);
    assert_eq!(orchestrator.next().await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_crossfade_duration_is_validated() {
    let engine = FakeEngine::polled();
    let orchestrator = orchestrator(core_config(engine));

    assert!(matches!(
        orchestrator.set_crossfade(true, 13).await,
        Err(PlaybackError::Config(_))
    ));
    orchestrator.set_crossfade(true, 8).await.unwrap();

    let snapshot = orchestrator.snapshot();
    assert!(snapshot.crossfade);
    assert_eq!(snapshot.crossfade_secs, 8);
}

// ============================================================================
// Transitions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_crossfade_switches_at_midpoint_and_restores_volume() {
    let engine = FakeEngine::pushing();
    let list = tracks(&[200.0, 180.0]);
    register(&engine, &list);
    let mut core = core_config(engine.clone());
    core.features.crossfade = true;
    let orchestrator = orchestrator(core);
    let mut rx = orchestrator.subscribe();
    orchestrator.set_tracks(list).await;
    orchestrator.start_bridge();

    orchestrator.select_track(0).await.unwrap();
    engine.tick(196.0, 200.0);
    settle().await;
    assert_eq!(orchestrator.snapshot().transition.mode, TransitionMode::Crossfading);

    // Ramp is capped at the 4s left in the track, so the switch lands at 2s.
    tokio::time::sleep(Duration::from_millis(1860)).await;
    assert_eq!(orchestrator.snapshot().intent.current_index, Some(0));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(orchestrator.snapshot().intent.current_index, Some(1));

    tokio::time::sleep(Duration::from_secs(3)).await;

    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.transition.mode, TransitionMode::None);
    assert_eq!(snapshot.current_track.unwrap().id, "t1");
    assert!(snapshot.intent.playing);

    let volumes = engine.volumes();
    assert!(volumes.iter().all(|v| (0.0..=0.7).contains(v)));
    let silent = volumes.iter().position(|&v| v == 0.0).unwrap();
    assert!(volumes[..=silent].windows(2).all(|w| w[0] >= w[1]));
    assert!(volumes[silent..].windows(2).all(|w| w[0] <= w[1]));
    assert!(volumes[silent + 1..].iter().any(|&v| v > 0.0 && v < 0.7));
    assert_eq!(volumes.last().copied(), Some(0.7));
    assert!(engine.calls().contains(&Call::Load("/music/t1.flac".into())));

    let events = drain(&mut rx);
    assert_eq!(now_playing(&events), vec!["t0".to_string(), "t1".to_string()]);
    assert!(has_event(&events, |e| matches!(
        e,
        CoreEvent::Playback(PlaybackEvent::TransitionFinished {
            to_index: 1,
            cancelled: false,
            ..
        })
    )));
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_next_during_crossfade_restores_volume() {
    let engine = FakeEngine::pushing();
    let list = tracks(&[200.0, 180.0, 240.0]);
    register(&engine, &list);
    let mut core = core_config(engine.clone());
    core.features.crossfade = true;
    let orchestrator = orchestrator(core);
    let mut rx = orchestrator.subscribe();
    orchestrator.set_tracks(list).await;
    orchestrator.start_bridge();

    orchestrator.select_track(0).await.unwrap();
    engine.tick(196.0, 200.0);
    settle().await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(engine.volumes().last().copied().unwrap() < 0.7);

    orchestrator.next().await.unwrap();

    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.transition.mode, TransitionMode::None);
    assert_eq!(snapshot.current_track.unwrap().id, "t1");
    assert_eq!(engine.volumes().last().copied(), Some(0.7));
    assert!(has_event(&drain(&mut rx), |e| matches!(
        e,
        CoreEvent::Playback(PlaybackEvent::TransitionFinished { cancelled: true, .. })
    )));
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_gapless_swap_uses_preloaded_track() {
    let engine = FakeEngine::with_capabilities(EngineCapabilities {
        push_events: true,
        gapless_preload: true,
        dual_stream: false,
    });
    let list = tracks(&[200.0, 180.0]);
    register(&engine, &list);
    let orchestrator = orchestrator(core_config(engine.clone()));
    orchestrator.set_tracks(list).await;
    orchestrator.start_bridge();

    orchestrator.select_track(0).await.unwrap();
    engine.tick(197.0, 200.0);
    settle().await;
    assert!(engine.calls().contains(&Call::Preload("/music/t1.flac".into())));
    assert_eq!(orchestrator.snapshot().transition.mode, TransitionMode::Preloading);

    engine.send(EngineSignal::TrackEnded);
    settle().await;

    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.current_track.unwrap().id, "t1");
    assert_eq!(snapshot.transition.mode, TransitionMode::None);
    assert_eq!(engine.count(&Call::Swap), 1);
    assert_eq!(engine.count_loads(), 1);
    assert_eq!(engine.count(&Call::Play), 2);
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_replanning_clears_stale_preload() {
    let engine = FakeEngine::with_capabilities(EngineCapabilities {
        push_events: true,
        gapless_preload: true,
        dual_stream: false,
    });
    let list = tracks(&[200.0, 180.0, 240.0]);
    register(&engine, &list);
    let orchestrator = orchestrator(core_config(engine.clone()));
    orchestrator.set_tracks(list).await;
    orchestrator.start_bridge();

    orchestrator.select_track(0).await.unwrap();
    engine.tick(197.0, 200.0);
    settle().await;
    assert_eq!(engine.state.lock().preloaded.as_deref(), Some("/music/t1.flac"));

    // t2 jumps the queue, so the prepared t1 is no longer next.
    orchestrator.enqueue("t2").unwrap();
    settle().await;
    assert_eq!(engine.count(&Call::ClearPreload), 1);
    assert!(engine.state.lock().preloaded.is_none());

    engine.send(EngineSignal::TrackEnded);
    settle().await;
    assert_eq!(orchestrator.snapshot().current_track.unwrap().id, "t2");
    assert_eq!(engine.count(&Call::Swap), 0);
    assert!(engine.calls().contains(&Call::Load("/music/t2.flac".into())));
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_repeat_one_restarts_current_track() {
    let engine = FakeEngine::pushing();
    let list = tracks(&[200.0, 180.0]);
    register(&engine, &list);
    let orchestrator = orchestrator(core_config(engine.clone()));
    orchestrator.set_tracks(list).await;
    orchestrator.start_bridge();

    orchestrator.select_track(0).await.unwrap();
    orchestrator.set_repeat(RepeatMode::One);
    engine.send(EngineSignal::TrackEnded);
    settle().await;

    assert_eq!(orchestrator.snapshot().intent.current_index, Some(0));
    assert_eq!(engine.seeks(), vec![0.0]);
    assert_eq!(engine.count(&Call::Play), 2);
    assert_eq!(engine.count_loads(), 1);
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_end_of_list_completes() {
    let engine = FakeEngine::pushing();
    let list = tracks(&[200.0]);
    register(&engine, &list);
    let orchestrator = orchestrator(core_config(engine.clone()));
    let mut rx = orchestrator.subscribe();
    orchestrator.set_tracks(list).await;
    orchestrator.start_bridge();

    orchestrator.select_track(0).await.unwrap();
    engine.send(EngineSignal::TrackEnded);
    settle().await;

    assert!(!orchestrator.snapshot().intent.playing);
    assert!(has_event(&drain(&mut rx), |e| matches!(
        e,
        CoreEvent::Playback(PlaybackEvent::Completed { track_id }) if track_id == "t0"
    )));
    orchestrator.shutdown().await;
}

// ============================================================================
// Failures and recovery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_load_timeout_retries_once_then_fails() {
    let engine = FakeEngine::polled();
    let list = tracks(&[200.0]);
    engine
        .state
        .lock()
        .load_delays
        .insert("/music/t0.flac".into(), Duration::from_secs(3600));
    let orchestrator = orchestrator(core_config(engine.clone()));
    let mut rx = orchestrator.subscribe();
    orchestrator.set_tracks(list).await;

    let err = orchestrator.select_track(0).await.unwrap_err();
    assert!(matches!(err, PlaybackError::Timeout { operation: "load", .. }));
    // Initial attempt, one backoff retry, then one more after the reinit.
    assert_eq!(engine.count_loads(), 3);
    assert_eq!(engine.count(&Call::Play), 0);
    assert_eq!(engine.count(&Call::Recover), 1);

    let events = drain(&mut rx);
    assert!(now_playing(&events).is_empty());
    assert!(has_event(&events, |e| matches!(
        e,
        CoreEvent::Playback(PlaybackEvent::Error { recoverable: true, .. })
    )));
    assert!(!orchestrator.snapshot().intent.playing);
}

#[tokio::test(start_paused = true)]
async fn test_poll_failures_below_limit_do_not_recover() {
    let engine = FakeEngine::polled();
    engine.state.lock().failing_polls = 3;
    let orchestrator = orchestrator(core_config(engine.clone()));
    orchestrator.start_bridge();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(engine.count(&Call::Recover), 0);
    assert_eq!(orchestrator.snapshot().recovery.consecutive_failures, 0);
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_fifth_poll_failure_recovers_once() {
    let engine = FakeEngine::polled();
    engine.state.lock().failing_polls = 5;
    let orchestrator = orchestrator(core_config(engine.clone()));
    let mut rx = orchestrator.subscribe();
    orchestrator.start_bridge();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(engine.count(&Call::Recover), 1);

    let reconnects = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, CoreEvent::Engine(EngineEvent::Reconnecting { .. })))
        .count();
    assert_eq!(reconnects, 1);
    assert!(!orchestrator.snapshot().recovery.unresponsive);
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_recovery_disables_playback() {
    let engine = FakeEngine::polled();
    let list = tracks(&[200.0]);
    register(&engine, &list);
    {
        let mut state = engine.state.lock();
        state.play_fails = true;
        state.recover_ok = false;
    }
    let orchestrator = orchestrator(core_config(engine.clone()));
    let mut rx = orchestrator.subscribe();
    orchestrator.set_tracks(list).await;

    assert!(matches!(
        orchestrator.select_track(0).await,
        Err(PlaybackError::Unresponsive(_))
    ));
    assert!(matches!(
        orchestrator.play().await,
        Err(PlaybackError::Unresponsive(_))
    ));
    assert_eq!(engine.count(&Call::Play), 1);
    assert_eq!(engine.count(&Call::Recover), 1);

    let unresponsive = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, CoreEvent::Engine(EngineEvent::Unresponsive { .. })))
        .count();
    assert_eq!(unresponsive, 1);
    assert!(orchestrator.snapshot().recovery.unresponsive);
}

#[tokio::test(start_paused = true)]
async fn test_device_change_while_playing_reloads_and_resumes() {
    let engine = FakeEngine::pushing();
    let list = tracks(&[200.0]);
    register(&engine, &list);
    let orchestrator = orchestrator(core_config(engine.clone()));
    orchestrator.set_tracks(list).await;
    orchestrator.start_bridge();

    orchestrator.select_track(0).await.unwrap();
    engine.send(EngineSignal::DeviceChanged {
        device: Some("usb-dac".into()),
    });
    settle().await;

    assert_eq!(engine.count(&Call::Recover), 1);
    assert_eq!(engine.count_loads(), 2);
    assert_eq!(engine.count(&Call::Play), 2);
    assert!(orchestrator.snapshot().intent.playing);
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_seek_during_recovery_is_applied_after_guard() {
    let engine = FakeEngine::polled();
    let list = tracks(&[200.0]);
    register(&engine, &list);
    {
        let mut state = engine.state.lock();
        state.inactive = Duration::from_secs(600);
        state.recover_delay = Duration::from_secs(1);
    }
    let orchestrator = orchestrator(core_config(engine.clone()));
    orchestrator.set_tracks(list).await;

    let select = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.select_track(0).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(orchestrator.snapshot().recovery.is_recovering);

    orchestrator.seek(30.0).await.unwrap();
    assert!(engine.seeks().is_empty());

    select.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(engine.seeks(), vec![30.0]);
    assert_eq!(orchestrator.snapshot().engine.position, 30.0);
}

// ============================================================================
// Corrupted tracks
// ============================================================================

fn corrupted_setup(
    answer: bool,
    delay: Duration,
    library: MockLibrary,
) -> (Arc<FakeEngine>, Arc<Confirmer>, core_playback::PlaybackOrchestrator) {
    let engine = FakeEngine::polled();
    let list = tracks(&[200.0, 180.0, 240.0]);
    register(&engine, &list);
    engine.state.lock().corrupted.insert("/music/t1.flac".into());

    let mut core = core_config(engine.clone());
    core.features.remove_corrupted_tracks = true;
    core.features.confirm_removal = true;
    core.library_store = Some(Arc::new(library));

    let confirmer = Arc::new(Confirmer {
        answer,
        delay,
        asked: AtomicUsize::new(0),
    });
    let orchestrator = orchestrator(core);
    orchestrator.register_handlers(HandlerTable::new().with_removal_confirmer(confirmer.clone()));
    (engine, confirmer, orchestrator)
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_corrupted_track_is_removed_and_skipped() {
    let mut library = MockLibrary::new();
    library
        .expect_remove_track()
        .withf(|track_id| track_id == "t1")
        .times(1)
        .returning(|_| Ok(()));
    let (engine, confirmer, orchestrator) = corrupted_setup(true, Duration::ZERO, library);
    let mut rx = orchestrator.subscribe();
    orchestrator.set_tracks(tracks(&[200.0, 180.0, 240.0])).await;

    orchestrator.select_track(1).await.unwrap();

    assert_eq!(confirmer.asked.load(Ordering::SeqCst), 1);
    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.track_count, 2);
    assert_eq!(snapshot.current_track.unwrap().id, "t2");
    assert_eq!(engine.count(&Call::Play), 1);

    let events = drain(&mut rx);
    assert_eq!(now_playing(&events), vec!["t2".to_string()]);
    assert!(has_event(&events, |e| matches!(
        e,
        CoreEvent::Library(LibraryEvent::TrackRemoved { track_id, .. }) if track_id == "t1"
    )));
}

#[tokio::test(start_paused = true)]
async fn test_declined_removal_keeps_track() {
    let mut library = MockLibrary::new();
    library.expect_remove_track().times(0);
    let (_engine, confirmer, orchestrator) = corrupted_setup(false, Duration::ZERO, library);
    orchestrator.set_tracks(tracks(&[200.0, 180.0, 240.0])).await;

    let err = orchestrator.select_track(1).await.unwrap_err();
    assert!(matches!(err, PlaybackError::Corrupted { ref track_id, .. } if track_id == "t1"));
    assert_eq!(confirmer.asked.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.snapshot().track_count, 3);
    assert!(!orchestrator.snapshot().intent.playing);
}

#[tokio::test(start_paused = true)]
async fn test_removal_confirmed_after_new_selection_keeps_selection() {
    let mut library = MockLibrary::new();
    library
        .expect_remove_track()
        .withf(|track_id| track_id == "t1")
        .times(1)
        .returning(|_| Ok(()));
    let (engine, confirmer, orchestrator) =
        corrupted_setup(true, Duration::from_secs(2), library);
    orchestrator.set_tracks(tracks(&[200.0, 180.0, 240.0])).await;

    let stale = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.select_track(1).await }
    });
    settle().await;
    assert_eq!(confirmer.asked.load(Ordering::SeqCst), 1);

    orchestrator.select_track(2).await.unwrap();
    stale.await.unwrap().unwrap();

    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.track_count, 2);
    assert_eq!(snapshot.current_track.unwrap().id, "t2");
    assert_eq!(snapshot.intent.current_index, Some(1));
    assert!(snapshot.intent.playing);
    assert_eq!(
        engine.calls().into_iter().filter(|c| matches!(c, Call::Load(_))).collect::<Vec<_>>(),
        vec![
            Call::Load("/music/t1.flac".into()),
            Call::Load("/music/t2.flac".into()),
        ]
    );
    assert_eq!(engine.count(&Call::Play), 1);
}

#[tokio::test(start_paused = true)]
async fn test_removal_declined_after_new_selection_keeps_playing() {
    let mut library = MockLibrary::new();
    library.expect_remove_track().times(0);
    let (engine, _confirmer, orchestrator) =
        corrupted_setup(false, Duration::from_secs(2), library);
    let mut rx = orchestrator.subscribe();
    orchestrator.set_tracks(tracks(&[200.0, 180.0, 240.0])).await;

    let stale = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.select_track(1).await }
    });
    settle().await;
    orchestrator.select_track(2).await.unwrap();
    stale.await.unwrap().unwrap();

    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.track_count, 3);
    assert_eq!(snapshot.current_track.unwrap().id, "t2");
    assert!(snapshot.intent.playing);
    assert_eq!(engine.count(&Call::Play), 1);
    assert!(!has_event(&drain(&mut rx), |e| matches!(
        e,
        CoreEvent::Playback(PlaybackEvent::Error { .. })
    )));
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_restore_session_resumes_saved_position() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonPlaybackStateStore::in_dir(dir.path()));
    store
        .save_last_played(&LastPlayed::new("t1", 42.0))
        .await
        .unwrap();

    let engine = FakeEngine::polled();
    let list = tracks(&[200.0, 180.0]);
    register(&engine, &list);
    let orchestrator = orchestrator(with_store(core_config(engine.clone()), store.clone()));
    orchestrator.set_tracks(list).await;

    assert_eq!(orchestrator.restore_session().await, Some(1));
    assert!(engine.calls().is_empty());

    orchestrator.play().await.unwrap();
    assert_eq!(engine.seeks(), vec![42.0]);
    assert_eq!(orchestrator.snapshot().engine.position, 42.0);

    orchestrator.pause().await.unwrap();
    let saved = store.load_last_played().await.unwrap().unwrap();
    assert_eq!(saved.track_id, "t1");
    assert_eq!(saved.position_secs, 42.0);
}

#[tokio::test]
async fn test_restore_session_ignores_unknown_track() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonPlaybackStateStore::in_dir(dir.path()));
    store
        .save_last_played(&LastPlayed::new("gone", 12.0))
        .await
        .unwrap();

    let engine = FakeEngine::polled();
    let orchestrator = orchestrator(with_store(core_config(engine), store));
    orchestrator.set_tracks(tracks(&[200.0])).await;

    assert_eq!(orchestrator.restore_session().await, None);
    assert_eq!(orchestrator.snapshot().intent.current_index, None);
}
