//! End-to-end playback scenarios on a manually driven offline device

mod common;

use common::*;
use lyre_core::engine::{
    PauseMode, PlaybackStatus, PlayerCommand, PlayerEvent, RepeatMode, EVENT_CAPACITY,
};
use lyre_core::instrument::Instruments;

#[test]
fn test_commands_applied_in_order_exactly_once() {
    let (handle, driver, _opener) = start_player(test_config(), Instruments::default());

    handle.set_volume(0.2).unwrap();
    handle.set_volume(0.4).unwrap();
    handle.set_volume(0.6).unwrap();
    handle.adjust_speed(0.25).unwrap();
    handle.adjust_speed(0.25).unwrap();
    pump(&driver, 1);

    let state = handle.snapshot();
    assert_eq!(state.volume, 0.6);
    assert_eq!(state.speed, 1.5);

    // Nothing is replayed on later cycles
    pump(&driver, 3);
    assert_eq!(handle.snapshot().speed, 1.5);
}

#[test]
fn test_speed_and_volume_clamped_before_render() {
    let (handle, driver, _opener) = start_player(test_config(), Instruments::default());
    let limits = handle.limits();

    handle.set_volume(5.0).unwrap();
    handle.set_speed(100.0).unwrap();
    handle.play(playlist(&["a"]), 0).unwrap();
    let out = pump(&driver, 1);

    let state = handle.snapshot();
    assert_eq!(state.volume, limits.max_volume);
    assert_eq!(state.speed, limits.max_speed);
    assert!(out.iter().all(|s| s.left <= LEVEL * limits.max_volume + 1e-6));
}

#[test]
fn test_seek_while_stopped_is_noop() {
    let (handle, driver, _opener) = start_player(test_config(), Instruments::default());

    handle.seek_to(0.1).unwrap();
    handle.seek_end().unwrap();
    pump(&driver, 1);

    let state = handle.snapshot();
    assert_eq!(state.status, PlaybackStatus::Stopped);
    assert_eq!(state.playlist_index, None);
    assert_eq!(state.position, 0.0);
}

#[test]
fn test_seek_clamped_into_item() {
    let (handle, driver, _opener) = start_player(test_config(), Instruments::default());
    handle.play(playlist(&["a"]), 0).unwrap();
    pump(&driver, 1);

    handle.seek_by(-10.0).unwrap();
    pump(&driver, 1);
    // Seeked to 0 then rendered one cycle
    assert_eq!(handle.snapshot().position, CYCLE as f64 / RATE as f64);
}

#[test]
fn test_repeat_all_wraps_through_playlist() {
    let mut config = test_config();
    config.repeat = RepeatMode::All;
    let (handle, driver, _opener) = start_player(config, Instruments::default());

    handle.play(playlist(&["a", "b", "c"]), 2).unwrap();
    // Each item lasts two cycles
    pump(&driver, 4);

    assert_eq!(started_indices(&handle), vec![2, 0, 1]);
    assert_eq!(handle.snapshot().playlist_index, Some(1));
}

#[test]
fn test_repeat_one_replays_current_item() {
    let (handle, driver, opener) = start_player(test_config(), Instruments::default());
    handle.set_repeat_mode(RepeatMode::One).unwrap();
    handle.play(playlist(&["a", "b"]), 0).unwrap();
    pump(&driver, 4);

    assert_eq!(started_indices(&handle), vec![0, 0, 0]);
    assert!(opener.opened.lock().unwrap().iter().all(|n| n == "a"));
}

#[test]
fn test_repeat_off_stops_after_last_item() {
    let (handle, driver, _opener) = start_player(test_config(), Instruments::default());
    handle.play(playlist(&["a", "b"]), 1).unwrap();
    pump(&driver, 2);

    let state = handle.snapshot();
    assert_eq!(state.status, PlaybackStatus::Stopped);
    assert_eq!(state.playlist_index, Some(1));
    assert!(handle.events().try_iter().any(|e| e == PlayerEvent::Stopped));

    // Silence once stopped
    let out = pump(&driver, 1);
    assert!(out.iter().all(|s| s.left == 0.0 && s.right == 0.0));
}

#[test]
fn test_next_wraps_only_in_repeat_all() {
    let (handle, driver, _opener) = start_player(test_config(), Instruments::default());
    handle.play(playlist(&["a", "b", "c"]), 0).unwrap();
    handle.next(-1).unwrap();
    pump(&driver, 1);
    assert_eq!(handle.snapshot().status, PlaybackStatus::Stopped);

    handle.set_repeat_mode(RepeatMode::All).unwrap();
    handle.next(-1).unwrap();
    pump(&driver, 1);
    let state = handle.snapshot();
    assert_eq!(state.status, PlaybackStatus::Playing);
    assert_eq!(state.playlist_index, Some(2));
}

#[test]
fn test_pause_toggle() {
    let (handle, driver, _opener) = start_player(test_config(), Instruments::default());

    // No-op from Stopped
    handle.pause(PauseMode::Toggle).unwrap();
    pump(&driver, 1);
    assert_eq!(handle.snapshot().status, PlaybackStatus::Stopped);

    handle.play(playlist(&["a"]), 0).unwrap();
    handle.pause(PauseMode::Toggle).unwrap();
    let out = pump(&driver, 1);
    assert_eq!(handle.snapshot().status, PlaybackStatus::Paused);
    assert!(out.iter().all(|s| s.left == 0.0));

    handle.pause(PauseMode::Toggle).unwrap();
    pump(&driver, 1);
    assert_eq!(handle.snapshot().status, PlaybackStatus::Playing);
}

#[test]
fn test_open_failure_advances_to_next_item() {
    let (handle, driver, _opener) = start_player(test_config(), Instruments::default());
    handle.play(playlist(&["missing.mid", "ok.mid"]), 0).unwrap();
    pump(&driver, 1);

    let state = handle.snapshot();
    assert_eq!(state.status, PlaybackStatus::Playing);
    assert_eq!(state.playlist_index, Some(1));
    assert_eq!(state.failed_items, 1);

    let events: Vec<_> = handle.events().try_iter().collect();
    assert!(matches!(events[0], PlayerEvent::ItemFailed { index: 0, .. }));
    assert!(matches!(events[1], PlayerEvent::ItemStarted { index: 1, .. }));
}

#[test]
fn test_every_item_failing_stops_after_one_pass() {
    let mut config = test_config();
    config.repeat = RepeatMode::All;
    let (handle, driver, opener) = start_player(config, Instruments::default());
    handle
        .play(playlist(&["missing1", "missing2", "missing3"]), 0)
        .unwrap();
    pump(&driver, 2);

    assert_eq!(opener.opened.lock().unwrap().len(), 3);
    let state = handle.snapshot();
    assert_eq!(state.status, PlaybackStatus::Stopped);
    assert_eq!(state.failed_items, 3);
}

#[test]
fn test_render_error_skips_item() {
    let (handle, driver, _opener) = start_player(test_config(), Instruments::default());
    handle.play(playlist(&["broken", "ok"]), 0).unwrap();
    pump(&driver, 1);

    let state = handle.snapshot();
    assert_eq!(state.playlist_index, Some(1));
    assert_eq!(state.failed_items, 1);
    assert_eq!(started_indices(&handle), vec![0, 1]);
}

#[test]
fn test_failing_item_in_repeat_one_stops() {
    let mut config = test_config();
    config.repeat = RepeatMode::One;
    let (handle, driver, opener) = start_player(config, Instruments::default());
    handle.play(playlist(&["broken"]), 0).unwrap();
    pump(&driver, 1000);

    assert_eq!(opener.opened.lock().unwrap().len(), 1);
    let state = handle.snapshot();
    assert_eq!(state.status, PlaybackStatus::Stopped);
    assert_eq!(state.failed_items, 1);
    assert_eq!(handle.events().len(), 3);
}

#[test]
fn test_failing_items_in_repeat_all_stop_after_one_pass() {
    let mut config = test_config();
    config.repeat = RepeatMode::All;
    let (handle, driver, opener) = start_player(config, Instruments::default());
    handle.play(playlist(&["broken1", "broken2"]), 0).unwrap();
    pump(&driver, 10);

    assert_eq!(opener.opened.lock().unwrap().len(), 2);
    let state = handle.snapshot();
    assert_eq!(state.status, PlaybackStatus::Stopped);
    assert_eq!(state.failed_items, 2);
}

#[test]
fn test_undrained_events_are_bounded() {
    let mut config = test_config();
    config.repeat = RepeatMode::All;
    let (handle, driver, _opener) = start_player(config, Instruments::default());
    handle.play(playlist(&["a", "b"]), 0).unwrap();
    // Two events per item, one item every two cycles
    pump(&driver, 2 * EVENT_CAPACITY);

    assert_eq!(handle.events().len(), EVENT_CAPACITY);
    assert!(handle.dropped_events() > 0);
    assert_eq!(handle.snapshot().status, PlaybackStatus::Playing);
}

#[test]
fn test_consecutive_overruns_fail_item() {
    let mut config = test_config();
    config.audio = config.audio.with_sample_rate(48000);
    config.max_consecutive_overruns = 2;
    let (handle, driver, _opener) = start_player(config, Instruments::default());

    handle.play(playlist(&["slow", "ok"]), 0).unwrap();
    // 64 frames at 48kHz is ~1.3ms, the slow item takes 5ms per cycle
    driver.run(2, 64);
    handle.request_state().unwrap();
    driver.run(1, 64);

    let state = handle.snapshot();
    assert!(state.overruns >= 2);
    assert_eq!(state.failed_items, 1);
    assert_eq!(state.playlist_index, Some(1));
}

#[test]
fn test_channel_mute_silences_synth() {
    let instruments = Instruments::synth_only();
    let (handle, driver, _opener) = start_player(test_config(), instruments);

    handle.play(playlist(&["notes"]), 0).unwrap();
    let out = pump(&driver, 1);
    assert!(out.iter().any(|s| s.left.abs() > 0.01));
    assert!(handle.snapshot().channel_levels[0] > 0.0);

    handle.stop().unwrap();
    handle.set_channel_enabled(0, false).unwrap();
    handle.set_channel_enabled(40, false).unwrap();
    handle.play(playlist(&["notes"]), 0).unwrap();
    pump(&driver, 3);
    let out = pump(&driver, 1);
    assert!(out.iter().all(|s| s.left.abs() < 1e-3));
    assert!(!handle.snapshot().channels.is_enabled(0));
}

#[test]
fn test_unavailable_output_keeps_playback_running() {
    let (handle, driver, _opener) = start_player(test_config(), Instruments::synth_only());
    assert!(handle.snapshot().output.is_some());

    handle.play(playlist(&["a"]), 0).unwrap();
    handle.set_midi_output("no-such-port").unwrap();
    let out = pump(&driver, 1);

    let state = handle.snapshot();
    assert_eq!(state.status, PlaybackStatus::Playing);
    assert!(state.output.is_none());
    assert!(out.iter().any(|s| s.left > 0.0));
    assert!(handle
        .events()
        .try_iter()
        .any(|e| matches!(e, PlayerEvent::OutputUnavailable { .. })));
}

#[test]
fn test_fx_parameter_reported_in_snapshot() {
    let (handle, driver, _opener) = start_player(test_config(), Instruments::default());
    handle.set_fx_parameter(0, -500).unwrap();
    handle.set_fx_parameter(17, 1).unwrap();
    pump(&driver, 1);
    assert_eq!(handle.snapshot().fx[0], -100);
}

#[test]
fn test_item_metadata_published() {
    let (handle, driver, _opener) = start_player(test_config(), Instruments::default());
    handle
        .send(PlayerCommand::Play {
            playlist: playlist(&["/music/song.mid"]),
            index: 0,
        })
        .unwrap();
    pump(&driver, 1);

    let state = handle.snapshot();
    assert_eq!(state.item_name.as_deref(), Some("song.mid"));
    assert_eq!(state.metadata.name.as_deref(), Some("song.mid"));
    assert_eq!(state.duration, ITEM_FRAMES as f64 / RATE as f64);
}
