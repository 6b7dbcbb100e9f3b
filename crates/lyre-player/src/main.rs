//! Lyre - headless MIDI and WAV player
//!
//! This is the main entry point for the terminal application. It:
//! 1. Loads the YAML config and applies command line overrides
//! 2. Opens the audio device and starts the player engine
//! 3. Reads control lines from stdin and reports player events
//!
//! With stdin closed (e.g. `lyre song.mid < /dev/null`) the program exits
//! once playback stops.

mod cli;
mod config;
mod control;
mod items;

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam::channel::{never, select, tick, unbounded, Receiver};

use lyre_core::audio::{get_output_devices, open_device, DeviceId};
use lyre_core::engine::{
    ActiveOutput, ItemDescriptor, PlaybackStatus, PlayerEvent, PlayerHandle, PlayerState,
};
use lyre_core::instrument::{InstrumentKind, Instruments, OutputSelection, SynthFactory};
use lyre_midi::MidiSinkFactory;

use cli::CliArgs;
use config::AppConfig;
use control::Action;
use items::{collect_playlist, FileOpener};

/// How often the main loop polls the state snapshot
const POLL_INTERVAL: Duration = Duration::from_millis(250);

fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = CliArgs::parse();
    if args.list_devices {
        for device in get_output_devices()? {
            println!("{}", device);
        }
        return Ok(());
    }
    if args.list_outputs {
        for port in lyre_midi::list_output_ports()? {
            println!("{}", port);
        }
        return Ok(());
    }

    let config_path = args
        .config_path
        .clone()
        .unwrap_or_else(config::default_config_path);
    let mut app_config: AppConfig = config::load_config(&config_path);
    apply_overrides(&mut app_config, &args);

    run(&mut app_config, &args)?;

    if let Err(e) = config::save_config(&app_config, &config_path) {
        log::warn!("Could not save config: {:#}", e);
    }
    Ok(())
}

/// Command line options win over the config file
fn apply_overrides(config: &mut AppConfig, args: &CliArgs) {
    let audio = &mut config.player.audio;
    if let Some(backend) = args.backend {
        audio.backend = backend.into();
    }
    if let Some(device) = &args.device {
        audio.device = Some(DeviceId::new(device.clone()));
    }
    if let Some(rate) = args.sample_rate {
        audio.sample_rate = Some(rate);
    }
    if let Some(repeat) = args.repeat {
        config.player.repeat = repeat.into();
    }
    if let Some(port) = &args.midi_out {
        config.output = OutputSelection::Midi(port.clone());
    } else if let Some(preset) = &args.synth {
        config.output = OutputSelection::Synth(preset.clone());
    }
}

fn run(app_config: &mut AppConfig, args: &CliArgs) -> Result<()> {
    let playlist = collect_playlist(&args.files);

    let device = open_device(app_config.player.audio.backend)
        .with_context(|| format!("Cannot open {} backend", app_config.player.audio.backend))?;
    let instruments = Instruments {
        synth: Some(Box::new(SynthFactory)),
        midi: Some(Box::new(MidiSinkFactory::new())),
        initial: Some(app_config.output.clone()),
    };
    let mut handle = PlayerHandle::start(
        app_config.player.clone(),
        device,
        Arc::new(FileOpener),
        instruments,
    )
    .context("Cannot start player")?;

    for (index, value) in app_config.fx.iter().enumerate() {
        handle.set_fx_parameter(index, *value)?;
    }

    println!("Lyre - {} items, h for help", playlist.len());
    if !playlist.is_empty() {
        handle.play(playlist.clone(), 0)?;
    }

    let result = control_loop(&handle, &playlist);

    let state = handle.snapshot();
    remember_session(app_config, &state);
    if let Err(e) = handle.shutdown() {
        log::warn!("{}", e);
    }
    result
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    std::thread::Builder::new()
        .name("lyre-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("stdin: {}", e);
                        break;
                    }
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}

/// What woke the control loop
enum Input {
    Line(Option<String>),
    Event(Option<PlayerEvent>),
    Tick,
}

fn control_loop(handle: &PlayerHandle, playlist: &[ItemDescriptor]) -> Result<()> {
    let mut lines = spawn_stdin_reader()?;
    let mut stdin_open = true;
    let ticker = tick(POLL_INTERVAL);
    let mut state = PlayerState::default();
    let mut started = false;

    loop {
        let input = select! {
            recv(lines) -> line => Input::Line(line.ok()),
            recv(handle.events()) -> event => Input::Event(event.ok()),
            recv(ticker) -> _ => Input::Tick,
        };

        match input {
            Input::Line(Some(line)) => match control::parse_line(&line) {
                Ok(Some(Action::Quit)) => return Ok(()),
                Ok(Some(action)) => handle_action(handle, playlist, action)?,
                Ok(None) => {}
                Err(e) => println!("{}", e),
            },
            Input::Line(None) => {
                log::debug!("stdin closed, exiting when playback stops");
                stdin_open = false;
                lines = never();
            }
            Input::Event(Some(event)) => {
                if matches!(
                    event,
                    PlayerEvent::ItemStarted { .. } | PlayerEvent::ItemFailed { .. }
                ) {
                    started = true;
                }
                report_event(&event);
                if matches!(event, PlayerEvent::ShutdownComplete) {
                    return Ok(());
                }
            }
            Input::Event(None) => return Ok(()),
            Input::Tick => {
                handle.snapshot_into(&mut state);
                if state.status == PlaybackStatus::ShutDown {
                    return Ok(());
                }
                let finished = started || playlist.is_empty();
                if !stdin_open && finished && state.status == PlaybackStatus::Stopped {
                    return Ok(());
                }
            }
        }
    }
}

fn handle_action(handle: &PlayerHandle, playlist: &[ItemDescriptor], action: Action) -> Result<()> {
    match action {
        Action::Command(command) => handle.send(command)?,
        Action::Goto(index) => {
            if index >= playlist.len() {
                println!("There are {} items", playlist.len());
            } else {
                handle.play(playlist.to_vec(), index)?;
            }
        }
        Action::VolumeStep(step) => {
            let volume = handle.snapshot().volume;
            handle.set_volume(volume + step)?;
        }
        Action::ListOutputs => {
            let outputs = handle.midi_outputs()?;
            if outputs.is_empty() {
                println!("No MIDI outputs");
            }
            for output in outputs {
                println!("  {}", output.name);
            }
        }
        Action::ShowState => println!("{}", control::format_details(&handle.snapshot())),
        Action::Help => print!("{}", control::HELP),
        Action::Quit => {}
    }
    Ok(())
}

fn report_event(event: &PlayerEvent) {
    match event {
        PlayerEvent::ItemStarted { index, path } => {
            println!("▶ {}: {}", index + 1, path.display());
        }
        PlayerEvent::ItemFinished { index } => log::debug!("item {} finished", index + 1),
        PlayerEvent::ItemFailed { index, error } => {
            println!("✗ {}: {}", index + 1, error);
        }
        PlayerEvent::OutputChanged { output } => {
            println!("Output: {}", describe_output(output));
        }
        PlayerEvent::OutputUnavailable { kind, id, error } => {
            println!("Output {:?} '{}' unavailable: {}", kind, id, error);
        }
        PlayerEvent::Stopped => println!("■ stopped"),
        PlayerEvent::ShutdownComplete => log::debug!("player shut down"),
    }
}

fn describe_output(output: &ActiveOutput) -> String {
    match output.kind {
        InstrumentKind::Synth => format!("synth ({})", output.id),
        InstrumentKind::MidiSink => format!("MIDI port {}", output.id),
    }
}

/// Carry the session's transport and output choices into the saved config
fn remember_session(config: &mut AppConfig, state: &PlayerState) {
    config.player.volume = state.volume;
    config.player.speed = state.speed;
    config.player.repeat = state.repeat;
    config.fx = state.fx;
    if let Some(output) = &state.output {
        config.output = match output.kind {
            InstrumentKind::Synth => OutputSelection::Synth(output.id.clone()),
            InstrumentKind::MidiSink => OutputSelection::Midi(output.id.clone()),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyre_core::audio::AudioBackend;
    use lyre_core::engine::RepeatMode;

    #[test]
    fn test_overrides_replace_config_values() {
        let mut config = AppConfig::default();
        let args = CliArgs::try_parse_from([
            "lyre",
            "--backend",
            "offline",
            "--rate",
            "44100",
            "--repeat",
            "one",
            "--midi-out",
            "Port A",
        ])
        .unwrap();
        apply_overrides(&mut config, &args);

        assert_eq!(config.player.audio.backend, AudioBackend::Offline);
        assert_eq!(config.player.audio.sample_rate, Some(44100));
        assert_eq!(config.player.repeat, RepeatMode::One);
        assert_eq!(config.output, OutputSelection::Midi("Port A".to_string()));
    }

    #[test]
    fn test_session_is_remembered() {
        let mut config = AppConfig::default();
        let mut state = PlayerState::default();
        state.volume = 0.4;
        state.repeat = RepeatMode::All;
        state.fx[1] = 400;
        state.output = Some(ActiveOutput {
            kind: InstrumentKind::Synth,
            id: "square".to_string(),
        });

        remember_session(&mut config, &state);
        assert_eq!(config.player.volume, 0.4);
        assert_eq!(config.player.repeat, RepeatMode::All);
        assert_eq!(config.fx[1], 400);
        assert_eq!(config.output, OutputSelection::Synth("square".to_string()));
    }
}
