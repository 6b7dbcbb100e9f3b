//! Line-based terminal control
//!
//! Each line typed on stdin becomes one [`Action`]. Most actions map
//! straight to a player command; the rest need the main loop (volume
//! steps read the current snapshot, listing outputs blocks on a reply).

use anyhow::{anyhow, bail, Result};

use lyre_core::engine::{PauseMode, PlaybackStatus, PlayerCommand, PlayerState, FX_PARAMS};
use lyre_core::MIDI_CHANNELS;

use crate::cli::parse_repeat;

/// Seconds skipped by `<` and `>`
const SEEK_STEP: f64 = 5.0;
/// Linear gain change per `+` or `-`
const VOLUME_STEP: f32 = 0.1;
/// Speed change per `[` or `]`
const SPEED_STEP: f64 = 0.1;

pub const HELP: &str = "\
Commands:
  p            pause/resume        s        stop
  n [N]        next (N items)      b        previous
  g N          play item N         r        rewind
  < / >        seek -5s / +5s      t SECS   seek to time
  e            seek to end
  - / +        volume down / up    v GAIN   set volume
  [ / ]        slower / faster     x SPEED  set speed
  m [MODE]     repeat mode (cycle, or off/one/all)
  c N          toggle MIDI channel N (1-16)
  o [PORT]     list MIDI outputs, or switch to PORT
  y PRESET     switch to the built-in synth
  fx I VALUE   set FX parameter I
  i            show state          q        quit
";

/// One parsed input line
#[derive(Debug)]
pub enum Action {
    /// Forward to the player as is
    Command(PlayerCommand),
    /// Restart the current playlist at this index
    Goto(usize),
    /// Change volume relative to the last snapshot
    VolumeStep(f32),
    ListOutputs,
    ShowState,
    Help,
    Quit,
}

fn number<T: std::str::FromStr>(arg: Option<&str>, what: &str) -> Result<T> {
    let arg = arg.ok_or_else(|| anyhow!("missing {}", what))?;
    arg.parse().map_err(|_| anyhow!("invalid {} '{}'", what, arg))
}

/// Parse one input line; blank lines yield `None`
pub fn parse_line(line: &str) -> Result<Option<Action>> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let arg = (!rest.is_empty()).then_some(rest);

    let command = match word {
        "" => return Ok(None),
        "p" | "pause" => PlayerCommand::Pause {
            mode: PauseMode::Toggle,
        },
        "s" | "stop" => PlayerCommand::Stop,
        "n" | "next" => PlayerCommand::Next {
            offset: arg.map(|a| number(Some(a), "offset")).transpose()?.unwrap_or(1),
        },
        "b" | "prev" => PlayerCommand::Next { offset: -1 },
        "g" | "goto" => {
            let index: usize = number(arg, "item number")?;
            if index == 0 {
                bail!("items are numbered from 1");
            }
            return Ok(Some(Action::Goto(index - 1)));
        }
        "r" | "rewind" => PlayerCommand::Rewind,
        "<" => PlayerCommand::SeekCur { offset: -SEEK_STEP },
        ">" => PlayerCommand::SeekCur { offset: SEEK_STEP },
        "t" | "seek" => PlayerCommand::SeekSet {
            time: number(arg, "time")?,
        },
        "e" | "end" => PlayerCommand::SeekEnd,
        "+" => return Ok(Some(Action::VolumeStep(VOLUME_STEP))),
        "-" => return Ok(Some(Action::VolumeStep(-VOLUME_STEP))),
        "v" | "volume" => PlayerCommand::Volume {
            value: number(arg, "volume")?,
        },
        "[" => PlayerCommand::Speed {
            value: -SPEED_STEP,
            relative: true,
        },
        "]" => PlayerCommand::Speed {
            value: SPEED_STEP,
            relative: true,
        },
        "x" | "speed" => PlayerCommand::Speed {
            value: number(arg, "speed")?,
            relative: false,
        },
        "m" | "repeat" => match arg {
            Some(mode) => PlayerCommand::SetRepeatMode {
                mode: parse_repeat(mode).map_err(|e| anyhow!(e))?,
            },
            None => PlayerCommand::NextRepeatMode,
        },
        "c" | "channel" => {
            let channel: usize = number(arg, "channel")?;
            if !(1..=MIDI_CHANNELS).contains(&channel) {
                bail!("channels are numbered 1-{}", MIDI_CHANNELS);
            }
            PlayerCommand::ChannelToggle {
                channel: channel - 1,
            }
        }
        "o" | "output" => match arg {
            Some(port) => PlayerCommand::SetMidiOutput {
                id: port.to_string(),
            },
            None => return Ok(Some(Action::ListOutputs)),
        },
        "y" | "synth" => PlayerCommand::SetSynth {
            id: arg.ok_or_else(|| anyhow!("missing preset"))?.to_string(),
        },
        "fx" => {
            let mut parts = rest.split_whitespace();
            let index: usize = number(parts.next(), "parameter index")?;
            if index >= FX_PARAMS.len() {
                bail!("FX parameters are numbered 0-{}", FX_PARAMS.len() - 1);
            }
            PlayerCommand::SetFxParameter {
                index,
                value: number(parts.next(), "parameter value")?,
            }
        }
        "i" | "info" => return Ok(Some(Action::ShowState)),
        "h" | "help" | "?" => return Ok(Some(Action::Help)),
        "q" | "quit" => return Ok(Some(Action::Quit)),
        other => bail!("unknown command '{}' (h for help)", other),
    };
    Ok(Some(Action::Command(command)))
}

/// Format seconds as m:ss
pub fn format_time(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// One-line summary of a snapshot
pub fn format_status(state: &PlayerState) -> String {
    let mut line = format!("[{}]", state.status.name());
    if state.status.is_active() {
        if let Some(index) = state.playlist_index {
            line.push_str(&format!(" {}/{}", index + 1, state.playlist_len));
        }
        if let Some(name) = state.metadata.name.as_ref().or(state.item_name.as_ref()) {
            line.push_str(&format!(" {}", name));
        }
        line.push_str(&format!(
            " {} / {}",
            format_time(state.position),
            format_time(state.duration)
        ));
    }
    line.push_str(&format!(
        " | vol {:.0}% speed {:.2}x repeat {}",
        state.volume * 100.0,
        state.speed,
        state.repeat.name()
    ));
    if let Some(output) = &state.output {
        line.push_str(&format!(" | {:?} {}", output.kind, output.id));
    }
    let muted: Vec<String> = (0..MIDI_CHANNELS)
        .filter(|&ch| !state.channels.is_enabled(ch))
        .map(|ch| (ch + 1).to_string())
        .collect();
    if !muted.is_empty() {
        line.push_str(&format!(" | muted {}", muted.join(",")));
    }
    if state.status == PlaybackStatus::ShutDown {
        line.push_str(" | engine stopped");
    }
    line
}

/// Multi-line description of a snapshot, for the `i` command
pub fn format_details(state: &PlayerState) -> String {
    let mut out = format_status(state);
    let meta = &state.metadata;
    if let Some(path) = &state.item_path {
        out.push_str(&format!("\n  file:    {}", path.display()));
    }
    if let Some(format) = &meta.format {
        out.push_str(&format!("\n  format:  {}", format));
    }
    if let Some(tracks) = meta.track_count {
        out.push_str(&format!("\n  tracks:  {}", tracks));
    }
    if let Some(author) = &meta.author {
        out.push_str(&format!("\n  author:  {}", author));
    }
    for text in &meta.text {
        out.push_str(&format!("\n  text:    {}", text));
    }
    let fx: Vec<String> = FX_PARAMS
        .iter()
        .zip(state.fx.iter())
        .map(|(info, value)| format!("{} {}{}", info.name, value, info.unit))
        .collect();
    out.push_str(&format!("\n  fx:      {}", fx.join(", ")));
    out.push_str(&format!(
        "\n  engine:  {}Hz, {} overruns, {} failed items",
        state.sample_rate, state.overruns, state.failed_items
    ));
    out
}
