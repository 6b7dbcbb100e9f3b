//! Command line arguments for the lyre binary
//!
//! Options given here override the YAML config for this run; what the
//! session ends with is written back to the config on exit.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use lyre_core::audio::AudioBackend;
use lyre_core::engine::RepeatMode;

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "lyre", version, about = "Headless MIDI and WAV player")]
pub struct CliArgs {
    /// MIDI/WAV files or directories to play, in order
    pub files: Vec<PathBuf>,

    /// Config file (default ~/.config/lyre/config.yaml)
    #[arg(long = "config", value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// Audio backend (default from config)
    #[arg(long, value_enum)]
    pub backend: Option<BackendArg>,

    /// Output device name (cpal)
    #[arg(long, value_name = "NAME")]
    pub device: Option<String>,

    /// Preferred sample rate in Hz
    #[arg(long = "rate", value_name = "HZ")]
    pub sample_rate: Option<u32>,

    /// Send events to a MIDI output port
    #[arg(long, value_name = "PORT", conflicts_with = "synth")]
    pub midi_out: Option<String>,

    /// Use the built-in synth (sine, square, saw, triangle)
    #[arg(long, value_name = "PRESET")]
    pub synth: Option<String>,

    /// Repeat mode
    #[arg(long, value_enum)]
    pub repeat: Option<RepeatArg>,

    /// List audio output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// List MIDI output ports and exit
    #[arg(long)]
    pub list_outputs: bool,
}

/// `--backend` values
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendArg {
    Cpal,
    Jack,
    Offline,
}

impl From<BackendArg> for AudioBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Cpal => AudioBackend::Cpal,
            BackendArg::Jack => AudioBackend::Jack,
            BackendArg::Offline => AudioBackend::Offline,
        }
    }
}

/// `--repeat` values, also accepted by the `m` control command
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatArg {
    Off,
    One,
    All,
}

impl From<RepeatArg> for RepeatMode {
    fn from(arg: RepeatArg) -> Self {
        match arg {
            RepeatArg::Off => RepeatMode::Off,
            RepeatArg::One => RepeatMode::One,
            RepeatArg::All => RepeatMode::All,
        }
    }
}

/// Parse a repeat mode name, ignoring case
pub fn parse_repeat(value: &str) -> Result<RepeatMode, String> {
    RepeatArg::from_str(value, true).map(RepeatMode::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<CliArgs, clap::Error> {
        CliArgs::try_parse_from(std::iter::once("lyre").chain(args.iter().copied()))
    }

    #[test]
    fn test_command_definition() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_files_and_options() {
        let args = parse(&["a.mid", "--backend", "offline", "--repeat", "all", "songs/"]).unwrap();
        assert_eq!(args.files, vec![PathBuf::from("a.mid"), PathBuf::from("songs/")]);
        assert_eq!(args.backend.map(AudioBackend::from), Some(AudioBackend::Offline));
        assert_eq!(args.repeat.map(RepeatMode::from), Some(RepeatMode::All));
        assert_eq!(args.config_path, None);
    }

    #[test]
    fn test_double_dash_ends_options() {
        let args = parse(&["--", "--weird-name.mid"]).unwrap();
        assert_eq!(args.files, vec![PathBuf::from("--weird-name.mid")]);
    }

    #[test]
    fn test_errors() {
        assert!(parse(&["--backend"]).is_err());
        assert!(parse(&["--backend", "asio"]).is_err());
        assert!(parse(&["--rate", "fast"]).is_err());
        assert!(parse(&["--frobnicate"]).is_err());
    }

    #[test]
    fn test_midi_out_conflicts_with_synth() {
        let err = parse(&["--midi-out", "x", "--synth", "sine"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
        assert!(parse(&["--midi-out", "x"]).is_ok());
    }

    #[test]
    fn test_parse_repeat_ignores_case() {
        assert_eq!(parse_repeat("ONE"), Ok(RepeatMode::One));
        assert_eq!(parse_repeat("off"), Ok(RepeatMode::Off));
        assert!(parse_repeat("sometimes").is_err());
    }
}
