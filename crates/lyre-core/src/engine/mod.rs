//! Playback engine - commands, player state machine, snapshots
//!
//! This module contains the pieces between controllers and the audio
//! callback:
//! - Commands: what controllers can ask for, and the queue that carries them
//! - Player: the per-cycle state machine that owns the current item
//! - State: snapshots published for pollers
//! - Handle: the controller-facing surface tying it all to an audio device

mod command;
mod event;
mod fx;
mod handle;
mod item;
mod player;
mod playlist;
mod queue;
mod state;
mod transport;

pub use command::*;
pub use event::{PlayerEvent, EVENT_CAPACITY};
pub use fx::{FxParamInfo, FxStage, FX_PARAMS, FX_PARAM_COUNT};
pub use handle::*;
pub use item::*;
pub use player::{Player, PlayerShared};
pub use playlist::*;
pub use queue::*;
pub use state::*;
pub use transport::*;
