//! File-backed playable items
//!
//! [`FileOpener`] picks a decoder by file extension:
//! - Standard MIDI Files (`.mid`, `.midi`, `.smf`, `.kar`) emit events for
//!   the active instrument
//! - WAV files (`.wav`) render audio directly

mod smf;
mod wav;

pub use smf::SmfItem;
pub use wav::WavItem;

use std::path::{Path, PathBuf};

use lyre_core::engine::{ItemDescriptor, ItemError, ItemOpener, PlayableItem};

/// Decoders known to the opener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemFormat {
    Smf,
    Wav,
}

impl ItemFormat {
    /// Format for a path, by extension (case-insensitive)
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "mid" | "midi" | "smf" | "kar" => Some(ItemFormat::Smf),
            "wav" | "wave" => Some(ItemFormat::Wav),
            _ => None,
        }
    }
}

/// Opens items from the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FileOpener;

impl ItemOpener for FileOpener {
    fn open(
        &self,
        descriptor: &ItemDescriptor,
        sample_rate: u32,
    ) -> Result<Box<dyn PlayableItem>, ItemError> {
        let path = &descriptor.path;
        match ItemFormat::from_path(path) {
            Some(ItemFormat::Smf) => Ok(Box::new(SmfItem::open(path)?)),
            Some(ItemFormat::Wav) => Ok(Box::new(WavItem::open(path, sample_rate)?)),
            None => Err(ItemError::open(path, "unsupported file type")),
        }
    }
}

/// Expand command-line paths into a playlist
///
/// Files are taken as given. Directories contribute their supported files,
/// sorted by name (not recursive).
pub fn collect_playlist(paths: &[PathBuf]) -> Vec<ItemDescriptor> {
    let mut playlist = Vec::new();
    for path in paths {
        if path.is_dir() {
            let entries = match std::fs::read_dir(path) {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("Cannot read directory {:?}: {}", path, e);
                    continue;
                }
            };
            let mut files: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && ItemFormat::from_path(p).is_some())
                .collect();
            files.sort();
            log::debug!("{:?}: {} playable files", path, files.len());
            playlist.extend(files.into_iter().map(ItemDescriptor::new));
        } else {
            playlist.push(ItemDescriptor::new(path.clone()));
        }
    }
    playlist
}
