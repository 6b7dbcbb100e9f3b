//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use lyre_core::audio::{AudioConfig, OfflineDevice, OfflineDriver};
use lyre_core::config::PlayerConfig;
use lyre_core::engine::{
    ItemDescriptor, ItemError, ItemMetadata, ItemOpener, PlayableItem, PlayerEvent, PlayerHandle,
    RenderContext, RenderStatus,
};
use lyre_core::instrument::{
    EventFlags, Instrument, InstrumentError, InstrumentFactory, InstrumentKind, InstrumentResult,
    Instruments, OutputInfo,
};

/// Sample rate used by every fixture (1 frame = 1ms)
pub const RATE: u32 = 1000;

/// Frames per test cycle
pub const CYCLE: usize = 100;

/// Frames in every mock item (two cycles)
pub const ITEM_FRAMES: usize = 200;

/// Amplitude written by audible mock items
pub const LEVEL: f32 = 0.5;

/// Mock item whose behaviour is picked by its file name prefix:
///
/// - `missing*`: fails to open
/// - `broken*`: fails on the first render
/// - `slow*`: sleeps on every render
/// - `notes*`: silent, emits a note-on on channel 0 at the start
/// - anything else: constant [`LEVEL`] for [`ITEM_FRAMES`] frames
pub struct MockItem {
    name: String,
    position: usize,
    metadata: ItemMetadata,
}

impl PlayableItem for MockItem {
    fn render(&mut self, ctx: &mut RenderContext<'_>) -> Result<RenderStatus, ItemError> {
        if self.name.starts_with("broken") {
            return Err(ItemError::Render("bad chunk".to_string()));
        }
        if self.name.starts_with("slow") {
            std::thread::sleep(Duration::from_millis(5));
        }
        if self.name.starts_with("notes") {
            if self.position == 0 {
                ctx.events.send(&[0x90, 69, 127], 0.0);
            }
        } else {
            let n = ctx.frames().min(ITEM_FRAMES - self.position);
            for sample in ctx.out[..n].iter_mut() {
                sample.left = LEVEL;
                sample.right = LEVEL;
            }
        }

        let n = ctx.frames().min(ITEM_FRAMES - self.position);
        self.position += n;
        if self.position >= ITEM_FRAMES && !self.name.starts_with("slow") {
            Ok(RenderStatus::EndOfItem(n))
        } else {
            Ok(RenderStatus::Rendered(n))
        }
    }

    fn duration(&self) -> f64 {
        ITEM_FRAMES as f64 / RATE as f64
    }

    fn position(&self) -> f64 {
        self.position as f64 / RATE as f64
    }

    fn seek(&mut self, time: f64) -> Result<(), ItemError> {
        self.position = ((time * RATE as f64).round() as usize).min(ITEM_FRAMES);
        Ok(())
    }

    fn metadata(&self) -> &ItemMetadata {
        &self.metadata
    }
}

/// Opens [`MockItem`]s and records every open attempt
#[derive(Default)]
pub struct MockOpener {
    pub opened: Mutex<Vec<String>>,
}

impl ItemOpener for MockOpener {
    fn open(
        &self,
        descriptor: &ItemDescriptor,
        _sample_rate: u32,
    ) -> Result<Box<dyn PlayableItem>, ItemError> {
        let name = descriptor.display_name();
        self.opened.lock().unwrap().push(name.clone());
        if name.starts_with("missing") {
            return Err(ItemError::open(&descriptor.path, "no such file"));
        }
        Ok(Box::new(MockItem {
            metadata: ItemMetadata {
                name: Some(name.clone()),
                ..Default::default()
            },
            name,
            position: 0,
        }))
    }
}

/// MIDI sink that accepts only the ports it lists
pub struct MockMidiFactory {
    pub ports: Vec<String>,
    pub received: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockMidiFactory {
    pub fn new(ports: &[&str]) -> Self {
        Self {
            ports: ports.iter().map(|p| p.to_string()).collect(),
            received: Arc::default(),
        }
    }
}

struct MockMidiSink {
    ports: Vec<String>,
    target: Option<String>,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Instrument for MockMidiSink {
    fn kind(&self) -> InstrumentKind {
        InstrumentKind::MidiSink
    }

    fn open(&mut self, target_id: &str) -> InstrumentResult<()> {
        if !self.ports.iter().any(|p| p == target_id) {
            return Err(InstrumentError::OutputUnavailable(target_id.to_string()));
        }
        self.target = Some(target_id.to_string());
        Ok(())
    }

    fn close(&mut self) {
        self.target = None;
    }

    fn is_open(&self) -> bool {
        self.target.is_some()
    }

    fn target_id(&self) -> Option<&str> {
        self.target.as_deref()
    }

    fn send_event(&mut self, data: &[u8], _timestamp: f64, _flags: EventFlags) {
        self.received.lock().unwrap().push(data.to_vec());
    }
}

impl InstrumentFactory for MockMidiFactory {
    fn kind(&self) -> InstrumentKind {
        InstrumentKind::MidiSink
    }

    fn list_targets(&self) -> Vec<OutputInfo> {
        self.ports
            .iter()
            .map(|p| OutputInfo::new(p.clone(), format!("Mock {}", p)))
            .collect()
    }

    fn create(&self) -> Box<dyn Instrument> {
        Box::new(MockMidiSink {
            ports: self.ports.clone(),
            target: None,
            received: self.received.clone(),
        })
    }
}

/// Config publishing on every cycle at [`RATE`]
pub fn test_config() -> PlayerConfig {
    PlayerConfig {
        audio: AudioConfig::offline().with_sample_rate(RATE),
        state_update_hz: RATE as f32,
        max_consecutive_overruns: 0,
        shutdown_timeout_ms: 50,
        ..Default::default()
    }
}

pub fn playlist(names: &[&str]) -> Vec<ItemDescriptor> {
    names.iter().map(|n| ItemDescriptor::new(*n)).collect()
}

/// Start a player on a manually driven offline device
pub fn start_player(
    config: PlayerConfig,
    instruments: Instruments,
) -> (PlayerHandle, OfflineDriver, Arc<MockOpener>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (device, driver) = OfflineDevice::manual();
    let opener = Arc::new(MockOpener::default());
    let handle = PlayerHandle::start(config, Box::new(device), opener.clone(), instruments)
        .expect("offline device always starts");
    (handle, driver, opener)
}

/// Run `n` cycles of [`CYCLE`] frames, concatenating the output
pub fn pump(driver: &OfflineDriver, n: usize) -> Vec<lyre_core::StereoSample> {
    driver.run(n, CYCLE)
}

/// Indices of all `ItemStarted` events received so far
pub fn started_indices(handle: &PlayerHandle) -> Vec<usize> {
    handle
        .events()
        .try_iter()
        .filter_map(|e| match e {
            PlayerEvent::ItemStarted { index, .. } => Some(index),
            _ => None,
        })
        .collect()
}

/// Keeps cycling the device from a background thread
pub struct BackgroundPump {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl BackgroundPump {
    pub fn start(driver: OfflineDriver) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let join = std::thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                driver.cycle(CYCLE);
                std::thread::sleep(Duration::from_millis(1));
            }
        });
        Self {
            stop,
            join: Some(join),
        }
    }
}

impl Drop for BackgroundPump {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
