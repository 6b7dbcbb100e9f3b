//! External MIDI output as a player instrument
//!
//! The audio callback never touches the MIDI driver. Events go into an
//! rtrb ring together with their due time; a sender thread owns the midir
//! connection, pops the ring and sends each message once it is due.
//! Note-cleanup bursts and `flush_events` push out everything queued ahead
//! of them, in order, so no note-on lands after the notes-off.
//!
//! ```text
//! Player::process ──send_event──▶ rtrb ring ──pop──▶ sender thread ──▶ midir
//! ```
//!
//! A port connected by this process counts as claimed: opening it a second
//! time fails with `OutputUnavailable` until the first sink closes it.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use lyre_core::instrument::{
    EventFlags, Instrument, InstrumentError, InstrumentFactory, InstrumentKind, InstrumentResult,
    OutputInfo,
};

use crate::connection::{self, MidiConnectionError};

/// Messages buffered between the audio callback and the sender thread
const QUEUE_CAPACITY: usize = 4096;

/// Longest message forwarded; longer SysEx is dropped
const MAX_MESSAGE_LEN: usize = 16;

/// Sender thread wake-up period
const SENDER_POLL: Duration = Duration::from_millis(1);

/// Timestamps further ahead than this are treated as malformed
const MAX_SCHEDULE_AHEAD: Duration = Duration::from_secs(1);

/// One message with its send time
#[derive(Debug, Clone, Copy)]
struct MidiPacket {
    due: Instant,
    /// Sends itself and everything queued before it right away
    urgent: bool,
    len: u8,
    data: [u8; MAX_MESSAGE_LEN],
}

impl MidiPacket {
    fn new(bytes: &[u8], due: Instant, urgent: bool) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > MAX_MESSAGE_LEN {
            return None;
        }
        let mut data = [0u8; MAX_MESSAGE_LEN];
        data[..bytes.len()].copy_from_slice(bytes);
        Some(Self {
            due,
            urgent,
            len: bytes.len() as u8,
            data,
        })
    }

    fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// Due time for an event `timestamp` seconds into the current cycle
fn due_time(now: Instant, timestamp: f64, flags: EventFlags) -> Instant {
    if flags.contains(EventFlags::PANIC) || !(timestamp.is_finite() && timestamp > 0.0) {
        return now;
    }
    now + Duration::from_secs_f64(timestamp).min(MAX_SCHEDULE_AHEAD)
}

/// Output ports held by this process
#[derive(Debug, Clone, Default)]
pub struct PortClaims {
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl PortClaims {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.claimed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `port`; false if it is already held
    pub fn try_claim(&self, port: &str) -> bool {
        self.lock().insert(port.to_string())
    }

    pub fn release(&self, port: &str) {
        self.lock().remove(port);
    }

    pub fn is_claimed(&self, port: &str) -> bool {
        self.lock().contains(port)
    }
}

/// Running sender thread and the producing end of its ring
struct SenderThread {
    producer: rtrb::Producer<MidiPacket>,
    /// Set by `flush_events`, cleared by the sender once it acts on it
    flush: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl SenderThread {
    /// Connect to `port_id` on a new thread
    ///
    /// Returns once the connection attempt finished, with the resolved port
    /// name.
    fn spawn(port_id: &str) -> Result<(Self, String), MidiConnectionError> {
        let (producer, consumer) = rtrb::RingBuffer::new(QUEUE_CAPACITY);
        let (ready_tx, ready_rx) = flume::bounded(1);
        let flush = Arc::new(AtomicBool::new(false));
        let sender_flush = flush.clone();
        let port_id = port_id.to_string();

        let join = std::thread::Builder::new()
            .name("lyre-midi-out".to_string())
            .spawn(move || match connection::connect_output(&port_id) {
                Ok((connection, name)) => {
                    let _ = ready_tx.send(Ok(name.clone()));
                    run_sender(consumer, &sender_flush, connection, &name);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| MidiConnectionError::ConnectionError(e.to_string()))?;

        let name = match ready_rx.recv() {
            Ok(result) => result?,
            Err(_) => {
                return Err(MidiConnectionError::ConnectionError(
                    "sender thread exited".to_string(),
                ))
            }
        };
        Ok((
            Self {
                producer,
                flush,
                join,
            },
            name,
        ))
    }

    /// Flush what is queued and wait for the thread to exit
    fn stop(self) {
        let SenderThread { producer, join, .. } = self;
        drop(producer);
        if join.join().is_err() {
            log::error!("MIDI sender thread panicked");
        }
    }
}

/// Send what is due from `pending`, keeping the rest for a later pass
///
/// Everything up to the last urgent packet goes out first, in queue order;
/// with `flush` set that is the whole queue. Of the remainder, every packet
/// whose due time has passed is sent, even if an earlier one is still
/// waiting.
fn dispatch_pending(
    pending: &mut VecDeque<MidiPacket>,
    now: Instant,
    flush: bool,
    mut send: impl FnMut(&[u8]),
) {
    let forced = if flush {
        pending.len()
    } else {
        pending.iter().rposition(|p| p.urgent).map_or(0, |i| i + 1)
    };
    for packet in pending.drain(..forced) {
        send(packet.bytes());
    }
    pending.retain(|packet| {
        if packet.due <= now {
            send(packet.bytes());
            false
        } else {
            true
        }
    });
}

fn run_sender(
    mut consumer: rtrb::Consumer<MidiPacket>,
    flush: &AtomicBool,
    mut connection: midir::MidiOutputConnection,
    port: &str,
) {
    let mut pending: VecDeque<MidiPacket> = VecDeque::with_capacity(256);
    loop {
        // Read the flag first so every packet pushed before it is popped below
        let flushing = flush.swap(false, Ordering::Acquire);
        while let Ok(packet) = consumer.pop() {
            pending.push_back(packet);
        }

        let closing = consumer.is_abandoned() && consumer.is_empty();
        dispatch_pending(&mut pending, Instant::now(), flushing || closing, |bytes| {
            if let Err(e) = connection.send(bytes) {
                log::debug!("MIDI: send to {} failed: {}", port, e);
            }
        });

        if closing {
            break;
        }
        std::thread::sleep(SENDER_POLL);
    }
    connection.close();
    log::info!("MIDI: Disconnected from {}", port);
}

fn to_instrument_error(e: MidiConnectionError) -> InstrumentError {
    match e {
        MidiConnectionError::OutputInitError(msg) => InstrumentError::Backend(msg),
        other => InstrumentError::OutputUnavailable(other.to_string()),
    }
}

/// Instrument forwarding events to an external MIDI port
pub struct MidiSinkInstrument {
    claims: PortClaims,
    /// Resolved port name while open
    port: Option<String>,
    sender: Option<SenderThread>,
    dropped: u64,
}

impl MidiSinkInstrument {
    pub fn new(claims: PortClaims) -> Self {
        Self {
            claims,
            port: None,
            sender: None,
            dropped: 0,
        }
    }

    /// Messages dropped because the ring was full or they were too long
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Instrument for MidiSinkInstrument {
    fn kind(&self) -> InstrumentKind {
        InstrumentKind::MidiSink
    }

    fn open(&mut self, target_id: &str) -> InstrumentResult<()> {
        self.close();

        let (sender, port) = SenderThread::spawn(target_id).map_err(to_instrument_error)?;
        if !self.claims.try_claim(&port) {
            sender.stop();
            return Err(InstrumentError::OutputUnavailable(format!(
                "{} is already in use",
                port
            )));
        }

        log::info!("MIDI: Output open on {}", port);
        self.sender = Some(sender);
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(sender) = self.sender.take() {
            sender.stop();
        }
        if let Some(port) = self.port.take() {
            self.claims.release(&port);
        }
    }

    fn is_open(&self) -> bool {
        self.sender.is_some()
    }

    fn target_id(&self) -> Option<&str> {
        self.port.as_deref()
    }

    fn send_event(&mut self, data: &[u8], timestamp: f64, flags: EventFlags) {
        let Some(sender) = self.sender.as_mut() else {
            return;
        };
        let due = due_time(Instant::now(), timestamp, flags);
        let urgent = flags.contains(EventFlags::PANIC);
        let Some(packet) = MidiPacket::new(data, due, urgent) else {
            self.dropped += 1;
            log::trace!("MIDI: dropping {}-byte message", data.len());
            return;
        };
        if sender.producer.push(packet).is_err() {
            self.dropped += 1;
            log::trace!("MIDI: output queue full, message dropped");
        }
    }

    fn flush_events(&mut self) {
        if let Some(sender) = self.sender.as_ref() {
            sender.flush.store(true, Ordering::Release);
        }
    }
}

impl Drop for MidiSinkInstrument {
    fn drop(&mut self) {
        self.close();
    }
}

/// Enumerates MIDI output ports and creates sinks sharing one claim set
#[derive(Debug, Clone, Default)]
pub struct MidiSinkFactory {
    claims: PortClaims,
}

impl MidiSinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim set shared by every sink this factory creates
    pub fn claims(&self) -> &PortClaims {
        &self.claims
    }
}

impl InstrumentFactory for MidiSinkFactory {
    fn kind(&self) -> InstrumentKind {
        InstrumentKind::MidiSink
    }

    fn list_targets(&self) -> Vec<OutputInfo> {
        match connection::list_output_ports() {
            Ok(ports) => ports
                .into_iter()
                .map(|name| OutputInfo::new(name.clone(), name))
                .collect(),
            Err(e) => {
                log::warn!("MIDI: Cannot list output ports: {}", e);
                Vec::new()
            }
        }
    }

    fn create(&self) -> Box<dyn Instrument> {
        Box::new(MidiSinkInstrument::new(self.claims.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_claims() {
        let claims = PortClaims::default();
        let shared = claims.clone();
        assert!(claims.try_claim("Synth A"));
        assert!(!shared.try_claim("Synth A"));
        assert!(shared.is_claimed("Synth A"));
        claims.release("Synth A");
        assert!(shared.try_claim("Synth A"));
    }

    #[test]
    fn test_packet_length_limits() {
        let now = Instant::now();
        assert!(MidiPacket::new(&[], now, false).is_none());
        assert!(MidiPacket::new(&[0xF0; 17], now, false).is_none());
        let packet = MidiPacket::new(&[0x90, 60, 100], now, false).unwrap();
        assert_eq!(packet.bytes(), &[0x90, 60, 100]);
    }

    #[test]
    fn test_due_time() {
        let now = Instant::now();
        assert_eq!(due_time(now, 0.01, EventFlags::PANIC), now);
        assert_eq!(due_time(now, f64::NAN, EventFlags::NONE), now);
        assert_eq!(due_time(now, -1.0, EventFlags::NONE), now);
        assert_eq!(due_time(now, 0.01, EventFlags::NONE), now + Duration::from_millis(10));
        assert_eq!(due_time(now, 1e9, EventFlags::NONE), now + MAX_SCHEDULE_AHEAD);
    }

    fn packet(bytes: &[u8], due: Instant, urgent: bool) -> MidiPacket {
        MidiPacket::new(bytes, due, urgent).unwrap()
    }

    fn dispatch(pending: &mut VecDeque<MidiPacket>, now: Instant, flush: bool) -> Vec<Vec<u8>> {
        let mut sent = Vec::new();
        dispatch_pending(pending, now, flush, |bytes| sent.push(bytes.to_vec()));
        sent
    }

    #[test]
    fn test_notes_off_pushes_out_scheduled_notes_first() {
        let now = Instant::now();
        let mut pending = VecDeque::from([
            packet(&[0x90, 60, 100], now + Duration::from_millis(500), false),
            packet(&[0x90, 64, 100], now + MAX_SCHEDULE_AHEAD, false),
            packet(&[0xB0, 123, 0], now, true),
            packet(&[0xB0, 120, 0], now, true),
            packet(&[0x90, 67, 100], now + Duration::from_millis(10), false),
        ]);

        let sent = dispatch(&mut pending, now, false);
        assert_eq!(
            sent,
            vec![
                vec![0x90, 60, 100],
                vec![0x90, 64, 100],
                vec![0xB0, 123, 0],
                vec![0xB0, 120, 0],
            ]
        );
        assert_eq!(pending.len(), 1);

        let sent = dispatch(&mut pending, now + Duration::from_millis(10), false);
        assert_eq!(sent, vec![vec![0x90, 67, 100]]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_due_packets_not_held_behind_later_ones() {
        let now = Instant::now();
        let mut pending = VecDeque::from([
            packet(&[0x90, 60, 100], now + Duration::from_millis(500), false),
            packet(&[0x80, 62, 0], now, false),
        ]);

        assert_eq!(dispatch(&mut pending, now, false), vec![vec![0x80, 62, 0]]);
        assert_eq!(pending.len(), 1);
        assert!(dispatch(&mut pending, now, false).is_empty());
    }

    #[test]
    fn test_flush_sends_everything_in_order() {
        let now = Instant::now();
        let mut pending = VecDeque::from([
            packet(&[0x90, 60, 100], now + Duration::from_millis(300), false),
            packet(&[0x90, 64, 100], now + Duration::from_millis(200), false),
        ]);

        let sent = dispatch(&mut pending, now, true);
        assert_eq!(sent, vec![vec![0x90, 60, 100], vec![0x90, 64, 100]]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_open_unknown_port_fails_cleanly() {
        let factory = MidiSinkFactory::new();
        let mut sink = factory.create();
        let result = sink.open("lyre-test-port-that-does-not-exist");

        assert!(result.is_err());
        assert!(!sink.is_open());
        assert_eq!(sink.target_id(), None);
        // Closed sinks ignore events
        sink.send_event(&[0x90, 60, 100], 0.0, EventFlags::NONE);
        sink.flush_events();
        sink.close();
    }
}
