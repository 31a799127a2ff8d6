//! MIDI output side — turns posted messages into stateful note-on/off pairs.
//!
//! A [`Track`] is a monophonic voice: at most one sounding note at a time,
//! with sticky velocity and channel reused when later messages omit them.
//! The [`MidiProcessor`] owns one track per (head, slot), created lazily, and
//! an internal queue so messages posted ahead of time (the player schedules
//! within its lookahead window) fire at their exact due time during `poll`.

pub mod config;
pub mod device;

pub use config::MidiConfig;
pub use device::{list_devices, DeviceOutput, NullOutput};

use std::collections::HashMap;

use log::debug;

use crate::eval::{Message, Value};
use crate::player::{EventQueue, MessageProcessor};

/// The device boundary. Implementations map these calls onto wire bytes;
/// the core guarantees pitch and velocity in [0,127] and channel in [1,16].
pub trait MidiOutput {
    fn note_on(&mut self, note: u8, velocity: u8, channel: u8);
    fn note_off(&mut self, note: u8, velocity: u8, channel: u8);
    fn all_sound_off(&mut self);
}

/// A pending command bound for one track.
struct TrackCommand {
    head_id: String,
    slot: usize,
    message: Message,
}

/// MessageProcessor translating note messages into MIDI, one monophonic
/// track per (head, slot).
pub struct MidiProcessor<O: MidiOutput> {
    output: O,
    heads: HashMap<String, HashMap<usize, Track>>,
    queue: EventQueue<TrackCommand>,
    halted: bool,
}

impl<O: MidiOutput> MidiProcessor<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            heads: HashMap::new(),
            queue: EventQueue::new(),
            halted: false,
        }
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    fn apply(&mut self, command: TrackCommand) {
        let track = self
            .heads
            .entry(command.head_id)
            .or_default()
            .entry(command.slot)
            .or_default();

        let message = &command.message;
        if message.is_silent() {
            track.silence(&mut self.output);
            return;
        }

        match message.number("p") {
            Some(pitch) if (0.0..128.0).contains(&pitch) => {
                let velocity = message.number("v");
                let channel = message.number("c");
                track.note_on(&mut self.output, pitch as u8, velocity, channel);
            }
            _ => {
                if let Some(Value::Number(velocity)) = message.get("v") {
                    track.velocity_change(*velocity);
                }
            }
        }
    }

    fn silence_and_reset(&mut self) {
        self.queue.clear();
        for tracks in self.heads.values_mut() {
            for track in tracks.values_mut() {
                track.silence(&mut self.output);
            }
        }
        self.output.all_sound_off();
        self.heads.clear();
    }
}

impl<O: MidiOutput> MessageProcessor for MidiProcessor<O> {
    fn started(&mut self) {
        self.halted = false;
    }

    fn process(&mut self, time: f64, head_id: &str, messages: &[Message]) {
        if self.halted {
            // Posts can still arrive after stop; drop them.
            debug!("ignoring post after stop (head {head_id})");
            return;
        }

        for (index, message) in messages.iter().enumerate() {
            let slot = message
                .number("i")
                .filter(|i| *i >= 0.0)
                .map(|i| i as usize)
                .unwrap_or(index);

            self.queue.add(
                time,
                TrackCommand {
                    head_id: head_id.to_string(),
                    slot,
                    message: message.clone(),
                },
            );
        }
    }

    fn head_ended(&mut self, head_id: &str) {
        self.queue.retain(|entry| entry.event.head_id != head_id);
        if let Some(mut tracks) = self.heads.remove(head_id) {
            for track in tracks.values_mut() {
                track.silence(&mut self.output);
            }
        }
    }

    fn ended(&mut self) {
        self.silence_and_reset();
    }

    fn stopped(&mut self) {
        self.halted = true;
        self.silence_and_reset();
    }

    fn poll(&mut self, now: f64) {
        while let Some(entry) = self.queue.next(now) {
            self.apply(entry.event);
        }
    }
}

/// Monophonic per-slot note state: pending pitch/channel of the sounding
/// note, sticky last velocity/channel surviving across note-offs.
#[derive(Debug, Default)]
pub struct Track {
    latest_velocity: u8,
    latest_channel: Option<u8>,
    pending: Option<(u8, u8)>,
}

impl Track {
    /// Start a note, force-ending any note still sounding on this track
    /// first. Omitted velocity/channel default to the sticky values.
    pub fn note_on(
        &mut self,
        output: &mut impl MidiOutput,
        pitch: u8,
        velocity: Option<f64>,
        channel: Option<f64>,
    ) {
        self.end_pending_note(output);

        let velocity = match velocity {
            Some(v) => {
                let v = clamp_velocity(v);
                self.latest_velocity = v;
                v
            }
            None => self.latest_velocity,
        };

        let channel = channel
            .map(clamp_channel)
            .or(self.latest_channel)
            .unwrap_or(1);

        output.note_on(pitch, velocity, channel);
        self.pending = Some((pitch, channel));
        self.latest_channel = Some(channel);
    }

    /// Force a note-off without a new note-on.
    pub fn silence(&mut self, output: &mut impl MidiOutput) {
        self.end_pending_note(output);
    }

    /// A velocity-only update changes the sticky velocity and emits nothing.
    pub fn velocity_change(&mut self, velocity: f64) {
        if !velocity.is_nan() {
            self.latest_velocity = clamp_velocity(velocity);
        }
    }

    fn end_pending_note(&mut self, output: &mut impl MidiOutput) {
        if let Some((pitch, channel)) = self.pending.take() {
            output.note_off(pitch, 0, channel);
        }
    }
}

fn clamp_velocity(velocity: f64) -> u8 {
    velocity.clamp(0.0, 127.0) as u8
}

/// Channels are 1-based on the wire contract; clamp into [1,16].
fn clamp_channel(channel: f64) -> u8 {
    channel.clamp(1.0, 16.0) as u8
}
