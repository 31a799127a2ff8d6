//! midir-backed implementation of the [`MidiOutput`](super::MidiOutput)
//! boundary, plus a no-op output for headless runs and tests.
//!
//! The core hands this module channels in [1,16]; the 1-based channel is
//! mapped onto the 4 low status bits here, at the wire boundary.

use std::io;

use midir::{MidiOutput as MidirOutput, MidiOutputConnection, MidiOutputPort};

use super::config::MidiConfig;
use super::MidiOutput;

const NOTE_ON: u8 = 0x90;
const NOTE_OFF: u8 = 0x80;
const CONTROL_CHANGE: u8 = 0xB0;
const ALL_SOUND_OFF_CC: u8 = 0x78;

const CLIENT_NAME: &str = "motet";

/// An open connection to a MIDI output port.
pub struct DeviceOutput {
    connection: MidiOutputConnection,
    port_name: String,
}

impl DeviceOutput {
    /// Connect to a port matching the config's `device_name` (or the first
    /// available port), or create a virtual port when asked to.
    pub fn connect(config: &MidiConfig) -> io::Result<Self> {
        let midi_out =
            MidirOutput::new(CLIENT_NAME).map_err(|e| io::Error::other(format!("MIDI init: {e}")))?;

        if config.virtual_port {
            return Self::connect_virtual(midi_out);
        }

        let ports = midi_out.ports();
        if ports.is_empty() {
            return Err(io::Error::other("no MIDI output ports available"));
        }

        let (port, port_name) = if let Some(ref name_filter) = config.device_name {
            ports
                .iter()
                .find_map(|p| {
                    let name = midi_out.port_name(p).unwrap_or_default();
                    name.contains(name_filter.as_str())
                        .then(|| (p.clone(), name))
                })
                .ok_or_else(|| {
                    io::Error::other(format!("MIDI device matching '{name_filter}' not found"))
                })?
        } else {
            let p: MidiOutputPort = ports[0].clone();
            let name = midi_out
                .port_name(&p)
                .unwrap_or_else(|_| "unknown".to_string());
            (p, name)
        };

        let connection = midi_out
            .connect(&port, CLIENT_NAME)
            .map_err(|e| io::Error::other(format!("MIDI connect: {e}")))?;

        Ok(Self {
            connection,
            port_name,
        })
    }

    #[cfg(not(target_os = "windows"))]
    fn connect_virtual(midi_out: MidirOutput) -> io::Result<Self> {
        use midir::os::unix::VirtualOutput;

        let connection = midi_out
            .create_virtual(CLIENT_NAME)
            .map_err(|e| io::Error::other(format!("virtual MIDI port: {e}")))?;
        Ok(Self {
            connection,
            port_name: format!("{CLIENT_NAME} (virtual)"),
        })
    }

    #[cfg(target_os = "windows")]
    fn connect_virtual(_midi_out: MidirOutput) -> io::Result<Self> {
        Err(io::Error::other(
            "virtual MIDI ports are not supported on Windows",
        ))
    }

    /// Name of the connected port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn send(&mut self, bytes: &[u8]) {
        if let Err(e) = self.connection.send(bytes) {
            log::warn!("MIDI send failed: {e}");
        }
    }
}

/// Map a 1-based channel onto the low status nibble.
fn status(kind: u8, channel: u8) -> u8 {
    kind | (channel.clamp(1, 16) - 1)
}

impl MidiOutput for DeviceOutput {
    fn note_on(&mut self, note: u8, velocity: u8, channel: u8) {
        self.send(&[status(NOTE_ON, channel), note & 0x7f, velocity & 0x7f]);
    }

    fn note_off(&mut self, note: u8, velocity: u8, channel: u8) {
        self.send(&[status(NOTE_OFF, channel), note & 0x7f, velocity & 0x7f]);
    }

    fn all_sound_off(&mut self) {
        for channel in 1..=16 {
            self.send(&[status(CONTROL_CHANGE, channel), ALL_SOUND_OFF_CC, 0]);
        }
    }
}

/// List all available MIDI output port names.
pub fn list_devices() -> Vec<String> {
    let Ok(midi_out) = MidirOutput::new(CLIENT_NAME) else {
        return Vec::new();
    };
    midi_out
        .ports()
        .iter()
        .filter_map(|p| midi_out.port_name(p).ok())
        .collect()
}

/// Discards everything. Useful for dry runs and tests.
#[derive(Debug, Default)]
pub struct NullOutput;

impl MidiOutput for NullOutput {
    fn note_on(&mut self, _note: u8, _velocity: u8, _channel: u8) {}
    fn note_off(&mut self, _note: u8, _velocity: u8, _channel: u8) {}
    fn all_sound_off(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_maps_channel_to_low_nibble() {
        assert_eq!(status(NOTE_ON, 1), 0x90);
        assert_eq!(status(NOTE_ON, 16), 0x9f);
        assert_eq!(status(NOTE_OFF, 10), 0x89);
    }

    #[test]
    fn status_clamps_out_of_contract_channels() {
        assert_eq!(status(NOTE_ON, 0), 0x90);
        assert_eq!(status(NOTE_ON, 99), 0x9f);
    }
}
