//! Pitch number ↔ frequency conversion (12-TET, A4 = MIDI 69 = 440 Hz).

/// Reference pitch for MIDI note 69.
pub const A4_HZ: f64 = 440.0;

/// Convert an integer MIDI pitch to Hz.
pub fn midi_to_hz(pitch: i32) -> f64 {
    A4_HZ * 2.0_f64.powf((pitch as f64 - 69.0) / 12.0)
}
