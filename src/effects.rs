//! One-shot effects, timed from "now" rather than the song timeline.

use crate::graph::AudioGraph;
use crate::noise::{uniform_below, SharedNoise};
use crate::pitch::midi_to_hz;
use crate::types::*;
use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::PoisonError;

/// Candidate pitches of the step sound: B, C, D, D#, E, F#, G, A.
pub const STEP_NOTES: [i32; 8] = [35, 36, 38, 39, 40, 42, 43, 45];

pub const STEP_DURATION_SECS: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundEffect {
    ButtonClick,
    Connect,
    Disconnect,
    Win,
}

/// (pitch, offset s, duration s)
type Stinger = &'static [(i32, f64, f64)];

impl SoundEffect {
    pub const ALL: [SoundEffect; 4] = [
        SoundEffect::ButtonClick,
        SoundEffect::Connect,
        SoundEffect::Disconnect,
        SoundEffect::Win,
    ];

    pub fn notes(self) -> Stinger {
        match self {
            SoundEffect::ButtonClick => &[(91, 0.0, 0.04)], // G6
            // E5 G5 B5
            SoundEffect::Connect => &[(76, 0.0, 0.05), (79, 0.05, 0.05), (83, 0.1, 0.1)],
            // B5 G5 E5
            SoundEffect::Disconnect => &[(83, 0.0, 0.05), (79, 0.05, 0.05), (76, 0.1, 0.1)],
            // D5 E5 G5 B5 D6 E6
            SoundEffect::Win => &[
                (74, 0.0, 0.05),
                (76, 0.05, 0.05),
                (79, 0.1, 0.05),
                (83, 0.15, 0.05),
                (86, 0.2, 0.05),
                (88, 0.25, 0.1),
            ],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SoundEffect::ButtonClick => "click",
            SoundEffect::Connect => "connect",
            SoundEffect::Disconnect => "disconnect",
            SoundEffect::Win => "win",
        }
    }
}

impl fmt::Display for SoundEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SoundEffect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "click" | "button_click" | "button-click" => Ok(SoundEffect::ButtonClick),
            "connect" => Ok(SoundEffect::Connect),
            "disconnect" => Ok(SoundEffect::Disconnect),
            "win" => Ok(SoundEffect::Win),
            other => Err(format!(
                "unknown effect {:?} (expected one of: click, connect, disconnect, win)",
                other
            )),
        }
    }
}

/// Plays stingers and the randomized step sound onto the effects bus.
pub struct EffectPlayer {
    effects_bus: NodeId,
    noise: SharedNoise,
}

impl EffectPlayer {
    pub fn new(effects_bus: NodeId, noise: SharedNoise) -> Self {
        Self { effects_bus, noise }
    }

    pub fn play(&self, graph: &mut dyn AudioGraph, effect: SoundEffect) {
        debug!("Effect: {}", effect);
        let now = graph.current_time();
        for &(pitch, offset, duration) in effect.notes() {
            let start = now + offset;
            let osc = graph.create_oscillator(Waveform::Square, midi_to_hz(pitch));
            graph.connect(osc, self.effects_bus);
            graph.start(osc, start);
            graph.stop(osc, start + duration);
        }
    }

    /// Short pitch-and-gain drop on a randomly chosen low note. Returns the pitch.
    pub fn play_step(&self, graph: &mut dyn AudioGraph) -> i32 {
        let pitch = {
            let mut rng = self.noise.lock().unwrap_or_else(PoisonError::into_inner);
            pick_step_pitch(&mut *rng)
        };
        let start = graph.current_time();
        let end = start + STEP_DURATION_SECS;
        let frequency = midi_to_hz(pitch);

        let osc = graph.create_oscillator(Waveform::Square, frequency);
        let gain = graph.create_gain(1.0);
        graph.connect(osc, gain);
        graph.connect(gain, self.effects_bus);

        graph.set_value_at_time(osc, AudioParam::Frequency, frequency as f32, start);
        graph.set_value_at_time(gain, AudioParam::Gain, 1.0, start);
        graph.exponential_ramp_to_value_at_time(osc, AudioParam::Frequency, (0.5 * frequency) as f32, end);
        graph.exponential_ramp_to_value_at_time(gain, AudioParam::Gain, SILENCE_GAIN, end);

        graph.start(osc, start);
        graph.stop(osc, end);
        debug!("Step sound: pitch {} ({:.1} Hz)", pitch, frequency);
        pitch
    }
}

/// Uniform draw from [`STEP_NOTES`].
pub fn pick_step_pitch<R: Rng + ?Sized>(rng: &mut R) -> i32 {
    STEP_NOTES[uniform_below(rng, STEP_NOTES.len())]
}
