use crate::impulse::ImpulseResponse;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

// ─── Timing constants ───────────────────────────────────────────────────────

/// Seconds per measure of the background score (120 / 70).
pub const TEMPO_SCALE: f64 = 120.0 / 70.0;

/// How far past the playback clock notes must already be queued.
pub const HORIZON_SECS: f64 = 4.0;

/// Period of the scheduler wake-up.
pub const TIMER_PERIOD_MS: u64 = 999;

/// Delay between the reverb becoming ready and musical time zero.
pub const SONG_START_DELAY_SECS: f64 = 0.05;

/// Near-silent target for exponential gain ramps. Ramps to exactly 0 are undefined.
pub const SILENCE_GAIN: f32 = 0.00001;

// ─── Graph primitives ───────────────────────────────────────────────────────

/// Opaque handle to a node in the output graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Oscillator waveform shapes the host graph understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

/// Automatable parameter of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioParam {
    Gain,
    Frequency,
}

// ─── Musical data ───────────────────────────────────────────────────────────

/// One note of a measure, in musical units relative to the measure start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteInstruction {
    /// MIDI-style pitch number (69 = A4)
    pub pitch: i32,
    pub start: f64,
    pub end: f64,
}

impl NoteInstruction {
    pub fn new(pitch: i32, start: f64, end: f64) -> Self {
        Self { pitch, start, end }
    }
}

/// A note converted to real seconds relative to the song start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledNote {
    pub pitch: i32,
    pub start: f64,
    pub end: f64,
    /// Measure number (unwrapped) this note was produced for
    pub part: i64,
}

// ─── Graph commands ─────────────────────────────────────────────────────────

/// A request sent to the output graph. Fire-and-forget: the renderer consumes
/// these on its own clock.
#[derive(Debug, Clone)]
pub enum GraphCommand {
    CreateGain { node: NodeId, gain: f32 },
    CreateOscillator { node: NodeId, waveform: Waveform, frequency: f64 },
    CreateConvolver { node: NodeId },
    SetConvolverBuffer { node: NodeId, buffer: Arc<ImpulseResponse> },
    Connect { from: NodeId, to: NodeId },
    SetParam { node: NodeId, param: AudioParam, value: f32 },
    SetValueAtTime { node: NodeId, param: AudioParam, value: f32, at: f64 },
    ExponentialRamp { node: NodeId, param: AudioParam, value: f32, at: f64 },
    Start { node: NodeId, at: f64 },
    Stop { node: NodeId, at: f64 },
}

/// Metadata standing in for an impulse response in logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferSummary {
    pub channels: usize,
    pub frames: usize,
    pub sample_rate: u32,
    pub sha1: String,
}

impl From<&ImpulseResponse> for BufferSummary {
    fn from(ir: &ImpulseResponse) -> Self {
        Self {
            channels: ir.channel_count(),
            frames: ir.len(),
            sample_rate: ir.sample_rate(),
            sha1: ir.fingerprint(),
        }
    }
}

// ─── Compact serialization ──────────────────────────────────────────────────

/// Serializable form of a [`GraphCommand`] for the JSONL command log.
/// Buffers are replaced by their [`BufferSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CommandRecord {
    Gain { node: NodeId, gain: f32 },
    Osc { node: NodeId, wave: Waveform, hz: f64 },
    Convolver { node: NodeId },
    Buffer { node: NodeId, buffer: BufferSummary },
    Connect { from: NodeId, to: NodeId },
    Set { node: NodeId, param: AudioParam, value: f32 },
    SetAt { node: NodeId, param: AudioParam, value: f32, at: f64 },
    Ramp { node: NodeId, param: AudioParam, value: f32, at: f64 },
    Start { node: NodeId, at: f64 },
    Stop { node: NodeId, at: f64 },
}

impl From<&GraphCommand> for CommandRecord {
    fn from(c: &GraphCommand) -> Self {
        match c {
            GraphCommand::CreateGain { node, gain } => Self::Gain { node: *node, gain: *gain },
            GraphCommand::CreateOscillator { node, waveform, frequency } => Self::Osc {
                node: *node,
                wave: *waveform,
                hz: *frequency,
            },
            GraphCommand::CreateConvolver { node } => Self::Convolver { node: *node },
            GraphCommand::SetConvolverBuffer { node, buffer } => Self::Buffer {
                node: *node,
                buffer: BufferSummary::from(buffer.as_ref()),
            },
            GraphCommand::Connect { from, to } => Self::Connect { from: *from, to: *to },
            GraphCommand::SetParam { node, param, value } => Self::Set {
                node: *node,
                param: *param,
                value: *value,
            },
            GraphCommand::SetValueAtTime { node, param, value, at } => Self::SetAt {
                node: *node,
                param: *param,
                value: *value,
                at: *at,
            },
            GraphCommand::ExponentialRamp { node, param, value, at } => Self::Ramp {
                node: *node,
                param: *param,
                value: *value,
                at: *at,
            },
            GraphCommand::Start { node, at } => Self::Start { node: *node, at: *at },
            GraphCommand::Stop { node, at } => Self::Stop { node: *node, at: *at },
        }
    }
}

impl CommandRecord {
    /// The serialized `op` tag.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Gain { .. } => "gain",
            Self::Osc { .. } => "osc",
            Self::Convolver { .. } => "convolver",
            Self::Buffer { .. } => "buffer",
            Self::Connect { .. } => "connect",
            Self::Set { .. } => "set",
            Self::SetAt { .. } => "set_at",
            Self::Ramp { .. } => "ramp",
            Self::Start { .. } => "start",
            Self::Stop { .. } => "stop",
        }
    }

    /// Scheduled time of the command, if it carries one.
    pub fn at(&self) -> Option<f64> {
        match self {
            Self::SetAt { at, .. } | Self::Ramp { at, .. } | Self::Start { at, .. } | Self::Stop { at, .. } => {
                Some(*at)
            }
            _ => None,
        }
    }
}

impl fmt::Display for CommandRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gain { node, gain } => write!(f, "gain      {} g={:.4}", node, gain),
            Self::Osc { node, wave, hz } => write!(f, "osc       {} {:?} {:.2}Hz", node, wave, hz),
            Self::Convolver { node } => write!(f, "convolver {}", node),
            Self::Buffer { node, buffer } => write!(
                f,
                "buffer    {} {}ch x {} @ {}Hz sha1={}",
                node, buffer.channels, buffer.frames, buffer.sample_rate, buffer.sha1
            ),
            Self::Connect { from, to } => write!(f, "connect   {} -> {}", from, to),
            Self::Set { node, param, value } => write!(f, "set       {} {:?}={:.5}", node, param, value),
            Self::SetAt { node, param, value, at } => {
                write!(f, "set_at    {} {:?}={:.5} t={:.3}", node, param, value, at)
            }
            Self::Ramp { node, param, value, at } => {
                write!(f, "ramp      {} {:?}->{:.5} t={:.3}", node, param, value, at)
            }
            Self::Start { node, at } => write!(f, "start     {} t={:.3}", node, at),
            Self::Stop { node, at } => write!(f, "stop      {} t={:.3}", node, at),
        }
    }
}

// ─── Session clock ──────────────────────────────────────────────────────────

/// Monotonic wall clock for a real-time session.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}
