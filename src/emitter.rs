use crate::graph::AudioGraph;
use crate::pitch::midi_to_hz;
use crate::types::*;

/// Envelope level at note onset.
pub const NOTE_GAIN: f32 = 0.5;

/// Envelope tail length, in measures. Independent of note length, so tails overlap.
pub const DECAY_MEASURES: f64 = 2.0;

/// Turns scheduled notes into oscillator + envelope commands on the music bus.
#[derive(Debug, Clone, Copy)]
pub struct EventEmitter {
    song_start: f64,
    tempo_scale: f64,
    music_bus: NodeId,
}

impl EventEmitter {
    pub fn new(song_start: f64, tempo_scale: f64, music_bus: NodeId) -> Self {
        Self {
            song_start,
            tempo_scale,
            music_bus,
        }
    }

    /// Play `pitch` from `start` to `end`, both in seconds after the song start.
    pub fn emit(&self, graph: &mut dyn AudioGraph, pitch: i32, start: f64, end: f64) {
        let osc = graph.create_oscillator(Waveform::Square, midi_to_hz(pitch));
        let envelope = self.decay(graph, osc, start);
        graph.connect(envelope, self.music_bus);
        graph.start(osc, self.song_start + start);
        graph.stop(osc, self.song_start + end);
    }

    pub fn emit_note(&self, graph: &mut dyn AudioGraph, note: &ScheduledNote) {
        self.emit(graph, note.pitch, note.start, note.end);
    }

    fn decay(&self, graph: &mut dyn AudioGraph, osc: NodeId, start: f64) -> NodeId {
        let at = self.song_start + start;
        let envelope = graph.create_gain(NOTE_GAIN);
        graph.set_value_at_time(envelope, AudioParam::Gain, NOTE_GAIN, at);
        graph.exponential_ramp_to_value_at_time(
            envelope,
            AudioParam::Gain,
            SILENCE_GAIN,
            at + DECAY_MEASURES * self.tempo_scale,
        );
        graph.connect(osc, envelope);
        envelope
    }
}
