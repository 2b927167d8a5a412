//! Lookahead note scheduler.
//!
//! Keeps at least one horizon of music queued past the playback clock. Each
//! wake-up that finds the queue running short refills it to two horizons,
//! so coarse or jittery wake-ups never leave an audible gap. Measures are
//! scheduled exactly once, in order, and the score loops forever.

use crate::sequence::MeasureSource;
use crate::types::ScheduledNote;
use log::{debug, trace, warn};

/// Smallest accepted measure length, in seconds.
const MIN_TEMPO_SCALE: f64 = 1e-3;

pub struct LookaheadScheduler {
    source: Box<dyn MeasureSource>,
    /// Real time of musical time zero
    song_start: f64,
    /// Seconds per measure
    tempo_scale: f64,
    horizon: f64,
    /// Last measure handed out; -1 before the first advance
    prev_part: i64,
}

impl LookaheadScheduler {
    pub fn new(source: Box<dyn MeasureSource>, song_start: f64, tempo_scale: f64, horizon: f64) -> Self {
        if tempo_scale < MIN_TEMPO_SCALE {
            warn!(
                "Tempo scale {} s/measure too small, using {}",
                tempo_scale, MIN_TEMPO_SCALE
            );
        }
        if source.is_empty() {
            warn!("Score has no measures; scheduling silence");
        }
        Self {
            source,
            song_start,
            tempo_scale: tempo_scale.max(MIN_TEMPO_SCALE),
            horizon: horizon.max(0.0),
            prev_part: -1,
        }
    }

    #[cfg(test)]
    fn with_cursor(mut self, prev_part: i64) -> Self {
        self.prev_part = prev_part;
        self
    }

    pub fn prev_part(&self) -> i64 {
        self.prev_part
    }

    pub fn song_start(&self) -> f64 {
        self.song_start
    }

    pub fn tempo_scale(&self) -> f64 {
        self.tempo_scale
    }

    pub fn horizon(&self) -> f64 {
        self.horizon
    }

    pub fn sequence_len(&self) -> usize {
        self.source.len()
    }

    /// Absolute real time up to which measures have been handed out.
    pub fn queued_until(&self) -> f64 {
        self.song_start + (self.prev_part + 1) as f64 * self.tempo_scale
    }

    /// Refill the queue for playback clock `now`, passing every note to
    /// `sink` in real seconds relative to the song start. Returns the
    /// number of measures scheduled (0 on the common no-op path).
    pub fn advance_with<F>(&mut self, now: f64, mut sink: F) -> usize
    where
        F: FnMut(ScheduledNote),
    {
        let mut buffer_wanted = now - self.song_start + self.horizon;
        let mut queued = (self.prev_part + 1) as f64 * self.tempo_scale;

        if queued > buffer_wanted {
            return 0;
        }
        buffer_wanted += self.horizon;

        let len = self.source.len() as i64;
        let mut scheduled = 0;
        while queued < buffer_wanted {
            self.prev_part += 1;
            let part = self.prev_part;

            if len > 0 {
                let index = measure_index(part, len);
                let offset = part as f64;
                for note in self.source.measure(index) {
                    sink(ScheduledNote {
                        pitch: note.pitch,
                        start: (note.start + offset) * self.tempo_scale,
                        end: (note.end + offset) * self.tempo_scale,
                        part,
                    });
                }
                trace!("Measure {} (index {}) queued", part, index);
            }

            queued += self.tempo_scale;
            scheduled += 1;
        }

        debug!(
            "Scheduler: now={:.3} queued {} measure(s), cursor={} ({:.3}s ahead)",
            now,
            scheduled,
            self.prev_part,
            self.queued_until() - now
        );
        scheduled
    }

    /// [`advance_with`](Self::advance_with), collecting the notes.
    pub fn advance(&mut self, now: f64) -> Vec<ScheduledNote> {
        let mut notes = Vec::new();
        self.advance_with(now, |n| notes.push(n));
        notes
    }
}

/// Position of measure `part` in a sequence of `len` measures, in `[0, len)`.
fn measure_index(part: i64, len: i64) -> usize {
    part.rem_euclid(len) as usize
}
