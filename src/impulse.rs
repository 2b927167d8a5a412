//! Procedural reverb kernel: exponentially decaying noise, no sample data.
//!
//! The buffer is built from the shared noise source and is bit-for-bit
//! reproducible for a given seed and parameter set. Draw order is part of
//! that contract:
//!
//! - channel-major: channel 0 is filled completely before channel 1 draws
//! - one draw per frame, from the onset (end of pre-delay) to the last frame
//! - pre-delay frames are silent and consume no draws
//!
//! An optional low-pass sweep then darkens each channel towards the tail,
//! the way a real room absorbs highs faster than lows.
//!
//! [`ReverbParams::layout`] rejects kernels past the size limits before
//! anything is allocated.

use crate::noise::{noise_sample, SharedNoise};
use crate::types::{SILENCE_GAIN, TEMPO_SCALE};
use byteorder::{ByteOrder, LittleEndian};
use hound::{SampleFormat, WavSpec, WavWriter};
use log::{debug, error, info};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha1_smol::Sha1;
use std::f64::consts::PI;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use thiserror::Error;

pub const DEFAULT_DECAY_BEATS: f64 = 2.0;

/// Longest kernel accepted, in seconds.
pub const MAX_DURATION_SECS: f64 = 60.0;

pub const MAX_CHANNELS: usize = 32;

pub const MAX_SAMPLE_RATE: u32 = 384_000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReverbError {
    #[error("impulse response needs at least one channel")]
    NoChannels,
    #[error("too many channels: {0} (limit {})", MAX_CHANNELS)]
    TooManyChannels(usize),
    #[error("invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),
    #[error("reverb length {secs} s exceeds the {max} s limit")]
    TooLong { secs: f64, max: f64 },
    #[error("floor gain must be strictly positive, got {0}")]
    NonPositiveFloorGain(f64),
    #[error("initial gain must be strictly positive, got {0}")]
    NonPositiveInitialGain(f64),
    #[error("{name} must not be negative, got {value}")]
    NegativeDuration { name: &'static str, value: f64 },
    #[error("{name} is not a finite number")]
    NonFiniteParameter { name: &'static str },
    #[error("low-pass cutoff must be positive, got {0} Hz")]
    InvalidCutoff(f64),
    #[error("reverb synthesis worker failed: {0}")]
    Worker(String),
}

/// Cutoff sweep of the one-pole low-pass applied after the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LowpassSweep {
    pub start_hz: f64,
    pub end_hz: f64,
}

impl Default for LowpassSweep {
    fn default() -> Self {
        Self {
            start_hz: 16000.0,
            end_hz: 1000.0,
        }
    }
}

/// Shape of the synthesized room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbParams {
    /// Total buffer length. Defaults to pre-delay + decay.
    pub duration_ms: Option<f64>,
    /// Silent lead-in before the onset. Defaults to 0.
    pub pre_delay_ms: Option<f64>,
    /// Decay length in beats. Defaults to [`DEFAULT_DECAY_BEATS`].
    pub decay_beats: Option<f64>,
    pub seconds_per_beat: f64,
    /// Envelope level at the onset
    pub initial_gain: f64,
    /// Lower bound of the envelope; must be > 0
    pub floor_gain: f64,
    /// Level reached at the end of the decay
    pub floor_db: f64,
    pub lowpass: Option<LowpassSweep>,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self {
            duration_ms: None,
            pre_delay_ms: None,
            decay_beats: Some(DEFAULT_DECAY_BEATS),
            seconds_per_beat: TEMPO_SCALE,
            initial_gain: 1.0,
            floor_gain: SILENCE_GAIN as f64,
            floor_db: -90.0,
            lowpass: Some(LowpassSweep::default()),
        }
    }
}

impl ReverbParams {
    /// Reject parameters that would make the exponential envelope undefined.
    pub fn validate(&self) -> Result<(), ReverbError> {
        let finite = [
            ("duration_ms", self.duration_ms),
            ("pre_delay_ms", self.pre_delay_ms),
            ("decay_beats", self.decay_beats),
            ("seconds_per_beat", Some(self.seconds_per_beat)),
            ("initial_gain", Some(self.initial_gain)),
            ("floor_gain", Some(self.floor_gain)),
            ("floor_db", Some(self.floor_db)),
        ];
        for (name, value) in finite {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(ReverbError::NonFiniteParameter { name });
                }
            }
        }

        if self.floor_gain <= 0.0 {
            return Err(ReverbError::NonPositiveFloorGain(self.floor_gain));
        }
        if self.initial_gain <= 0.0 {
            return Err(ReverbError::NonPositiveInitialGain(self.initial_gain));
        }

        let durations = [
            ("duration_ms", self.duration_ms),
            ("pre_delay_ms", self.pre_delay_ms),
            ("decay_beats", self.decay_beats),
            ("seconds_per_beat", Some(self.seconds_per_beat)),
        ];
        for (name, value) in durations {
            if let Some(v) = value {
                if v < 0.0 {
                    return Err(ReverbError::NegativeDuration { name, value: v });
                }
            }
        }

        let secs = self.duration_secs();
        if secs > MAX_DURATION_SECS {
            return Err(ReverbError::TooLong {
                secs,
                max: MAX_DURATION_SECS,
            });
        }

        if let Some(sweep) = self.lowpass {
            for hz in [sweep.start_hz, sweep.end_hz] {
                if !hz.is_finite() || hz <= 0.0 {
                    return Err(ReverbError::InvalidCutoff(hz));
                }
            }
        }
        Ok(())
    }

    /// Validate against a concrete channel count and rate, and size the buffer.
    pub fn layout(&self, channel_count: usize, sample_rate: u32) -> Result<FrameLayout, ReverbError> {
        if channel_count == 0 {
            return Err(ReverbError::NoChannels);
        }
        if channel_count > MAX_CHANNELS {
            return Err(ReverbError::TooManyChannels(channel_count));
        }
        if sample_rate == 0 || sample_rate > MAX_SAMPLE_RATE {
            return Err(ReverbError::InvalidSampleRate(sample_rate));
        }
        self.validate()?;

        let sr = sample_rate as f64;
        let frames = ((self.duration_secs() * sr).round() as usize).max(1);
        let onset = ((self.pre_delay_secs() * sr).round() as usize).min(frames);
        Ok(FrameLayout {
            channels: channel_count,
            frames,
            onset,
        })
    }

    pub fn pre_delay_secs(&self) -> f64 {
        self.pre_delay_ms.unwrap_or(0.0) / 1000.0
    }

    pub fn decay_secs(&self) -> f64 {
        self.decay_beats.unwrap_or(DEFAULT_DECAY_BEATS) * self.seconds_per_beat
    }

    pub fn duration_secs(&self) -> f64 {
        match self.duration_ms {
            Some(ms) => ms / 1000.0,
            None => self.pre_delay_secs() + self.decay_secs(),
        }
    }

    /// Gain the envelope settles at: the stricter of `floor_gain` and `floor_db`.
    pub fn target_gain(&self) -> f64 {
        db_to_gain(self.floor_db).max(self.floor_gain)
    }

    /// Envelope value `frame` samples after the onset.
    pub fn envelope_at(&self, frame: usize, sample_rate: u32) -> f64 {
        let decay = self.decay_secs();
        let target = self.target_gain();
        if decay <= 0.0 {
            return if frame == 0 { self.initial_gain } else { target };
        }
        let t = frame as f64 / sample_rate as f64;
        if t >= decay {
            target
        } else {
            self.initial_gain * (target / self.initial_gain).powf(t / decay)
        }
    }
}

/// Buffer geometry for a validated parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub channels: usize,
    pub frames: usize,
    /// First frame after the pre-delay
    pub onset: usize,
}

impl FrameLayout {
    /// Noise samples synthesis will draw: one per channel per frame from the onset.
    pub fn noise_draws(&self) -> u64 {
        (self.channels * (self.frames - self.onset)) as u64
    }
}

pub fn db_to_gain(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Multi-channel convolution kernel. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl ImpulseResponse {
    /// Synthesize a kernel, drawing noise from `rng` in channel-major order.
    pub fn generate<R: Rng + ?Sized>(
        channel_count: usize,
        sample_rate: u32,
        rng: &mut R,
        params: &ReverbParams,
    ) -> Result<Self, ReverbError> {
        let FrameLayout {
            frames: total, onset, ..
        } = params.layout(channel_count, sample_rate)?;
        let sr = sample_rate as f64;

        let envelope: Vec<f32> = (0..total - onset)
            .map(|k| params.envelope_at(k, sample_rate) as f32)
            .collect();

        let mut channels = Vec::with_capacity(channel_count);
        for _ in 0..channel_count {
            let mut data = vec![0.0f32; total];
            for (sample, gain) in data[onset..].iter_mut().zip(&envelope) {
                *sample = noise_sample(rng) * gain;
            }
            if let Some(sweep) = params.lowpass {
                apply_lowpass_sweep(&mut data, sweep, sr);
            }
            channels.push(data);
        }

        debug!(
            "Impulse response: {} ch x {} frames ({:.3}s), onset at frame {}, target gain {:.2e}",
            channel_count,
            total,
            total as f64 / sr,
            onset,
            params.target_gain()
        );

        Ok(Self {
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Frames per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|c| c.iter())
            .fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// Raw f32 little-endian samples, channel-major.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.channel_count() * self.len() * 4];
        if bytes.is_empty() {
            return bytes;
        }
        for (chunk, data) in bytes.chunks_exact_mut(self.len() * 4).zip(&self.channels) {
            LittleEndian::write_f32_into(data, chunk);
        }
        bytes
    }

    /// SHA-1 over sample rate, channel count and the raw sample bytes.
    pub fn fingerprint(&self) -> String {
        let mut header = [0u8; 8];
        LittleEndian::write_u32(&mut header[..4], self.sample_rate);
        LittleEndian::write_u32(&mut header[4..], self.channel_count() as u32);

        let mut sha = Sha1::new();
        sha.update(&header);
        sha.update(&self.to_le_bytes());
        sha.digest().to_string()
    }

    /// Write as an interleaved 32-bit float WAV.
    pub fn write_wav(&self, path: &Path) -> Result<(), hound::Error> {
        let spec = WavSpec {
            channels: self.channel_count() as u16,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(path, spec)?;
        for i in 0..self.len() {
            for ch in &self.channels {
                writer.write_sample(ch[i])?;
            }
        }
        writer.finalize()?;
        info!("Impulse response written to {:?}", path);
        Ok(())
    }
}

/// One-pole low-pass whose cutoff moves exponentially from `start_hz` to
/// `end_hz` over the length of `data`.
fn apply_lowpass_sweep(data: &mut [f32], sweep: LowpassSweep, sample_rate: f64) {
    let nyquist_guard = sample_rate * 0.49;
    let start = sweep.start_hz.min(nyquist_guard);
    let end = sweep.end_hz.min(nyquist_guard);
    let span = (data.len().max(2) - 1) as f64;

    let mut state = 0.0f64;
    for (i, sample) in data.iter_mut().enumerate() {
        let cutoff = start * (end / start).powf(i as f64 / span);
        let alpha = 1.0 - (-2.0 * PI * cutoff / sample_rate).exp();
        state += alpha * (*sample as f64 - state);
        *sample = state as f32;
    }
}

/// Synthesize on a worker thread and hand the result to `on_ready` exactly once.
///
/// The kernel's share of `noise` is claimed before this returns: synthesis
/// runs on a copy of the generator, and the shared one is advanced past
/// every draw the kernel makes. Later draws from `noise` never wait on the
/// worker and still come after the kernel's in stream order.
pub fn generate_async<F>(
    channel_count: usize,
    sample_rate: u32,
    noise: SharedNoise,
    params: ReverbParams,
    on_ready: F,
) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce(Result<Arc<ImpulseResponse>, ReverbError>) + Send + 'static,
{
    let claimed = params.layout(channel_count, sample_rate).map(|layout| {
        let mut shared = noise.lock().unwrap_or_else(PoisonError::into_inner);
        let rng = shared.clone();
        shared.advance(layout.noise_draws());
        rng
    });
    spawn_worker(
        move || {
            let mut rng = claimed?;
            ImpulseResponse::generate(channel_count, sample_rate, &mut rng, &params)
        },
        on_ready,
    )
}

/// Run `job` on the `reverb-synth` thread. A panicking job is reported to
/// `on_ready` as [`ReverbError::Worker`].
fn spawn_worker<J, F>(job: J, on_ready: F) -> std::io::Result<JoinHandle<()>>
where
    J: FnOnce() -> Result<ImpulseResponse, ReverbError> + Send + 'static,
    F: FnOnce(Result<Arc<ImpulseResponse>, ReverbError>) + Send + 'static,
{
    thread::Builder::new().name("reverb-synth".into()).spawn(move || {
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(job))
            .unwrap_or_else(|payload| Err(ReverbError::Worker(panic_message(&*payload))));
        match &result {
            Ok(ir) => info!(
                "Reverb ready: {} ch, {:.2}s, peak {:.3} ({} ms)",
                ir.channel_count(),
                ir.duration_secs(),
                ir.peak(),
                started.elapsed().as_millis()
            ),
            Err(e) => error!("Reverb synthesis rejected: {}", e),
        }
        on_ready(result.map(Arc::new));
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "synthesis panicked".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::{seeded, shared_noise};
    use crossbeam_channel::bounded;
    use rand::RngCore;
    use std::time::Duration;

    fn dry_params() -> ReverbParams {
        ReverbParams {
            lowpass: None,
            ..Default::default()
        }
    }

    fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let params = ReverbParams::default();
        let a = ImpulseResponse::generate(2, 8000, &mut seeded(9), &params).unwrap();
        let b = ImpulseResponse::generate(2, 8000, &mut seeded(9), &params).unwrap();
        assert_eq!(a.to_le_bytes(), b.to_le_bytes());
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_seed_changes_output() {
        let params = ReverbParams::default();
        let a = ImpulseResponse::generate(2, 8000, &mut seeded(9), &params).unwrap();
        let b = ImpulseResponse::generate(2, 8000, &mut seeded(10), &params).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_channel_major_draw_order() {
        // Channel 0 of a stereo kernel consumes the same draws as a mono kernel.
        let params = ReverbParams::default();
        let mono = ImpulseResponse::generate(1, 8000, &mut seeded(3), &params).unwrap();
        let stereo = ImpulseResponse::generate(2, 8000, &mut seeded(3), &params).unwrap();
        assert_eq!(mono.channel(0), stereo.channel(0));
        assert_ne!(stereo.channel(0), stereo.channel(1), "channels must not be mono-collapsed");
    }

    #[test]
    fn test_default_length_is_pre_delay_plus_decay() {
        let params = ReverbParams {
            pre_delay_ms: Some(250.0),
            decay_beats: Some(1.0),
            seconds_per_beat: 1.0,
            ..dry_params()
        };
        let ir = ImpulseResponse::generate(2, 1000, &mut seeded(1), &params).unwrap();
        assert_eq!(ir.len(), 1250);
        assert_eq!(ir.channel_count(), 2);
        assert!((ir.duration_secs() - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_pre_delay_is_silent() {
        let params = ReverbParams {
            pre_delay_ms: Some(100.0),
            ..dry_params()
        };
        let ir = ImpulseResponse::generate(2, 1000, &mut seeded(1), &params).unwrap();
        for ch in 0..2 {
            let data = ir.channel(ch).unwrap();
            assert!(data[..100].iter().all(|&s| s == 0.0));
            assert!(data[100..110].iter().any(|&s| s != 0.0));
        }
    }

    #[test]
    fn test_explicit_duration_overrides() {
        let params = ReverbParams {
            duration_ms: Some(500.0),
            ..dry_params()
        };
        let ir = ImpulseResponse::generate(1, 2000, &mut seeded(1), &params).unwrap();
        assert_eq!(ir.len(), 1000);
    }

    #[test]
    fn test_envelope_decays() {
        let ir = ImpulseResponse::generate(1, 8000, &mut seeded(5), &dry_params()).unwrap();
        let data = ir.channel(0).unwrap();
        let head = rms(&data[..800]);
        let tail = rms(&data[data.len() - 800..]);
        assert!(head > 0.1, "head rms {}", head);
        assert!(tail < head * 0.01, "tail rms {} vs head {}", tail, head);
    }

    #[test]
    fn test_envelope_endpoints() {
        let params = ReverbParams {
            decay_beats: Some(1.0),
            seconds_per_beat: 1.0,
            floor_db: -60.0,
            ..dry_params()
        };
        assert!((params.envelope_at(0, 1000) - 1.0).abs() < 1e-12);
        assert!((params.envelope_at(500, 1000) - 10f64.powf(-1.5)).abs() < 1e-9);
        assert!((params.envelope_at(1000, 1000) - 0.001).abs() < 1e-12);
        assert!((params.envelope_at(5000, 1000) - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_floor_gain_bounds_target() {
        let params = ReverbParams {
            floor_gain: 0.01,
            floor_db: -90.0,
            ..dry_params()
        };
        assert!((params.target_gain() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_zero_decay_and_duration_still_valid() {
        let params = ReverbParams {
            duration_ms: Some(0.0),
            decay_beats: Some(0.0),
            ..ReverbParams::default()
        };
        let ir = ImpulseResponse::generate(2, 44100, &mut seeded(1), &params).unwrap();
        assert_eq!(ir.len(), 1);
        assert_eq!(ir.channel_count(), 2);
        assert!(ir.peak().is_finite());
    }

    #[test]
    fn test_zero_decay_uses_initial_then_floor() {
        let params = ReverbParams {
            decay_beats: Some(0.0),
            ..dry_params()
        };
        assert_eq!(params.envelope_at(0, 100), 1.0);
        assert_eq!(params.envelope_at(1, 100), params.target_gain());
    }

    #[test]
    fn test_non_positive_floor_gain_rejected() {
        for floor in [0.0, -1e-5] {
            let params = ReverbParams {
                floor_gain: floor,
                ..Default::default()
            };
            let err = ImpulseResponse::generate(2, 8000, &mut seeded(1), &params).unwrap_err();
            assert_eq!(err, ReverbError::NonPositiveFloorGain(floor));
        }
    }

    #[test]
    fn test_nan_rejected_before_sign_checks() {
        let params = ReverbParams {
            floor_gain: f64::NAN,
            ..Default::default()
        };
        assert_eq!(
            params.validate().unwrap_err(),
            ReverbError::NonFiniteParameter { name: "floor_gain" }
        );
    }

    #[test]
    fn test_negative_duration_rejected() {
        let params = ReverbParams {
            pre_delay_ms: Some(-1.0),
            ..Default::default()
        };
        let err = params.validate().unwrap_err();
        assert!(matches!(err, ReverbError::NegativeDuration { name: "pre_delay_ms", .. }));
        assert!(err.to_string().contains("pre_delay_ms"));
    }

    #[test]
    fn test_structural_errors() {
        let params = ReverbParams::default();
        assert_eq!(
            ImpulseResponse::generate(0, 8000, &mut seeded(1), &params).unwrap_err(),
            ReverbError::NoChannels
        );
        assert_eq!(
            ImpulseResponse::generate(2, 0, &mut seeded(1), &params).unwrap_err(),
            ReverbError::InvalidSampleRate(0)
        );
        let bad_cutoff = ReverbParams {
            lowpass: Some(LowpassSweep { start_hz: 0.0, end_hz: 1000.0 }),
            ..Default::default()
        };
        assert_eq!(bad_cutoff.validate().unwrap_err(), ReverbError::InvalidCutoff(0.0));
    }

    #[test]
    fn test_lowpass_darkens_tail() {
        let bright = ImpulseResponse::generate(1, 44100, &mut seeded(2), &dry_params()).unwrap();
        let dark =
            ImpulseResponse::generate(1, 44100, &mut seeded(2), &ReverbParams::default()).unwrap();

        // First difference approximates high-frequency energy.
        let hf = |d: &[f32]| -> f32 {
            let diffs: Vec<f32> = d.windows(2).map(|w| w[1] - w[0]).collect();
            rms(&diffs)
        };
        let n = bright.len();
        let window = n / 2..n / 2 + 4410;
        let b = hf(&bright.channel(0).unwrap()[window.clone()]);
        let d = hf(&dark.channel(0).unwrap()[window]);
        assert!(d < b * 0.5, "filtered hf {} should be well below unfiltered {}", d, b);
    }

    #[test]
    fn test_write_wav_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ir.wav");
        let ir = ImpulseResponse::generate(2, 8000, &mut seeded(9), &ReverbParams::default()).unwrap();
        ir.write_wav(&path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 8000);
        let samples: Vec<f32> = reader.into_samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), ir.len() * 2);
        assert_eq!(samples[0], ir.channel(0).unwrap()[0]);
        assert_eq!(samples[1], ir.channel(1).unwrap()[0]);
    }

    #[test]
    fn test_generate_async_calls_back_once() {
        let (tx, rx) = bounded(2);
        let handle = generate_async(2, 8000, shared_noise(9), ReverbParams::default(), move |r| {
            let _ = tx.send(r);
        })
        .unwrap();
        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert!(rx.try_recv().is_err());

        let ir = result.unwrap();
        let direct = ImpulseResponse::generate(2, 8000, &mut seeded(9), &ReverbParams::default()).unwrap();
        assert_eq!(ir.fingerprint(), direct.fingerprint());
    }

    #[test]
    fn test_generate_async_reports_validation_failure() {
        let (tx, rx) = bounded(1);
        let params = ReverbParams {
            floor_gain: 0.0,
            ..Default::default()
        };
        generate_async(2, 8000, shared_noise(9), params, move |r| {
            let _ = tx.send(r);
        })
        .unwrap()
        .join()
        .unwrap();
        let result = rx.recv().unwrap();
        assert_eq!(result.unwrap_err(), ReverbError::NonPositiveFloorGain(0.0));
    }

    #[test]
    fn test_overlong_kernel_rejected_before_allocating() {
        let params = ReverbParams {
            duration_ms: Some(1e17),
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(ReverbError::TooLong { .. })));
        let err = ImpulseResponse::generate(2, 48000, &mut seeded(1), &params).unwrap_err();
        assert!(err.to_string().contains("exceeds"), "got: {}", err);

        // Default length is pre-delay + decay, which can overflow on its own.
        let derived = ReverbParams {
            decay_beats: Some(1e300),
            seconds_per_beat: 1e300,
            ..Default::default()
        };
        assert!(matches!(derived.validate(), Err(ReverbError::TooLong { .. })));
    }

    #[test]
    fn test_layout_limits() {
        let params = ReverbParams::default();
        assert_eq!(
            params.layout(MAX_CHANNELS + 1, 8000).unwrap_err(),
            ReverbError::TooManyChannels(MAX_CHANNELS + 1)
        );
        assert_eq!(
            params.layout(2, MAX_SAMPLE_RATE + 1).unwrap_err(),
            ReverbError::InvalidSampleRate(MAX_SAMPLE_RATE + 1)
        );
        let at_limit = ReverbParams {
            duration_ms: Some(MAX_DURATION_SECS * 1000.0),
            pre_delay_ms: Some(500.0),
            ..dry_params()
        };
        let layout = at_limit.layout(2, 1000).unwrap();
        assert_eq!(layout.frames, 60_000);
        assert_eq!(layout.onset, 500);
        assert_eq!(layout.noise_draws(), 2 * 59_500);
    }

    #[test]
    fn test_generate_async_overlong_reports_error() {
        let (tx, rx) = bounded(1);
        let params = ReverbParams {
            duration_ms: Some(1e17),
            ..Default::default()
        };
        generate_async(2, 48000, shared_noise(9), params, move |r| {
            let _ = tx.send(r);
        })
        .unwrap()
        .join()
        .unwrap();
        assert!(matches!(rx.recv().unwrap(), Err(ReverbError::TooLong { .. })));
    }

    #[test]
    fn test_worker_panic_reaches_callback() {
        let (tx, rx) = bounded(1);
        spawn_worker(
            || panic!("synth exploded"),
            move |r| {
                let _ = tx.send(r);
            },
        )
        .unwrap()
        .join()
        .unwrap();
        match rx.recv().unwrap() {
            Err(ReverbError::Worker(msg)) => assert!(msg.contains("synth exploded"), "got: {}", msg),
            other => panic!("expected worker error, got {:?}", other.map(|ir| ir.len())),
        }
    }

    #[test]
    fn test_generate_async_claims_stream_up_front() {
        let params = ReverbParams {
            pre_delay_ms: Some(10.0),
            ..ReverbParams::default()
        };
        let draws = params.layout(2, 8000).unwrap().noise_draws();
        let noise = shared_noise(9);
        let handle = generate_async(2, 8000, noise.clone(), params, |_| {}).unwrap();

        // Already advanced past the kernel, whether or not the worker has run.
        let next = noise.lock().unwrap().next_u32();
        let mut expected = seeded(9);
        expected.advance(draws);
        assert_eq!(next, expected.next_u32());
        handle.join().unwrap();
    }

    #[test]
    fn test_rejected_params_leave_stream_untouched() {
        let params = ReverbParams {
            floor_gain: 0.0,
            ..Default::default()
        };
        let noise = shared_noise(9);
        generate_async(2, 8000, noise.clone(), params, |_| {})
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(noise.lock().unwrap().next_u32(), seeded(9).next_u32());
    }
}
