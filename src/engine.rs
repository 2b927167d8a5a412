//! Top-level audio system: bus topology, lifecycle, mute, effects, timer.
//!
//! # Lifecycle
//!
//! `Uninitialized` → (`initialize`) → `Pending` → (reverb kernel built) →
//! `Ready` or `Failed`.
//!
//! The scheduler only exists inside `Ready`, so nothing can advance the song
//! before the reverb is in place and the song start is fixed. The
//! transition happens on the synthesis thread; it schedules the first
//! window immediately and then arms the periodic timer.
//!
//! All state sits behind one mutex. The timer thread, the ready callback
//! and the public operations all take it, which serializes `advance`.

use crate::config::AudioConfig;
use crate::driver::Driver;
use crate::effects::{EffectPlayer, SoundEffect};
use crate::emitter::EventEmitter;
use crate::graph::AudioGraph;
use crate::impulse::{self, ImpulseResponse, ReverbError};
use crate::noise::{shared_noise, SharedNoise};
use crate::scheduler::LookaheadScheduler;
use crate::sequence::MeasureSource;
use crate::types::{AudioParam, NodeId};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Who calls the scheduler once the system is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// A background thread every `timer_period_ms`
    Thread,
    /// The caller, through [`AudioSystem::pump`]
    Manual,
}

/// Externally visible lifecycle state.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineState {
    Uninitialized,
    Pending,
    Ready,
    Failed(String),
}

/// Snapshot of the scheduling cursor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerStatus {
    pub prev_part: i64,
    pub song_start: f64,
    pub queued_until: f64,
}

#[derive(Debug, Clone, Copy)]
struct Buses {
    music: NodeId,
    effects: NodeId,
    convolver: NodeId,
}

struct Playback {
    scheduler: LookaheadScheduler,
    emitter: EventEmitter,
}

enum Lifecycle {
    Uninitialized,
    Pending,
    Ready(Playback),
    Failed(String),
}

struct Shared {
    graph: Option<Box<dyn AudioGraph>>,
    buses: Option<Buses>,
    effects: Option<EffectPlayer>,
    score: Option<Box<dyn MeasureSource>>,
    lifecycle: Lifecycle,
    muted: bool,
    shutting_down: bool,
}

impl Shared {
    /// One scheduler wake-up against the graph clock.
    fn pump(&mut self) -> usize {
        let Shared {
            graph, lifecycle, ..
        } = self;
        let (Some(graph), Lifecycle::Ready(playback)) = (graph.as_mut(), lifecycle) else {
            return 0;
        };
        let now = graph.current_time();
        let emitter = playback.emitter;
        playback
            .scheduler
            .advance_with(now, |note| emitter.emit_note(&mut **graph, &note))
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct AudioSystem {
    config: AudioConfig,
    noise: SharedNoise,
    timer_mode: TimerMode,
    shared: Arc<Mutex<Shared>>,
    driver: Arc<Mutex<Option<Driver>>>,
    synth: Mutex<Option<JoinHandle<()>>>,
    ready_tx: Sender<bool>,
    ready_rx: Receiver<bool>,
}

impl AudioSystem {
    pub fn new(config: AudioConfig, score: Box<dyn MeasureSource>) -> Self {
        let noise = shared_noise(config.seed);
        let (ready_tx, ready_rx) = bounded(1);
        let shared = Shared {
            graph: None,
            buses: None,
            effects: None,
            score: Some(score),
            lifecycle: Lifecycle::Uninitialized,
            muted: config.muted,
            shutting_down: false,
        };
        Self {
            config,
            noise,
            timer_mode: TimerMode::Thread,
            shared: Arc::new(Mutex::new(shared)),
            driver: Arc::new(Mutex::new(None)),
            synth: Mutex::new(None),
            ready_tx,
            ready_rx,
        }
    }

    pub fn with_timer(mut self, mode: TimerMode) -> Self {
        self.timer_mode = mode;
        self
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Build the bus topology on `graph` and start reverb synthesis.
    /// Scheduling begins once the kernel is ready. Later calls are ignored.
    pub fn initialize(&self, mut graph: Box<dyn AudioGraph>) {
        let mut guard = lock(&self.shared);
        let shared = &mut *guard;
        if !matches!(shared.lifecycle, Lifecycle::Uninitialized) {
            warn!("Audio system already initialized; ignoring");
            return;
        }
        if shared.shutting_down {
            debug!("Initialize after shutdown ignored");
            return;
        }

        let mix = self.config.mix;
        let music = graph.create_gain(self.config.music_gain(shared.muted));
        let effects = graph.create_gain(mix.effects);
        let convolver = graph.create_convolver();
        let dry = graph.create_gain(mix.dry);
        let wet = graph.create_gain(mix.wet);
        let destination = graph.destination();

        graph.connect(music, convolver);
        graph.connect(music, dry);
        graph.connect(effects, convolver);
        graph.connect(effects, dry);
        graph.connect(convolver, wet);
        graph.connect(dry, destination);
        graph.connect(wet, destination);

        let sample_rate = self.config.sample_rate.unwrap_or_else(|| graph.sample_rate());
        info!(
            "Audio graph ready: {} Hz, music {}, effects {}",
            sample_rate,
            if shared.muted { "MUTED" } else { "on" },
            mix.effects
        );

        shared.graph = Some(graph);
        shared.buses = Some(Buses {
            music,
            effects,
            convolver,
        });
        shared.effects = Some(EffectPlayer::new(effects, self.noise.clone()));
        shared.lifecycle = Lifecycle::Pending;
        drop(guard);

        let ctx = ReadyContext {
            config: self.config.clone(),
            timer_mode: self.timer_mode,
            shared: Arc::clone(&self.shared),
            driver: Arc::clone(&self.driver),
            ready_tx: self.ready_tx.clone(),
        };
        let spawned = impulse::generate_async(
            self.config.channels,
            sample_rate,
            self.noise.clone(),
            self.config.reverb.clone(),
            move |result| ctx.on_reverb_ready(result),
        );
        match spawned {
            Ok(handle) => *lock(&self.synth) = Some(handle),
            Err(e) => {
                let err = ReverbError::Worker(e.to_string());
                error!("Could not start reverb synthesis: {}", err);
                lock(&self.shared).lifecycle = Lifecycle::Failed(err.to_string());
                let _ = self.ready_tx.try_send(false);
            }
        }
    }

    /// Mute or unmute the background music. Effects are unaffected, and
    /// already-queued notes keep playing silently.
    pub fn toggle_mute(&self, muted: bool) {
        let mut guard = lock(&self.shared);
        let shared = &mut *guard;
        shared.muted = muted;
        if let (Some(graph), Some(buses)) = (shared.graph.as_mut(), shared.buses) {
            graph.set_param(buses.music, AudioParam::Gain, self.config.music_gain(muted));
        }
        info!("Music {}", if muted { "muted" } else { "unmuted" });
    }

    pub fn is_muted(&self) -> bool {
        lock(&self.shared).muted
    }

    pub fn play_effect(&self, effect: SoundEffect) {
        let mut guard = lock(&self.shared);
        let shared = &mut *guard;
        match (shared.graph.as_mut(), shared.effects.as_ref()) {
            (Some(graph), Some(player)) => player.play(&mut **graph, effect),
            _ => debug!("Effect {} skipped: no output graph", effect),
        }
    }

    /// Randomized step sound. Returns the chosen pitch, or `None` when
    /// there is no graph to play on.
    pub fn play_tick_sound(&self) -> Option<i32> {
        let mut guard = lock(&self.shared);
        let shared = &mut *guard;
        match (shared.graph.as_mut(), shared.effects.as_ref()) {
            (Some(graph), Some(player)) => Some(player.play_step(&mut **graph)),
            _ => {
                debug!("Step sound skipped: no output graph");
                None
            }
        }
    }

    /// Run one scheduler wake-up now. Returns measures queued; 0 before ready.
    pub fn pump(&self) -> usize {
        lock(&self.shared).pump()
    }

    pub fn state(&self) -> EngineState {
        match &lock(&self.shared).lifecycle {
            Lifecycle::Uninitialized => EngineState::Uninitialized,
            Lifecycle::Pending => EngineState::Pending,
            Lifecycle::Ready(_) => EngineState::Ready,
            Lifecycle::Failed(reason) => EngineState::Failed(reason.clone()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    /// Block until the reverb is ready (true) or failed / timed out (false).
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        match self.state() {
            EngineState::Ready => return true,
            EngineState::Failed(_) | EngineState::Uninitialized => return false,
            EngineState::Pending => {}
        }
        match self.ready_rx.recv_timeout(timeout) {
            Ok(ready) => ready,
            Err(_) => self.is_ready(),
        }
    }

    pub fn scheduler_status(&self) -> Option<SchedulerStatus> {
        match &lock(&self.shared).lifecycle {
            Lifecycle::Ready(playback) => Some(SchedulerStatus {
                prev_part: playback.scheduler.prev_part(),
                song_start: playback.scheduler.song_start(),
                queued_until: playback.scheduler.queued_until(),
            }),
            _ => None,
        }
    }

    /// Stop the timer, wait for synthesis, and release the graph. Further
    /// operations are no-ops.
    pub fn shutdown(&self) {
        {
            let mut shared = lock(&self.shared);
            if shared.shutting_down {
                return;
            }
            shared.shutting_down = true;
        }
        if let Some(handle) = lock(&self.synth).take() {
            let _ = handle.join();
        }
        let driver = lock(&self.driver).take();
        if let Some(mut driver) = driver {
            driver.stop();
        }
        let mut shared = lock(&self.shared);
        shared.graph = None;
        shared.effects = None;
        info!("Audio system shut down");
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Everything the reverb-ready callback needs, moved onto the synthesis thread.
struct ReadyContext {
    config: AudioConfig,
    timer_mode: TimerMode,
    shared: Arc<Mutex<Shared>>,
    driver: Arc<Mutex<Option<Driver>>>,
    ready_tx: Sender<bool>,
}

impl ReadyContext {
    fn on_reverb_ready(self, result: Result<Arc<ImpulseResponse>, ReverbError>) {
        let ready = self.transition(result);
        if ready && self.timer_mode == TimerMode::Thread {
            self.arm_timer();
        }
        let _ = self.ready_tx.try_send(ready);
    }

    fn transition(&self, result: Result<Arc<ImpulseResponse>, ReverbError>) -> bool {
        let mut guard = lock(&self.shared);
        let shared = &mut *guard;
        if shared.shutting_down {
            debug!("Reverb finished after shutdown; not starting playback");
            return false;
        }

        let ir = match result {
            Ok(ir) => ir,
            Err(e) => {
                shared.lifecycle = Lifecycle::Failed(e.to_string());
                return false;
            }
        };
        let (Some(graph), Some(buses)) = (shared.graph.as_mut(), shared.buses) else {
            shared.lifecycle = Lifecycle::Failed("output graph released".into());
            return false;
        };
        let Some(score) = shared.score.take() else {
            error!("No score to schedule");
            shared.lifecycle = Lifecycle::Failed("no score".into());
            return false;
        };

        graph.set_convolver_buffer(buses.convolver, ir);
        let song_start = graph.current_time() + self.config.song_start_delay_secs;
        let scheduler = LookaheadScheduler::new(
            score,
            song_start,
            self.config.tempo_scale,
            self.config.horizon_secs,
        );
        let emitter = EventEmitter::new(song_start, scheduler.tempo_scale(), buses.music);
        info!(
            "Song starts at t={:.3}s ({} measures, {:.3}s each)",
            song_start,
            scheduler.sequence_len(),
            scheduler.tempo_scale()
        );
        shared.lifecycle = Lifecycle::Ready(Playback { scheduler, emitter });
        shared.pump();
        true
    }

    fn arm_timer(&self) {
        let shared = Arc::clone(&self.shared);
        match Driver::spawn("scheduler", self.config.timer_period(), move || {
            lock(&shared).pump();
        }) {
            Ok(driver) => *lock(&self.driver) = Some(driver),
            Err(e) => error!("Could not start scheduler timer: {}", e),
        }
    }
}
