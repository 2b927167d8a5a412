use procsound::command_log::{CommandLogReader, CommandLogger, LogHeader, LogSummary};
use procsound::config::AudioConfig;
use procsound::effects::SoundEffect;
use procsound::engine::{AudioSystem, TimerMode};
use procsound::graph::{AudioClock, CommandGraph, ManualClock};
use procsound::impulse::ImpulseResponse;
use procsound::noise::seeded;
use procsound::sequence::{MeasureSource, Score};
use procsound::types::*;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type CliResult = Result<(), Box<dyn Error>>;

/// How long to wait for the reverb kernel before giving up.
const READY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "procsound")]
#[command(about = "Procedural background music and sound effects")]
struct Cli {
    /// Audio config JSON (defaults used for missing fields)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Score JSON (built-in demo loop if omitted)
    #[arg(long, global = true)]
    score: Option<PathBuf>,

    /// Start with background music muted
    #[arg(long, global = true)]
    muted: bool,

    /// Noise generator seed
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Synthesize the reverb impulse response and write it as a WAV file
    Impulse {
        #[arg(long, default_value = "impulse.wav")]
        out: PathBuf,
        #[arg(long, default_value_t = 44100)]
        sample_rate: u32,
    },
    /// Offline run against a stepped clock; writes the graph command log
    Simulate {
        #[arg(long, default_value_t = 30.0)]
        seconds: f64,
        #[arg(long, default_value = "commands.jsonl")]
        out: PathBuf,
        #[arg(long, default_value_t = 44100)]
        sample_rate: u32,
        /// Play the step sound every M ms of simulated time
        #[arg(long)]
        tick_every_ms: Option<u64>,
    },
    /// Real-time run on the wall clock with the timer thread
    Run {
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,
        /// Write the graph command log here
        #[arg(long)]
        log: Option<PathBuf>,
        #[arg(long, default_value_t = 44100)]
        sample_rate: u32,
        #[arg(long)]
        tick_every_ms: Option<u64>,
    },
    /// Summarize a command log
    Inspect {
        path: PathBuf,
        /// Also print the first N records
        #[arg(long, default_value_t = 0)]
        head: usize,
    },
    /// Play one effect (click, connect, disconnect, win, step) and log the commands
    Effect {
        name: String,
        #[arg(long, default_value = "effect.jsonl")]
        out: PathBuf,
        #[arg(long, default_value_t = 44100)]
        sample_rate: u32,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    if let Err(e) = dispatch(cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> CliResult {
    let config = load_config(&cli)?;
    match cli.command {
        Command::Impulse { ref out, sample_rate } => impulse(&config, out, sample_rate),
        Command::Simulate {
            seconds,
            ref out,
            sample_rate,
            tick_every_ms,
        } => simulate(config, load_score(&cli)?, seconds, out, sample_rate, tick_every_ms),
        Command::Run {
            seconds,
            ref log,
            sample_rate,
            tick_every_ms,
        } => run(config, load_score(&cli)?, seconds, log.as_deref(), sample_rate, tick_every_ms),
        Command::Inspect { ref path, head } => inspect(path, head),
        Command::Effect {
            ref name,
            ref out,
            sample_rate,
        } => effect(config, name, out, sample_rate),
    }
}

fn load_config(cli: &Cli) -> Result<AudioConfig, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => AudioConfig::load(path)?,
        None => AudioConfig::default(),
    };
    if cli.muted {
        config.muted = true;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    Ok(config)
}

fn load_score(cli: &Cli) -> Result<Box<dyn MeasureSource>, Box<dyn Error>> {
    let score = match &cli.score {
        Some(path) => Score::load(path)?,
        None => Score::demo(),
    };
    Ok(Box::new(score))
}

fn banner(config: &AudioConfig, mode: &str) {
    info!("═══════════════════════════════════════════════");
    info!("  PROCSOUND v{}", env!("CARGO_PKG_VERSION"));
    info!("  Mode: {}", mode);
    info!("  Seed: {}  Music: {}", config.seed, if config.muted { "MUTED" } else { "on" });
    info!("═══════════════════════════════════════════════");
}

fn impulse(config: &AudioConfig, out: &Path, default_rate: u32) -> CliResult {
    let sample_rate = config.sample_rate.unwrap_or(default_rate);
    let started = Instant::now();
    let mut rng = seeded(config.seed);
    let ir = ImpulseResponse::generate(config.channels, sample_rate, &mut rng, &config.reverb)?;
    ir.write_wav(out)?;
    info!(
        "Impulse response written to {:?} in {:.1} ms",
        out,
        started.elapsed().as_secs_f64() * 1000.0
    );
    println!("channels:    {}", ir.channel_count());
    println!("frames:      {}", ir.len());
    println!("sample rate: {} Hz", ir.sample_rate());
    println!("duration:    {:.3} s", ir.duration_secs());
    println!("peak:        {:.5}", ir.peak());
    println!("sha1:        {}", ir.fingerprint());
    Ok(())
}

fn simulate(
    config: AudioConfig,
    score: Box<dyn MeasureSource>,
    seconds: f64,
    out: &Path,
    sample_rate: u32,
    tick_every_ms: Option<u64>,
) -> CliResult {
    banner(&config, "SIMULATE");
    let clock = ManualClock::new(0.0);
    let (graph, rx) = CommandGraph::channel(Arc::new(clock.clone()), sample_rate);
    let logger = CommandLogger::create(rx, out, LogHeader::new(sample_rate, config.seed, config.muted))?.spawn()?;

    let step = config.timer_period().as_secs_f64();
    let system = AudioSystem::new(config, score).with_timer(TimerMode::Manual);
    system.initialize(Box::new(graph));
    if !system.wait_until_ready(READY_TIMEOUT) {
        system.shutdown();
        let _ = logger.join();
        return Err(format!("audio system did not become ready: {:?}", system.state()).into());
    }

    let tick_every = tick_every_ms.map(|ms| ms.max(1) as f64 / 1000.0);
    let mut next_tick = tick_every;
    let mut ticks = 0usize;
    let mut measures = 0usize;
    while clock.now() < seconds {
        let next = (clock.now() + step).min(seconds);
        if let Some(every) = tick_every {
            while let Some(at) = next_tick.filter(|&at| at <= next) {
                clock.set(at);
                if system.play_tick_sound().is_some() {
                    ticks += 1;
                }
                next_tick = Some(at + every);
            }
        }
        clock.set(next);
        measures += system.pump();
    }
    info!("Simulated {:.1}s: {} measures queued, {} step sounds", seconds, measures, ticks);

    system.shutdown();
    drop(system);
    let written = logger.join().map_err(|_| "command log thread panicked")??;
    println!("{} commands → {}", written, out.display());
    Ok(())
}

fn run(
    config: AudioConfig,
    score: Box<dyn MeasureSource>,
    seconds: f64,
    log_path: Option<&Path>,
    sample_rate: u32,
    tick_every_ms: Option<u64>,
) -> CliResult {
    banner(&config, "REAL-TIME");
    let clock = SessionClock::new();
    let (graph, rx) = CommandGraph::channel(Arc::new(clock.clone()), sample_rate);
    let logger = match log_path {
        Some(path) => Some(CommandLogger::create(rx, path, LogHeader::new(sample_rate, config.seed, config.muted))?.spawn()?),
        None => {
            // No renderer attached; the graph turns into a no-op.
            drop(rx);
            None
        }
    };

    let system = AudioSystem::new(config, score);
    system.initialize(Box::new(graph));
    if !system.wait_until_ready(READY_TIMEOUT) {
        warn!("Audio system not ready: {:?}; effects only", system.state());
    }

    let deadline = Duration::from_secs_f64(seconds.max(0.0));
    let tick_every = tick_every_ms.map(|ms| Duration::from_millis(ms.max(1)));
    let started = Instant::now();
    while started.elapsed() < deadline {
        let remaining = deadline.saturating_sub(started.elapsed());
        match tick_every {
            Some(every) => {
                thread::sleep(every.min(remaining));
                if let Some(pitch) = system.play_tick_sound() {
                    info!("step → {}", pitch);
                }
            }
            None => thread::sleep(remaining),
        }
    }
    if let Some(status) = system.scheduler_status() {
        info!("Queued through t={:.2}s (measure {})", status.queued_until, status.prev_part);
    }

    system.shutdown();
    drop(system);
    if let Some(handle) = logger {
        let written = handle.join().map_err(|_| "command log thread panicked")??;
        println!("{} commands logged", written);
    }
    Ok(())
}

fn inspect(path: &Path, head: usize) -> CliResult {
    let reader = CommandLogReader::open_path(path)?;
    let header = reader.header.clone();
    let records = reader.read_all();
    let summary = LogSummary::from_records(&records);

    println!("{} v{}", header.format, header.version);
    println!("sample rate: {} Hz  seed: {}  muted: {}", header.sample_rate, header.seed, header.muted);
    println!("records:     {}", summary.total);
    for (op, n) in &summary.by_op {
        println!("  {:<10} {}", op, n);
    }
    if let Some((lo, hi)) = summary.span {
        println!("time span:   {:.3}s .. {:.3}s", lo, hi);
    }
    println!("pitches:     {}", summary.distinct_pitches);
    for record in records.iter().filter(|r| matches!(r, CommandRecord::Buffer { .. })) {
        println!("{}", record);
    }
    for record in records.iter().take(head) {
        println!("  {}", record);
    }
    Ok(())
}

fn effect(config: AudioConfig, name: &str, out: &Path, sample_rate: u32) -> CliResult {
    let step = name.eq_ignore_ascii_case("step") || name.eq_ignore_ascii_case("tick");
    let effect = if step { None } else { Some(name.parse::<SoundEffect>()?) };

    let clock = ManualClock::new(0.0);
    let (graph, rx) = CommandGraph::channel(Arc::new(clock), sample_rate);
    let logger = CommandLogger::create(rx, out, LogHeader::new(sample_rate, config.seed, config.muted))?.spawn()?;

    let system = AudioSystem::new(config, Box::new(Score::demo())).with_timer(TimerMode::Manual);
    system.initialize(Box::new(graph));
    match effect {
        Some(effect) => system.play_effect(effect),
        None => {
            if let Some(pitch) = system.play_tick_sound() {
                println!("step pitch: {}", pitch);
            }
        }
    }
    system.shutdown();
    drop(system);
    let written = logger.join().map_err(|_| "command log thread panicked")??;
    println!("{} commands → {}", written, out.display());
    Ok(())
}
