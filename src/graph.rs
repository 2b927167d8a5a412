//! Boundary to the host audio graph.
//!
//! The host owns oscillators, gain stages, convolution and the hardware
//! clock; this crate only issues scheduling requests against it.
//! [`CommandGraph`] is the stock adapter: every call becomes a
//! [`GraphCommand`] on a crossbeam channel for a renderer (or a logger) to
//! consume on its own thread.

use crate::impulse::ImpulseResponse;
use crate::types::*;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::trace;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic playback clock, in seconds.
pub trait AudioClock: Send + Sync {
    fn now(&self) -> f64;
}

impl AudioClock for SessionClock {
    fn now(&self) -> f64 {
        self.now_secs()
    }
}

/// Clock advanced by hand, for offline rendering and tests. Clones share time.
#[derive(Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        let clock = Self::default();
        clock.set(start);
        clock
    }

    pub fn set(&self, secs: f64) {
        self.bits.store(secs.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, secs: f64) {
        self.set(self.now() + secs);
    }
}

impl AudioClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Operations the host graph must expose. All of them are fire-and-forget
/// requests; none block or fail.
pub trait AudioGraph: Send {
    fn current_time(&self) -> f64;
    fn sample_rate(&self) -> u32;
    /// The hardware output node.
    fn destination(&self) -> NodeId;

    fn create_gain(&mut self, gain: f32) -> NodeId;
    fn create_oscillator(&mut self, waveform: Waveform, frequency: f64) -> NodeId;
    fn create_convolver(&mut self) -> NodeId;
    fn set_convolver_buffer(&mut self, node: NodeId, buffer: Arc<ImpulseResponse>);
    fn connect(&mut self, from: NodeId, to: NodeId);

    /// Set a parameter immediately.
    fn set_param(&mut self, node: NodeId, param: AudioParam, value: f32);
    fn set_value_at_time(&mut self, node: NodeId, param: AudioParam, value: f32, at: f64);
    /// `value` must be strictly positive.
    fn exponential_ramp_to_value_at_time(&mut self, node: NodeId, param: AudioParam, value: f32, at: f64);

    fn start(&mut self, node: NodeId, at: f64);
    fn stop(&mut self, node: NodeId, at: f64);
}

pub const DESTINATION: NodeId = NodeId(0);

/// [`AudioGraph`] that forwards every call as a [`GraphCommand`].
///
/// Once the receiving side hangs up, calls become silent no-ops: audio is an
/// enhancement and a missing renderer must not take the application down.
pub struct CommandGraph {
    tx: Sender<GraphCommand>,
    clock: Arc<dyn AudioClock>,
    sample_rate: u32,
    next_id: u32,
    closed: bool,
}

impl CommandGraph {
    pub fn new(tx: Sender<GraphCommand>, clock: Arc<dyn AudioClock>, sample_rate: u32) -> Self {
        Self {
            tx,
            clock,
            sample_rate,
            next_id: DESTINATION.0 + 1,
            closed: false,
        }
    }

    /// Graph plus the receiving end of its command stream.
    pub fn channel(clock: Arc<dyn AudioClock>, sample_rate: u32) -> (Self, Receiver<GraphCommand>) {
        let (tx, rx) = unbounded();
        (Self::new(tx, clock, sample_rate), rx)
    }

    /// Nodes allocated so far (not counting the destination).
    pub fn node_count(&self) -> u32 {
        self.next_id - DESTINATION.0 - 1
    }

    fn alloc(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn send(&mut self, cmd: GraphCommand) {
        if self.tx.send(cmd).is_err() && !self.closed {
            self.closed = true;
            trace!("Output graph closed; dropping commands from now on");
        }
    }
}

impl AudioGraph for CommandGraph {
    fn current_time(&self) -> f64 {
        self.clock.now()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn destination(&self) -> NodeId {
        DESTINATION
    }

    fn create_gain(&mut self, gain: f32) -> NodeId {
        let node = self.alloc();
        self.send(GraphCommand::CreateGain { node, gain });
        node
    }

    fn create_oscillator(&mut self, waveform: Waveform, frequency: f64) -> NodeId {
        let node = self.alloc();
        self.send(GraphCommand::CreateOscillator {
            node,
            waveform,
            frequency,
        });
        node
    }

    fn create_convolver(&mut self) -> NodeId {
        let node = self.alloc();
        self.send(GraphCommand::CreateConvolver { node });
        node
    }

    fn set_convolver_buffer(&mut self, node: NodeId, buffer: Arc<ImpulseResponse>) {
        self.send(GraphCommand::SetConvolverBuffer { node, buffer });
    }

    fn connect(&mut self, from: NodeId, to: NodeId) {
        self.send(GraphCommand::Connect { from, to });
    }

    fn set_param(&mut self, node: NodeId, param: AudioParam, value: f32) {
        self.send(GraphCommand::SetParam { node, param, value });
    }

    fn set_value_at_time(&mut self, node: NodeId, param: AudioParam, value: f32, at: f64) {
        self.send(GraphCommand::SetValueAtTime {
            node,
            param,
            value,
            at,
        });
    }

    fn exponential_ramp_to_value_at_time(&mut self, node: NodeId, param: AudioParam, value: f32, at: f64) {
        debug_assert!(value > 0.0, "exponential ramp target must be positive");
        self.send(GraphCommand::ExponentialRamp {
            node,
            param,
            value,
            at,
        });
    }

    fn start(&mut self, node: NodeId, at: f64) {
        self.send(GraphCommand::Start { node, at });
    }

    fn stop(&mut self, node: NodeId, at: f64) {
        self.send(GraphCommand::Stop { node, at });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(1.5);
        let other = clock.clone();
        clock.advance(0.25);
        assert_eq!(other.now(), 1.75);
    }

    #[test]
    fn test_nodes_get_fresh_ids() {
        let (mut graph, rx) = CommandGraph::channel(Arc::new(ManualClock::new(0.0)), 44100);
        let a = graph.create_gain(0.5);
        let b = graph.create_oscillator(Waveform::Square, 440.0);
        assert_ne!(a, b);
        assert_ne!(a, graph.destination());
        assert_eq!(graph.node_count(), 2);

        let cmds: Vec<GraphCommand> = rx.try_iter().collect();
        assert_eq!(cmds.len(), 2);
        assert!(matches!(cmds[0], GraphCommand::CreateGain { node, gain } if node == a && gain == 0.5));
    }

    #[test]
    fn test_closed_graph_is_silent() {
        let (mut graph, rx) = CommandGraph::channel(Arc::new(ManualClock::new(0.0)), 44100);
        assert!(!graph.closed);
        drop(rx);
        let osc = graph.create_oscillator(Waveform::Square, 220.0);
        assert!(graph.closed);
        graph.start(osc, 0.0);
        graph.stop(osc, 1.0);
        assert!(graph.closed);
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_current_time_follows_clock() {
        let clock = ManualClock::new(0.0);
        let (graph, _rx) = CommandGraph::channel(Arc::new(clock.clone()), 48000);
        clock.set(3.25);
        assert_eq!(graph.current_time(), 3.25);
        assert_eq!(graph.sample_rate(), 48000);
    }
}
