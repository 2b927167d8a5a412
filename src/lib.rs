pub mod command_log;
pub mod config;
pub mod driver;
pub mod effects;
pub mod emitter;
pub mod engine;
pub mod graph;
pub mod impulse;
pub mod noise;
pub mod pitch;
pub mod scheduler;
pub mod sequence;
pub mod types;
