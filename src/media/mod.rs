//! Multi-channel capture pipeline.
//!
//! Data Flow:
//! ```text
//!                                        ┌─► [Worker enc-0] poll ─► reassemble ─► V4L2 sink
//! Capture group (frame source) ──bind────┤
//!        ▲                               └─► [Worker enc-1] poll ─► reassemble ─► V4L2 sink
//!        │
//!   ActivationGate: the first worker to get here enables the group
//! ```
//!
//! The orchestrator ([`pipe::Pipe`]) creates each capture group and encoder
//! group once, spawns one worker thread per encoder channel and joins them
//! all once the shutdown token is cancelled. Workers only interact through
//! the activation gate.

pub mod fps;
pub mod frame;
pub mod gate;
pub mod pipe;
pub mod sink;
#[cfg(test)]
pub mod testing;
pub mod types;
pub mod worker;
