//! Experiment-control core for a multi-station behavioral rig.
//!
//! A control station drives three independently-addressed peripheral
//! stations (visual display, motion tracker, head-mounted goggle) through a
//! sequence of timed trials over point-to-point UDP. The crate provides the
//! per-link connection channels, the cooperative polling receive loop, the
//! trial sequence generator/validator, and the trial-running state machine;
//! the host application supplies the event loop that pumps
//! [`TrialRunner::pump`], and optionally a UI observer.

pub mod config;
pub mod link;
pub mod logging;
pub mod runner;
pub mod sequence;
pub mod store;
pub mod ticker;
pub mod wire;

pub use config::{RigCtx, RigLayout};
pub use link::{Connection, LinkError, LinkEvent, PollingConnection};
pub use runner::{RunState, RunnerObserver, RunnerSnapshot, Transform, TrialRunner};
pub use sequence::{SequenceError, TrialSequencer, SENTINEL};
pub use store::{JsonFileStore, SequenceStore};
