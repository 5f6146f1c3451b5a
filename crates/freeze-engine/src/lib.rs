//! The revert engine proper: the recorder every write endpoint calls, the
//! background sweeper that undoes expired mutations, and a broadcast feed of
//! applied reverts for observers.

mod events;
mod recorder;
mod sweeper;

pub use events::{RevertEvent, RevertFeed};
pub use recorder::Recorder;
pub use sweeper::{start, sweep_once, SweepStats};
