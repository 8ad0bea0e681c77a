//! Signal lifecycle tracking against live prices

pub mod lifecycle;
pub mod poller;

pub use lifecycle::{evaluate, plan, Trigger};
pub use poller::{CycleReport, SignalTracker, TrackerError};
