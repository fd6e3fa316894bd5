//! Sweep controller and wake listener.

pub mod sweep;
pub mod wake;
pub mod worker;

pub use crate::db::claim::PrimaryErrorPolicy;
pub use sweep::{Sweep, SweepReport, SweepVerdict, WorkerState};
pub use wake::{Wake, WakeListener};
pub use worker::{Worker, WorkerConfig};
