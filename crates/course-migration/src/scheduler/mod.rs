//! Job scheduling: the backup and restore dispatch sweeps and the periodic
//! driver that runs them.

pub mod driver;
pub mod sweep;

pub use driver::SweepScheduler;
pub use sweep::{BackupSweep, RestoreSweep, Sweep, SweepReport};
