pub mod sweeps;

pub use sweeps::{run_sweeps, SweepMetrics, SweepSnapshot};
