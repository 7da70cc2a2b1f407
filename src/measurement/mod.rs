pub mod control;
pub mod cycle;
pub mod hop_discovery;
pub mod prober;
pub mod resolver;
pub mod scheduler;
pub mod target;
pub mod tracer;

pub use control::{ControlError, MeasurementControl};
pub use cycle::{CycleOutcome, CycleRunner};
pub use scheduler::Scheduler;
