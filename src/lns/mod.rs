//! Large neighborhood search with MIP neighborhoods.

pub mod driver;
pub mod neighborhood;
pub mod schedule;

pub use driver::{
    CancellationToken, Fault, IterationRecord, LnsConfig, LnsDriver, RunReport, RunStatus, SeedStrategy,
};
pub use neighborhood::{NeighborhoodConfig, NeighborhoodGenerator};
pub use schedule::{CoolingSchedule, FreezeDuration, NeighborhoodShape, ScheduleConfig, ScheduleEvent, Stage};
