//! Cooling / perturbation schedule.
//!
//! State machine over the non-improvement counter `i`:
//!
//! | event            | counter | action                                        |
//! |------------------|---------|-----------------------------------------------|
//! | improvement      | 0       | freeze = CP, offset = 0, N shrinks by one     |
//! | 1st failure      | 1       | freeze = CP = (1, T0)                         |
//! | 2nd failure      | 2       | freeze = CP' = (3, T0)                        |
//! | 3rd failure      | 3 -> 0  | freeze = CP' = (6, T0), swap target, N += 1   |
//! | failure at i = 3 | 4       | abort (swap budget spent)                     |

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Neighborhood size `N` at the start of a run
    pub initial_neighborhood: usize,
    /// Base freeze duration `T0`
    pub t0: f64,
    /// Stage-3 swaps allowed before the run may abort
    pub max_swaps: usize,
    /// Seconds of oracle time per unit of freeze duration
    pub time_unit: f64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig { initial_neighborhood: 2, t0: 0.5, max_swaps: 3, time_unit: 1.0 }
    }
}

/// A freeze duration `multiple * unit`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreezeDuration {
    pub multiple: f64,
    pub unit: f64,
}

impl FreezeDuration {
    pub fn factor(&self) -> f64 {
        self.multiple * self.unit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Improving,
    Stage1,
    Stage2,
    Stage3,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleEvent {
    Reset,
    Escalated(Stage),
    Swapped { offset: usize, size: usize, protected: usize },
    Abort,
}

/// What the neighborhood generator should free next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborhoodShape {
    /// `N`: number of nodes to free
    pub size: usize,
    /// `N'`: number of arcs to protect
    pub protected: usize,
    /// Rotation of the priority ranking
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct CoolingSchedule {
    config: ScheduleConfig,
    customers: usize,
    counter: usize,
    stage: Stage,
    size: usize,
    protected: usize,
    offset: usize,
    freeze: FreezeDuration,
    swaps: usize,
}

impl CoolingSchedule {
    pub fn new(config: ScheduleConfig, customers: usize) -> Self {
        let size = config.initial_neighborhood.clamp(1, customers.max(1));
        let freeze = FreezeDuration { multiple: 1.0, unit: config.t0 };
        CoolingSchedule {
            config,
            customers,
            counter: 0,
            stage: Stage::Improving,
            size,
            protected: size - 1,
            offset: 0,
            freeze,
            swaps: 0,
        }
    }

    pub fn counter(&self) -> usize {
        self.counter
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn swaps(&self) -> usize {
        self.swaps
    }

    pub fn freeze(&self) -> FreezeDuration {
        self.freeze
    }

    pub fn is_aborted(&self) -> bool {
        self.stage == Stage::Abort
    }

    pub fn shape(&self) -> NeighborhoodShape {
        NeighborhoodShape { size: self.size, protected: self.protected, offset: self.offset }
    }

    /// Oracle time for the next sub-problem, never above `cap`
    pub fn time_limit(&self, cap: Duration) -> Duration {
        let secs = self.config.time_unit * self.freeze.factor();
        if secs.is_finite() && secs > 0.0 {
            cap.min(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
        } else {
            cap
        }
    }

    fn initial_size(&self) -> usize {
        self.config.initial_neighborhood.clamp(1, self.customers.max(1))
    }

    fn set_freeze(&mut self, multiple: f64) {
        self.freeze = FreezeDuration { multiple, unit: self.config.t0 };
    }

    /// Advance the state machine after an iteration
    pub fn record(&mut self, improved: bool) -> ScheduleEvent {
        if self.is_aborted() {
            return ScheduleEvent::Abort;
        }

        if improved {
            self.counter = 0;
            self.stage = Stage::Improving;
            self.set_freeze(1.0);
            self.offset = 0;
            self.size = self.size.saturating_sub(1).max(self.initial_size());
            self.protected = self.size - 1;
            return ScheduleEvent::Reset;
        }

        self.counter += 1;
        match self.counter {
            1 => {
                self.set_freeze(1.0);
                self.stage = Stage::Stage1;
                ScheduleEvent::Escalated(Stage::Stage1)
            }
            2 => {
                self.set_freeze(3.0);
                self.stage = Stage::Stage2;
                ScheduleEvent::Escalated(Stage::Stage2)
            }
            3 => {
                self.set_freeze(6.0);
                if self.swaps < self.config.max_swaps {
                    self.swaps += 1;
                    self.offset += self.size;
                    self.size = (self.size + 1).min(self.customers.max(1));
                    self.protected = self.size - 1;
                    self.counter = 0;
                    self.stage = Stage::Improving;
                    ScheduleEvent::Swapped { offset: self.offset, size: self.size, protected: self.protected }
                } else {
                    self.stage = Stage::Stage3;
                    ScheduleEvent::Escalated(Stage::Stage3)
                }
            }
            _ => {
                self.stage = Stage::Abort;
                ScheduleEvent::Abort
            }
        }
    }
}
