//! Optimization oracles for sub-problems.
//!
//! An [`Oracle`] solves a [`SubProblem`] to optimality or proven
//! infeasibility within its time cap. It never panics and never returns an
//! error to the caller: every failure is folded into [`OracleStatus::OracleError`].

pub mod enumeration;

pub use enumeration::{EnumerationConfig, EnumerationOracle};

use crate::error::{Result, SrltpError};
use crate::instance::SrltpInstance;
use crate::solution::Solution;
use crate::subproblem::SubProblem;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// When built with the `gurobi` feature, expose the real implementation
#[cfg(feature = "gurobi")]
mod gurobi;
#[cfg(feature = "gurobi")]
pub use gurobi::*;

// Otherwise provide a stub that reports itself unavailable on every call
#[cfg(not(feature = "gurobi"))]
mod gurobi_stub {
    use super::{Oracle, OracleOutcome};
    use crate::instance::SrltpInstance;
    use crate::subproblem::SubProblem;
    use std::time::Duration;

    #[derive(Debug, Clone, Default)]
    pub struct GurobiConfig {
        pub mip_gap: f64,
        pub threads: i32,
        pub verbose: bool,
    }

    pub struct GurobiOracle {
        pub config: GurobiConfig,
    }

    impl GurobiOracle {
        pub fn new(config: GurobiConfig) -> Self {
            GurobiOracle { config }
        }
    }

    impl Oracle for GurobiOracle {
        fn name(&self) -> &str {
            "Gurobi"
        }

        fn solve(&self, _instance: &SrltpInstance, _subproblem: &SubProblem) -> OracleOutcome {
            OracleOutcome::error("Gurobi feature not enabled in this build".to_string(), Duration::ZERO)
        }
    }
}

#[cfg(not(feature = "gurobi"))]
pub use gurobi_stub::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OracleStatus {
    Optimal,
    Infeasible,
    TimeLimit,
    OracleError,
}

impl fmt::Display for OracleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OracleStatus::Optimal => "OPTIMAL",
            OracleStatus::Infeasible => "INFEASIBLE",
            OracleStatus::TimeLimit => "TIME_LIMIT",
            OracleStatus::OracleError => "ORACLE_ERROR",
        };
        write!(f, "{}", s)
    }
}

/// Result of one oracle call
#[derive(Debug, Clone)]
pub struct OracleOutcome {
    pub status: OracleStatus,
    /// Best solution found (present for `Optimal`, optional for `TimeLimit`)
    pub solution: Option<Solution>,
    /// Objective as computed by the oracle
    pub objective: Option<f64>,
    /// Diagnostic for `OracleError`
    pub message: Option<String>,
    pub elapsed: Duration,
}

impl OracleOutcome {
    pub fn optimal(solution: Solution, elapsed: Duration) -> Self {
        OracleOutcome {
            status: OracleStatus::Optimal,
            objective: Some(solution.objective),
            solution: Some(solution),
            message: None,
            elapsed,
        }
    }

    pub fn time_limit(solution: Option<Solution>, elapsed: Duration) -> Self {
        OracleOutcome {
            status: OracleStatus::TimeLimit,
            objective: solution.as_ref().map(|s| s.objective),
            solution,
            message: None,
            elapsed,
        }
    }

    pub fn infeasible(elapsed: Duration) -> Self {
        OracleOutcome { status: OracleStatus::Infeasible, solution: None, objective: None, message: None, elapsed }
    }

    pub fn error(message: String, elapsed: Duration) -> Self {
        OracleOutcome {
            status: OracleStatus::OracleError,
            solution: None,
            objective: None,
            message: Some(message),
            elapsed,
        }
    }
}

/// Solver for restricted SRLTP instances.
///
/// Implementations must not mutate shared state visible to other calls:
/// multi-start runs call the same oracle from several threads.
pub trait Oracle: Send + Sync {
    fn name(&self) -> &str;

    /// Solve `subproblem` within `subproblem.time_limit`
    fn solve(&self, instance: &SrltpInstance, subproblem: &SubProblem) -> OracleOutcome;
}

impl<T: Oracle + ?Sized> Oracle for &T {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn solve(&self, instance: &SrltpInstance, subproblem: &SubProblem) -> OracleOutcome {
        (**self).solve(instance, subproblem)
    }
}

impl<T: Oracle + ?Sized> Oracle for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn solve(&self, instance: &SrltpInstance, subproblem: &SubProblem) -> OracleOutcome {
        (**self).solve(instance, subproblem)
    }
}

/// Oracle selected by name (`enumeration` or `gurobi`).
///
/// Fails with `OracleUnavailable` when the oracle is unknown or not compiled
/// into this build.
pub fn oracle_by_name(name: &str) -> Result<Box<dyn Oracle>> {
    match name.to_ascii_lowercase().as_str() {
        "enumeration" => Ok(Box::new(EnumerationOracle::default())),
        "gurobi" if cfg!(feature = "gurobi") => Ok(Box::new(GurobiOracle::new(GurobiConfig::default()))),
        "gurobi" => Err(SrltpError::OracleUnavailable(
            "Gurobi support requires building with the `gurobi` feature".to_string(),
        )),
        other => Err(SrltpError::OracleUnavailable(format!("unknown oracle `{}`", other))),
    }
}
