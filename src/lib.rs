//! SRLTP Solver Library
//!
//! Large neighborhood search with MIP neighborhoods for the single-vehicle,
//! profit-maximizing pickup and delivery problem with external shipping.
//!
//! # Features
//!
//! - Instance model with JSON loading and seeded instance generation
//! - Independent feasibility checking with a per-invariant certificate
//! - Exact sub-problem oracles: built-in enumeration + LP, Gurobi MIP (feature `gurobi`)
//! - Priority-driven neighborhoods and a cooling/perturbation schedule
//! - Parallel multi-start runs with summary statistics
//!
//! # Example
//!
//! ```no_run
//! use srltp_lns::exact::EnumerationOracle;
//! use srltp_lns::generator::demo_instance;
//! use srltp_lns::lns::{CancellationToken, LnsConfig, LnsDriver};
//!
//! let instance = demo_instance(42);
//! let oracle = EnumerationOracle::default();
//! let driver = LnsDriver::new(&instance, &oracle, LnsConfig::default()).unwrap();
//! let report = driver.run(&CancellationToken::new());
//!
//! println!("{}: objective {:.2}", report.status, report.best.objective);
//! ```

pub mod error;
pub mod instance;
pub mod generator;
pub mod solution;
pub mod subproblem;
pub mod exact;
pub mod lns;
pub mod multistart;

pub use error::{Result, SrltpError};
pub use instance::SrltpInstance;
pub use solution::Solution;
