//! The LNS main loop.

use super::neighborhood::{NeighborhoodConfig, NeighborhoodGenerator};
use super::schedule::{CoolingSchedule, ScheduleConfig, ScheduleEvent, Stage};
use crate::error::{Result, SrltpError};
use crate::exact::{Oracle, OracleOutcome, OracleStatus};
use crate::instance::SrltpInstance;
use crate::solution::{check_feasibility, FeasibilityReport, Solution, Violation, TOLERANCE};
use crate::subproblem::SubProblem;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Minimum gain for a candidate to count as an improvement
const IMPROVEMENT_EPS: f64 = 1e-9;

/// How the first incumbent is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedStrategy {
    /// The depot-only tour
    #[default]
    Empty,
    /// One oracle call on the whole instance, falling back to the empty tour
    FullOracle,
}

/// LNS driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LnsConfig {
    pub schedule: ScheduleConfig,
    pub neighborhood: NeighborhoodConfig,
    /// Iteration budget
    pub max_iterations: usize,
    /// Upper bound on a single oracle call, in seconds
    pub oracle_time_limit: f64,
    pub seed_strategy: SeedStrategy,
}

impl Default for LnsConfig {
    fn default() -> Self {
        LnsConfig {
            schedule: ScheduleConfig::default(),
            neighborhood: NeighborhoodConfig::default(),
            max_iterations: 100,
            oracle_time_limit: 60.0,
            seed_strategy: SeedStrategy::Empty,
        }
    }
}

impl LnsConfig {
    /// Load a configuration from JSON; missing fields take their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn oracle_cap(&self) -> Duration {
        if self.oracle_time_limit.is_finite() && self.oracle_time_limit > 0.0 {
            Duration::try_from_secs_f64(self.oracle_time_limit).unwrap_or(Duration::MAX)
        } else {
            Duration::from_secs(60)
        }
    }
}

/// External stop signal, checked between iterations
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// A sub-problem covering the whole instance was solved to optimality
    Converged,
    BudgetExhausted,
    Cancelled,
    AbortedNoProgress,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Converged => "CONVERGED",
            RunStatus::BudgetExhausted => "BUDGET_EXHAUSTED",
            RunStatus::Cancelled => "CANCELLED",
            RunStatus::AbortedNoProgress => "ABORTED_NO_PROGRESS",
        };
        write!(f, "{}", s)
    }
}

/// A discarded iteration that is not plain search stagnation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Fault {
    OracleError(String),
    InvariantViolation(Vec<Violation>),
    SubproblemViolation(String),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::OracleError(msg) => write!(f, "oracle error: {}", msg),
            Fault::InvariantViolation(violations) => {
                write!(f, "{}", SrltpError::InvariantViolation(violations.clone()))
            }
            Fault::SubproblemViolation(msg) => write!(f, "sub-problem violation: {}", msg),
        }
    }
}

/// One row of the run trace
#[derive(Debug, Clone, Serialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub free_nodes: usize,
    pub fixed_arcs: usize,
    pub oracle_status: OracleStatus,
    pub oracle_seconds: f64,
    pub candidate_objective: Option<f64>,
    pub incumbent_objective: f64,
    pub improved: bool,
    pub counter: usize,
    pub stage: Stage,
    pub event: String,
    pub fault: Option<String>,
}

/// Result of an LNS run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub best: Solution,
    /// Independent feasibility check of `best`
    pub certificate: FeasibilityReport,
    pub iterations: usize,
    pub trace: Vec<IterationRecord>,
    /// Iterations lost to `OracleError`
    pub oracle_failures: usize,
    /// Iterations whose candidate failed validation
    pub rejected_candidates: usize,
    /// RFC 3339 start timestamp
    pub started_at: String,
    pub elapsed_seconds: f64,
}

impl RunReport {
    /// Write the iteration trace as CSV
    pub fn export_trace_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(file);
        for record in &self.trace {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Status: {}", self.status)?;
        writeln!(f, "Iterations: {}", self.iterations)?;
        writeln!(f, "Oracle failures: {}", self.oracle_failures)?;
        writeln!(f, "Rejected candidates: {}", self.rejected_candidates)?;
        writeln!(f, "Elapsed: {:.3}s (started {})", self.elapsed_seconds, self.started_at)?;
        write!(f, "{}", self.best)?;
        writeln!(f, "Feasibility certificate:")?;
        write!(f, "{}", self.certificate)
    }
}

/// Large neighborhood search over MIP neighborhoods
pub struct LnsDriver<'a, O: Oracle + ?Sized> {
    instance: &'a SrltpInstance,
    oracle: &'a O,
    config: LnsConfig,
}

impl<'a, O: Oracle + ?Sized> LnsDriver<'a, O> {
    /// Fails only on a malformed instance
    pub fn new(instance: &'a SrltpInstance, oracle: &'a O, config: LnsConfig) -> Result<Self> {
        instance.validate()?;
        Ok(LnsDriver { instance, oracle, config })
    }

    pub fn config(&self) -> &LnsConfig {
        &self.config
    }

    /// Run until convergence, abort, budget exhaustion or cancellation
    pub fn run(&self, cancel: &CancellationToken) -> RunReport {
        let started_at = chrono::Local::now().to_rfc3339();
        let start = Instant::now();
        let instance = self.instance;
        let cap = self.config.oracle_cap();

        log::info!(
            "LNS on {} ({} customers) with {} oracle, budget {} iterations",
            instance.name,
            instance.num_customers(),
            self.oracle.name(),
            self.config.max_iterations
        );

        let mut trace = Vec::new();
        let mut oracle_failures = 0;
        let mut rejected_candidates = 0;
        let (mut best, seed_converged) = self.seed(cap, &mut oracle_failures);

        let generator = NeighborhoodGenerator::new(self.config.neighborhood.clone());
        let mut schedule = CoolingSchedule::new(self.config.schedule.clone(), instance.num_customers());
        let mut iterations = 0;

        let status = if seed_converged || instance.num_customers() == 0 {
            RunStatus::Converged
        } else {
            loop {
                if cancel.is_cancelled() {
                    break RunStatus::Cancelled;
                }
                if iterations >= self.config.max_iterations {
                    break RunStatus::BudgetExhausted;
                }
                iterations += 1;

                let shape = schedule.shape();
                let time_limit = schedule.time_limit(cap);
                let subproblem = match generator.generate(instance, &best, &shape, time_limit) {
                    Ok(sp) => sp,
                    Err(e) => {
                        log::error!("Neighborhood generation failed: {}", e);
                        break RunStatus::AbortedNoProgress;
                    }
                };

                let outcome = self.oracle.solve(instance, &subproblem);
                let assessment = self.assess(&subproblem, &outcome, best.objective);

                match &assessment.fault {
                    Some(fault @ Fault::OracleError(_)) => {
                        oracle_failures += 1;
                        log::warn!("Iteration {}: {}", iterations, fault);
                    }
                    Some(fault) => {
                        rejected_candidates += 1;
                        log::warn!("Iteration {}: candidate discarded, {}", iterations, fault);
                    }
                    None => {}
                }

                let improved = assessment.accepted.is_some();
                if let Some(mut candidate) = assessment.accepted {
                    candidate.algorithm = format!("LNS[{}]", self.oracle.name());
                    candidate.iterations = Some(iterations);
                    best = candidate;
                }

                let converged =
                    outcome.status == OracleStatus::Optimal && subproblem.is_exhaustive() && assessment.fault.is_none();
                let event = schedule.record(improved);

                log::debug!(
                    "Iteration {}: free {:?}, {} fixed arcs, oracle {} in {:.3}s, incumbent {:.4}, {:?}",
                    iterations,
                    subproblem.free,
                    subproblem.fixed_arcs.len(),
                    outcome.status,
                    outcome.elapsed.as_secs_f64(),
                    best.objective,
                    event
                );

                trace.push(IterationRecord {
                    iteration: iterations,
                    free_nodes: subproblem.free.len(),
                    fixed_arcs: subproblem.fixed_arcs.len(),
                    oracle_status: outcome.status,
                    oracle_seconds: outcome.elapsed.as_secs_f64(),
                    candidate_objective: assessment.candidate_objective,
                    incumbent_objective: best.objective,
                    improved,
                    counter: schedule.counter(),
                    stage: schedule.stage(),
                    event: format!("{:?}", event),
                    fault: assessment.fault.as_ref().map(|f| f.to_string()),
                });

                if converged {
                    break RunStatus::Converged;
                }
                if event == ScheduleEvent::Abort {
                    break RunStatus::AbortedNoProgress;
                }
            }
        };

        best.computation_time = start.elapsed().as_secs_f64();
        let certificate = check_feasibility(instance, &best);
        if !certificate.is_feasible() {
            log::error!("Best solution failed its final feasibility check:\n{}", certificate);
        }

        log::info!(
            "LNS finished: {} after {} iterations, objective {:.4} ({} oracle failures)",
            status,
            iterations,
            best.objective,
            oracle_failures
        );

        RunReport {
            status,
            best,
            certificate,
            iterations,
            trace,
            oracle_failures,
            rejected_candidates,
            started_at,
            elapsed_seconds: start.elapsed().as_secs_f64(),
        }
    }

    /// First incumbent; the flag tells whether it is already proven optimal
    fn seed(&self, cap: Duration, oracle_failures: &mut usize) -> (Solution, bool) {
        let instance = self.instance;
        let mut empty = Solution::empty(instance);
        empty.algorithm = "Seed".to_string();

        if self.config.seed_strategy == SeedStrategy::Empty || instance.num_customers() == 0 {
            return (empty, false);
        }

        let subproblem = SubProblem::full(instance, &empty, cap);
        let outcome = self.oracle.solve(instance, &subproblem);
        let assessment = self.assess(&subproblem, &outcome, f64::NEG_INFINITY);
        if let Some(fault) = &assessment.fault {
            if matches!(fault, Fault::OracleError(_)) {
                *oracle_failures += 1;
            }
            log::warn!("Full-instance seed rejected ({}), starting from the empty tour", fault);
        }

        match assessment.accepted {
            Some(solution) if solution.objective >= empty.objective => {
                (solution, outcome.status == OracleStatus::Optimal)
            }
            _ => (empty, false),
        }
    }

    /// Validate an oracle outcome against the sub-problem and the incumbent
    fn assess(&self, subproblem: &SubProblem, outcome: &OracleOutcome, incumbent: f64) -> Assessment {
        let mut assessment = Assessment { accepted: None, candidate_objective: None, fault: None };

        if outcome.status == OracleStatus::OracleError {
            let message = outcome.message.clone().unwrap_or_else(|| "unspecified oracle failure".to_string());
            assessment.fault = Some(Fault::OracleError(message));
            return assessment;
        }
        let candidate = match (&outcome.status, &outcome.solution) {
            (OracleStatus::Optimal | OracleStatus::TimeLimit, Some(solution)) => solution,
            _ => return assessment,
        };
        assessment.candidate_objective = Some(candidate.objective);

        let mut report = check_feasibility(self.instance, candidate);
        if let Some(reported) = outcome.objective {
            if (reported - candidate.objective).abs() > TOLERANCE * candidate.objective.abs().max(1.0) {
                report.violations.push(Violation::ObjectiveMismatch { reported, recomputed: candidate.objective });
            }
        }
        if !report.is_feasible() {
            assessment.fault = Some(Fault::InvariantViolation(report.violations));
            return assessment;
        }
        if let Some(reason) = subproblem.admission_error(candidate) {
            assessment.fault = Some(Fault::SubproblemViolation(reason));
            return assessment;
        }

        if candidate.objective > incumbent + IMPROVEMENT_EPS {
            assessment.accepted = Some(candidate.clone());
        }
        assessment
    }
}

struct Assessment {
    accepted: Option<Solution>,
    candidate_objective: Option<f64>,
    fault: Option<Fault>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exact::EnumerationOracle;
    use crate::generator::{demo_instance, random_instance, GeneratorConfig};
    use std::sync::atomic::AtomicUsize;

    /// Oracle returning a fixed outcome and counting calls
    struct ScriptedOracle {
        make: Box<dyn Fn(&SrltpInstance, &SubProblem) -> OracleOutcome + Send + Sync>,
        calls: AtomicUsize,
    }

    impl ScriptedOracle {
        fn new(make: impl Fn(&SrltpInstance, &SubProblem) -> OracleOutcome + Send + Sync + 'static) -> Self {
            ScriptedOracle { make: Box::new(make), calls: AtomicUsize::new(0) }
        }
    }

    impl Oracle for ScriptedOracle {
        fn name(&self) -> &str {
            "Scripted"
        }

        fn solve(&self, instance: &SrltpInstance, subproblem: &SubProblem) -> OracleOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.make)(instance, subproblem)
        }
    }

    #[test]
    fn test_oracle_errors_are_counted_not_fatal() {
        let instance = demo_instance(5);
        let oracle = ScriptedOracle::new(|_, _| OracleOutcome::error("licence expired".to_string(), Duration::ZERO));
        let driver = LnsDriver::new(&instance, &oracle, LnsConfig::default()).unwrap();
        let report = driver.run(&CancellationToken::new());

        assert_eq!(report.status, RunStatus::AbortedNoProgress);
        assert_eq!(report.oracle_failures, report.iterations);
        assert!(report.trace.iter().all(|r| r.fault.as_deref() == Some("oracle error: licence expired")));
        assert!(report.best.is_empty());
        assert!(report.certificate.is_feasible());
    }

    #[test]
    fn test_malformed_candidate_is_discarded() {
        let instance = demo_instance(5);
        // Fractions above 1 can never pass the feasibility check
        let oracle = ScriptedOracle::new(|instance, _| {
            let n = instance.dimension();
            let mut fraction = vec![1.5; n];
            fraction[0] = 0.0;
            let solution = Solution::from_plan(instance, instance.customers().collect(), fraction, vec![vec![0.0; n]; n], "bad");
            OracleOutcome::optimal(solution, Duration::ZERO)
        });
        let driver = LnsDriver::new(&instance, &oracle, LnsConfig::default()).unwrap();
        let report = driver.run(&CancellationToken::new());

        assert_eq!(report.status, RunStatus::AbortedNoProgress);
        assert_eq!(report.rejected_candidates, report.iterations);
        assert_eq!(report.oracle_failures, 0);
        assert!(report.best.is_empty());
    }

    #[test]
    fn test_reported_objective_must_match() {
        let instance = demo_instance(2);
        let oracle = ScriptedOracle::new(|instance, sp| {
            let mut outcome = EnumerationOracle::default().solve(instance, sp);
            outcome.objective = outcome.objective.map(|v| v + 100.0);
            outcome
        });
        let config = LnsConfig { max_iterations: 5, ..LnsConfig::default() };
        let report = LnsDriver::new(&instance, &oracle, config).unwrap().run(&CancellationToken::new());
        assert_eq!(report.rejected_candidates, report.iterations);
        assert!(report.trace[0].fault.as_deref().unwrap_or("").contains("reported objective"));
    }

    #[test]
    fn test_budget_and_cancellation() {
        let instance = random_instance(&GeneratorConfig::default(), 4);
        let oracle = ScriptedOracle::new(|_, _| OracleOutcome::infeasible(Duration::ZERO));
        let config = LnsConfig { max_iterations: 4, ..LnsConfig::default() };
        let driver = LnsDriver::new(&instance, &oracle, config).unwrap();
        let report = driver.run(&CancellationToken::new());
        assert_eq!(report.status, RunStatus::BudgetExhausted);
        assert_eq!(report.iterations, 4);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = driver.run(&cancel);
        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.iterations, 0);
        assert!(report.best.is_empty());
    }

    #[test]
    fn test_full_oracle_seed_converges_immediately() {
        let config = GeneratorConfig { customers: 5, ..GeneratorConfig::default() };
        let instance = random_instance(&config, 8);
        let oracle = EnumerationOracle::default();
        let lns = LnsConfig { seed_strategy: SeedStrategy::FullOracle, ..LnsConfig::default() };
        let report = LnsDriver::new(&instance, &oracle, lns).unwrap().run(&CancellationToken::new());
        assert_eq!(report.status, RunStatus::Converged);
        assert_eq!(report.iterations, 0);
        assert!(report.certificate.is_feasible());
    }

    #[test]
    fn test_search_improves_monotonically() {
        let config = GeneratorConfig { customers: 6, ..GeneratorConfig::default() };
        let instance = random_instance(&config, 21);
        let oracle = EnumerationOracle::default();
        let report = LnsDriver::new(&instance, &oracle, LnsConfig::default())
            .unwrap()
            .run(&CancellationToken::new());

        assert!(report.certificate.is_feasible(), "{}", report.certificate);
        let mut last = 0.0;
        for record in &report.trace {
            assert!(record.incumbent_objective >= last);
            last = record.incumbent_objective;
        }
        assert!(report.best.objective >= 0.0);
    }

    #[test]
    fn test_malformed_instance_is_rejected() {
        let mut instance = demo_instance(1);
        instance.capacity = -1.0;
        let oracle = EnumerationOracle::default();
        assert!(matches!(
            LnsDriver::new(&instance, &oracle, LnsConfig::default()),
            Err(SrltpError::MalformedInstance(_))
        ));
    }

    #[test]
    fn test_trace_csv_export() {
        let instance = demo_instance(3);
        let oracle = ScriptedOracle::new(|_, _| OracleOutcome::infeasible(Duration::ZERO));
        let config = LnsConfig { max_iterations: 3, ..LnsConfig::default() };
        let report = LnsDriver::new(&instance, &oracle, config).unwrap().run(&CancellationToken::new());

        let path = std::env::temp_dir().join(format!("srltp_trace_{}.csv", std::process::id()));
        report.export_trace_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert!(text.starts_with("iteration,free_nodes"));
        assert_eq!(text.lines().count(), 4);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_oversized_time_limits_saturate() {
        let instance = demo_instance(6);
        let oracle = ScriptedOracle::new(|_, sp| {
            assert!(sp.time_limit > Duration::from_secs(60));
            OracleOutcome::infeasible(Duration::ZERO)
        });
        let mut config = LnsConfig { max_iterations: 2, oracle_time_limit: 1.0e20, ..LnsConfig::default() };
        config.schedule.time_unit = 1.0e30;
        assert_eq!(config.oracle_cap(), Duration::MAX);

        let report = LnsDriver::new(&instance, &oracle, config).unwrap().run(&CancellationToken::new());
        assert_eq!(report.status, RunStatus::BudgetExhausted);
        assert_eq!(report.iterations, 2);
    }

    #[test]
    fn test_config_from_json_uses_defaults() {
        let path = std::env::temp_dir().join(format!("srltp_config_{}.json", std::process::id()));
        std::fs::write(&path, r#"{"max_iterations": 7, "schedule": {"t0": 2.0}, "seed_strategy": "full_oracle"}"#).unwrap();
        let config = LnsConfig::from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(config.max_iterations, 7);
        assert_eq!(config.schedule.t0, 2.0);
        assert_eq!(config.schedule.max_swaps, 3);
        assert_eq!(config.neighborhood.deletion_rate, 0.3);
        assert_eq!(config.seed_strategy, SeedStrategy::FullOracle);
    }
}
