use srltp_lns::exact::{EnumerationOracle, Oracle, OracleOutcome};
use srltp_lns::generator::demo_instance;
use srltp_lns::instance::{Node, ShippingPolicy, SrltpInstance};
use srltp_lns::lns::{CancellationToken, LnsConfig, LnsDriver, RunStatus, ScheduleConfig};
use srltp_lns::multistart::{run_multistart, MultiStartConfig};
use srltp_lns::solution::{check_feasibility, objective, Invariant};
use srltp_lns::subproblem::SubProblem;
use std::time::Duration;

/// Depot plus one surplus and one deficit node, all arcs free
fn pair_instance(capacity: f64) -> SrltpInstance {
    let nodes = vec![Node::new(0, 0.0, 0.0), Node::new(1, 10.0, 5.0), Node::new(2, -10.0, -3.0)];
    SrltpInstance::new("pair", nodes, vec![vec![0.0; 3]; 3], capacity, 100.0, 20.0)
}

struct InfeasibleOracle;

impl Oracle for InfeasibleOracle {
    fn name(&self) -> &str {
        "Infeasible"
    }

    fn solve(&self, _instance: &SrltpInstance, _subproblem: &SubProblem) -> OracleOutcome {
        OracleOutcome::infeasible(Duration::ZERO)
    }
}

/// Delegates to the enumeration oracle and raises the stop signal on its first call
struct CancellingOracle {
    token: CancellationToken,
}

impl Oracle for CancellingOracle {
    fn name(&self) -> &str {
        "Cancelling"
    }

    fn solve(&self, instance: &SrltpInstance, subproblem: &SubProblem) -> OracleOutcome {
        self.token.cancel();
        EnumerationOracle::default().solve(instance, subproblem)
    }
}

#[test]
fn test_pair_converges_to_full_transfer() {
    let instance = pair_instance(10.0);
    let oracle = EnumerationOracle::default();
    let report = LnsDriver::new(&instance, &oracle, LnsConfig::default())
        .unwrap()
        .run(&CancellationToken::new());

    assert_eq!(report.status, RunStatus::Converged);
    assert_eq!(report.iterations, 1);
    assert_eq!(report.best.sequence, vec![1, 2]);
    assert!((report.best.objective - 60.0).abs() < 1e-6);
    assert!((report.best.fraction[1] - 1.0).abs() < 1e-6);
    assert!((report.best.fraction[2] - 1.0).abs() < 1e-6);
    assert!(report.certificate.is_feasible());
    assert!(report.trace[0].improved);
}

#[test]
fn test_zero_capacity_keeps_empty_tour() {
    let instance = pair_instance(0.0);
    let oracle = EnumerationOracle::default();
    let report = LnsDriver::new(&instance, &oracle, LnsConfig::default())
        .unwrap()
        .run(&CancellationToken::new());

    assert_eq!(report.status, RunStatus::Converged);
    assert!(report.best.is_empty());
    assert_eq!(report.best.objective, 0.0);
    assert!(report.certificate.certificate().iter().all(|&(_, pass)| pass));
}

#[test]
fn test_stagnation_aborts_with_seed_unchanged() {
    let instance = demo_instance(7);
    let report = LnsDriver::new(&instance, &InfeasibleOracle, LnsConfig::default())
        .unwrap()
        .run(&CancellationToken::new());

    // Three swaps of three failures each, then stages 1..3 and the abort
    assert_eq!(report.status, RunStatus::AbortedNoProgress);
    assert_eq!(report.iterations, 13);
    assert!(report.best.is_empty());
    assert_eq!(report.oracle_failures, 0);
    assert!(report.trace.iter().all(|r| !r.improved));
    assert_eq!(report.trace.last().map(|r| r.event.as_str()), Some("Abort"));
}

#[test]
fn test_cancellation_between_iterations() {
    let instance = demo_instance(3);
    let token = CancellationToken::new();
    let oracle = CancellingOracle { token: token.clone() };
    let report = LnsDriver::new(&instance, &oracle, LnsConfig::default()).unwrap().run(&token);

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.iterations, 1);
    assert!(report.certificate.is_feasible());
}

#[test]
fn test_demo_instance_search_is_feasible() {
    let instance = demo_instance(42);
    let oracle = EnumerationOracle::default();
    let config = LnsConfig { max_iterations: 30, ..LnsConfig::default() };
    let report = LnsDriver::new(&instance, &oracle, config).unwrap().run(&CancellationToken::new());

    assert!(report.certificate.is_feasible(), "{}", report.certificate);
    assert!(report.best.objective >= 0.0);
    assert!((objective(&instance, &report.best) - report.best.objective).abs() < 1e-6);
    assert!(report.iterations <= 30);
}

#[test]
fn test_gated_shipping_requires_visits() {
    let instance = demo_instance(42).with_shipping(ShippingPolicy::GatedByVisit);
    let oracle = EnumerationOracle::default();
    let config = LnsConfig { max_iterations: 20, ..LnsConfig::default() };
    let report = LnsDriver::new(&instance, &oracle, config).unwrap().run(&CancellationToken::new());

    let check = check_feasibility(&instance, &report.best);
    assert!(!check.violates(Invariant::ExternalShipping));
    for i in instance.customers() {
        if !report.best.is_visited(i) {
            assert!(report.best.shipped_from(i) <= 1e-9);
            assert!(report.best.shipped_to(i) <= 1e-9);
        }
    }
}

#[test]
fn test_multistart_best_dominates_single_run() {
    let instance = demo_instance(11);
    let oracle = EnumerationOracle::default();
    // Generous oracle time so no call stops on the clock
    let schedule = ScheduleConfig { time_unit: 100.0, ..ScheduleConfig::default() };
    let lns = LnsConfig { max_iterations: 15, schedule, ..LnsConfig::default() };
    let cancel = CancellationToken::new();

    let single = LnsDriver::new(&instance, &oracle, lns.clone()).unwrap().run(&cancel);
    let config = MultiStartConfig { runs: 3, ..MultiStartConfig::default() };
    let report = run_multistart(&instance, &oracle, &lns, &config, &cancel).unwrap();

    // Run 0 reproduces the single run
    assert!((report.runs[0].objective - single.best.objective).abs() < 1e-9);
    assert!(report.best.best.objective >= single.best.objective);
    assert!(report.best.certificate.is_feasible());
}
