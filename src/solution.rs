//! Solution representation and evaluation for the SRLTP.
//!
//! A [`Solution`] is a tour (the visited customers in order, the depot being
//! implicit at both ends) together with the per-node pickup/delivery fraction,
//! load, departure time and the external shipping flow matrix.
//!
//! [`objective`] and [`check_feasibility`] are pure functions of the structural
//! fields. They never trust the producer of the solution: an oracle that
//! returns a malformed assignment is caught here rather than propagated.

use crate::instance::{ShippingPolicy, SrltpInstance};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Relative tolerance used by every feasibility comparison
pub const TOLERANCE: f64 = 1e-6;

/// Represents a candidate solution to the SRLTP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    /// Visited customers in order (depot excluded, implicit at both ends)
    pub sequence: Vec<usize>,
    /// Portion `y[i]` of the quantity picked up or delivered at node `i`
    pub fraction: Vec<f64>,
    /// Load `Q[i]` when leaving node `i`
    pub load: Vec<f64>,
    /// Departure time `s[i]` from node `i`
    pub departure: Vec<f64>,
    /// External shipping flow `xi[i][j]` from surplus `i` to deficit `j`
    pub external_flow: Vec<Vec<f64>>,
    /// Objective value as reported by the producer
    pub objective: f64,
    /// Algorithm that generated this solution
    pub algorithm: String,
    /// Computation time in seconds
    pub computation_time: f64,
    /// Number of iterations (if applicable)
    pub iterations: Option<usize>,
}

impl Solution {
    /// The depot-only tour: nothing visited, nothing shipped
    pub fn empty(instance: &SrltpInstance) -> Self {
        let n = instance.dimension();
        Solution {
            sequence: Vec::new(),
            fraction: vec![0.0; n],
            load: vec![0.0; n],
            departure: vec![0.0; n],
            external_flow: vec![vec![0.0; n]; n],
            objective: 0.0,
            algorithm: "Empty".to_string(),
            computation_time: 0.0,
            iterations: None,
        }
    }

    /// Build a solution from its decisions; loads, departures and the
    /// objective are derived along the sequence.
    pub fn from_plan(
        instance: &SrltpInstance,
        sequence: Vec<usize>,
        fraction: Vec<f64>,
        external_flow: Vec<Vec<f64>>,
        algorithm: &str,
    ) -> Self {
        let n = instance.dimension();
        let mut load = vec![0.0; n];
        let mut departure = vec![0.0; n];
        let mut current_load = 0.0;
        let mut clock = 0.0;
        let mut prev = 0;

        for &node in &sequence {
            if node == 0 || node >= n {
                continue;
            }
            let y = fraction.get(node).copied().unwrap_or(0.0);
            current_load += instance.nodes[node].quantity * y;
            clock += instance.travel_time(prev, node);
            load[node] = current_load;
            departure[node] = clock;
            prev = node;
        }

        let mut solution = Solution {
            sequence,
            fraction,
            load,
            departure,
            external_flow,
            objective: 0.0,
            algorithm: algorithm.to_string(),
            computation_time: 0.0,
            iterations: None,
        };
        solution.objective = objective(instance, &solution);
        solution
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn is_visited(&self, node: usize) -> bool {
        self.sequence.contains(&node)
    }

    /// Position of a node in the visiting sequence
    pub fn position(&self, node: usize) -> Option<usize> {
        self.sequence.iter().position(|&n| n == node)
    }

    /// Arcs traversed by the vehicle, depot arcs included
    pub fn arcs(&self) -> Vec<(usize, usize)> {
        if self.sequence.is_empty() {
            return Vec::new();
        }
        let mut arcs = Vec::with_capacity(self.sequence.len() + 1);
        let mut prev = 0;
        for &node in &self.sequence {
            arcs.push((prev, node));
            prev = node;
        }
        arcs.push((prev, 0));
        arcs
    }

    /// Total travel cost over the used arcs
    pub fn travel_cost(&self, instance: &SrltpInstance) -> f64 {
        let n = instance.dimension();
        self.arcs()
            .into_iter()
            .filter(|&(i, j)| i < n && j < n)
            .map(|(i, j)| instance.cost(i, j))
            .sum()
    }

    /// Total traversal plus handling time over the used arcs
    pub fn total_time(&self, instance: &SrltpInstance) -> f64 {
        let n = instance.dimension();
        self.arcs()
            .into_iter()
            .filter(|&(i, j)| i < n && j < n)
            .map(|(i, j)| instance.travel_time(i, j))
            .sum()
    }

    /// Profit of the quantities served by the vehicle
    pub fn vehicle_profit(&self, instance: &SrltpInstance) -> f64 {
        instance
            .nodes
            .iter()
            .skip(1)
            .zip(self.fraction.iter().skip(1))
            .map(|(node, y)| node.profit() * y)
            .sum()
    }

    /// Differential profit of the external shipping flows
    pub fn shipping_profit(&self, instance: &SrltpInstance) -> f64 {
        let n = instance.dimension();
        let mut total = 0.0;
        for (i, row) in self.external_flow.iter().enumerate().take(n).skip(1) {
            for (j, &flow) in row.iter().enumerate().take(n).skip(1) {
                if i != j && flow != 0.0 {
                    total += instance.shipping_differential(i, j) * flow;
                }
            }
        }
        total
    }

    /// Units sent by the external carrier out of node `i`
    pub fn shipped_from(&self, i: usize) -> f64 {
        self.external_flow.get(i).map(|row| row.iter().sum()).unwrap_or(0.0)
    }

    /// Units received from the external carrier at node `j`
    pub fn shipped_to(&self, j: usize) -> f64 {
        self.external_flow.iter().filter_map(|row| row.get(j)).sum()
    }
}

/// Objective value: vehicle profit + external shipping differential
/// - travel cost - fixed dispatch cost (paid once if any node is visited).
pub fn objective(instance: &SrltpInstance, solution: &Solution) -> f64 {
    let dispatch = if solution.is_empty() { 0.0 } else { instance.fixed_cost };
    solution.vehicle_profit(instance) + solution.shipping_profit(instance)
        - solution.travel_cost(instance)
        - dispatch
}

/// Shorthand for `check_feasibility(..).is_feasible()`
pub fn is_feasible(instance: &SrltpInstance, solution: &Solution) -> bool {
    check_feasibility(instance, solution).is_feasible()
}

/// Constraint families a violation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Invariant {
    Structure,
    FlowConservation,
    Fractions,
    Capacity,
    SubtourElimination,
    TimeBudget,
    ExternalShipping,
    Objective,
}

impl Invariant {
    pub const ALL: [Invariant; 8] = [
        Invariant::Structure,
        Invariant::FlowConservation,
        Invariant::Fractions,
        Invariant::Capacity,
        Invariant::SubtourElimination,
        Invariant::TimeBudget,
        Invariant::ExternalShipping,
        Invariant::Objective,
    ];
}

/// A single violated constraint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Violation {
    ShapeMismatch { field: &'static str, expected: usize, actual: usize },
    NonFinite { field: &'static str },
    UnknownNode { node: usize },
    DepotInSequence { position: usize },
    RepeatedNode { node: usize },
    FractionOutOfRange { node: usize, value: f64 },
    FractionOnUnvisited { node: usize, value: f64 },
    DepotLoadNonZero { load: f64 },
    LoadOutOfBounds { node: usize, load: f64, capacity: f64 },
    LoadMismatch { node: usize, expected: f64, actual: f64 },
    FinalLoadNonZero { load: f64 },
    NegativeDeparture { node: usize, time: f64 },
    NonMonotonicDeparture { from: usize, to: usize, departure: f64, earliest: f64 },
    TimeBudgetExceeded { total: f64, budget: f64 },
    ReturnAfterBudget { node: usize, arrival: f64, budget: f64 },
    NegativeExternalFlow { from: usize, to: usize, value: f64 },
    FlowOutsidePartition { from: usize, to: usize, value: f64 },
    ShippingDisabled { from: usize, to: usize, value: f64 },
    ShippingWithoutVisit { from: usize, to: usize, value: f64 },
    SurplusCapExceeded { node: usize, shipped: f64, cap: f64 },
    DeficitCapExceeded { node: usize, received: f64, cap: f64 },
    ObjectiveMismatch { reported: f64, recomputed: f64 },
}

impl Violation {
    pub fn invariant(&self) -> Invariant {
        use Violation::*;
        match self {
            ShapeMismatch { .. } | NonFinite { .. } | UnknownNode { .. } => Invariant::Structure,
            DepotInSequence { .. } | RepeatedNode { .. } => Invariant::FlowConservation,
            FractionOutOfRange { .. } | FractionOnUnvisited { .. } => Invariant::Fractions,
            DepotLoadNonZero { .. }
            | LoadOutOfBounds { .. }
            | LoadMismatch { .. }
            | FinalLoadNonZero { .. } => Invariant::Capacity,
            NegativeDeparture { .. } | NonMonotonicDeparture { .. } => Invariant::SubtourElimination,
            TimeBudgetExceeded { .. } | ReturnAfterBudget { .. } => Invariant::TimeBudget,
            NegativeExternalFlow { .. }
            | FlowOutsidePartition { .. }
            | ShippingDisabled { .. }
            | ShippingWithoutVisit { .. }
            | SurplusCapExceeded { .. }
            | DeficitCapExceeded { .. } => Invariant::ExternalShipping,
            ObjectiveMismatch { .. } => Invariant::Objective,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Violation::*;
        match self {
            ShapeMismatch { field, expected, actual } => {
                write!(f, "{} has length {}, expected {}", field, actual, expected)
            }
            NonFinite { field } => write!(f, "{} contains non-finite values", field),
            UnknownNode { node } => write!(f, "unknown node {} in sequence", node),
            DepotInSequence { position } => write!(f, "depot appears inside the tour at position {}", position),
            RepeatedNode { node } => write!(f, "node {} visited more than once", node),
            FractionOutOfRange { node, value } => write!(f, "fraction y[{}] = {} outside [0, 1]", node, value),
            FractionOnUnvisited { node, value } => write!(f, "unvisited node {} has fraction {}", node, value),
            DepotLoadNonZero { load } => write!(f, "load at depot start is {}", load),
            LoadOutOfBounds { node, load, capacity } => {
                write!(f, "load {} at node {} outside [0, {}]", load, node, capacity)
            }
            LoadMismatch { node, expected, actual } => {
                write!(f, "load at node {} is {}, expected {}", node, actual, expected)
            }
            FinalLoadNonZero { load } => write!(f, "vehicle returns to depot with load {}", load),
            NegativeDeparture { node, time } => write!(f, "departure time {} at node {} is negative", time, node),
            NonMonotonicDeparture { from, to, departure, earliest } => write!(
                f,
                "departure {} at node {} precedes earliest {} after node {}",
                departure, to, earliest, from
            ),
            TimeBudgetExceeded { total, budget } => write!(f, "tour time {} exceeds budget {}", total, budget),
            ReturnAfterBudget { node, arrival, budget } => {
                write!(f, "return from node {} reaches the depot at {}, after budget {}", node, arrival, budget)
            }
            NegativeExternalFlow { from, to, value } => write!(f, "negative flow {} on {}->{}", value, from, to),
            FlowOutsidePartition { from, to, value } => {
                write!(f, "flow {} on {}->{} is not surplus to deficit", value, from, to)
            }
            ShippingDisabled { from, to, value } => {
                write!(f, "flow {} on {}->{} while external shipping is disabled", value, from, to)
            }
            ShippingWithoutVisit { from, to, value } => {
                write!(f, "flow {} on {}->{} without both endpoints visited", value, from, to)
            }
            SurplusCapExceeded { node, shipped, cap } => {
                write!(f, "surplus node {} ships {} beyond cap {}", node, shipped, cap)
            }
            DeficitCapExceeded { node, received, cap } => {
                write!(f, "deficit node {} receives {} beyond cap {}", node, received, cap)
            }
            ObjectiveMismatch { reported, recomputed } => {
                write!(f, "reported objective {} differs from recomputed {}", reported, recomputed)
            }
        }
    }
}

/// Outcome of the independent feasibility check
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeasibilityReport {
    pub violations: Vec<Violation>,
}

impl FeasibilityReport {
    pub fn is_feasible(&self) -> bool {
        self.violations.is_empty()
    }

    /// Pass/fail per invariant family
    pub fn certificate(&self) -> Vec<(Invariant, bool)> {
        Invariant::ALL
            .iter()
            .map(|&inv| (inv, !self.violations.iter().any(|v| v.invariant() == inv)))
            .collect()
    }

    pub fn violates(&self, invariant: Invariant) -> bool {
        self.violations.iter().any(|v| v.invariant() == invariant)
    }
}

impl fmt::Display for FeasibilityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (invariant, pass) in self.certificate() {
            writeln!(f, "  {:<20} {}", format!("{:?}", invariant), if pass { "pass" } else { "FAIL" })?;
        }
        for v in &self.violations {
            writeln!(f, "  - {}", v)?;
        }
        Ok(())
    }
}

/// Revalidate every invariant of a candidate solution.
///
/// Never panics on malformed input: shape problems are reported and the
/// remaining checks are skipped.
pub fn check_feasibility(instance: &SrltpInstance, solution: &Solution) -> FeasibilityReport {
    let n = instance.dimension();
    let mut violations = Vec::new();

    for (field, actual) in [
        ("fraction", solution.fraction.len()),
        ("load", solution.load.len()),
        ("departure", solution.departure.len()),
        ("external_flow", solution.external_flow.len()),
    ] {
        if actual != n {
            violations.push(Violation::ShapeMismatch { field, expected: n, actual });
        }
    }
    if let Some(row) = solution.external_flow.iter().find(|row| row.len() != n) {
        violations.push(Violation::ShapeMismatch { field: "external_flow row", expected: n, actual: row.len() });
    }
    for &node in &solution.sequence {
        if node >= n {
            violations.push(Violation::UnknownNode { node });
        }
    }
    for (field, bad) in [
        ("fraction", has_non_finite(solution.fraction.iter())),
        ("load", has_non_finite(solution.load.iter())),
        ("departure", has_non_finite(solution.departure.iter())),
        ("external_flow", has_non_finite(solution.external_flow.iter().flatten())),
        ("objective", !solution.objective.is_finite()),
    ] {
        if bad {
            violations.push(Violation::NonFinite { field });
        }
    }
    if !violations.is_empty() {
        return FeasibilityReport { violations };
    }

    let load_tol = TOLERANCE * instance.capacity.max(1.0);
    let time_tol = TOLERANCE * instance.time_budget.max(1.0);

    // Flow conservation: every visited node has one incoming and one outgoing arc
    let mut visited = vec![false; n];
    for (position, &node) in solution.sequence.iter().enumerate() {
        if node == 0 {
            violations.push(Violation::DepotInSequence { position });
        } else if visited[node] {
            violations.push(Violation::RepeatedNode { node });
        } else {
            visited[node] = true;
        }
    }

    for (node, &y) in solution.fraction.iter().enumerate() {
        if !visited[node] {
            if y.abs() > TOLERANCE {
                violations.push(Violation::FractionOnUnvisited { node, value: y });
            }
        } else if !(-TOLERANCE..=1.0 + TOLERANCE).contains(&y) {
            violations.push(Violation::FractionOutOfRange { node, value: y });
        }
    }

    // Load along the traversal
    if solution.load[0].abs() > load_tol {
        violations.push(Violation::DepotLoadNonZero { load: solution.load[0] });
    }
    let mut prev_load = solution.load[0];
    let mut prev = 0;
    for &node in solution.sequence.iter().filter(|&&v| v != 0) {
        let expected = prev_load + instance.nodes[node].quantity * solution.fraction[node];
        let actual = solution.load[node];
        if (expected - actual).abs() > load_tol {
            violations.push(Violation::LoadMismatch { node, expected, actual });
        }
        if actual < -load_tol || actual > instance.capacity + load_tol {
            violations.push(Violation::LoadOutOfBounds { node, load: actual, capacity: instance.capacity });
        }

        // Departure times increase along the traversed arcs
        let departure = solution.departure[node];
        if departure < -time_tol {
            violations.push(Violation::NegativeDeparture { node, time: departure });
        }
        let earliest = solution.departure[prev] + instance.travel_time(prev, node);
        if departure < earliest - time_tol {
            violations.push(Violation::NonMonotonicDeparture { from: prev, to: node, departure, earliest });
        }

        prev_load = actual;
        prev = node;
    }
    if prev != 0 && prev_load.abs() > load_tol {
        violations.push(Violation::FinalLoadNonZero { load: prev_load });
    }
    if prev != 0 {
        let arrival = solution.departure[prev] + instance.travel_time(prev, 0);
        if arrival > instance.time_budget + time_tol {
            violations.push(Violation::ReturnAfterBudget { node: prev, arrival, budget: instance.time_budget });
        }
    }
    if solution.departure[0] < -time_tol {
        violations.push(Violation::NegativeDeparture { node: 0, time: solution.departure[0] });
    }

    let total_time = solution.total_time(instance);
    if total_time > instance.time_budget + time_tol {
        violations.push(Violation::TimeBudgetExceeded { total: total_time, budget: instance.time_budget });
    }

    check_external_flow(instance, solution, &visited, load_tol, &mut violations);

    let recomputed = objective(instance, solution);
    if (solution.objective - recomputed).abs() > TOLERANCE * recomputed.abs().max(1.0) {
        violations.push(Violation::ObjectiveMismatch { reported: solution.objective, recomputed });
    }

    FeasibilityReport { violations }
}

fn has_non_finite<'a>(mut values: impl Iterator<Item = &'a f64>) -> bool {
    values.any(|v| !v.is_finite())
}

fn check_external_flow(
    instance: &SrltpInstance,
    solution: &Solution,
    visited: &[bool],
    tol: f64,
    violations: &mut Vec<Violation>,
) {
    let n = instance.dimension();
    for i in 0..n {
        for j in 0..n {
            let value = solution.external_flow[i][j];
            if value < -tol {
                violations.push(Violation::NegativeExternalFlow { from: i, to: j, value });
                continue;
            }
            if value <= tol {
                continue;
            }
            if !(instance.nodes[i].is_surplus() && instance.nodes[j].is_deficit()) {
                violations.push(Violation::FlowOutsidePartition { from: i, to: j, value });
                continue;
            }
            match instance.shipping {
                ShippingPolicy::Disabled => {
                    violations.push(Violation::ShippingDisabled { from: i, to: j, value });
                }
                ShippingPolicy::GatedByVisit if !(visited[i] && visited[j]) => {
                    violations.push(Violation::ShippingWithoutVisit { from: i, to: j, value });
                }
                _ => {}
            }
        }
    }

    for i in instance.surplus_nodes() {
        let cap = instance.nodes[i].quantity * (1.0 - solution.fraction[i]);
        let shipped = solution.shipped_from(i);
        if shipped > cap + tol {
            violations.push(Violation::SurplusCapExceeded { node: i, shipped, cap });
        }
    }
    for j in instance.deficit_nodes() {
        let cap = instance.nodes[j].quantity.abs() * (1.0 - solution.fraction[j]);
        let received = solution.shipped_to(j);
        if received > cap + tol {
            violations.push(Violation::DeficitCapExceeded { node: j, received, cap });
        }
    }
}

impl fmt::Display for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Solution ({})", self.algorithm)?;
        writeln!(f, "  Objective: {:.2}", self.objective)?;
        writeln!(f, "  Time: {:.4}s", self.computation_time)?;
        if let Some(iter) = self.iterations {
            writeln!(f, "  Iterations: {}", iter)?;
        }
        write!(f, "  Tour: 0")?;
        for node in &self.sequence {
            write!(f, " -> {}", node)?;
        }
        if !self.sequence.is_empty() {
            write!(f, " -> 0")?;
        }
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{Node, SrltpInstance};

    /// Depot, two surplus and two deficit nodes on unit arcs
    fn create_test_instance() -> SrltpInstance {
        let nodes = vec![
            Node::new(0, 0.0, 0.0),
            Node::new(1, 6.0, 4.0),
            Node::new(2, -6.0, -3.0),
            Node::new(3, 4.0, 2.0),
            Node::new(4, -4.0, -1.0),
        ];
        SrltpInstance::new("test", nodes, vec![vec![1.0; 5]; 5], 10.0, 20.0, 5.0)
    }

    fn full_tour(instance: &SrltpInstance) -> Solution {
        Solution::from_plan(
            instance,
            vec![1, 3, 2, 4],
            vec![0.0, 1.0, 1.0, 1.0, 1.0],
            vec![vec![0.0; 5]; 5],
            "test",
        )
    }

    #[test]
    fn test_empty_solution_is_feasible() {
        let instance = create_test_instance();
        let sol = Solution::empty(&instance);
        assert!(sol.is_empty());
        assert!(sol.arcs().is_empty());
        assert_eq!(objective(&instance, &sol), 0.0);
        assert!(is_feasible(&instance, &sol));
    }

    #[test]
    fn test_from_plan_derives_load_and_objective() {
        let instance = create_test_instance();
        let sol = full_tour(&instance);
        assert_eq!(sol.load[1], 6.0);
        assert_eq!(sol.load[3], 10.0);
        assert_eq!(sol.load[2], 4.0);
        assert_eq!(sol.load[4], 0.0);
        assert_eq!(sol.departure[4], 4.0);
        // profit 24 + 18 + 8 + 4, five unit arcs, fixed cost 5
        assert!((sol.objective - (54.0 - 5.0 - 5.0)).abs() < 1e-9);
        let report = check_feasibility(&instance, &sol);
        assert!(report.is_feasible(), "{}", report);
    }

    #[test]
    fn test_objective_is_deterministic() {
        let instance = create_test_instance();
        let sol = full_tour(&instance);
        let before = sol.clone();
        let a = objective(&instance, &sol);
        let b = objective(&instance, &sol);
        assert_eq!(a.to_bits(), b.to_bits());
        assert_eq!(sol.sequence, before.sequence);
        assert_eq!(sol.load, before.load);
    }

    #[test]
    fn test_rejects_load_above_capacity() {
        let mut instance = create_test_instance();
        instance.capacity = 8.0;
        let sol = full_tour(&instance);
        let report = check_feasibility(&instance, &sol);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, Violation::LoadOutOfBounds { node: 3, .. })));
        assert!(report.violates(Invariant::Capacity));
    }

    #[test]
    fn test_rejects_negative_load() {
        let instance = create_test_instance();
        let sol = Solution::from_plan(
            &instance,
            vec![2, 1],
            vec![0.0, 1.0, 1.0, 0.0, 0.0],
            vec![vec![0.0; 5]; 5],
            "test",
        );
        let report = check_feasibility(&instance, &sol);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, Violation::LoadOutOfBounds { node: 2, load, .. } if *load < 0.0)));
    }

    #[test]
    fn test_rejects_tampered_load() {
        let instance = create_test_instance();
        let mut sol = full_tour(&instance);
        sol.load[3] = 7.0;
        let report = check_feasibility(&instance, &sol);
        assert!(report.violations.iter().any(|v| matches!(v, Violation::LoadMismatch { node: 3, .. })));
    }

    #[test]
    fn test_rejects_non_monotonic_departures() {
        let instance = create_test_instance();
        let mut sol = full_tour(&instance);
        sol.departure[2] = 0.5;
        let report = check_feasibility(&instance, &sol);
        assert!(report.violates(Invariant::SubtourElimination));
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, Violation::NonMonotonicDeparture { from: 3, to: 2, .. })));
    }

    #[test]
    fn test_rejects_time_budget_overrun() {
        let mut instance = create_test_instance();
        instance.time_budget = 4.0;
        let sol = full_tour(&instance);
        let report = check_feasibility(&instance, &sol);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, Violation::TimeBudgetExceeded { total, .. } if (*total - 5.0).abs() < 1e-9)));
        assert!(!report.violates(Invariant::Capacity));
    }

    #[test]
    fn test_rejects_late_return_to_depot() {
        let nodes = vec![Node::new(0, 0.0, 0.0), Node::new(1, 3.0, 2.0), Node::new(2, -3.0, -1.0)];
        let instance = SrltpInstance::new("late", nodes, vec![vec![1.0; 3]; 3], 10.0, 5.0, 0.0);
        let mut sol = Solution::from_plan(
            &instance,
            vec![1, 2],
            vec![0.0, 1.0, 1.0],
            vec![vec![0.0; 3]; 3],
            "test",
        );
        assert!(is_feasible(&instance, &sol));

        // Waiting is allowed, but not past the budget on the way home
        sol.departure[2] = 1e6;
        let report = check_feasibility(&instance, &sol);
        assert!(report.violates(Invariant::TimeBudget));
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, Violation::ReturnAfterBudget { node: 2, .. })));
        assert!(!report.violates(Invariant::SubtourElimination));
    }

    #[test]
    fn test_rejects_unbalanced_return() {
        let instance = create_test_instance();
        let sol = Solution::from_plan(
            &instance,
            vec![1],
            vec![0.0, 1.0, 0.0, 0.0, 0.0],
            vec![vec![0.0; 5]; 5],
            "test",
        );
        let report = check_feasibility(&instance, &sol);
        assert!(report.violations.iter().any(|v| matches!(v, Violation::FinalLoadNonZero { .. })));
    }

    #[test]
    fn test_rejects_repeated_and_unvisited_fraction() {
        let instance = create_test_instance();
        let mut sol = full_tour(&instance);
        sol.sequence = vec![1, 3, 1, 2, 4];
        let report = check_feasibility(&instance, &sol);
        assert!(report.violations.iter().any(|v| matches!(v, Violation::RepeatedNode { node: 1 })));

        let mut sol = Solution::empty(&instance);
        sol.fraction[3] = 0.5;
        let report = check_feasibility(&instance, &sol);
        assert!(report.violates(Invariant::Fractions));
    }

    #[test]
    fn test_shipping_caps_and_partition() {
        let instance = create_test_instance();
        let mut flow = vec![vec![0.0; 5]; 5];
        flow[3][4] = 4.0;
        let sol = Solution::from_plan(&instance, vec![], vec![0.0; 5], flow, "test");
        assert!(is_feasible(&instance, &sol));
        assert!((sol.objective - 4.0 * instance.shipping_differential(3, 4)).abs() < 1e-9);

        let mut flow = vec![vec![0.0; 5]; 5];
        flow[3][4] = 5.0;
        flow[2][1] = 1.0;
        let sol = Solution::from_plan(&instance, vec![], vec![0.0; 5], flow, "test");
        let report = check_feasibility(&instance, &sol);
        assert!(report.violations.iter().any(|v| matches!(v, Violation::SurplusCapExceeded { node: 3, .. })));
        assert!(report.violations.iter().any(|v| matches!(v, Violation::DeficitCapExceeded { node: 4, .. })));
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, Violation::FlowOutsidePartition { from: 2, to: 1, .. })));
    }

    #[test]
    fn test_shipping_policies() {
        let mut flow = vec![vec![0.0; 5]; 5];
        flow[1][2] = 2.0;

        let disabled = create_test_instance().with_shipping(ShippingPolicy::Disabled);
        let sol = Solution::from_plan(&disabled, vec![], vec![0.0; 5], flow.clone(), "test");
        assert!(check_feasibility(&disabled, &sol)
            .violations
            .iter()
            .any(|v| matches!(v, Violation::ShippingDisabled { .. })));

        let gated = create_test_instance().with_shipping(ShippingPolicy::GatedByVisit);
        let sol = Solution::from_plan(&gated, vec![], vec![0.0; 5], flow, "test");
        assert!(check_feasibility(&gated, &sol)
            .violations
            .iter()
            .any(|v| matches!(v, Violation::ShippingWithoutVisit { from: 1, to: 2, .. })));
    }

    #[test]
    fn test_malformed_shapes_are_reported() {
        let instance = create_test_instance();
        let mut sol = full_tour(&instance);
        sol.load.truncate(2);
        sol.sequence.push(42);
        let report = check_feasibility(&instance, &sol);
        assert!(report.violations.iter().any(|v| matches!(v, Violation::ShapeMismatch { field: "load", .. })));
        assert!(report.violations.iter().any(|v| matches!(v, Violation::UnknownNode { node: 42 })));
        assert!(report.violates(Invariant::Structure));
    }

    #[test]
    fn test_objective_mismatch_detected() {
        let instance = create_test_instance();
        let mut sol = full_tour(&instance);
        sol.objective += 1.0;
        let report = check_feasibility(&instance, &sol);
        assert_eq!(report.violations.len(), 1);
        assert!(report.violates(Invariant::Objective));
    }
}
