//! Restricted instance handed to an oracle.
//!
//! A sub-problem splits the customers into *free* nodes, which the oracle may
//! route and serve as it likes, and *frozen* nodes, which keep their role in
//! the current solution: visited frozen nodes stay visited with the same
//! fraction and in the same relative order, unvisited ones stay out of the
//! tour. A set of arcs of the current tour may additionally be fixed.

use crate::instance::SrltpInstance;
use crate::solution::{Solution, TOLERANCE};
use std::time::Duration;

/// Numeric bounds inherited unchanged from the full instance
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub capacity: f64,
    pub time_budget: f64,
    pub quantities: Vec<f64>,
}

impl Bounds {
    pub fn from_instance(instance: &SrltpInstance) -> Self {
        Bounds {
            capacity: instance.capacity,
            time_budget: instance.time_budget,
            quantities: instance.nodes.iter().map(|n| n.quantity).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubProblem {
    /// Customers the oracle may re-optimize (sorted)
    pub free: Vec<usize>,
    /// Customers fixed to their current role (sorted)
    pub frozen: Vec<usize>,
    /// Current tour restricted to frozen nodes, in visiting order
    pub frozen_sequence: Vec<usize>,
    /// Fraction of every frozen visited node
    pub frozen_fractions: Vec<(usize, f64)>,
    /// Arcs of the current tour that must be kept (depot is node 0)
    pub fixed_arcs: Vec<(usize, usize)>,
    pub bounds: Bounds,
    pub time_limit: Duration,
    /// The current solution; always admitted
    pub warm_start: Solution,
}

impl SubProblem {
    /// Freeze everything but `free` around `current`.
    ///
    /// Arcs in `fixed_arcs` that are not arcs of `current`, or that touch a
    /// free node, are dropped so the current solution stays admissible.
    pub fn new(
        instance: &SrltpInstance,
        current: &Solution,
        free: Vec<usize>,
        fixed_arcs: Vec<(usize, usize)>,
        time_limit: Duration,
    ) -> Self {
        let mut free: Vec<usize> = free.into_iter().filter(|&v| v != 0 && v < instance.dimension()).collect();
        free.sort_unstable();
        free.dedup();

        let frozen: Vec<usize> = instance.customers().filter(|v| free.binary_search(v).is_err()).collect();
        let frozen_sequence: Vec<usize> = current
            .sequence
            .iter()
            .copied()
            .filter(|v| frozen.binary_search(v).is_ok())
            .collect();
        let frozen_fractions = frozen_sequence
            .iter()
            .map(|&v| (v, current.fraction.get(v).copied().unwrap_or(0.0)))
            .collect();

        let tour_arcs = current.arcs();
        let is_frozen_end = |v: usize| v == 0 || frozen.binary_search(&v).is_ok();
        let fixed_arcs = fixed_arcs
            .into_iter()
            .filter(|&(i, j)| is_frozen_end(i) && is_frozen_end(j) && tour_arcs.contains(&(i, j)))
            .collect();

        SubProblem {
            free,
            frozen,
            frozen_sequence,
            frozen_fractions,
            fixed_arcs,
            bounds: Bounds::from_instance(instance),
            time_limit,
            warm_start: current.clone(),
        }
    }

    /// The whole instance, nothing frozen
    pub fn full(instance: &SrltpInstance, warm_start: &Solution, time_limit: Duration) -> Self {
        Self::new(instance, warm_start, instance.customers().collect(), Vec::new(), time_limit)
    }

    pub fn is_free(&self, node: usize) -> bool {
        self.free.binary_search(&node).is_ok()
    }

    pub fn is_frozen(&self, node: usize) -> bool {
        self.frozen.binary_search(&node).is_ok()
    }

    /// No frozen node and no fixed arc: equivalent to the full instance
    pub fn is_exhaustive(&self) -> bool {
        self.frozen.is_empty() && self.fixed_arcs.is_empty()
    }

    pub fn frozen_fraction(&self, node: usize) -> Option<f64> {
        self.frozen_fractions.iter().find(|(v, _)| *v == node).map(|&(_, y)| y)
    }

    pub fn admits(&self, solution: &Solution) -> bool {
        self.admission_error(solution).is_none()
    }

    /// First restriction `solution` breaks, if any
    pub fn admission_error(&self, solution: &Solution) -> Option<String> {
        let mut last_position = None;
        for &(node, y) in &self.frozen_fractions {
            let position = match solution.position(node) {
                Some(p) => p,
                None => return Some(format!("frozen node {} is no longer visited", node)),
            };
            if let Some(prev) = last_position {
                if position < prev {
                    return Some(format!("frozen node {} moved before its predecessor", node));
                }
            }
            last_position = Some(position);

            let actual = solution.fraction.get(node).copied().unwrap_or(f64::NAN);
            if !((actual - y).abs() <= TOLERANCE) {
                return Some(format!("frozen node {} changed fraction from {} to {}", node, y, actual));
            }
        }

        for &node in &self.frozen {
            if self.frozen_fraction(node).is_none() && solution.is_visited(node) {
                return Some(format!("frozen unvisited node {} entered the tour", node));
            }
        }

        let arcs = solution.arcs();
        for arc in &self.fixed_arcs {
            if !arcs.contains(arc) {
                return Some(format!("fixed arc {}->{} not traversed", arc.0, arc.1));
            }
        }
        None
    }
}
