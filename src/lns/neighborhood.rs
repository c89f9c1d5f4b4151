//! MIP-neighborhood generator.
//!
//! Each customer gets a deletion propensity `eta`: low values mark nodes
//! whose current role is worth little (a visited node earning less than its
//! detour, an unvisited node that would pay for its insertion). Propensities
//! are turned into damped priorities around their mean and the highest
//! priority nodes are freed.

use super::schedule::NeighborhoodShape;
use crate::error::{Result, SrltpError};
use crate::instance::SrltpInstance;
use crate::solution::Solution;
use crate::subproblem::SubProblem;
use ordered_float::OrderedFloat;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NeighborhoodConfig {
    /// Base deletion rate `q`
    pub deletion_rate: f64,
    /// Damping factor `k`
    pub damping: f64,
    /// Amplitude of the seeded priority noise (0 = none)
    pub jitter: f64,
    pub seed: u64,
}

impl Default for NeighborhoodConfig {
    fn default() -> Self {
        NeighborhoodConfig { deletion_rate: 0.3, damping: 0.5, jitter: 0.0, seed: 0 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NeighborhoodGenerator {
    config: NeighborhoodConfig,
}

impl NeighborhoodGenerator {
    pub fn new(config: NeighborhoodConfig) -> Self {
        NeighborhoodGenerator { config }
    }

    pub fn config(&self) -> &NeighborhoodConfig {
        &self.config
    }

    /// Deletion propensity per node (index 0, the depot, is unused)
    pub fn propensities(&self, instance: &SrltpInstance, solution: &Solution) -> Vec<f64> {
        let n = instance.dimension();
        let mut eta = vec![0.0; n];
        let seq = &solution.sequence;

        for (pos, &v) in seq.iter().enumerate() {
            if v == 0 || v >= n {
                continue;
            }
            let prev = if pos == 0 { 0 } else { seq[pos - 1] };
            let next = seq.get(pos + 1).copied().unwrap_or(0);
            let detour = instance.cost(prev, v) + instance.cost(v, next) - instance.cost(prev, next);
            let y = solution.fraction.get(v).copied().unwrap_or(0.0);
            eta[v] = instance.nodes[v].profit() * y - detour;
        }

        let mut gaps: Vec<(usize, usize)> = solution.arcs();
        if gaps.is_empty() {
            gaps.push((0, 0));
        }
        for v in instance.customers() {
            if solution.is_visited(v) {
                continue;
            }
            let insertion = gaps
                .iter()
                .map(|&(a, b)| instance.cost(a, v) + instance.cost(v, b) - instance.cost(a, b))
                .fold(f64::INFINITY, f64::min);
            eta[v] = -(instance.nodes[v].profit() - insertion);
        }
        eta
    }

    /// `q + k (mean - eta_i) / eta* min(q, 1 - q)` per customer, as `(node, priority)`
    pub fn priorities(&self, instance: &SrltpInstance, solution: &Solution) -> Vec<(usize, f64)> {
        let eta = self.propensities(instance, solution);
        let customers: Vec<usize> = instance.customers().collect();
        if customers.is_empty() {
            return Vec::new();
        }

        let q = self.config.deletion_rate;
        let k = self.config.damping;
        let mean = customers.iter().map(|&v| eta[v]).sum::<f64>() / customers.len() as f64;
        let max = customers.iter().map(|&v| eta[v]).fold(f64::NEG_INFINITY, f64::max);
        let min = customers.iter().map(|&v| eta[v]).fold(f64::INFINITY, f64::min);
        let spread = (mean - max).max(mean - min);

        customers
            .into_iter()
            .map(|v| {
                let base = if spread > 1e-12 {
                    q + k * (mean - eta[v]) / spread * q.min(1.0 - q)
                } else {
                    q
                };
                (v, base + self.noise(v))
            })
            .collect()
    }

    /// Seeded noise, a pure function of `(seed, node)`
    fn noise(&self, node: usize) -> f64 {
        if self.config.jitter == 0.0 {
            return 0.0;
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ node as u64);
        self.config.jitter * rng.gen_range(-1.0..1.0)
    }

    /// Customers by decreasing priority, ties by increasing id
    pub fn ranking(&self, instance: &SrltpInstance, solution: &Solution) -> Vec<(usize, f64)> {
        let mut ranked = self.priorities(instance, solution);
        ranked.sort_by_key(|&(v, p)| (Reverse(OrderedFloat(p)), v));
        ranked
    }

    /// Build the sub-problem freeing `shape.size` nodes around `current`
    pub fn generate(
        &self,
        instance: &SrltpInstance,
        current: &Solution,
        shape: &NeighborhoodShape,
        time_limit: Duration,
    ) -> Result<SubProblem> {
        let ranked = self.ranking(instance, current);
        if ranked.is_empty() {
            return Err(SrltpError::MalformedInstance("instance has no customers to free".to_string()));
        }

        let size = shape.size.clamp(1, ranked.len());
        let start = shape.offset % ranked.len();
        let free: Vec<usize> = ranked.iter().cycle().skip(start).take(size).map(|&(v, _)| v).collect();

        let mut priority = vec![0.0; instance.dimension()];
        for &(v, p) in &ranked {
            priority[v] = p;
        }
        let mut candidates: Vec<(usize, usize)> = current
            .arcs()
            .into_iter()
            .filter(|&(i, j)| !free.contains(&i) && !free.contains(&j))
            .collect();
        candidates.sort_by_key(|&(i, j)| (OrderedFloat((priority[i] + priority[j]) / 2.0), i, j));
        candidates.truncate(shape.protected);

        Ok(SubProblem::new(instance, current, free, candidates, time_limit))
    }
}
