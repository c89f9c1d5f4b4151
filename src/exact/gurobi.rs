//! SRLTP sub-problem oracle backed by Gurobi.
//!
//! The formulation uses:
//! - Binary variables x[i][j] for arcs, z[i] for visits and w for dispatch
//! - Continuous variables y[i] for served fractions, Q[i] for load, s[i] for
//!   departure time and u[i] for the visit rank
//! - Continuous variables xi[i][j] for external shipping on profitable pairs
//!
//! Frozen nodes and fixed arcs of the sub-problem become variable fixings.

use super::{Oracle, OracleOutcome};
use crate::instance::{ShippingPolicy, SrltpInstance};
use crate::solution::Solution;
use crate::subproblem::SubProblem;
use grb::prelude::*;
use std::time::Instant;

/// Gurobi solver configuration
#[derive(Debug, Clone)]
pub struct GurobiConfig {
    /// MIP gap tolerance
    pub mip_gap: f64,
    /// Number of threads (0 = automatic)
    pub threads: i32,
    /// Enable verbose output
    pub verbose: bool,
}

impl Default for GurobiConfig {
    fn default() -> Self {
        GurobiConfig { mip_gap: 1e-6, threads: 0, verbose: false }
    }
}

pub struct GurobiOracle {
    pub config: GurobiConfig,
}

impl GurobiOracle {
    pub fn new(config: GurobiConfig) -> Self {
        GurobiOracle { config }
    }

    /// Fresh environment per call, with a WLS licence when the usual
    /// variables are set. Dropped (and released) when the call returns.
    fn environment(&self) -> Result<Env, String> {
        let mut env = Env::empty().map_err(|e| format!("Failed to create Gurobi environment: {}", e))?;
        env.set(param::OutputFlag, if self.config.verbose { 1 } else { 0 })
            .map_err(|e| format!("Failed to set output flag: {}", e))?;

        if let (Ok(access), Ok(secret), Ok(licence)) = (
            std::env::var("WLSACCESSID"),
            std::env::var("WLSSECRET"),
            std::env::var("LICENSEID"),
        ) {
            let licence: i32 = licence
                .trim()
                .parse()
                .map_err(|e| format!("LICENSEID is not an integer: {}", e))?;
            env.set(param::WLSAccessID, access)
                .map_err(|e| format!("Failed to set WLS access id: {}", e))?;
            env.set(param::WLSSecret, secret)
                .map_err(|e| format!("Failed to set WLS secret: {}", e))?;
            env.set(param::LicenseID, licence)
                .map_err(|e| format!("Failed to set licence id: {}", e))?;
        }

        env.start().map_err(|e| format!("Failed to start Gurobi environment: {}", e))
    }

    fn solve_model(&self, instance: &SrltpInstance, sp: &SubProblem, start: Instant) -> Result<OracleOutcome, String> {
        let n = instance.dimension();
        let capacity = sp.bounds.capacity;
        let time_budget = sp.bounds.time_budget;
        let quantity = |i: usize| sp.bounds.quantities[i];
        let max_q = sp.bounds.quantities.iter().map(|q| q.abs()).fold(0.0, f64::max);
        let m_load = capacity + max_q;
        let m_time = time_budget + instance.max_travel_time();

        let env = self.environment()?;
        let mut model = Model::with_env("SRLTP", env).map_err(|e| format!("Failed to create model: {}", e))?;

        model
            .set_param(param::TimeLimit, sp.time_limit.as_secs_f64())
            .map_err(|e| format!("Failed to set time limit: {}", e))?;
        model
            .set_param(param::MIPGap, self.config.mip_gap)
            .map_err(|e| format!("Failed to set MIP gap: {}", e))?;
        model
            .set_param(param::Threads, self.config.threads)
            .map_err(|e| format!("Failed to set threads: {}", e))?;

        // x[i][j] = 1 if arc (i,j) is traversed
        let mut x: Vec<Vec<Var>> = Vec::with_capacity(n);
        for i in 0..n {
            let mut row = Vec::with_capacity(n);
            for j in 0..n {
                let var = add_binvar!(model, name: &format!("x_{}_{}", i, j), obj: -instance.cost(i, j))
                    .map_err(|e| format!("Failed to add variable x[{}][{}]: {}", i, j, e))?;
                row.push(var);
            }
            x.push(row);
        }

        let w = add_binvar!(model, name: "dispatch", obj: -instance.fixed_cost)
            .map_err(|e| format!("Failed to add dispatch variable: {}", e))?;

        let mut z = Vec::with_capacity(n);
        let mut y = Vec::with_capacity(n);
        let mut load = Vec::with_capacity(n);
        let mut s = Vec::with_capacity(n);
        let mut u = Vec::with_capacity(n);
        for i in 0..n {
            z.push(
                add_binvar!(model, name: &format!("z_{}", i))
                    .map_err(|e| format!("Failed to add variable z[{}]: {}", i, e))?,
            );
            y.push(
                add_ctsvar!(model, name: &format!("y_{}", i), bounds: 0.0..1.0, obj: instance.nodes[i].profit())
                    .map_err(|e| format!("Failed to add variable y[{}]: {}", i, e))?,
            );
            load.push(
                add_ctsvar!(model, name: &format!("Q_{}", i), bounds: 0.0..capacity)
                    .map_err(|e| format!("Failed to add variable Q[{}]: {}", i, e))?,
            );
            s.push(
                add_ctsvar!(model, name: &format!("s_{}", i), bounds: 0.0..time_budget)
                    .map_err(|e| format!("Failed to add variable s[{}]: {}", i, e))?,
            );
            u.push(
                add_ctsvar!(model, name: &format!("u_{}", i), bounds: 0.0..n as f64)
                    .map_err(|e| format!("Failed to add variable u[{}]: {}", i, e))?,
            );
        }

        let pairs: Vec<(usize, usize, f64)> = instance.profitable_shipping_pairs();
        let mut xi = Vec::with_capacity(pairs.len());
        for &(i, j, d) in &pairs {
            xi.push(
                add_ctsvar!(model, name: &format!("xi_{}_{}", i, j), bounds: 0.0.., obj: d)
                    .map_err(|e| format!("Failed to add variable xi[{}][{}]: {}", i, j, e))?,
            );
        }

        model
            .set_attr(attr::ModelSense, ModelSense::Maximize)
            .map_err(|e| format!("Failed to set objective sense: {}", e))?;
        model.update().map_err(|e| format!("Failed to update model: {}", e))?;

        let mut constr = |name: String, c: grb::constr::IneqExpr| -> Result<(), String> {
            model
                .add_constr(&name, c)
                .map(|_| ())
                .map_err(|e| format!("Failed to add constraint {}: {}", name, e))
        };

        // Degree constraints tie arcs to visits
        for j in 1..n {
            let into: Expr = (0..n).filter(|&i| i != j).map(|i| x[i][j]).grb_sum();
            constr(format!("in_{}", j), c!(into == z[j]))?;
            let out: Expr = (0..n).filter(|&k| k != j).map(|k| x[j][k]).grb_sum();
            constr(format!("out_{}", j), c!(out == z[j]))?;
            constr(format!("dispatch_{}", j), c!(z[j] <= w))?;
            constr(format!("serve_{}", j), c!(y[j] <= z[j]))?;
        }
        let depot_out: Expr = (1..n).map(|j| x[0][j]).grb_sum();
        constr("depot_out".to_string(), c!(depot_out == w))?;
        let depot_in: Expr = (1..n).map(|i| x[i][0]).grb_sum();
        constr("depot_in".to_string(), c!(depot_in == w))?;
        for i in 0..n {
            constr(format!("no_loop_{}", i), c!(x[i][i] == 0.0))?;
        }
        constr("depot_idle".to_string(), c!(y[0] == 0.0))?;
        constr("depot_load".to_string(), c!(load[0] == 0.0))?;
        constr("depot_time".to_string(), c!(s[0] == 0.0))?;
        constr("depot_rank".to_string(), c!(u[0] == 0.0))?;

        // Load, time and rank propagation along used arcs
        for i in 0..n {
            for j in 1..n {
                if i == j {
                    continue;
                }
                let q = quantity(j);
                constr(
                    format!("load_lb_{}_{}", i, j),
                    c!(load[j] >= load[i] + q * y[j] - m_load * (1.0 - x[i][j])),
                )?;
                constr(
                    format!("load_ub_{}_{}", i, j),
                    c!(load[j] <= load[i] + q * y[j] + m_load * (1.0 - x[i][j])),
                )?;
                constr(
                    format!("time_{}_{}", i, j),
                    c!(s[j] >= s[i] + instance.travel_time(i, j) - m_time * (1.0 - x[i][j])),
                )?;
                constr(
                    format!("rank_{}_{}", i, j),
                    c!(u[j] >= u[i] + 1.0 - (n as f64) * (1.0 - x[i][j])),
                )?;
            }
        }
        for i in 1..n {
            constr(format!("return_load_{}", i), c!(load[i] <= m_load * (1.0 - x[i][0])))?;
            constr(
                format!("return_time_{}", i),
                c!(s[i] + instance.travel_time(i, 0) <= time_budget + m_time * (1.0 - x[i][0])),
            )?;
        }

        // External shipping caps
        for node in instance.customers() {
            let q = quantity(node).abs();
            let flows: Vec<Var> = pairs
                .iter()
                .zip(&xi)
                .filter(|((i, j, _), _)| *i == node || *j == node)
                .map(|(_, &var)| var)
                .collect();
            if flows.is_empty() {
                continue;
            }
            let total: Expr = flows.iter().copied().grb_sum();
            constr(format!("ship_cap_{}", node), c!(total.clone() <= q - q * y[node]))?;
            if instance.shipping == ShippingPolicy::GatedByVisit {
                constr(format!("ship_gate_{}", node), c!(total <= q * z[node]))?;
            }
        }

        // Sub-problem restrictions
        for &(v, fraction) in &sp.frozen_fractions {
            constr(format!("frozen_visit_{}", v), c!(z[v] == 1.0))?;
            constr(format!("frozen_fraction_{}", v), c!(y[v] == fraction))?;
        }
        for &v in &sp.frozen {
            if sp.frozen_fraction(v).is_none() {
                constr(format!("frozen_skip_{}", v), c!(z[v] == 0.0))?;
            }
        }
        for pair in sp.frozen_sequence.windows(2) {
            constr(format!("frozen_order_{}_{}", pair[0], pair[1]), c!(u[pair[1]] >= u[pair[0]] + 1.0))?;
        }
        for &(i, j) in &sp.fixed_arcs {
            constr(format!("fixed_{}_{}", i, j), c!(x[i][j] == 1.0))?;
        }

        // Warm start
        let warm = &sp.warm_start;
        let arcs = warm.arcs();
        for i in 0..n {
            for j in 0..n {
                let used = if arcs.contains(&(i, j)) { 1.0 } else { 0.0 };
                model
                    .set_obj_attr(attr::Start, &x[i][j], used)
                    .map_err(|e| format!("Failed to set warm start arc: {}", e))?;
            }
            let visited = if i > 0 && warm.is_visited(i) { 1.0 } else { 0.0 };
            model
                .set_obj_attr(attr::Start, &z[i], visited)
                .map_err(|e| format!("Failed to set warm start visit: {}", e))?;
            let fraction = warm.fraction.get(i).copied().unwrap_or(0.0);
            model
                .set_obj_attr(attr::Start, &y[i], fraction)
                .map_err(|e| format!("Failed to set warm start fraction: {}", e))?;
        }
        model
            .set_obj_attr(attr::Start, &w, if warm.is_empty() { 0.0 } else { 1.0 })
            .map_err(|e| format!("Failed to set warm start dispatch: {}", e))?;

        model.update().map_err(|e| format!("Failed to update model before optimization: {}", e))?;
        model.optimize().map_err(|e| format!("Optimization failed: {}", e))?;

        let status = model.status().map_err(|e| format!("Failed to get status: {}", e))?;
        let solutions = model.get_attr(attr::SolCount).unwrap_or(0);

        if status == Status::Infeasible {
            return Ok(OracleOutcome::infeasible(start.elapsed()));
        }
        if status != Status::Optimal && status != Status::TimeLimit {
            return Err(format!("Gurobi finished with status {:?}", status));
        }
        if solutions == 0 {
            return Ok(OracleOutcome::time_limit(None, start.elapsed()));
        }

        let value = |var: &Var| model.get_obj_attr(attr::X, var).unwrap_or(0.0);

        // Follow arcs from the depot to rebuild the sequence
        let mut sequence = Vec::new();
        let mut current = 0;
        loop {
            let next = (0..n).find(|&j| j != current && value(&x[current][j]) > 0.5);
            match next {
                Some(0) | None => break,
                Some(j) if sequence.contains(&j) => break,
                Some(j) => {
                    sequence.push(j);
                    current = j;
                }
            }
        }

        let mut fraction = vec![0.0; n];
        for &v in &sequence {
            fraction[v] = match sp.frozen_fraction(v) {
                Some(frozen) => frozen,
                None => value(&y[v]).clamp(0.0, 1.0),
            };
        }
        let mut flow = vec![vec![0.0; n]; n];
        for (&(i, j, _), var) in pairs.iter().zip(&xi) {
            flow[i][j] = value(var).max(0.0);
        }

        let mut solution = Solution::from_plan(instance, sequence, fraction, flow, "Gurobi");
        solution.computation_time = start.elapsed().as_secs_f64();
        let reported = model.get_attr(attr::ObjVal).unwrap_or(solution.objective);
        log::debug!("gurobi: status {:?}, objective {:.4} (recomputed {:.4})", status, reported, solution.objective);

        let mut outcome = if status == Status::Optimal {
            OracleOutcome::optimal(solution, start.elapsed())
        } else {
            OracleOutcome::time_limit(Some(solution), start.elapsed())
        };
        outcome.objective = Some(reported);
        Ok(outcome)
    }
}

impl Oracle for GurobiOracle {
    fn name(&self) -> &str {
        "Gurobi"
    }

    fn solve(&self, instance: &SrltpInstance, subproblem: &SubProblem) -> OracleOutcome {
        let start = Instant::now();
        match self.solve_model(instance, subproblem, start) {
            Ok(outcome) => outcome,
            Err(message) => OracleOutcome::error(message, start.elapsed()),
        }
    }
}
