//! Module for representing SRLTP instances.
//!
//! An instance is a depot (node 0), a set of surplus and deficit nodes with a
//! per-unit profit coefficient, directional distance/cost/time matrices and the
//! vehicle and tour limits. Instances are read from JSON documents.

use crate::error::{Result, SrltpError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Represents a node of the SRLTP instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Node identifier (0 = depot)
    pub id: usize,
    /// Net quantity: positive = surplus (pickup), negative = deficit (delivery)
    pub quantity: f64,
    /// Profit or loss per unit at this location
    pub unit_profit: f64,
}

impl Node {
    pub fn new(id: usize, quantity: f64, unit_profit: f64) -> Self {
        Node { id, quantity, unit_profit }
    }

    /// Profit collected when the whole quantity is served by the vehicle
    #[inline]
    pub fn profit(&self) -> f64 {
        self.unit_profit * self.quantity
    }

    pub fn is_surplus(&self) -> bool {
        self.id != 0 && self.quantity > 0.0
    }

    pub fn is_deficit(&self) -> bool {
        self.id != 0 && self.quantity < 0.0
    }

    pub fn is_depot(&self) -> bool {
        self.id == 0
    }
}

/// Basis of the carrier charge in the external-shipping differential
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "basis", rename_all = "snake_case")]
pub enum ExternalCost {
    /// `d[i,j] = p̄[j] - p̄[i] - c[i,j]`
    #[default]
    ArcCost,
    /// `d[i,j] = p̄[j] - p̄[i] - rate * distance[i,j]`
    PerUnitKm { rate: f64 },
}

/// Which external shipping flows are allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingPolicy {
    /// No external carrier at all
    Disabled,
    /// Flows only limited by the unserved quantities
    #[default]
    Uncapped,
    /// Flows additionally require both endpoints to be visited by the vehicle
    GatedByVisit,
}

/// Represents a complete SRLTP instance
#[derive(Debug, Clone)]
pub struct SrltpInstance {
    /// Name of the instance
    pub name: String,
    /// All nodes, depot first; `nodes[i].id == i`
    pub nodes: Vec<Node>,
    /// Distances in kilometers
    pub distance_matrix: Vec<Vec<f64>>,
    /// Vehicle travel cost per arc
    pub cost_matrix: Vec<Vec<f64>>,
    /// Travel plus handling time per arc
    pub time_matrix: Vec<Vec<f64>>,
    /// Vehicle capacity `Q_max`
    pub capacity: f64,
    /// Tour duration limit `T_max`
    pub time_budget: f64,
    /// Fixed cost paid once when the vehicle is dispatched
    pub fixed_cost: f64,
    /// Carrier charge basis for external shipping
    pub external: ExternalCost,
    /// External shipping policy
    pub shipping: ShippingPolicy,
}

/// On-disk JSON layout of an instance
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstanceFile {
    #[serde(default)]
    name: String,
    capacity: f64,
    time_budget: f64,
    fixed_cost: f64,
    nodes: Vec<Node>,
    distance: Vec<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cost: Option<Vec<Vec<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<Vec<Vec<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cost_per_km: Option<f64>,
    #[serde(default)]
    external: ExternalCost,
    #[serde(default)]
    shipping: ShippingPolicy,
}

impl SrltpInstance {
    /// Create an instance whose cost and time matrices equal the distance matrix
    pub fn new(
        name: &str,
        nodes: Vec<Node>,
        distance_matrix: Vec<Vec<f64>>,
        capacity: f64,
        time_budget: f64,
        fixed_cost: f64,
    ) -> Self {
        SrltpInstance {
            name: name.to_string(),
            nodes,
            cost_matrix: distance_matrix.clone(),
            time_matrix: distance_matrix.clone(),
            distance_matrix,
            capacity,
            time_budget,
            fixed_cost,
            external: ExternalCost::default(),
            shipping: ShippingPolicy::default(),
        }
    }

    pub fn with_cost(mut self, cost_matrix: Vec<Vec<f64>>) -> Self {
        self.cost_matrix = cost_matrix;
        self
    }

    pub fn with_time(mut self, time_matrix: Vec<Vec<f64>>) -> Self {
        self.time_matrix = time_matrix;
        self
    }

    pub fn with_external(mut self, external: ExternalCost) -> Self {
        self.external = external;
        self
    }

    pub fn with_shipping(mut self, shipping: ShippingPolicy) -> Self {
        self.shipping = shipping;
        self
    }

    /// Parse an instance from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(&path)?;
        Self::from_json_str(&text)
    }

    /// Parse an instance from a JSON document and validate it
    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: InstanceFile = serde_json::from_str(text)?;
        let per_km = file.cost_per_km.unwrap_or(1.0);
        let cost_matrix = file.cost.unwrap_or_else(|| {
            file.distance
                .iter()
                .map(|row| row.iter().map(|d| d * per_km).collect())
                .collect()
        });
        let time_matrix = file.time.unwrap_or_else(|| file.distance.clone());

        let instance = SrltpInstance {
            name: file.name,
            nodes: file.nodes,
            distance_matrix: file.distance,
            cost_matrix,
            time_matrix,
            capacity: file.capacity,
            time_budget: file.time_budget,
            fixed_cost: file.fixed_cost,
            external: file.external,
            shipping: file.shipping,
        };
        instance.validate()?;
        Ok(instance)
    }

    /// Write the instance as JSON
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = InstanceFile {
            name: self.name.clone(),
            capacity: self.capacity,
            time_budget: self.time_budget,
            fixed_cost: self.fixed_cost,
            nodes: self.nodes.clone(),
            distance: self.distance_matrix.clone(),
            cost: Some(self.cost_matrix.clone()),
            time: Some(self.time_matrix.clone()),
            cost_per_km: None,
            external: self.external,
            shipping: self.shipping,
        };
        fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// Check the structural assumptions every component relies on
    pub fn validate(&self) -> Result<()> {
        let malformed = |msg: String| Err(SrltpError::MalformedInstance(msg));

        if self.nodes.is_empty() {
            return malformed("instance has no nodes (missing depot)".to_string());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if node.id != i {
                return malformed(format!("node at index {} has id {}", i, node.id));
            }
            if !node.quantity.is_finite() || !node.unit_profit.is_finite() {
                return malformed(format!("node {} has non-finite data", i));
            }
        }
        if self.nodes[0].quantity != 0.0 {
            return malformed(format!("depot quantity must be 0, got {}", self.nodes[0].quantity));
        }
        if !(self.capacity >= 0.0 && self.capacity.is_finite()) {
            return malformed(format!("capacity must be finite and non-negative, got {}", self.capacity));
        }
        if !(self.time_budget >= 0.0 && self.time_budget.is_finite()) {
            return malformed(format!("time budget must be finite and non-negative, got {}", self.time_budget));
        }
        if !(self.fixed_cost >= 0.0 && self.fixed_cost.is_finite()) {
            return malformed(format!("fixed cost must be finite and non-negative, got {}", self.fixed_cost));
        }
        if let ExternalCost::PerUnitKm { rate } = self.external {
            if !(rate >= 0.0 && rate.is_finite()) {
                return malformed(format!("external rate must be finite and non-negative, got {}", rate));
            }
        }

        let n = self.nodes.len();
        for (label, matrix) in [
            ("distance", &self.distance_matrix),
            ("cost", &self.cost_matrix),
            ("time", &self.time_matrix),
        ] {
            if matrix.len() != n || matrix.iter().any(|row| row.len() != n) {
                return malformed(format!("{} matrix must be {}x{}", label, n, n));
            }
            if matrix.iter().flatten().any(|v| !(v.is_finite() && *v >= 0.0)) {
                return malformed(format!("{} matrix has negative or non-finite entries", label));
            }
        }

        Ok(())
    }

    #[inline]
    pub fn distance(&self, i: usize, j: usize) -> f64 {
        self.distance_matrix[i][j]
    }

    #[inline]
    pub fn cost(&self, i: usize, j: usize) -> f64 {
        self.cost_matrix[i][j]
    }

    #[inline]
    pub fn travel_time(&self, i: usize, j: usize) -> f64 {
        self.time_matrix[i][j]
    }

    /// Number of nodes including the depot
    pub fn dimension(&self) -> usize {
        self.nodes.len()
    }

    /// Number of customer nodes (excluding depot)
    pub fn num_customers(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    /// Ids of all customer nodes
    pub fn customers(&self) -> impl Iterator<Item = usize> + '_ {
        1..self.nodes.len()
    }

    pub fn surplus_nodes(&self) -> Vec<usize> {
        self.nodes.iter().filter(|n| n.is_surplus()).map(|n| n.id).collect()
    }

    pub fn deficit_nodes(&self) -> Vec<usize> {
        self.nodes.iter().filter(|n| n.is_deficit()).map(|n| n.id).collect()
    }

    /// Value of moving one unit from `i` to `j` with the external carrier
    pub fn shipping_differential(&self, i: usize, j: usize) -> f64 {
        let carrier = match self.external {
            ExternalCost::ArcCost => self.cost(i, j),
            ExternalCost::PerUnitKm { rate } => rate * self.distance(i, j),
        };
        self.nodes[j].unit_profit - self.nodes[i].unit_profit - carrier
    }

    /// Surplus/deficit pairs whose external shipping is worth anything,
    /// as `(surplus, deficit, differential)`
    pub fn profitable_shipping_pairs(&self) -> Vec<(usize, usize, f64)> {
        if self.shipping == ShippingPolicy::Disabled {
            return Vec::new();
        }
        let deficits = self.deficit_nodes();
        let mut pairs = Vec::new();
        for i in self.surplus_nodes() {
            for &j in &deficits {
                let d = self.shipping_differential(i, j);
                if d > 0.0 {
                    pairs.push((i, j, d));
                }
            }
        }
        pairs
    }

    pub fn max_abs_quantity(&self) -> f64 {
        self.nodes.iter().map(|n| n.quantity.abs()).fold(0.0, f64::max)
    }

    pub fn max_travel_time(&self) -> f64 {
        self.time_matrix.iter().flatten().cloned().fold(0.0, f64::max)
    }

    /// Get statistics about the instance
    pub fn statistics(&self) -> InstanceStatistics {
        let surplus = self.surplus_nodes();
        let deficit = self.deficit_nodes();
        let total_surplus: f64 = surplus.iter().map(|&i| self.nodes[i].quantity).sum();
        let total_deficit: f64 = deficit.iter().map(|&i| -self.nodes[i].quantity).sum();
        let total_profit: f64 = self.nodes.iter().map(|n| n.profit()).sum();

        let n = self.dimension();
        let mut costs = Vec::new();
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    costs.push(self.cost(i, j));
                }
            }
        }
        let avg_cost = if costs.is_empty() {
            0.0
        } else {
            costs.iter().sum::<f64>() / costs.len() as f64
        };
        let max_cost = costs.iter().cloned().fold(0.0, f64::max);

        InstanceStatistics {
            name: self.name.clone(),
            dimension: n,
            capacity: self.capacity,
            time_budget: self.time_budget,
            fixed_cost: self.fixed_cost,
            num_surplus: surplus.len(),
            num_deficit: deficit.len(),
            total_surplus,
            total_deficit,
            total_profit,
            profitable_shipping_pairs: self.profitable_shipping_pairs().len(),
            avg_cost,
            max_cost,
        }
    }
}

/// Statistics about an SRLTP instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStatistics {
    pub name: String,
    pub dimension: usize,
    pub capacity: f64,
    pub time_budget: f64,
    pub fixed_cost: f64,
    pub num_surplus: usize,
    pub num_deficit: usize,
    pub total_surplus: f64,
    pub total_deficit: f64,
    pub total_profit: f64,
    pub profitable_shipping_pairs: usize,
    pub avg_cost: f64,
    pub max_cost: f64,
}

impl std::fmt::Display for InstanceStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Instance: {}", self.name)?;
        writeln!(f, "  Nodes: {} (1 depot + {} customers)", self.dimension, self.dimension.saturating_sub(1))?;
        writeln!(f, "  Capacity: {}", self.capacity)?;
        writeln!(f, "  Time budget: {}", self.time_budget)?;
        writeln!(f, "  Fixed dispatch cost: {}", self.fixed_cost)?;
        writeln!(f, "  Surplus nodes: {} (total {:.1} units)", self.num_surplus, self.total_surplus)?;
        writeln!(f, "  Deficit nodes: {} (total {:.1} units)", self.num_deficit, self.total_deficit)?;
        writeln!(f, "  Total node profit: {:.2}", self.total_profit)?;
        writeln!(f, "  Profitable shipping pairs: {}", self.profitable_shipping_pairs)?;
        writeln!(f, "  Avg arc cost: {:.2}", self.avg_cost)?;
        writeln!(f, "  Max arc cost: {:.2}", self.max_cost)
    }
}
