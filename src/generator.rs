//! Seeded instance data.
//!
//! Every random quantity is a pure function of an explicit seed, so the same
//! seed always yields the same instance.

use crate::instance::{ExternalCost, Node, SrltpInstance};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

/// Draw node quantities: surplus nodes get `1..=max_units`, deficit nodes
/// `-(1..=max_units)`, every other index (depot included) 0.
///
/// Surplus nodes are drawn first, then deficit nodes, each in the given order.
pub fn generate_quantities(
    seed: u64,
    dimension: usize,
    surplus: &[usize],
    deficit: &[usize],
    max_units: u32,
) -> Vec<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let upper = max_units.max(1);
    let mut quantities = vec![0.0; dimension];
    for &i in surplus {
        quantities[i] = rng.gen_range(1..=upper) as f64;
    }
    for &i in deficit {
        quantities[i] = -(rng.gen_range(1..=upper) as f64);
    }
    quantities
}

const DEMO_DISTANCE_KM: [(usize, usize, f64); 28] = [
    (0, 1, 5.8), (0, 2, 20.0), (0, 3, 20.4), (0, 4, 18.7), (0, 5, 15.3), (0, 6, 6.3), (0, 7, 13.6),
    (1, 2, 19.5), (1, 3, 19.9), (1, 4, 20.9), (1, 5, 18.6), (1, 6, 14.4), (1, 7, 10.9),
    (2, 3, 5.1), (2, 4, 14.3), (2, 5, 26.3), (2, 6, 19.9), (2, 7, 28.5),
    (3, 4, 13.9), (3, 5, 25.9), (3, 6, 25.2), (3, 7, 28.1),
    (4, 5, 20.9), (4, 6, 24.2), (4, 7, 27.0),
    (5, 6, 8.1), (5, 7, 22.6),
    (6, 7, 18.0),
];

const DEMO_VEHICLE_COST: [(usize, usize, f64); 28] = [
    (0, 1, 9.31), (0, 2, 32.10), (0, 3, 32.74), (0, 4, 30.01), (0, 5, 24.56), (0, 6, 10.11), (0, 7, 21.83),
    (1, 2, 31.30), (1, 3, 31.94), (1, 4, 33.54), (1, 5, 29.85), (1, 6, 23.11), (1, 7, 17.49),
    (2, 3, 8.19), (2, 4, 22.95), (2, 5, 42.21), (2, 6, 31.94), (2, 7, 45.74),
    (3, 4, 22.31), (3, 5, 41.57), (3, 6, 40.45), (3, 7, 45.10),
    (4, 5, 33.54), (4, 6, 38.84), (4, 7, 43.34),
    (5, 6, 13.0), (5, 7, 36.27),
    (6, 7, 28.89),
];

const DEMO_UNIT_PROFIT: [f64; 8] = [0.0, 156.0, 102.0, 219.0, 100.0, 91.0, 200.0, 91.0];

fn symmetric(dimension: usize, entries: &[(usize, usize, f64)]) -> Vec<Vec<f64>> {
    let mut matrix = vec![vec![0.0; dimension]; dimension];
    for &(i, j, v) in entries {
        matrix[i][j] = v;
        matrix[j][i] = v;
    }
    matrix
}

/// The 8-node reference network (depot + 7 retailers) with quantities drawn
/// from `seed`.
pub fn demo_instance(seed: u64) -> SrltpInstance {
    let dimension = DEMO_UNIT_PROFIT.len();
    let surplus = [1, 5, 6];
    let deficit = [2, 3, 4, 7];
    let quantities = generate_quantities(seed, dimension, &surplus, &deficit, 12);

    let nodes = (0..dimension)
        .map(|i| Node::new(i, quantities[i], DEMO_UNIT_PROFIT[i]))
        .collect();
    let distance = symmetric(dimension, &DEMO_DISTANCE_KM);

    SrltpInstance::new(&format!("srltp-demo-{}", seed), nodes, distance, 44.0, 8400.0, 400.0)
        .with_cost(symmetric(dimension, &DEMO_VEHICLE_COST))
        .with_external(ExternalCost::PerUnitKm { rate: 0.5 })
}

/// Parameters of the random Euclidean instance generator
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Number of customers (depot excluded)
    pub customers: usize,
    /// Side of the square the nodes are drawn in (km)
    pub area: f64,
    /// Maximum absolute quantity per node
    pub max_units: u32,
    /// Unit profits are drawn in `[min_profit, max_profit]`
    pub min_profit: f64,
    pub max_profit: f64,
    /// Vehicle cost per km
    pub cost_per_km: f64,
    pub capacity: f64,
    pub time_budget: f64,
    pub fixed_cost: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            customers: 7,
            area: 30.0,
            max_units: 12,
            min_profit: 50.0,
            max_profit: 250.0,
            cost_per_km: 1.6,
            capacity: 40.0,
            time_budget: 500.0,
            fixed_cost: 100.0,
        }
    }
}

/// Random instance with Euclidean distances; customers alternate between
/// surplus and deficit in draw order.
pub fn random_instance(config: &GeneratorConfig, seed: u64) -> SrltpInstance {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let dimension = config.customers + 1;

    let coords: Vec<(f64, f64)> = (0..dimension)
        .map(|i| {
            if i == 0 {
                (config.area / 2.0, config.area / 2.0)
            } else {
                (rng.gen_range(0.0..config.area), rng.gen_range(0.0..config.area))
            }
        })
        .collect();

    let surplus: Vec<usize> = (1..dimension).filter(|i| i % 2 == 1).collect();
    let deficit: Vec<usize> = (1..dimension).filter(|i| i % 2 == 0).collect();
    let quantities = generate_quantities(rng.gen(), dimension, &surplus, &deficit, config.max_units);

    let nodes = (0..dimension)
        .map(|i| {
            let unit_profit = if i == 0 {
                0.0
            } else if config.max_profit > config.min_profit {
                rng.gen_range(config.min_profit..config.max_profit)
            } else {
                config.min_profit
            };
            Node::new(i, quantities[i], unit_profit)
        })
        .collect();

    let mut distance = vec![vec![0.0; dimension]; dimension];
    for i in 0..dimension {
        for j in 0..dimension {
            if i != j {
                let dx = coords[i].0 - coords[j].0;
                let dy = coords[i].1 - coords[j].1;
                distance[i][j] = (dx * dx + dy * dy).sqrt();
            }
        }
    }
    let cost = distance
        .iter()
        .map(|row| row.iter().map(|d| d * config.cost_per_km).collect())
        .collect();

    SrltpInstance::new(
        &format!("random-n{}-s{}", config.customers, seed),
        nodes,
        distance,
        config.capacity,
        config.time_budget,
        config.fixed_cost,
    )
    .with_cost(cost)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantities_are_pure_in_seed() {
        let a = generate_quantities(42, 8, &[1, 5, 6], &[2, 3, 4, 7], 12);
        let b = generate_quantities(42, 8, &[1, 5, 6], &[2, 3, 4, 7], 12);
        assert_eq!(a, b);
        assert_eq!(a[0], 0.0);
        for i in [1, 5, 6] {
            assert!(a[i] >= 1.0 && a[i] <= 12.0);
        }
        for i in [2, 3, 4, 7] {
            assert!(a[i] <= -1.0 && a[i] >= -12.0);
        }
    }

    #[test]
    fn test_demo_instance_is_valid() {
        let instance = demo_instance(42);
        assert!(instance.validate().is_ok());
        assert_eq!(instance.dimension(), 8);
        assert_eq!(instance.surplus_nodes(), vec![1, 5, 6]);
        assert_eq!(instance.deficit_nodes(), vec![2, 3, 4, 7]);
        assert_eq!(instance.cost(3, 2), 8.19);
        assert_eq!(instance.distance(7, 6), 18.0);
    }

    #[test]
    fn test_random_instance_reproducible() {
        let config = GeneratorConfig::default();
        let a = random_instance(&config, 7);
        let b = random_instance(&config, 7);
        assert!(a.validate().is_ok());
        assert_eq!(a.distance_matrix, b.distance_matrix);
        assert_eq!(
            a.nodes.iter().map(|n| n.quantity).collect::<Vec<_>>(),
            b.nodes.iter().map(|n| n.quantity).collect::<Vec<_>>()
        );
    }
}
