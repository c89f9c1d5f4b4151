//! Multi-start diversification.
//!
//! Independent LNS runs with different neighborhood seeds. Each run owns its
//! driver and search state; the instance and the oracle are shared read-only.

use crate::error::Result;
use crate::exact::Oracle;
use crate::instance::SrltpInstance;
use crate::lns::{CancellationToken, LnsConfig, LnsDriver, RunReport, RunStatus};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::fmt;
use std::fs::File;
use std::path::Path;

/// Multi-start configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiStartConfig {
    /// Number of independent runs
    pub runs: usize,
    /// Run `r` uses neighborhood seed `base_seed + r`
    pub base_seed: u64,
    /// Priority jitter of every run but the first
    pub jitter: f64,
    /// Run in parallel
    pub parallel: bool,
    /// Show a progress bar
    pub progress: bool,
}

impl Default for MultiStartConfig {
    fn default() -> Self {
        MultiStartConfig { runs: 4, base_seed: 0, jitter: 0.05, parallel: true, progress: false }
    }
}

/// Summary of a single run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run: usize,
    pub seed: u64,
    pub status: RunStatus,
    pub objective: f64,
    pub feasible: bool,
    pub iterations: usize,
    pub oracle_failures: usize,
    pub rejected_candidates: usize,
    pub time: f64,
}

/// Aggregated objective statistics over the runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectiveStatistics {
    pub runs: usize,
    pub feasible_runs: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl ObjectiveStatistics {
    fn from_summaries(summaries: &[RunSummary]) -> Self {
        let objectives: Vec<f64> = summaries.iter().map(|s| s.objective).collect();
        let mean = if objectives.is_empty() { 0.0 } else { Statistics::mean(objectives.iter()) };
        let std_dev = if objectives.len() > 1 { Statistics::std_dev(objectives.iter()) } else { 0.0 };
        ObjectiveStatistics {
            runs: summaries.len(),
            feasible_runs: summaries.iter().filter(|s| s.feasible).count(),
            mean,
            std_dev,
            min: objectives.iter().cloned().fold(f64::INFINITY, f64::min),
            max: objectives.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Result of a multi-start experiment
#[derive(Debug, Clone, Serialize)]
pub struct MultiStartReport {
    pub runs: Vec<RunSummary>,
    /// Index of the best run
    pub best_run: usize,
    pub best: RunReport,
    pub statistics: ObjectiveStatistics,
}

impl MultiStartReport {
    /// Export per-run summaries to CSV
    pub fn export_runs_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(file);
        for summary in &self.runs {
            writer.serialize(summary)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl fmt::Display for MultiStartReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "-".repeat(78))?;
        writeln!(
            f,
            "{:>4} {:>8} {:>20} {:>14} {:>10} {:>10}",
            "Run", "Seed", "Status", "Objective", "Iters", "Time"
        )?;
        writeln!(f, "{}", "-".repeat(78))?;
        for s in &self.runs {
            writeln!(
                f,
                "{:>4} {:>8} {:>20} {:>14.2} {:>10} {:>10.3}",
                s.run,
                s.seed,
                s.status.to_string(),
                s.objective,
                s.iterations,
                s.time
            )?;
        }
        writeln!(f, "{}", "-".repeat(78))?;
        let st = &self.statistics;
        writeln!(
            f,
            "Objective: mean {:.2}, std {:.2}, min {:.2}, max {:.2} ({}/{} feasible)",
            st.mean, st.std_dev, st.min, st.max, st.feasible_runs, st.runs
        )?;
        writeln!(f, "Best run: {}", self.best_run)
    }
}

/// Neighborhood configuration of run `run`
fn run_config(lns: &LnsConfig, config: &MultiStartConfig, run: usize) -> LnsConfig {
    let mut cfg = lns.clone();
    cfg.neighborhood.seed = config.base_seed.wrapping_add(run as u64);
    if run > 0 {
        cfg.neighborhood.jitter = config.jitter;
    }
    cfg
}

/// Execute `config.runs` independent LNS runs and keep the best one.
///
/// Ties on the objective go to the lower run index.
pub fn run_multistart<O: Oracle + ?Sized>(
    instance: &SrltpInstance,
    oracle: &O,
    lns: &LnsConfig,
    config: &MultiStartConfig,
    cancel: &CancellationToken,
) -> Result<MultiStartReport> {
    instance.validate()?;
    let runs = config.runs.max(1);
    log::info!("Multi-start on {}: {} runs (parallel = {})", instance.name, runs, config.parallel);

    let progress = if config.progress {
        let pb = ProgressBar::new(runs as u64);
        if let Ok(style) = ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} runs {msg}") {
            pb.set_style(style);
        }
        Some(pb)
    } else {
        None
    };

    let execute = |run: usize| -> Result<RunReport> {
        let driver = LnsDriver::new(instance, oracle, run_config(lns, config, run))?;
        let report = driver.run(cancel);
        if let Some(pb) = &progress {
            pb.inc(1);
        }
        Ok(report)
    };

    let reports: Vec<RunReport> = if config.parallel {
        (0..runs).into_par_iter().map(execute).collect::<Result<Vec<_>>>()?
    } else {
        (0..runs).map(execute).collect::<Result<Vec<_>>>()?
    };

    if let Some(pb) = &progress {
        pb.finish_with_message("done");
    }

    let summaries: Vec<RunSummary> = reports
        .iter()
        .enumerate()
        .map(|(run, report)| RunSummary {
            run,
            seed: config.base_seed.wrapping_add(run as u64),
            status: report.status,
            objective: report.best.objective,
            feasible: report.certificate.is_feasible(),
            iterations: report.iterations,
            oracle_failures: report.oracle_failures,
            rejected_candidates: report.rejected_candidates,
            time: report.elapsed_seconds,
        })
        .collect();

    let mut best_run = 0;
    for (run, report) in reports.iter().enumerate() {
        if report.best.objective > reports[best_run].best.objective {
            best_run = run;
        }
    }
    let statistics = ObjectiveStatistics::from_summaries(&summaries);
    let best = reports.into_iter().nth(best_run).ok_or_else(|| {
        crate::error::SrltpError::Oracle("multi-start produced no run".to_string())
    })?;

    log::info!(
        "Multi-start finished: best objective {:.4} (run {}), mean {:.4}",
        best.best.objective,
        best_run,
        statistics.mean
    );

    Ok(MultiStartReport { runs: summaries, best_run, best, statistics })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exact::EnumerationOracle;
    use crate::generator::{random_instance, GeneratorConfig};

    fn small_instance() -> SrltpInstance {
        let config = GeneratorConfig { customers: 5, ..GeneratorConfig::default() };
        random_instance(&config, 17)
    }

    #[test]
    fn test_run_configs_differ_by_seed() {
        let lns = LnsConfig::default();
        let config = MultiStartConfig { base_seed: 10, ..MultiStartConfig::default() };
        let first = run_config(&lns, &config, 0);
        let third = run_config(&lns, &config, 2);
        assert_eq!(first.neighborhood.seed, 10);
        assert_eq!(first.neighborhood.jitter, 0.0);
        assert_eq!(third.neighborhood.seed, 12);
        assert_eq!(third.neighborhood.jitter, 0.05);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let instance = small_instance();
        let oracle = EnumerationOracle::default();
        let schedule = crate::lns::ScheduleConfig { time_unit: 100.0, ..Default::default() };
        let lns = LnsConfig { max_iterations: 20, schedule, ..LnsConfig::default() };
        let cancel = CancellationToken::new();

        let parallel = MultiStartConfig { runs: 3, ..MultiStartConfig::default() };
        let sequential = MultiStartConfig { parallel: false, ..parallel.clone() };
        let a = run_multistart(&instance, &oracle, &lns, &parallel, &cancel).unwrap();
        let b = run_multistart(&instance, &oracle, &lns, &sequential, &cancel).unwrap();

        assert_eq!(a.runs.len(), 3);
        let objectives = |r: &MultiStartReport| r.runs.iter().map(|s| s.objective).collect::<Vec<_>>();
        assert_eq!(objectives(&a), objectives(&b));
        assert_eq!(a.best_run, b.best_run);
        assert!(a.runs.iter().all(|s| s.feasible));
        assert!(a.statistics.max >= a.statistics.mean && a.statistics.mean >= a.statistics.min);
        assert_eq!(a.best.best.objective, a.statistics.max);
    }

    #[test]
    fn test_statistics() {
        let summary = |run: usize, objective: f64| RunSummary {
            run,
            seed: run as u64,
            status: RunStatus::AbortedNoProgress,
            objective,
            feasible: true,
            iterations: 1,
            oracle_failures: 0,
            rejected_candidates: 0,
            time: 0.0,
        };
        let stats = ObjectiveStatistics::from_summaries(&[summary(0, 2.0), summary(1, 4.0), summary(2, 6.0)]);
        assert!((stats.mean - 4.0).abs() < 1e-12);
        assert!((stats.std_dev - 2.0).abs() < 1e-12);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 6.0);

        let single = ObjectiveStatistics::from_summaries(&[summary(0, 3.0)]);
        assert_eq!(single.std_dev, 0.0);
    }
}
