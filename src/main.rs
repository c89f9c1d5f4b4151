//! SRLTP Solver - Command Line Interface
//!
//! Large neighborhood search for the single-vehicle pickup and delivery
//! problem with external shipping.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use srltp_lns::exact::{oracle_by_name, Oracle};
use srltp_lns::generator::{demo_instance, random_instance, GeneratorConfig};
use srltp_lns::instance::SrltpInstance;
use srltp_lns::lns::{CancellationToken, LnsConfig, LnsDriver, SeedStrategy};
use srltp_lns::multistart::{run_multistart, MultiStartConfig};
use srltp_lns::solution::{check_feasibility, Solution};

use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "srltp-lns")]
#[command(version = "0.1")]
#[command(about = "Large neighborhood search for the SRLTP pickup and delivery problem")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Source {
    /// Path to a JSON instance file
    #[arg(short, long, conflicts_with = "demo")]
    instance: Option<PathBuf>,

    /// Use the 8-node reference network instead of a file
    #[arg(long)]
    demo: bool,

    /// Seed for the demo quantities
    #[arg(long, default_value = "42")]
    demo_seed: u64,
}

#[derive(Args)]
struct SearchOptions {
    /// JSON file with an LnsConfig (missing fields take defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Oracle used on sub-problems
    #[arg(long, value_enum, default_value = "enumeration")]
    oracle: OracleKind,

    /// Iteration budget
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Upper bound on a single oracle call in seconds
    #[arg(long)]
    oracle_time_limit: Option<f64>,

    /// Neighborhood seed
    #[arg(short, long)]
    seed: Option<u64>,

    /// Seed the search with one oracle call on the whole instance
    #[arg(long)]
    full_seed: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one LNS search
    Solve {
        #[command(flatten)]
        source: Source,

        #[command(flatten)]
        search: SearchOptions,

        /// Write the run report as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the iteration trace as CSV
        #[arg(long)]
        trace: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Run several independent searches and keep the best
    Multistart {
        #[command(flatten)]
        source: Source,

        #[command(flatten)]
        search: SearchOptions,

        /// Number of runs
        #[arg(short, long, default_value = "4")]
        runs: usize,

        /// Run one search after the other
        #[arg(long)]
        sequential: bool,

        /// Show a progress bar
        #[arg(long)]
        progress: bool,

        /// Write per-run summaries as CSV
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a generated instance as JSON
    Generate {
        /// Generate the reference network instead of a random instance
        #[arg(long)]
        demo: bool,

        /// Number of customers of a random instance
        #[arg(long, default_value = "7")]
        customers: usize,

        /// Random seed
        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Analyze an instance
    Analyze {
        #[command(flatten)]
        source: Source,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum OracleKind {
    /// Sequence enumeration with an LP per sequence
    Enumeration,
    /// Gurobi MIP (requires the `gurobi` feature)
    Gurobi,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Solve { source, search, output, trace, verbose } => solve(&source, &search, output, trace, verbose),
        Commands::Multistart { source, search, runs, sequential, progress, output } => {
            let config = MultiStartConfig {
                runs,
                base_seed: search.seed.unwrap_or(0),
                parallel: !sequential,
                progress,
                ..MultiStartConfig::default()
            };
            multistart(&source, &search, &config, output)
        }
        Commands::Generate { demo, customers, seed, output } => generate(demo, customers, seed, &output),
        Commands::Analyze { source } => analyze(&source),
    }
}

fn load_instance(source: &Source) -> anyhow::Result<SrltpInstance> {
    let instance = match (&source.instance, source.demo) {
        (Some(path), _) => SrltpInstance::from_file(path)
            .with_context(|| format!("Error loading instance from {:?}", path))?,
        (None, true) => demo_instance(source.demo_seed),
        (None, false) => bail!("either --instance or --demo is required"),
    };
    instance.validate()?;
    Ok(instance)
}

fn lns_config(search: &SearchOptions) -> anyhow::Result<LnsConfig> {
    let mut config = match &search.config {
        Some(path) => LnsConfig::from_file(path).with_context(|| format!("Error loading config from {:?}", path))?,
        None => LnsConfig::default(),
    };
    if let Some(max_iterations) = search.max_iterations {
        config.max_iterations = max_iterations;
    }
    if let Some(limit) = search.oracle_time_limit {
        config.oracle_time_limit = limit;
    }
    if let Some(seed) = search.seed {
        config.neighborhood.seed = seed;
    }
    if search.full_seed {
        config.seed_strategy = SeedStrategy::FullOracle;
    }
    Ok(config)
}

fn build_oracle(kind: OracleKind) -> anyhow::Result<Box<dyn Oracle>> {
    let name = match kind {
        OracleKind::Enumeration => "enumeration",
        OracleKind::Gurobi => "gurobi",
    };
    Ok(oracle_by_name(name)?)
}

fn solve(
    source: &Source,
    search: &SearchOptions,
    output: Option<PathBuf>,
    trace: Option<PathBuf>,
    verbose: bool,
) -> anyhow::Result<()> {
    let instance = load_instance(source)?;
    let config = lns_config(search)?;
    let oracle = build_oracle(search.oracle)?;

    if verbose {
        println!("{}", instance.statistics());
    }

    println!("Solving {} with the {} oracle...", instance.name, oracle.name());
    let driver = LnsDriver::new(&instance, oracle.as_ref(), config)?;
    let report = driver.run(&CancellationToken::new());

    println!("\n========== Results ==========");
    println!("{}", report);

    if verbose {
        println!("Load profile: {:?}", report.best.load);
        println!("Departures: {:?}", report.best.departure);
        println!("\n{:>5} {:>6} {:>6} {:>12} {:>14} {:>9}", "Iter", "Free", "Fixed", "Oracle", "Incumbent", "Counter");
        for record in &report.trace {
            println!(
                "{:>5} {:>6} {:>6} {:>12} {:>14.2} {:>9}",
                record.iteration,
                record.free_nodes,
                record.fixed_arcs,
                record.oracle_status.to_string(),
                record.incumbent_objective,
                record.counter
            );
        }
    }

    if let Some(path) = output {
        std::fs::write(&path, report.to_json()?).with_context(|| format!("Failed to write {:?}", path))?;
        println!("\nReport saved to {:?}", path);
    }
    if let Some(path) = trace {
        report.export_trace_csv(&path)?;
        println!("Trace exported to {:?}", path);
    }
    Ok(())
}

fn multistart(
    source: &Source,
    search: &SearchOptions,
    config: &MultiStartConfig,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let instance = load_instance(source)?;
    let lns = lns_config(search)?;
    let oracle = build_oracle(search.oracle)?;

    println!("Running {} searches on {} with the {} oracle...", config.runs, instance.name, oracle.name());
    let report = run_multistart(&instance, oracle.as_ref(), &lns, config, &CancellationToken::new())?;

    println!("\n{}", report);
    println!("========== Best run ==========");
    println!("{}", report.best);

    if let Some(path) = output {
        report.export_runs_csv(&path)?;
        println!("Runs exported to {:?}", path);
    }
    Ok(())
}

fn generate(demo: bool, customers: usize, seed: u64, output: &PathBuf) -> anyhow::Result<()> {
    let instance = if demo {
        demo_instance(seed)
    } else {
        let config = GeneratorConfig { customers, ..GeneratorConfig::default() };
        random_instance(&config, seed)
    };
    instance.to_file(output)?;
    println!("Instance {} ({} customers) saved to {:?}", instance.name, instance.num_customers(), output);
    Ok(())
}

fn analyze(source: &Source) -> anyhow::Result<()> {
    let instance = load_instance(source)?;

    println!("========== Instance Analysis ==========\n");
    println!("{}", instance.statistics());

    let pairs = instance.profitable_shipping_pairs();
    if !pairs.is_empty() {
        println!("Profitable shipping pairs (surplus -> deficit, margin per unit):");
        for (i, j, d) in &pairs {
            println!("  {} -> {}: {:.2}", i, j, d);
        }
    }

    let seed = Solution::empty(&instance);
    println!("\nEmpty-tour seed:");
    println!("{}", check_feasibility(&instance, &seed));
    Ok(())
}
