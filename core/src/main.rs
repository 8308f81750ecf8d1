//! MCL: run Monte Carlo localization on a synthetic landmark scenario.
//!
//! The scenario (landmarks, path, sensor noise) and the filter (resampling, KLD sizing, seed) are
//! read from configuration files (TOML/JSON/YAML) or left at their defaults. Per-step results can be
//! written to CSV for analysis.
use clap::Parser;
use log::{error, info};
use std::error::Error;
use std::path::PathBuf;

use montecarlo::filter::{FilterConfig, ParticleFilter};
use montecarlo::kld::KldConfig;
use montecarlo::motion::{GaussianOdometryModel, OdometryMotionModel};
use montecarlo::observation::MapLikelihood;
use montecarlo::particle::Seeding;
use montecarlo::resampling::ResamplingStrategy;
use montecarlo::sim::{LocalizationResult, ScenarioConfig, generate_scenario, run_scenario};

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Monte Carlo localization on a simulated landmark scenario.")]
struct Cli {
    /// Filter configuration file (TOML/JSON/YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scenario configuration file (TOML/JSON/YAML)
    #[arg(short, long)]
    scenario: Option<PathBuf>,

    /// Write the default filter and scenario configurations into this directory and exit
    #[arg(long)]
    write_defaults: Option<PathBuf>,

    /// Number of particles seeded uniformly over the scenario bounds
    #[arg(short = 'n', long, default_value_t = 1000)]
    particles: usize,

    /// Resampling strategy (overrides the configuration file)
    #[arg(long, value_enum)]
    strategy: Option<ResamplingStrategy>,

    /// Enable KLD adaptive sizing with default parameters if the configuration has none
    #[arg(long)]
    kld: bool,

    /// Random seed (overrides the configuration file)
    #[arg(long)]
    seed: Option<u64>,

    /// Process particles in parallel
    #[arg(long)]
    parallel: bool,

    /// Floor on the odometry translation noise (m)
    #[arg(long, default_value_t = 0.03)]
    min_std_xy: f64,

    /// Floor on the odometry heading noise (rad)
    #[arg(long, default_value_t = 0.03)]
    min_std_phi: f64,

    /// CSV file receiving one row per step
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// Initialize env_logger with a timestamped format, writing to `log_file` when given.
fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

fn write_defaults(dir: &PathBuf) -> Result<(), Box<dyn Error>> {
    std::fs::create_dir_all(dir)?;
    let filter_path = dir.join("filter.toml");
    let scenario_path = dir.join("scenario.toml");
    FilterConfig::default().to_file(&filter_path)?;
    ScenarioConfig::default().to_file(&scenario_path)?;
    info!(
        "Wrote {} and {}",
        filter_path.display(),
        scenario_path.display()
    );
    Ok(())
}

fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => FilterConfig::from_file(path)?,
        None => FilterConfig::default(),
    };
    if let Some(strategy) = cli.strategy {
        config.resampling_strategy = strategy;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if cli.kld && config.kld.is_none() {
        config.kld = Some(KldConfig::default());
    }
    config.parallel |= cli.parallel;

    let scenario_config = match &cli.scenario {
        Some(path) => ScenarioConfig::from_file(path)?,
        None => ScenarioConfig::default(),
    };
    let scenario = generate_scenario(&scenario_config)?;
    info!(
        "Scenario: {} steps, {} landmarks",
        scenario.records.len(),
        scenario.map.landmarks().len()
    );

    let motion = OdometryMotionModel::Gaussian(GaussianOdometryModel {
        min_std_xy: cli.min_std_xy,
        min_std_phi: cli.min_std_phi,
        ..GaussianOdometryModel::default()
    });
    let mut filter = ParticleFilter::new(
        config,
        &Seeding::uniform(scenario_config.bounds, cli.particles),
        motion,
        MapLikelihood::default(),
    )?;
    let results = run_scenario(&mut filter, &scenario)?;

    if let Some(last) = results.last() {
        info!(
            "Final estimate ({:.3}, {:.3}, {:.2}°), error {:.3} m / {:.2}°, {} particles",
            last.est_x,
            last.est_y,
            last.est_phi_deg,
            last.position_error,
            last.heading_error_deg,
            last.particle_count
        );
    }
    if let Some(output) = &cli.output {
        LocalizationResult::to_csv(&results, output)?;
        info!("Results written to {}", output.display());
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    if let Some(dir) = &cli.write_defaults {
        return write_defaults(dir);
    }
    if let Err(e) = run(&cli) {
        error!("Localization failed: {}", e);
        return Err(e);
    }
    Ok(())
}
