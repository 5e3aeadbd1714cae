use respiratory_stim::config::{load_config, save_config, Config, Variant};
use respiratory_stim::experiment::calibration::{RateInput, ScriptedRates};
use respiratory_stim::experiment::responses::ResponseListener;
use respiratory_stim::experiment::scheduler::ResponseKeys;
use respiratory_stim::experiment::{estimate_duration, Session};
use respiratory_stim::local::console::spawn_console;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "respiratory-stim")]
#[command(
    author,
    version,
    about = "Closed-loop somatosensory detection experiment",
    long_about = None
)]
struct Cli {
    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Calibrate the ISIs and run every block
    Run {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print the estimated session length
    Estimate {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Write a default configuration file
    InitConfig {
        path: PathBuf,

        #[arg(long, value_enum, default_value = "detection")]
        variant: VariantArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum VariantArg {
    Detection,
    Lateralised,
}

impl From<VariantArg> for Variant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Detection => Variant::Detection,
            VariantArg::Lateralised => Variant::Lateralised,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { config } => run(&config),
        Commands::Estimate { config } => {
            let config = load_config(&config)?;
            let secs = estimate_duration(&config);
            println!(
                "The experiment is estimated to last {} ({:.0} s)",
                format!("{:.1} min", secs / 60.0).green().bold(),
                secs
            );
            Ok(())
        }
        Commands::InitConfig { path, variant } => {
            let config = Config::default_for(variant.into());
            save_config(&config, &path)?;
            info!(path = %path.display(), "wrote default configuration");
            Ok(())
        }
    }
}

fn run(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    info!("respiratory-stim v{}", env!("CARGO_PKG_VERSION"));

    let keys = ResponseKeys::new(config.responses.keys.clone().into_iter().collect());
    let listener = ResponseListener::new(keys.all_keys());
    let console = spawn_console(listener.clone());

    let rate_input: Box<dyn RateInput> = match &config.calibration.scripted_rates {
        Some(rates) => Box::new(ScriptedRates::new(rates.clone())),
        None => Box::new(console),
    };

    let mut session = Session::open(config, listener, rate_input)?;
    let isis = session.run()?;
    println!("{} {}", "Session complete.".green().bold(), isis);
    Ok(())
}
