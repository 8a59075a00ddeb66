#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use heartfail::config::PipelineConfig;
use heartfail::glm::GlmOptions;
use heartfail::report::{print_exploratory, print_report, write_artifacts};
use heartfail::workflow::{explore, run_analysis};

#[derive(Args)]
pub struct RunArgs {
    /// Path to the heart-failure clinical records CSV
    #[arg(value_name = "CSV")]
    pub data: PathBuf,

    /// Optional TOML file overriding pipeline defaults
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Seed for every random step (overrides the config file)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Directory for ROC, importance and tuning artifacts (overrides the config file)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Worker threads for resampling and tuning (defaults to all cores)
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,
}

#[derive(Parser)]
#[command(
    name = "heartfail",
    about = "Mortality classification for heart-failure clinical records",
    long_about = "Fits logistic regression, a small neural network and tuned boosted trees \
                 to heart-failure patient records, evaluates them with Monte-Carlo \
                 cross-validation and reports held-out test performance."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full preprocessing, resampling, tuning and evaluation pipeline
    Run(RunArgs),

    /// Fit only the exploratory logistic regression over all predictors
    Explore {
        #[arg(value_name = "CSV")]
        data: PathBuf,
    },

    /// Show version information
    Version,
}

fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => {
            println!("Loading configuration from: {}", path.display());
            PipelineConfig::load(path)?
        }
        None => PipelineConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    println!("Analyzing: {} (seed {})", args.data.display(), config.seed);
    let report = run_analysis(&args.data, &config)?;
    print_report(&report);

    let written = write_artifacts(&report, &config.output_dir)?;
    println!("\nArtifacts written to {}:", config.output_dir.display());
    for path in written {
        println!("  {}", path.display());
    }
    Ok(())
}

fn run_explore(data: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let fit = explore(&data, &GlmOptions::default())?;
    print_exploratory(&fit);
    Ok(())
}

fn print_version_info() {
    println!("heartfail {}", env!("CARGO_PKG_VERSION"));
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Run(args)) => run(args),
        Some(Commands::Explore { data }) => run_explore(data),
        Some(Commands::Version) => {
            print_version_info();
            Ok(())
        }
        None => {
            let _ = Cli::command().print_help();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
