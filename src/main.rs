use clap::{Parser, Subcommand};
use csnet::app_config::AppConfig;
use csnet::engine::lock;
use csnet::nc::packing::{pack_ternary, to_hex};
use csnet::sim::network::summarize;
use csnet::sim::NetworkSimulation;
use csnet::{logger, telemetry, ReconstructionEngine};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Simulates a run through the network and reconstructs it at the sink
    Run {
        /// Path to the TOML configuration
        #[clap(short, long, required = true)]
        config: PathBuf,

        /// Overrides the number of simulated sequences
        #[clap(long)]
        sequences: Option<usize>,

        /// Writes every output stream as JSON
        #[clap(short, long)]
        output: Option<PathBuf>,

        /// Prints the Prometheus counters after the run
        #[clap(long)]
        metrics: bool,
    },
    /// Prints the 2-bit packed hex form of a ternary coefficient vector
    Pack {
        /// Comma separated coefficients in {0, 1, -1}
        #[clap(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
        values: Vec<f64>,
    },
}

fn main() -> ExitCode {
    logger::init();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Run {
            config,
            sequences,
            output,
            metrics,
        } => run(config, *sequences, output.as_deref(), *metrics),
        Commands::Pack { values } => pack_ternary(values).map(|bytes| println!("{}", to_hex(&bytes))),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: &Path, sequences: Option<usize>, output: Option<&Path>, metrics: bool) -> csnet::Result<()> {
    let mut cfg = AppConfig::from_file(config)?;
    if let Some(s) = sequences {
        cfg.simulation.sequences = s;
    }
    cfg.validate()?;
    info!("loaded {} clusters from {}", cfg.clusters.len(), config.display());

    let mut engine = ReconstructionEngine::new(cfg.reconstruction.clone())?;
    for c in &cfg.clusters {
        engine.add_cluster(c.descriptor())?;
    }
    let mut sim = NetworkSimulation::new(&engine, cfg.simulation.clone())?;
    let summary = sim.run(&mut engine)?;

    println!(
        "packets: {} sent, {} lost, {} rejected; sequences reconstructed: {}",
        summary.sent,
        summary.lost,
        summary.rejected,
        summary.reports.len()
    );
    if cfg.reconstruction.calc_snr {
        for s in summarize(&engine) {
            match (s.mean_db, s.min_db) {
                (Some(mean), Some(min)) => println!(
                    "cluster {}: mean SNR {:.2} dB, min {:.2} dB ({} exact, {} samples)",
                    s.cluster, mean, min, s.exact, s.samples
                ),
                _ => println!("cluster {}: {} exact of {} samples", s.cluster, s.exact, s.samples),
            }
        }
    }

    if let Some(path) = output {
        let streams = engine.streams();
        let json = lock(&streams).to_json()?;
        std::fs::write(path, json)?;
        info!("wrote output streams to {}", path.display());
    }
    if metrics {
        print!("{}", telemetry::encode_text());
    }
    Ok(())
}
