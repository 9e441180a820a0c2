//! Commune - DTN community forwarding simulation
//!
//! Runs scripted or random contact scenarios and prints a run report.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use commune_routing::RouterConfig;
use commune_sim::{
    RandomContacts, RandomTraffic, SimConfig, SimReport, SimWorld, TopologyKind, scenarios,
};

#[derive(Parser)]
#[command(
    name = "commune-sim",
    about = "Contact-driven simulation of community-aware DTN forwarding",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Router preset used when no configuration file is given
    #[arg(short, long, global = true, value_enum, default_value = "small-world")]
    preset: Preset,

    /// JSON file with a full simulation configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Write the run report as JSON to this file
    #[arg(short, long, global = true)]
    json: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Preset {
    SmallWorld,
    SparseContacts,
    Conservative,
}

impl Preset {
    fn router_config(self) -> RouterConfig {
        match self {
            Self::SmallWorld => RouterConfig::small_world(),
            Self::SparseContacts => RouterConfig::sparse_contacts(),
            Self::Conservative => RouterConfig::conservative(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Two nodes meet once and become familiar
    Pair,

    /// A familiar triangle admits a fourth node through a short meeting
    Triangle,

    /// Random contact graph, contacts and traffic
    Random {
        /// Number of nodes (max 26)
        #[arg(short, long, default_value = "8")]
        nodes: usize,

        /// Shape of the contact graph
        #[arg(short, long, value_enum, default_value = "random")]
        topology: TopologyKind,

        /// Edge probability for the random graph
        #[arg(long, default_value = "0.4")]
        connection_prob: f64,

        /// Simulated seconds
        #[arg(short, long, default_value = "21600")]
        duration: f64,

        /// Seed for every random draw
        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Number of messages
        #[arg(short, long, default_value = "20")]
        messages: usize,

        /// Destinations per message
        #[arg(long, default_value = "2")]
        fanout: usize,
    },

    /// Print a contact graph
    Topology {
        /// Shape of the contact graph
        #[arg(short, long, value_enum, default_value = "ring")]
        topology: TopologyKind,

        /// Number of nodes (max 26)
        #[arg(short, long, default_value = "6")]
        nodes: usize,

        /// Edge probability for the random graph
        #[arg(long, default_value = "0.4")]
        connection_prob: f64,

        /// Seed for the random graph
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = load_config(cli.config.as_deref(), cli.preset)?;
    let started_at = Utc::now();

    let (name, world) = match cli.command {
        Commands::Pair => ("pair", scenarios::run_pair_scenario(config)?),
        Commands::Triangle => ("triangle", scenarios::run_triangle_scenario(config)?),
        Commands::Random {
            nodes,
            topology,
            connection_prob,
            duration,
            seed,
            messages,
            fanout,
        } => {
            if nodes > 26 {
                warn!(nodes, "At most 26 nodes are simulated");
            }
            let params = scenarios::RandomScenario {
                nodes,
                topology,
                connection_probability: connection_prob,
                duration,
                seed,
                contacts: RandomContacts::default(),
                traffic: RandomTraffic {
                    messages,
                    fanout,
                    ..RandomTraffic::default()
                },
            };
            ("random", scenarios::run_random_scenario(config, &params)?)
        }
        Commands::Topology {
            topology,
            nodes,
            connection_prob,
            seed,
        } => {
            let mut rng = StdRng::seed_from_u64(seed);
            let graph = topology.build(nodes, connection_prob, &mut rng);
            println!("{}", graph.visualize());
            return Ok(());
        }
    };

    report(name, started_at, &world, cli.json.as_deref())
}

fn load_config(path: Option<&Path>, preset: Preset) -> anyhow::Result<SimConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => SimConfig {
            router: preset.router_config(),
            ..SimConfig::default()
        },
    };
    Ok(config)
}

fn report(
    name: &str,
    started_at: chrono::DateTime<Utc>,
    world: &SimWorld,
    json: Option<&Path>,
) -> anyhow::Result<()> {
    let report = SimReport::from_world(name, started_at, world);
    println!("{}", report.summary());

    if let Some(path) = json {
        let text = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "Wrote JSON report");
    }
    Ok(())
}
