//! spacedist - storage proposal planner
//!
//! Reads a device graph description and proposal settings, and prints the
//! partitions and logical volumes the proposal would create.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spacedist::config::ProposalSettings;
use spacedist::disk::devicegraph::Devicegraph;
use spacedist::proposal::{Proposal, ProposalResult};

#[derive(Parser)]
#[command(name = "spacedist")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute a proposal for a device graph
    Propose {
        /// Device graph description (TOML)
        #[arg(short, long)]
        devicegraph: String,

        /// Proposal settings (TOML)
        #[arg(short, long, env = "SPACEDIST_SETTINGS")]
        settings: String,

        /// Also print the resulting device graph in this format
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },

    /// List the free regions of a device graph
    FreeSpaces {
        /// Device graph description (TOML)
        #[arg(short, long)]
        devicegraph: String,
    },

    /// Validate a settings file
    Validate {
        /// Path to settings file
        settings: String,
    },

    /// Generate a sample settings file
    GenerateConfig {
        /// Output path for the settings file
        #[arg(short, long, default_value = "spacedist.toml")]
        output: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Toml,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Propose {
            devicegraph,
            settings,
            output,
        } => cmd_propose(&devicegraph, &settings, output)?,
        Commands::FreeSpaces { devicegraph } => cmd_free_spaces(&devicegraph)?,
        Commands::Validate { settings } => cmd_validate(&settings)?,
        Commands::GenerateConfig { output } => cmd_generate_config(&output)?,
    }

    Ok(())
}

fn cmd_propose(graph_path: &str, settings_path: &str, output: Option<OutputFormat>) -> Result<()> {
    info!("Loading device graph from {}", graph_path);
    let graph = Devicegraph::from_file(graph_path)?;
    info!("Loading settings from {}", settings_path);
    let settings = ProposalSettings::from_file(settings_path)?;

    let result = Proposal::new(settings).propose(&graph)?;
    print_summary(&result);

    match output {
        Some(OutputFormat::Json) => println!("{}", result.devicegraph.to_json()?),
        Some(OutputFormat::Toml) => println!("{}", result.devicegraph.to_toml()?),
        None => {}
    }
    Ok(())
}

fn print_summary(result: &ProposalResult) {
    println!("{}", "Space distribution".bold());
    print!("{}", result.distribution);

    if !result.deleted_partitions.is_empty() {
        println!("\n{}", "Deleted".bold());
        for name in &result.deleted_partitions {
            println!("  {} {}", "-".red(), name);
        }
    }

    println!("\n{}", "Created".bold());
    for created in &result.created_partitions {
        println!(
            "  {} {:<20} {:>12}  {}",
            "+".green(),
            created.name,
            created.size.to_human_string(),
            created.planned
        );
    }
    if let Some(lvm) = &result.lvm {
        for lv in &lvm.deleted_lvs {
            println!("  {} {}", "-".red(), lv);
        }
        for lv in &lvm.created_lvs {
            let size = result
                .devicegraph
                .device_size(lv)
                .map(|s| s.to_human_string())
                .unwrap_or_default();
            println!("  {} {:<20} {:>12}", "+".green(), lv, size);
        }
    }
}

fn cmd_free_spaces(graph_path: &str) -> Result<()> {
    let graph = Devicegraph::from_file(graph_path)?;
    let spaces = graph.free_disk_spaces();

    if spaces.is_empty() {
        println!("No free space found.");
        return Ok(());
    }

    println!(
        "{:<15} {:>14} {:>12} {:>8} {:>8}",
        "DISK", "START", "SIZE", "PRIMARY", "IN EXT"
    );
    println!("{}", "-".repeat(61));

    for space in spaces {
        let logical = if space.in_extended { "yes" } else { "no" };
        println!(
            "{:<15} {:>14} {:>12} {:>8} {:>8}",
            space.disk_name,
            space.region.start,
            space.disk_size().to_human_string(),
            space.primary_slots,
            logical
        );
    }

    Ok(())
}

fn cmd_validate(settings_path: &str) -> Result<()> {
    let settings = ProposalSettings::from_file(settings_path)?;
    settings.validate()?;
    println!("{} Settings are valid", "✓".green());
    Ok(())
}

fn cmd_generate_config(output: &str) -> Result<()> {
    let sample = ProposalSettings::sample();
    let content = sample.to_toml()?;
    std::fs::write(output, content)?;
    println!("{} Sample settings written to {}", "✓".green(), output);
    Ok(())
}
