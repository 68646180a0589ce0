//! Command-line front end: load a simulation document, run it, extract the
//! standard ASCII results from the trajectory.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use swnet::{
    write_contributions, write_plume, write_profile, EngineOptions, RunState, Simulation, System,
    TrajectoryReader,
};

/// Shallow-water channel network simulator
#[derive(Parser)]
#[command(name = "swnet")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Shallow-water channel network simulator", long_about = None)]
struct Cli {
    /// Simulation document (JSON)
    simulation: PathBuf,

    /// Worker thread count (defaults to the available cores)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Directory for ASCII result files (defaults to the document's directory)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Skip the ASCII extraction after the run
    #[arg(long)]
    no_export: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("swnet: logging already initialized");
    }

    let system = match System::from_path(&cli.simulation) {
        Ok(system) => system,
        Err(err) => {
            eprintln!("swnet: {err}");
            std::process::exit(3);
        }
    };

    if let Err(err) = run(system, &cli) {
        eprintln!("swnet: {err:#}");
        std::process::exit(4);
    }
}

fn run(system: System, cli: &Cli) -> anyhow::Result<()> {
    let options = match cli.threads {
        Some(n) => EngineOptions { nthreads: n.max(1) },
        None => EngineOptions::default(),
    };

    let mut simulation = Simulation::new(system, options).context("cannot prepare the run")?;
    let summary = simulation.run()?;

    match summary.state {
        RunState::Completed => info!(
            final_time = summary.final_time,
            steps = summary.steps,
            saved_steps = summary.saved_steps,
            degraded_steps = summary.degraded_steps,
            "completed"
        ),
        RunState::Cancelled => info!(
            final_time = summary.final_time,
            saved_steps = summary.saved_steps,
            "cancelled"
        ),
    }

    if !cli.no_export {
        export_results(&simulation, cli)?;
    }
    Ok(())
}

/// Standard extraction: final longitudinal profile per channel, solute plumes,
/// and the network contribution table.
fn export_results(simulation: &Simulation, cli: &Cli) -> anyhow::Result<()> {
    let system = simulation.system();
    let mesh = simulation.mesh();
    let solution = system.solution_path();

    let out_dir = match &cli.output_dir {
        Some(dir) => dir.clone(),
        None => solution.parent().map(PathBuf::from).unwrap_or_default(),
    };
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("cannot create {}", out_dir.display()))?;

    let mut reader = TrajectoryReader::open(&solution, system.n_solutes())
        .context("cannot open the trajectory")?;
    let last = reader.step_count() - 1;

    for (ci, channel) in system.channels.iter().enumerate() {
        let path = out_dir.join(format!("profile_{}.txt", channel.name));
        let mut out = BufWriter::new(File::create(&path)?);
        write_profile(&mut out, system, mesh, &mut reader, ci, last)?;
        info!(file = %path.display(), "wrote profile");
    }

    for (si, solute) in system.solutes.iter().enumerate() {
        let path = out_dir.join(format!("plume_{}.txt", solute.name));
        let mut out = BufWriter::new(File::create(&path)?);
        write_plume(&mut out, system, mesh, &mut reader, si)?;
        info!(file = %path.display(), "wrote plume");
    }

    let path = out_dir.join("contributions.txt");
    let mut out = BufWriter::new(File::create(&path)?);
    write_contributions(&mut out, system, mesh, &mut reader)?;
    info!(file = %path.display(), "wrote contributions");

    Ok(())
}
