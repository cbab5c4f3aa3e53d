use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use uom::si::{f64::Time, time::hour, time::minute};

use home_thermal::{
    assemble, simulate, AssemblyOptions, InputTrajectory, Model, RcNetwork, SimulationOptions,
};

#[derive(Parser)]
#[command(name = "home_thermal")]
#[command(about = "Free running cool-down of a building thermal model", long_about = None)]
struct Cli {
    /// Path to the model JSON5 file
    model_path: PathBuf,
    /// Print the RC network in DOT format instead of simulating
    #[arg(long)]
    dot: bool,
    /// Simulated time in hours
    #[arg(long, default_value_t = 24.0)]
    hours: f64,
    /// Integration step in minutes
    #[arg(long, default_value_t = 10.0)]
    step_minutes: f64,
    /// Temperature of all pseudo-zones (outside, ground, neighbours) in °C
    #[arg(long, default_value_t = 0.0)]
    outside: f64,
    /// Initial temperature of every state in °C
    #[arg(long, default_value_t = 20.0)]
    initial: f64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let model = Model::load(&cli.model_path)
        .with_context(|| format!("loading {}", cli.model_path.display()))?;

    if cli.dot {
        let network = RcNetwork::try_from(&model)?;
        print!("{}", network.to_dot());
        return Ok(());
    }

    let ss = assemble(&model, &AssemblyOptions::default())?;
    let options = SimulationOptions {
        step: Time::new::<minute>(cli.step_minutes),
        ..Default::default()
    };
    let trajectory = simulate(
        &ss,
        &ss.uniform_state(cli.initial),
        &InputTrajectory::constant(ss.uniform_input(cli.outside)),
        Time::new::<hour>(0.0)..Time::new::<hour>(cli.hours),
        &options,
    )?;

    let mut out = io::stdout().lock();
    writeln!(out, "time_h,{}", trajectory.output_names.join(","))?;
    for (time, output) in trajectory.times.iter().zip(trajectory.outputs.iter()) {
        write!(out, "{:.3}", time / 3600.0)?;
        for value in output.iter() {
            write!(out, ",{:.3}", value)?;
        }
        writeln!(out)?;
    }

    Ok(())
}
