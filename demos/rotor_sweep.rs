// Rotor angle sweep
//
// Steps a rotation mount through a range of angles and runs an event count at
// each one, one output table per angle. Both instruments are disconnected on
// exit, also after a failure.

use clap::Parser;
use photon_counter::{
    Channel, Measurement, OutputSink, RotorMount, ScopeConnector, ScopeProfile, ScpiTerminal,
};

#[derive(Parser)]
#[command(name = "rotor_sweep")]
#[command(version = "1.0")]
#[command(about = "Count events at a series of rotation mount angles")]
struct Args {
    /// Serial port of the rotation mount controller
    rotor_port: String,

    /// Serial port of the oscilloscope; the single USB instrument is used when omitted
    #[arg(short, long)]
    port: Option<String>,

    /// Channel to capture
    #[arg(short, long, default_value = "CHAN1")]
    channel: Channel,

    /// First angle in degrees
    #[arg(long, default_value_t = 0.0)]
    start: f64,

    /// Last angle in degrees, inclusive
    #[arg(long, default_value_t = 180.0)]
    stop: f64,

    /// Angle step in degrees
    #[arg(long, default_value_t = 15.0)]
    step: f64,

    /// Trials per angle
    #[arg(short = 'n', long, default_value_t = 50)]
    iters: usize,

    /// Output folder
    #[arg(short, long, default_value = photon_counter::output::DEFAULT_OUTPUT_FOLDER)]
    folder: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
    let args = Args::parse();

    if args.step <= 0.0 || args.stop < args.start {
        eprintln!("Invalid sweep: start {} stop {} step {}", args.start, args.stop, args.step);
        std::process::exit(1);
    }

    let angles: Vec<f64> = {
        let steps = ((args.stop - args.start) / args.step).floor() as usize;
        (0..=steps).map(|i| args.start + i as f64 * args.step).collect()
    };

    let mut rotor = RotorMount::connect(&args.rotor_port)?;
    let scope = match ScopeConnector::connect(None, args.port.as_deref(), ScopeProfile::default()) {
        Ok(scope) => scope,
        Err(e) => {
            rotor.disconnect();
            return Err(e.into());
        }
    };
    let mut measurement = Measurement::new(scope, OutputSink::new(&args.folder));

    let result = run(&mut measurement, &mut rotor, &args, &angles);
    measurement.into_scope().disconnect();
    rotor.disconnect();
    result
}

fn run(
    measurement: &mut Measurement<ScpiTerminal>,
    rotor: &mut RotorMount,
    args: &Args,
    angles: &[f64],
) -> Result<(), Box<dyn std::error::Error>> {
    for point in measurement.sweep_angles(rotor, args.channel, angles, args.iters)? {
        println!(
            "{:>7.2} deg: {:.3} counts/s ({} trials, {})",
            point.reached,
            point.summary.counts_per_second,
            point.summary.trials.len(),
            point.summary.output.display()
        );
    }
    Ok(())
}
