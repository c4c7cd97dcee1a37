// Repeated event counting
//
// Captures a channel many times, counts the pulses in every capture and saves
// the per-trial counts as a CSV table in the output folder.

use clap::Parser;
use photon_counter::{
    Channel, InstrumentLink, Measurement, MeasurementConfig, MeasurementError, Oscilloscope,
    OutputSink, PeakParams, ScopeConnector, ScopeProfile, TrialFailurePolicy,
};

#[derive(Parser)]
#[command(name = "count_events")]
#[command(version = "1.0")]
#[command(about = "Count photon pulses over repeated oscilloscope captures")]
struct Args {
    /// Serial port of the oscilloscope; the single USB instrument is used when omitted
    #[arg(short, long)]
    port: Option<String>,

    /// Connect over raw SCPI on TCP instead, e.g. 192.168.1.50:5555
    #[arg(long, conflicts_with = "port")]
    tcp: Option<String>,

    /// Channel to capture
    #[arg(short, long, default_value = "CHAN1")]
    channel: Channel,

    /// Number of trials
    #[arg(short = 'n', long, default_value_t = 100)]
    iters: usize,

    /// Output file name inside the output folder
    #[arg(short, long, default_value = "measure_count-0")]
    output: String,

    /// Output folder
    #[arg(short, long, default_value = photon_counter::output::DEFAULT_OUTPUT_FOLDER)]
    folder: String,

    /// Minimum peak height
    #[arg(long, default_value_t = 2.0)]
    min_height: f64,

    /// Minimum distance between peaks in samples
    #[arg(long, default_value_t = 2)]
    min_distance: usize,

    /// Failed trials to skip before the run is aborted
    #[arg(long, default_value_t = 0)]
    max_failed_trials: usize,

    /// Save the completed trials when the run is aborted
    #[arg(long)]
    persist_partial: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    #[cfg(feature = "cpu-profiling")]
    let _client = tracy_client::Client::start();

    let profile = ScopeProfile::default();
    match &args.tcp {
        Some(addr) => run(ScopeConnector::connect_tcp(addr, profile)?, &args),
        None => run(ScopeConnector::connect(None, args.port.as_deref(), profile)?, &args),
    }
}

fn run<L: InstrumentLink>(
    scope: Oscilloscope<L>,
    args: &Args,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = MeasurementConfig {
        peaks: PeakParams {
            min_height: args.min_height,
            min_distance: args.min_distance,
        },
        failure_policy: TrialFailurePolicy {
            max_failed_trials: args.max_failed_trials,
            persist_partial: args.persist_partial,
        },
        ..MeasurementConfig::default()
    };
    let mut measurement = Measurement::new(scope, OutputSink::new(&args.folder)).with_config(config);

    let result = measurement.measure_count_events(args.channel, args.iters, &args.output);
    measurement.into_scope().disconnect();

    match result {
        Ok(summary) => {
            println!("Trials:          {}", summary.trials.len());
            println!("Failed trials:   {}", summary.failed_trials);
            println!("Mean events:     {}", summary.stats.mean);
            match summary.stats.std_dev {
                Some(std_dev) => println!("Std deviation:   {}", std_dev),
                None => println!("Std deviation:   n/a"),
            }
            println!("Min / max:       {} / {}", summary.stats.min, summary.stats.max);
            println!("Time window (s): {}", summary.time_window);
            println!("Counts over 1s:  {}", summary.counts_per_second);
            println!("Frequency (Hz):  {}", summary.frequency);
            println!("Saved to:        {}", summary.output.display());
            Ok(())
        }
        Err(MeasurementError::TrialFailed {
            partial: Some(path),
            source,
            trial,
            total,
        }) => {
            eprintln!("Trial {trial} of {total} failed");
            eprintln!("Completed trials saved to {}", path.display());
            Err(source.into())
        }
        Err(e) => Err(e.into()),
    }
}
