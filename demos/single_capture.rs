// Single capture report
//
// Captures one waveform, optionally marks the detected pulses and saves the
// samples as CSV next to an annotated PNG plot.

use clap::Parser;
use photon_counter::{Channel, Measurement, OutputSink, ScopeConnector, ScopeProfile};

#[derive(Parser)]
#[command(name = "single_capture")]
#[command(version = "1.0")]
#[command(about = "Capture one waveform and save it with an annotated plot")]
struct Args {
    /// Serial port of the oscilloscope; the single USB instrument is used when omitted
    #[arg(short, long)]
    port: Option<String>,

    /// Channel to capture
    #[arg(short, long, default_value = "CHAN1")]
    channel: Channel,

    /// Plot the samples only, without event markers
    #[arg(long)]
    no_peaks: bool,

    /// Output folder
    #[arg(short, long, default_value = photon_counter::output::DEFAULT_OUTPUT_FOLDER)]
    folder: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
    let args = Args::parse();

    let scope = ScopeConnector::connect(None, args.port.as_deref(), ScopeProfile::default())?;
    let mut measurement = Measurement::new(scope, OutputSink::new(&args.folder));

    let result = measurement.measure_single_event(args.channel, !args.no_peaks);
    measurement.into_scope().disconnect();
    let capture = result?;

    println!("{}", capture.title);
    println!(
        "{} samples over {:.3e} s",
        capture.waveform.signal.len(),
        capture.waveform.signal.duration()
    );
    if let Some(events) = &capture.events {
        println!("Events at samples: {:?}", events);
    }
    println!("Table: {}", capture.table.display());
    println!("Plot:  {}", capture.image.display());
    Ok(())
}
