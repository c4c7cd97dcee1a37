//! # Photon Counter
//!
//! Capture waveforms from a SCPI oscilloscope, count photon pulses in them and
//! persist the results.
//!
//! ## Features
//!
//! - **Instrument links**: SCPI over a serial/USB port or raw TCP, behind the
//!   [`InstrumentLink`] trait
//! - **Waveform capture**: IEEE 488.2 block decoding and preamble scaling
//! - **Event detection**: local-maximum peak picking with height and spacing
//!   constraints
//! - **Measurement runs**: repeated trials with `polars` statistics, a
//!   configurable failure policy and collision-safe CSV/PNG output
//! - **Rotor mount**: angle control for a serial rotation stage
//!
//! ## Examples
//!
//! ### Counting events over many captures
//!
//! ```rust,no_run
//! use photon_counter::{Channel, Measurement, OutputSink, ScopeConnector, ScopeProfile};
//!
//! let scope = ScopeConnector::connect(None, Some("/dev/ttyUSB0"), ScopeProfile::default())?;
//! let mut measurement = Measurement::new(scope, OutputSink::default());
//!
//! let summary = measurement.measure_count_events(Channel::Chan1, 100, "measure_count-0")?;
//! println!("{} counts per second", summary.counts_per_second);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Detecting events in a signal
//!
//! ```rust
//! use photon_counter::{detect_events, PeakParams};
//!
//! let signal = [0.0, 3.0, 0.0, 1.0, 0.0, 5.0, 4.0, 0.0];
//! assert_eq!(detect_events(&signal, 2.0, 2), vec![1, 5]);
//! assert_eq!(PeakParams::default().detect(&signal), vec![1, 5]);
//! ```
//!
//! ### Collision-safe output names
//!
//! ```rust,no_run
//! use photon_counter::OutputSink;
//!
//! let sink = OutputSink::new("data");
//! // data/runs.csv, or data/runs_1.csv when that already exists
//! println!("{}", sink.resolve_name("runs.csv").display());
//! ```

pub mod event_detector;
pub mod instrument_link;
pub mod measurement;
pub mod oscilloscope;
pub mod output;
pub mod plot;
pub mod rotor_mount;
pub mod scope_connector;
pub mod scpi_terminal;
pub mod waveform;

#[cfg(test)]
mod testing;

// Re-export the main types for convenience
pub use instrument_link::{InstrumentLink, LinkError};

pub use scpi_terminal::ScpiTerminal;

pub use scope_connector::{ConnectorError, ScopeConnector, ScopeDevice};

pub use waveform::{
    AcquisitionError, CalibratedSignal, Framing, Preamble, ProtocolError, Waveform,
};

pub use oscilloscope::{Channel, Oscilloscope, ScopeProfile};

pub use event_detector::{detect_events, PeakParams};

pub use measurement::{
    AnglePoint, EventStats, Measurement, MeasurementConfig, MeasurementError, RunSummary,
    SingleCapture, TrialFailurePolicy, TrialRecord,
};

pub use output::{OutputError, OutputSink};

pub use plot::{PlotError, PlotStyle};

pub use rotor_mount::{RotorMount, RotorMountError};
