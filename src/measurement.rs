//! Repeated capture-and-count runs and single-capture reports.

use crate::event_detector::PeakParams;
use crate::instrument_link::InstrumentLink;
use crate::oscilloscope::{Channel, Oscilloscope};
use crate::output::{self, OutputError, OutputSink, EVENTS_COLUMN};
use crate::plot::{self, PlotError, PlotStyle};
use crate::rotor_mount::{RotorMount, RotorMountError};
use crate::waveform::{AcquisitionError, Waveform};
use polars::prelude::*;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Base name of the single-capture table and image.
pub const SINGLE_CAPTURE_NAME: &str = "single_event_picks";

#[derive(Debug, thiserror::Error)]
pub enum MeasurementError {
    #[error("Acquisition failed: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("Trial {trial} of {total} failed: {source}")]
    TrialFailed {
        trial: usize,
        total: usize,
        #[source]
        source: AcquisitionError,
        /// Table holding the trials completed before the failure, if written.
        partial: Option<PathBuf>,
    },

    #[error("Measurement run has no completed trials")]
    NoTrials,

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Plot error: {0}")]
    Plot(#[from] PlotError),

    #[error("Table error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Rotor mount error: {0}")]
    Rotor(#[from] RotorMountError),
}

/// Outcome of one acquire, detect and record cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialRecord {
    pub events: u64,
    pub frequency: f64,
}

/// What a run does when a trial fails.
///
/// The default aborts on the first failure and writes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrialFailurePolicy {
    /// Failed trials skipped before the run is aborted.
    pub max_failed_trials: usize,
    /// Write the completed trials before reporting an aborted run.
    pub persist_partial: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementConfig {
    pub peaks: PeakParams,
    pub failure_policy: TrialFailurePolicy,
    pub plot_style: PlotStyle,
}

/// Statistics of the `events` column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventStats {
    pub mean: f64,
    /// Sample standard deviation, absent for a single trial.
    pub std_dev: Option<f64>,
    pub min: f64,
    pub max: f64,
}

impl EventStats {
    pub fn from_frame(frame: &DataFrame) -> Result<Self, MeasurementError> {
        let events = || col(EVENTS_COLUMN).cast(DataType::Float64);
        let stats = frame
            .clone()
            .lazy()
            .select([
                events().mean().alias("mean"),
                events().std(1).alias("std_dev"),
                events().min().alias("min"),
                events().max().alias("max"),
            ])
            .collect()?;

        let value = |name: &str| -> PolarsResult<Option<f64>> { Ok(stats.column(name)?.f64()?.get(0)) };
        Ok(Self {
            mean: value("mean")?.ok_or(MeasurementError::NoTrials)?,
            std_dev: value("std_dev")?.filter(|s| s.is_finite()),
            min: value("min")?.ok_or(MeasurementError::NoTrials)?,
            max: value("max")?.ok_or(MeasurementError::NoTrials)?,
        })
    }
}

/// Summary of a finished `measure_count_events` run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub trials: Vec<TrialRecord>,
    pub failed_trials: usize,
    pub stats: EventStats,
    pub time_per_division: f64,
    /// Time covered by one capture, `time_per_division * divisions`.
    pub time_window: f64,
    pub counts_per_second: f64,
    pub frequency: f64,
    pub output: PathBuf,
}

/// One step of an angle sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct AnglePoint {
    /// Angle requested from the mount, in degrees.
    pub target: f64,
    /// Angle the mount reported after moving.
    pub reached: f64,
    pub summary: RunSummary,
}

/// Result of `measure_single_event`.
#[derive(Debug, Clone)]
pub struct SingleCapture {
    pub waveform: Waveform,
    pub events: Option<Vec<usize>>,
    pub frequency: f64,
    pub title: String,
    pub table: PathBuf,
    pub image: PathBuf,
}

/// Mean event count per capture scaled to one second.
pub fn counts_per_second(mean_events: f64, time_per_division: f64, divisions: f64) -> f64 {
    mean_events / (time_per_division * divisions)
}

/// Events per second from a table previously written by a run.
pub fn events_per_second_from_table(
    path: &Path,
    time_per_division: f64,
    divisions: f64,
) -> Result<f64, MeasurementError> {
    let frame = output::read_table(path)?;
    let stats = EventStats::from_frame(&frame)?;
    log::info!("Mean events in {}: {}", path.display(), stats.mean);
    Ok(counts_per_second(stats.mean, time_per_division, divisions))
}

/// Plot title of a single capture.
pub fn single_capture_title(frequency: f64, events: Option<&[usize]>) -> String {
    match events {
        Some(events) => format!(
            "Frequency: {} Hz - Number of Events: {}",
            frequency,
            events.len()
        ),
        None => format!("Frequency: {} Hz", frequency),
    }
}

/// Capture, count and persist pulse events from one oscilloscope.
pub struct Measurement<L> {
    scope: Oscilloscope<L>,
    sink: OutputSink,
    config: MeasurementConfig,
}

impl<L: InstrumentLink> Measurement<L> {
    pub fn new(scope: Oscilloscope<L>, sink: OutputSink) -> Self {
        Self {
            scope,
            sink,
            config: MeasurementConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MeasurementConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &MeasurementConfig {
        &self.config
    }

    pub fn sink(&self) -> &OutputSink {
        &self.sink
    }

    pub fn scope_mut(&mut self) -> &mut Oscilloscope<L> {
        &mut self.scope
    }

    pub fn into_scope(self) -> Oscilloscope<L> {
        self.scope
    }

    /// One trial: capture, detect, then read the measured frequency.
    pub fn count_events(&mut self, channel: Channel) -> Result<TrialRecord, AcquisitionError> {
        let waveform = self.scope.capture_waveform(channel)?;
        let events = self.config.peaks.detect(&waveform.signal.signal);
        let frequency = self.scope.frequency()?;
        Ok(TrialRecord {
            events: events.len() as u64,
            frequency,
        })
    }

    /// Run `num_iters` trials on `channel` and persist them as
    /// `events,frequency` under `output_name`.
    #[tracing::instrument(skip(self))]
    pub fn measure_count_events(
        &mut self,
        channel: Channel,
        num_iters: usize,
        output_name: &str,
    ) -> Result<RunSummary, MeasurementError> {
        if num_iters == 0 {
            return Err(MeasurementError::NoTrials);
        }
        let policy = self.config.failure_policy;

        let mut trials = Vec::with_capacity(num_iters);
        let mut failed_trials = 0;
        for trial in 1..=num_iters {
            match self.count_events(channel) {
                Ok(record) => {
                    log::debug!(
                        "Trial {}/{}: {} events at {} Hz",
                        trial,
                        num_iters,
                        record.events,
                        record.frequency
                    );
                    trials.push(record);
                }
                Err(source) if failed_trials < policy.max_failed_trials => {
                    failed_trials += 1;
                    log::warn!(
                        "Trial {}/{} failed, skipping ({} of {} allowed): {}",
                        trial,
                        num_iters,
                        failed_trials,
                        policy.max_failed_trials,
                        source
                    );
                }
                Err(source) => {
                    let partial = if policy.persist_partial && !trials.is_empty() {
                        let path = self.sink.write_trials(&trials, output_name)?;
                        log::warn!("Saved {} completed trials to {}", trials.len(), path.display());
                        Some(path)
                    } else {
                        None
                    };
                    return Err(MeasurementError::TrialFailed {
                        trial,
                        total: num_iters,
                        source,
                        partial,
                    });
                }
            }
        }

        if trials.is_empty() {
            return Err(MeasurementError::NoTrials);
        }

        let mut frame = output::trials_frame(&trials)?;
        let stats = EventStats::from_frame(&frame)?;
        let time_per_division = self.scope.time_per_division()?;
        let frequency = self.scope.frequency()?;
        let divisions = self.scope.profile().horizontal_divisions;
        let time_window = time_per_division * divisions;
        let counts_per_second = counts_per_second(stats.mean, time_per_division, divisions);

        log::info!("Mean counts: {}", stats.mean);
        log::info!("Time scale (s): {}", time_per_division);
        log::info!("Time window (s): {}", time_window);
        log::info!("Counts over 1s: {}", counts_per_second);
        log::info!("Frequency: {}", frequency);

        let output = self.sink.write_frame(&mut frame, output_name)?;
        log::info!("Saved {} trials to {}", trials.len(), output.display());

        Ok(RunSummary {
            trials,
            failed_trials,
            stats,
            time_per_division,
            time_window,
            counts_per_second,
            frequency,
            output,
        })
    }

    /// Capture once, optionally count events, and save both the samples and
    /// an annotated plot.
    #[tracing::instrument(skip(self))]
    pub fn measure_single_event(
        &mut self,
        channel: Channel,
        count_peaks: bool,
    ) -> Result<SingleCapture, MeasurementError> {
        let waveform = self.scope.capture_waveform(channel)?;
        let frequency = self.scope.frequency()?;

        let events = count_peaks.then(|| self.config.peaks.detect(&waveform.signal.signal));
        let title = single_capture_title(frequency, events.as_deref());

        let table = self
            .sink
            .write_signal(&waveform.signal, &format!("{SINGLE_CAPTURE_NAME}.csv"))?;
        let png = plot::render_signal_png(
            &waveform.signal,
            events.as_deref(),
            &title,
            &self.config.plot_style,
        )?;
        let image = self
            .sink
            .write_bytes(&png, &format!("{SINGLE_CAPTURE_NAME}.png"))?;

        log::info!(
            "Single event picks saved in {} and {}",
            image.display(),
            table.display()
        );

        Ok(SingleCapture {
            waveform,
            events,
            frequency,
            title,
            table,
            image,
        })
    }

    /// Move the mount to each angle in turn and run `num_iters` trials there.
    ///
    /// Each angle gets its own table, `rotor_{angle}deg.csv`. The first
    /// failure ends the sweep; the instruments stay with the caller, who
    /// disconnects them either way.
    #[tracing::instrument(skip(self, rotor))]
    pub fn sweep_angles<P: Read + Write>(
        &mut self,
        rotor: &mut RotorMount<P>,
        channel: Channel,
        angles: &[f64],
        num_iters: usize,
    ) -> Result<Vec<AnglePoint>, MeasurementError> {
        let mut points = Vec::with_capacity(angles.len());
        for &target in angles {
            rotor.set_angle(target)?;
            let reached = rotor.angle()?;
            let summary =
                self.measure_count_events(channel, num_iters, &format!("rotor_{target}deg.csv"))?;
            log::info!(
                "Rotor at {} degrees: {} counts per second",
                reached,
                summary.counts_per_second
            );
            points.push(AnglePoint {
                target,
                reached,
                summary,
            });
        }
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oscilloscope::tests::{quiet_profile, PREAMBLE_5};
    use crate::oscilloscope::{FREQUENCY, SAMPLE_RATE, TIME_SCALE, WAVEFORM_PREAMBLE};
    use crate::testing::{ieee_block, Duplex, ScriptedLink};
    use std::fs;
    use std::time::Duration;

    const POINTS: usize = 15;

    /// `n` unit-spaced pulses of height 10 in a 15-sample capture.
    fn pulse_train(n: usize) -> Vec<u8> {
        let mut samples = vec![0u8; POINTS];
        for k in 0..n {
            samples[2 * k + 1] = 10;
        }
        ieee_block(&samples)
    }

    fn counting_link(blocks: &[Vec<u8>]) -> ScriptedLink {
        let link = ScriptedLink::new()
            .reply(WAVEFORM_PREAMBLE, &format!("0,0,{POINTS},1,1e-6,0,0,1,0,0"))
            .reply(SAMPLE_RATE, "1e6")
            .reply(FREQUENCY, "1.000000e+03")
            .reply(TIME_SCALE, "1.000000e-03");
        blocks
            .iter()
            .cloned()
            .fold(link, ScriptedLink::raw_block)
    }

    fn measurement(link: ScriptedLink, dir: &Path) -> Measurement<ScriptedLink> {
        Measurement::new(Oscilloscope::new(link, quiet_profile()), OutputSink::new(dir))
    }

    fn event_column(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .skip(1)
            .map(|line| line.split(',').next().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_count_events_single_peak() {
        let link = ScriptedLink::new()
            .reply(WAVEFORM_PREAMBLE, PREAMBLE_5)
            .reply(SAMPLE_RATE, "1e6")
            .reply(FREQUENCY, "250")
            .raw_block(ieee_block(&[10, 12, 20, 12, 10]));
        let dir = tempfile::tempdir().unwrap();
        let mut measurement = measurement(link, dir.path());

        let record = measurement.count_events(Channel::Chan1).unwrap();
        assert_eq!(
            record,
            TrialRecord {
                events: 1,
                frequency: 250.0
            }
        );
    }

    #[test]
    fn test_measure_count_events_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let link = counting_link(&[pulse_train(5), pulse_train(7), pulse_train(6)]);
        let mut measurement = measurement(link, dir.path());

        let summary = measurement
            .measure_count_events(Channel::Chan1, 3, "dark_counts.csv")
            .unwrap();

        let events: Vec<u64> = summary.trials.iter().map(|t| t.events).collect();
        assert_eq!(events, vec![5, 7, 6]);
        assert_eq!(summary.stats.mean, 6.0);
        assert_eq!(summary.stats.min, 5.0);
        assert_eq!(summary.stats.max, 7.0);
        let std_dev = summary.stats.std_dev.unwrap();
        assert!((std_dev - 1.0).abs() < 1e-12);
        assert_eq!(summary.time_per_division, 1e-3);
        assert_eq!(summary.time_window, 1e-3 * 14.0);
        assert_eq!(summary.counts_per_second, 6.0 / (1e-3 * 14.0));
        assert_eq!(summary.frequency, 1000.0);
        assert_eq!(summary.failed_trials, 0);

        assert_eq!(summary.output, dir.path().join("dark_counts.csv"));
        assert_eq!(event_column(&summary.output), vec!["5", "7", "6"]);
        let header = fs::read_to_string(&summary.output).unwrap();
        assert!(header.starts_with("events,frequency"));
    }

    #[test]
    fn test_measure_count_events_row_count_and_mean() {
        let dir = tempfile::tempdir().unwrap();
        let mut measurement = measurement(counting_link(&[pulse_train(4)]), dir.path());

        let summary = measurement
            .measure_count_events(Channel::Chan2, 25, "laser.csv")
            .unwrap();
        let column = event_column(&summary.output);
        assert_eq!(column.len(), 25);

        let mean = column.iter().map(|e| e.parse::<f64>().unwrap()).sum::<f64>() / 25.0;
        assert_eq!(summary.stats.mean, mean);
    }

    #[test]
    fn test_runs_never_overwrite_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let mut measurement = measurement(counting_link(&[pulse_train(2)]), dir.path());

        let first = measurement.measure_count_events(Channel::Chan1, 2, "run.csv").unwrap();
        let second = measurement.measure_count_events(Channel::Chan1, 2, "run.csv").unwrap();
        assert_eq!(first.output, dir.path().join("run.csv"));
        assert_eq!(second.output, dir.path().join("run_1.csv"));
    }

    #[test]
    fn test_failed_trial_aborts_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let bad = ieee_block(&[1, 2, 3]);
        let link = counting_link(&[pulse_train(5), bad, pulse_train(6)]);
        let mut measurement = measurement(link, dir.path());

        let err = measurement
            .measure_count_events(Channel::Chan1, 3, "aborted.csv")
            .unwrap_err();
        match err {
            MeasurementError::TrialFailed {
                trial,
                total,
                source,
                partial,
            } => {
                assert_eq!((trial, total), (2, 3));
                assert!(matches!(source, AcquisitionError::LengthMismatch { .. }));
                assert!(partial.is_none());
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!dir.path().join("aborted.csv").exists());
    }

    #[test]
    fn test_failed_trial_persists_partial_results() {
        let dir = tempfile::tempdir().unwrap();
        let bad = ieee_block(&[1, 2, 3]);
        let link = counting_link(&[pulse_train(5), pulse_train(7), bad]);
        let config = MeasurementConfig {
            failure_policy: TrialFailurePolicy {
                max_failed_trials: 0,
                persist_partial: true,
            },
            ..MeasurementConfig::default()
        };
        let mut measurement = measurement(link, dir.path()).with_config(config);

        let err = measurement
            .measure_count_events(Channel::Chan1, 10, "partial.csv")
            .unwrap_err();
        match err {
            MeasurementError::TrialFailed {
                trial,
                partial: Some(partial),
                ..
            } => {
                assert_eq!(trial, 3);
                assert_eq!(event_column(&partial), vec!["5", "7"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_failed_trials_skipped_up_to_cap() {
        let dir = tempfile::tempdir().unwrap();
        let bad = ieee_block(&[1, 2, 3]);
        let link = counting_link(&[pulse_train(3), bad.clone(), pulse_train(5), bad, pulse_train(1)]);
        let config = MeasurementConfig {
            failure_policy: TrialFailurePolicy {
                max_failed_trials: 2,
                persist_partial: false,
            },
            ..MeasurementConfig::default()
        };
        let mut measurement = measurement(link, dir.path()).with_config(config);

        let summary = measurement
            .measure_count_events(Channel::Chan1, 5, "skips.csv")
            .unwrap();
        assert_eq!(summary.failed_trials, 2);
        assert_eq!(event_column(&summary.output), vec!["3", "5", "1"]);
        assert_eq!(summary.stats.mean, 3.0);
    }

    #[test]
    fn test_zero_iterations_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut measurement = measurement(counting_link(&[pulse_train(1)]), dir.path());
        assert!(matches!(
            measurement.measure_count_events(Channel::Chan1, 0, "none.csv"),
            Err(MeasurementError::NoTrials)
        ));
    }

    #[test]
    fn test_custom_peak_params() {
        let dir = tempfile::tempdir().unwrap();
        let config = MeasurementConfig {
            peaks: PeakParams {
                min_height: 11.0,
                min_distance: 2,
            },
            ..MeasurementConfig::default()
        };
        let mut measurement = measurement(counting_link(&[pulse_train(7)]), dir.path()).with_config(config);
        assert_eq!(measurement.count_events(Channel::Chan1).unwrap().events, 0);
    }

    #[test]
    fn test_sweep_angles() {
        let dir = tempfile::tempdir().unwrap();
        let mut rotor = RotorMount::new(Duplex::new(b"OK\r\n0.00\r\nOK\r\n45.00\r\n"), Duration::ZERO);
        let mut measurement = measurement(counting_link(&[pulse_train(2)]), dir.path());

        let points = measurement
            .sweep_angles(&mut rotor, Channel::Chan1, &[0.0, 45.0], 3)
            .unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].target, 45.0);
        assert_eq!(points[1].reached, 45.0);
        assert_eq!(points[1].summary.stats.mean, 2.0);
        assert_eq!(points[0].summary.output, dir.path().join("rotor_0deg.csv"));
        assert_eq!(points[1].summary.output, dir.path().join("rotor_45deg.csv"));
        rotor.disconnect();
    }

    #[test]
    fn test_sweep_stops_at_rotor_failure() {
        let dir = tempfile::tempdir().unwrap();
        // second move gets no acknowledgement
        let mut rotor = RotorMount::new(Duplex::new(b"OK\r\n0.00\r\n"), Duration::ZERO);
        let mut measurement = measurement(counting_link(&[pulse_train(2)]), dir.path());

        let err = measurement
            .sweep_angles(&mut rotor, Channel::Chan1, &[0.0, 90.0, 180.0], 2)
            .unwrap_err();
        assert!(matches!(
            err,
            MeasurementError::Rotor(RotorMountError::NoReply { .. })
        ));
        assert!(dir.path().join("rotor_0deg.csv").exists());
        assert!(!dir.path().join("rotor_90deg.csv").exists());

        // both instruments are still owned here and can be released
        let link = measurement.into_scope().into_link();
        assert!(!link.closed);
        Oscilloscope::new(link, quiet_profile()).disconnect();
        rotor.disconnect();
    }

    #[test]
    fn test_counts_per_second() {
        assert_eq!(counts_per_second(7.0, 0.5, 14.0), 1.0);
    }

    #[test]
    fn test_events_per_second_from_table() {
        let dir = tempfile::tempdir().unwrap();
        let sink = OutputSink::new(dir.path());
        let trials: Vec<TrialRecord> = [5, 7, 6]
            .iter()
            .map(|&events| TrialRecord {
                events,
                frequency: 100.0,
            })
            .collect();
        let path = sink.write_trials(&trials, "stored.csv").unwrap();

        let rate = events_per_second_from_table(&path, 1e-3, 14.0).unwrap();
        assert_eq!(rate, 6.0 / (1e-3 * 14.0));
    }

    #[test]
    fn test_single_capture_title() {
        assert_eq!(
            single_capture_title(1000.0, Some(&[1, 3, 5])),
            "Frequency: 1000 Hz - Number of Events: 3"
        );
        assert_eq!(single_capture_title(12.5, None), "Frequency: 12.5 Hz");
    }

    #[test]
    fn test_measure_single_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut measurement = measurement(counting_link(&[pulse_train(3)]), dir.path());

        let capture = measurement.measure_single_event(Channel::Chan1, true).unwrap();

        let table = dir.path().join("single_event_picks.csv");
        let text = fs::read_to_string(&table).unwrap();
        assert!(text.starts_with("time,signal"));
        assert_eq!(text.lines().count(), 1 + POINTS);

        assert_eq!(capture.events, Some(vec![1, 3, 5]));
        assert_eq!(capture.title, "Frequency: 1000 Hz - Number of Events: 3");
        assert_eq!(capture.table, table);
        assert_eq!(capture.image, dir.path().join("single_event_picks.png"));
        assert_eq!(&fs::read(&capture.image).unwrap()[..4], b"\x89PNG");
    }

    #[test]
    fn test_measure_single_event_without_counting() {
        let dir = tempfile::tempdir().unwrap();
        let mut measurement = measurement(counting_link(&[pulse_train(3)]), dir.path());
        let capture = measurement.measure_single_event(Channel::Chan2, false).unwrap();
        assert_eq!(capture.events, None);
        assert_eq!(capture.title, "Frequency: 1000 Hz");
        assert!(capture.table.exists());
        assert!(capture.image.exists());
    }
}
