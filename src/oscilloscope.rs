use crate::instrument_link::{InstrumentLink, LinkError};
use crate::scpi_terminal::DEFAULT_MAX_BLOCK_LEN;
use crate::waveform::{self, AcquisitionError, Framing, Preamble, Waveform};
use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

pub const IDENTIFY: &str = "*IDN?";
pub const WAVEFORM_PREAMBLE: &str = ":WAV:PRE?";
pub const SAMPLE_RATE: &str = ":ACQ:SRAT?";
pub const WAVEFORM_MODE_NORMAL: &str = ":WAV:MODE NORM";
pub const WAVEFORM_DATA: &str = "WAV:DATA?";
pub const FREQUENCY: &str = ":MEASure:FREQuency?";
pub const TIME_SCALE: &str = ":TIM:SCAL?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Chan1,
    Chan2,
    Chan3,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chan1 => "CHAN1",
            Self::Chan2 => "CHAN2",
            Self::Chan3 => "CHAN3",
        }
    }

    fn source_command(self) -> String {
        format!(":WAV:SOUR {}", self.as_str())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown channel '{0}', expected CHAN1, CHAN2 or CHAN3")]
pub struct UnknownChannel(String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CHAN1" | "CHANNEL1" | "1" => Ok(Self::Chan1),
            "CHAN2" | "CHANNEL2" | "2" => Ok(Self::Chan2),
            "CHAN3" | "CHANNEL3" | "3" => Ok(Self::Chan3),
            _ => Err(UnknownChannel(s.to_string())),
        }
    }
}

/// Model-specific constants of the oscilloscope.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeProfile {
    /// Header and trailer around the sample bytes of `WAV:DATA?`.
    pub framing: Framing,
    /// Horizontal divisions on screen; with the time scale this gives the capture window.
    pub horizontal_divisions: f64,
    pub read_timeout: Duration,
    /// Pause after a plain command so the instrument can apply it.
    pub settle_delay: Duration,
    pub baud_rate: u32,
    /// Largest reply the link accepts; guards against corrupt length headers.
    pub max_block_len: usize,
}

impl Default for ScopeProfile {
    fn default() -> Self {
        Self {
            framing: Framing::default(),
            horizontal_divisions: 14.0,
            read_timeout: Duration::from_millis(1000),
            settle_delay: Duration::from_millis(100),
            baud_rate: 115_200,
            max_block_len: DEFAULT_MAX_BLOCK_LEN,
        }
    }
}

/// A connected oscilloscope.
///
/// Captures change the waveform source and mode on the instrument, so a
/// capture needs exclusive access for its whole command sequence. Share an
/// `Oscilloscope` between threads only behind a lock held per capture.
pub struct Oscilloscope<L> {
    link: L,
    profile: ScopeProfile,
    identity: Option<String>,
}

impl<L: InstrumentLink> Oscilloscope<L> {
    pub fn new(link: L, profile: ScopeProfile) -> Self {
        Self {
            link,
            profile,
            identity: None,
        }
    }

    pub fn profile(&self) -> &ScopeProfile {
        &self.profile
    }

    /// `*IDN?` reply from the last [`identify`](Self::identify) call.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn identify(&mut self) -> Result<&str, LinkError> {
        let identity = self.link.query(IDENTIFY)?;
        log::info!("Connected to: {}", identity);
        Ok(self.identity.insert(identity).as_str())
    }

    /// Send a command and give the instrument time to apply it.
    pub fn send_command(&mut self, command: &str) -> Result<(), LinkError> {
        self.link.write(command)?;
        if !self.profile.settle_delay.is_zero() {
            thread::sleep(self.profile.settle_delay);
        }
        Ok(())
    }

    pub fn send_query(&mut self, command: &str) -> Result<String, LinkError> {
        self.link.query(command)
    }

    fn query_number(&mut self, command: &'static str) -> Result<f64, AcquisitionError> {
        let reply = self.link.query(command)?;
        Ok(waveform::parse_first_number(command, &reply)?)
    }

    /// Frequency the instrument currently measures on its active channel, in Hz.
    pub fn frequency(&mut self) -> Result<f64, AcquisitionError> {
        self.query_number(FREQUENCY)
    }

    /// Horizontal scale in seconds per division.
    pub fn time_per_division(&mut self) -> Result<f64, AcquisitionError> {
        self.query_number(TIME_SCALE)
    }

    /// Capture the waveform currently displayed on `channel`.
    #[tracing::instrument(skip(self))]
    pub fn capture_waveform(&mut self, channel: Channel) -> Result<Waveform, AcquisitionError> {
        #[cfg(feature = "cpu-profiling")]
        let _span = tracy_client::span!("capture_waveform");

        let preamble_reply = self.link.query(WAVEFORM_PREAMBLE)?;
        let sample_rate_reply = self.link.query(SAMPLE_RATE)?;
        let preamble = Preamble::parse(&preamble_reply, &sample_rate_reply)?;

        self.link.write(&channel.source_command())?;
        self.link.write(WAVEFORM_MODE_NORMAL)?;
        self.link.write(WAVEFORM_DATA)?;
        let raw = self.link.read_raw()?;

        let signal = waveform::reconstruct(&raw, &preamble, self.profile.framing)?;
        log::debug!(
            "Captured {} samples from {} at {} Sa/s",
            signal.len(),
            channel,
            preamble.sample_rate
        );
        Ok(Waveform { signal, preamble })
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    /// Close the connection. Failures are logged, never returned.
    pub fn disconnect(mut self) {
        match self.link.close() {
            Ok(()) => log::info!("Oscilloscope disconnected"),
            Err(e) => log::warn!("Error while disconnecting oscilloscope: {}", e),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::testing::{ieee_block, ScriptedLink, READ_RAW};

    pub(crate) const PREAMBLE_5: &str = "0,0,5,1,1.000000e-06,0,0,1,0,0";

    pub(crate) fn quiet_profile() -> ScopeProfile {
        ScopeProfile {
            settle_delay: Duration::ZERO,
            ..ScopeProfile::default()
        }
    }

    #[test]
    fn test_default_profile() {
        let profile = ScopeProfile::default();
        assert_eq!(profile.framing, Framing::default());
        assert_eq!(profile.horizontal_divisions, 14.0);
        assert_eq!(profile.read_timeout, Duration::from_millis(1000));
        assert_eq!(profile.max_block_len, DEFAULT_MAX_BLOCK_LEN);
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(Channel::Chan1.as_str(), "CHAN1");
        assert_eq!(Channel::Chan2.to_string(), "CHAN2");
        assert_eq!("chan3".parse::<Channel>().unwrap(), Channel::Chan3);
        assert_eq!("1".parse::<Channel>().unwrap(), Channel::Chan1);
        assert!("CHAN4".parse::<Channel>().is_err());
    }

    #[test]
    fn test_capture_issues_protocol_in_order() {
        let link = ScriptedLink::new()
            .reply(WAVEFORM_PREAMBLE, PREAMBLE_5)
            .reply(SAMPLE_RATE, "1.000000e+06")
            .raw_block(ieee_block(&[10, 12, 20, 12, 10]));
        let mut scope = Oscilloscope::new(link, quiet_profile());

        let waveform = scope.capture_waveform(Channel::Chan2).unwrap();
        assert_eq!(waveform.signal.signal, vec![10.0, 12.0, 20.0, 12.0, 10.0]);
        assert_eq!(waveform.signal.time, vec![0.0, 1e-6, 2e-6, 3e-6, 4e-6]);
        assert_eq!(waveform.preamble.sample_rate, 1e6);

        assert_eq!(
            scope.into_link().log,
            vec![
                WAVEFORM_PREAMBLE,
                SAMPLE_RATE,
                ":WAV:SOUR CHAN2",
                WAVEFORM_MODE_NORMAL,
                WAVEFORM_DATA,
                READ_RAW,
            ]
        );
    }

    #[test]
    fn test_capture_stops_at_malformed_preamble() {
        let link = ScriptedLink::new()
            .reply(WAVEFORM_PREAMBLE, "0,0,5")
            .reply(SAMPLE_RATE, "1e6");
        let mut scope = Oscilloscope::new(link, quiet_profile());

        let err = scope.capture_waveform(Channel::Chan1).unwrap_err();
        assert!(matches!(err, AcquisitionError::Protocol(_)));
        // nothing changed on the instrument
        assert_eq!(scope.into_link().log, vec![WAVEFORM_PREAMBLE, SAMPLE_RATE]);
    }

    #[test]
    fn test_capture_timeout_is_acquisition_error() {
        let mut scope = Oscilloscope::new(ScriptedLink::new(), quiet_profile());
        let err = scope.capture_waveform(Channel::Chan1).unwrap_err();
        assert!(matches!(err, AcquisitionError::Link(LinkError::Timeout { .. })));
    }

    #[test]
    fn test_capture_rejects_length_mismatch() {
        let link = ScriptedLink::new()
            .reply(WAVEFORM_PREAMBLE, PREAMBLE_5)
            .reply(SAMPLE_RATE, "1e6")
            .raw_block(ieee_block(&[1, 2, 3]));
        let mut scope = Oscilloscope::new(link, quiet_profile());
        assert!(matches!(
            scope.capture_waveform(Channel::Chan1),
            Err(AcquisitionError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_numeric_queries() {
        let link = ScriptedLink::new()
            .reply(FREQUENCY, "1.000000e+03\n")
            .reply(TIME_SCALE, "5.000000e-04");
        let mut scope = Oscilloscope::new(link, quiet_profile());
        assert_eq!(scope.frequency().unwrap(), 1000.0);
        assert_eq!(scope.time_per_division().unwrap(), 5e-4);
    }

    #[test]
    fn test_identify_and_disconnect() {
        let link = ScriptedLink::new().reply(IDENTIFY, "RIGOL TECHNOLOGIES,DS1104Z,X,00.04");
        let mut scope = Oscilloscope::new(link, quiet_profile());
        assert_eq!(scope.identify().unwrap(), "RIGOL TECHNOLOGIES,DS1104Z,X,00.04");
        assert_eq!(scope.identity(), Some("RIGOL TECHNOLOGIES,DS1104Z,X,00.04"));

        scope.send_command(":RUN").unwrap();
        assert_eq!(scope.link_mut().log.last().map(String::as_str), Some(":RUN"));
        scope.disconnect();
    }

    #[test]
    fn test_disconnect_failure_is_not_fatal() {
        let link = ScriptedLink::new().failing_close();
        Oscilloscope::new(link, quiet_profile()).disconnect();
    }
}
