//! Waveform metadata and the reconstruction of a calibrated signal from the
//! raw bytes an oscilloscope returns.

use crate::instrument_link::LinkError;

/// Number of comma-separated fields in a `:WAV:PRE?` reply.
pub const PREAMBLE_FIELDS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Reply to {query} has {actual} fields, expected at least {expected}: '{reply}'")]
    MissingField {
        query: &'static str,
        expected: usize,
        actual: usize,
        reply: String,
    },

    #[error("Field '{field}' is not a number: '{value}'")]
    InvalidNumber { field: &'static str, value: String },
}

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("Instrument link error: {0}")]
    Link(#[from] LinkError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Raw response of {actual} bytes is shorter than its {framing}-byte framing")]
    Truncated { actual: usize, framing: usize },

    #[error("Waveform holds {actual} samples but the preamble declares {declared} points")]
    LengthMismatch { declared: i64, actual: usize },
}

/// Per-capture metadata describing the buffer layout and axis scaling.
#[derive(Debug, Clone, PartialEq)]
pub struct Preamble {
    pub format: i64,
    pub kind: i64,
    pub points: i64,
    pub count: i64,
    pub sample_rate: f64,
    pub x_increment: f64,
    pub x_origin: f64,
    pub x_reference: f64,
    pub y_increment: f64,
    pub y_origin: f64,
    pub y_reference: f64,
}

impl Preamble {
    /// Build a preamble from the `:WAV:PRE?` and `:ACQ:SRAT?` replies.
    pub fn parse(preamble: &str, sample_rate: &str) -> Result<Self, ProtocolError> {
        let fields: Vec<&str> = preamble.trim().split(',').map(str::trim).collect();
        if fields.len() < PREAMBLE_FIELDS {
            return Err(ProtocolError::MissingField {
                query: ":WAV:PRE?",
                expected: PREAMBLE_FIELDS,
                actual: fields.len(),
                reply: preamble.trim().to_string(),
            });
        }

        Ok(Self {
            format: parse_integer("format", fields[0])?,
            kind: parse_integer("type", fields[1])?,
            points: parse_integer("points", fields[2])?,
            count: parse_integer("count", fields[3])?,
            sample_rate: parse_first_number("sample_rate", sample_rate)?,
            x_increment: parse_float("x_increment", fields[4])?,
            x_origin: parse_float("x_origin", fields[5])?,
            x_reference: parse_float("x_reference", fields[6])?,
            y_increment: parse_float("y_increment", fields[7])?,
            y_origin: parse_float("y_origin", fields[8])?,
            y_reference: parse_float("y_reference", fields[9])?,
        })
    }

    /// Amplitude of one raw sample.
    pub fn scale(&self, raw: u8) -> f64 {
        (f64::from(raw) - self.y_origin - self.y_reference) * self.y_increment
    }
}

fn parse_float(field: &'static str, value: &str) -> Result<f64, ProtocolError> {
    value
        .trim()
        .parse()
        .map_err(|_| ProtocolError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

/// Integers are sometimes reported in float notation (`1.200000e+03`);
/// those are accepted when they carry no fractional part.
fn parse_integer(field: &'static str, value: &str) -> Result<i64, ProtocolError> {
    let trimmed = value.trim();
    if let Ok(integer) = trimmed.parse::<i64>() {
        return Ok(integer);
    }
    match trimmed.parse::<f64>() {
        Ok(float) if float.is_finite() && float.fract() == 0.0 => Ok(float as i64),
        _ => Err(ProtocolError::InvalidNumber {
            field,
            value: value.to_string(),
        }),
    }
}

/// Parse the first comma-separated field of a numeric reply.
pub fn parse_first_number(field: &'static str, reply: &str) -> Result<f64, ProtocolError> {
    let first = reply.split(',').next().unwrap_or_default();
    parse_float(field, first)
}

/// Amplitude and time vectors of one capture, always of equal length.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CalibratedSignal {
    pub signal: Vec<f64>,
    pub time: Vec<f64>,
}

impl CalibratedSignal {
    /// Scale raw samples with the preamble's amplitude and time increments.
    pub fn from_samples(samples: &[u8], preamble: &Preamble) -> Self {
        let signal = samples.iter().map(|&raw| preamble.scale(raw)).collect();
        let time = (0..samples.len())
            .map(|i| i as f64 * preamble.x_increment)
            .collect();
        Self { signal, time }
    }

    pub fn len(&self) -> usize {
        self.signal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signal.is_empty()
    }

    /// Last timestamp of the capture.
    pub fn duration(&self) -> f64 {
        self.time.iter().copied().fold(0.0, f64::max)
    }

    /// Smallest and largest amplitude, `None` for an empty signal.
    pub fn amplitude_range(&self) -> Option<(f64, f64)> {
        if self.signal.is_empty() {
            return None;
        }
        let min = self.signal.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.signal.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some((min, max))
    }
}

/// One capture: the calibrated signal and the preamble it was derived from.
#[derive(Debug, Clone)]
pub struct Waveform {
    pub signal: CalibratedSignal,
    pub preamble: Preamble,
}

/// Fixed-size framing around the sample payload of a raw response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    pub header_len: usize,
    pub trailer_len: usize,
}

impl Default for Framing {
    fn default() -> Self {
        Self {
            header_len: 11,
            trailer_len: 1,
        }
    }
}

impl Framing {
    /// Strip header and trailer, leaving the sample bytes.
    pub fn payload<'a>(&self, raw: &'a [u8]) -> Result<&'a [u8], AcquisitionError> {
        let framing = self.header_len + self.trailer_len;
        if raw.len() < framing {
            return Err(AcquisitionError::Truncated {
                actual: raw.len(),
                framing,
            });
        }
        Ok(&raw[self.header_len..raw.len() - self.trailer_len])
    }
}

/// Turn a raw framed response into a calibrated signal, checking the sample
/// count against the preamble.
pub fn reconstruct(
    raw: &[u8],
    preamble: &Preamble,
    framing: Framing,
) -> Result<CalibratedSignal, AcquisitionError> {
    let samples = framing.payload(raw)?;
    if i64::try_from(samples.len()).ok() != Some(preamble.points) {
        return Err(AcquisitionError::LengthMismatch {
            declared: preamble.points,
            actual: samples.len(),
        });
    }
    Ok(CalibratedSignal::from_samples(samples, preamble))
}
