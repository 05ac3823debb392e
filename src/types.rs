use chrono::{DateTime, Utc};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Real-valued waveform samples (double precision)
pub type Waveform = Array1<f64>;

/// Conversion from m/s^2 to cm/s^2
pub const M_TO_CM: f64 = 100.0;

/// Standard gravity in cm/s^2
pub const G_CM_S2: f64 = 980.665;

/// Physical units category of a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitsType {
    /// Acceleration (cm/s^2 after response removal)
    Acc,
    /// Velocity (cm/s)
    Vel,
    /// Displacement (cm)
    Disp,
    /// Raw digitizer counts
    Counts,
}

impl std::fmt::Display for UnitsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitsType::Acc => write!(f, "acc"),
            UnitsType::Vel => write!(f, "vel"),
            UnitsType::Disp => write!(f, "disp"),
            UnitsType::Counts => write!(f, "counts"),
        }
    }
}

/// Processing level of a record (V0 = raw counts through V3 = derived products)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProcessLevel {
    V0,
    V1,
    V2,
    V3,
}

impl std::fmt::Display for ProcessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessLevel::V0 => write!(f, "V0"),
            ProcessLevel::V1 => write!(f, "V1"),
            ProcessLevel::V2 => write!(f, "V2"),
            ProcessLevel::V3 => write!(f, "V3"),
        }
    }
}

/// Instrument category derived from the second channel-code character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentType {
    /// Strong-motion accelerometer (channel code ?N?)
    Accelerometer,
    /// High-gain or broadband seismometer (channel code ?H? or ?L?)
    Seismometer,
    /// Anything else
    Unsupported,
}

/// Category of a recorded trace/stream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Malformed input data or missing required metadata
    Data,
    /// Numerical failure inside a processing step
    Processing,
    /// An explicit QA criterion was not met
    QaCheck,
    /// Inconsistent instrument-response metadata
    ResponseMetadata,
    /// A step required a parameter not set by any previous step
    MissingPrereq,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Data => write!(f, "data"),
            FailureKind::Processing => write!(f, "processing"),
            FailureKind::QaCheck => write!(f, "qa_check"),
            FailureKind::ResponseMetadata => write!(f, "response_metadata"),
            FailureKind::MissingPrereq => write!(f, "missing_prereq"),
        }
    }
}

/// Failure recorded on a trace. Only the first failure is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceFailure {
    /// Name of the step or check that failed the trace
    pub step: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// Sensor coordinates
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    /// Elevation above sea level (m)
    pub elevation: f64,
}

/// One stage of an instrument response chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseStage {
    pub gain: f64,
    /// Frequency at which the gain is specified (Hz)
    pub gain_frequency: f64,
    pub input_units: String,
    pub output_units: String,
    /// Poles of the stage transfer function (rad/s)
    #[serde(default)]
    pub poles: Vec<(f64, f64)>,
    /// Zeros of the stage transfer function (rad/s)
    #[serde(default)]
    pub zeros: Vec<(f64, f64)>,
    /// A0 normalization factor
    #[serde(default = "one")]
    pub normalization: f64,
}

fn one() -> f64 {
    1.0
}

/// Complete instrument response description attached to a trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentResponse {
    pub stages: Vec<ResponseStage>,
    /// Overall sensitivity (counts per input unit)
    pub sensitivity: f64,
    /// Input units of the overall sensitivity, e.g. "m/s^2"
    pub sensitivity_units: String,
    pub sensitivity_frequency: f64,
}

impl InstrumentResponse {
    /// Product of all stage gains
    pub fn stage_gain_product(&self) -> f64 {
        self.stages.iter().map(|s| s.gain).product()
    }

    /// True if at least one stage carries poles or zeros
    pub fn has_paz(&self) -> bool {
        self.stages
            .iter()
            .any(|s| !s.poles.is_empty() || !s.zeros.is_empty())
    }
}

/// Library error type
#[derive(Debug, thiserror::Error)]
pub enum GmError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid data: {0}")]
    Data(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("QA check failed: {0}")]
    QaCheck(String),

    #[error("Response metadata error: {0}")]
    ResponseMetadata(String),

    #[error("Missing prerequisite: {0}")]
    MissingPrereq(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type GmResult<T> = Result<T, GmError>;

/// Shift an instant by a (possibly fractional, possibly negative) number of seconds
pub fn add_seconds(t: DateTime<Utc>, seconds: f64) -> DateTime<Utc> {
    t + chrono::Duration::nanoseconds((seconds * 1e9).round() as i64)
}

/// Seconds between two instants (a - b)
pub fn seconds_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    (a - b)
        .num_nanoseconds()
        .map(|n| n as f64 * 1e-9)
        .unwrap_or_else(|| (a - b).num_milliseconds() as f64 * 1e-3)
}
