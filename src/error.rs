use std::fmt;

/// Errors raised by the signature generator and codec.
///
/// Every variant is fatal to the operation that raised it and is not
/// retryable inside this crate - a caller who wants to retry (e.g. a
/// corrupted network download) needs to re-fetch or re-generate the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintError {
    /// Wrong `magic1`/`magic2`, wrong `size_minus_header`, wrong CRC-32, or
    /// an unrecognized sample rate tag.
    MalformedHeader(String),
    /// Preamble mismatch, a truncated TLV entry, or an unknown band tag.
    MalformedBody(String),
    /// A URI that doesn't start with `data:audio/vnd.shazam.sig;base64,`.
    InvalidUri(String),
    /// Peaks handed to the encoder were not sorted by `fft_pass_number`
    /// within a band.
    EncoderInvariantViolation(String),
    /// An internal DSP invariant was violated (FFT/window length mismatch,
    /// or a non-positive interpolation denominator). Indicates a bug in
    /// this crate rather than bad caller input.
    DspInvariantViolation(String),
}

impl fmt::Display for FingerprintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FingerprintError::MalformedHeader(msg) => write!(f, "malformed signature header: {}", msg),
            FingerprintError::MalformedBody(msg) => write!(f, "malformed signature body: {}", msg),
            FingerprintError::InvalidUri(msg) => write!(f, "invalid signature URI: {}", msg),
            FingerprintError::EncoderInvariantViolation(msg) => write!(f, "encoder invariant violated: {}", msg),
            FingerprintError::DspInvariantViolation(msg) => write!(f, "DSP invariant violated: {}", msg),
        }
    }
}

impl std::error::Error for FingerprintError {}

pub type Result<T> = std::result::Result<T, FingerprintError>;
