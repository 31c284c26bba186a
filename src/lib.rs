//! # shazam-fingerprint
//!
//! A streaming implementation of Shazam's audio fingerprinting algorithm:
//! feed it 16 kHz mono PCM samples and it produces the same binary
//! signature format Shazam's own clients exchange with its recognition
//! service.
//!
//! This crate covers the DSP pipeline and the wire codec only - it does
//! not perform network recognition, audio capture, or audio decoding.
//! Callers bring their own decoded PCM and do whatever they like with the
//! resulting [`DecodedSignature`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use shazam_fingerprint::SignatureGenerator;
//!
//! let samples: Vec<i16> = vec![0; 16000 * 3];
//! let signature = SignatureGenerator::signature_from_samples(&samples).unwrap();
//! let uri = signature.encode_to_uri().unwrap();
//! println!("{}", uri);
//! ```

pub mod config;
pub mod error;
pub mod ring_buffer;

pub mod fingerprinting {
    pub mod algorithm;
    pub mod hanning;
    pub mod signature_format;
}

pub use config::GeneratorConfig;
pub use error::{FingerprintError, Result};
pub use fingerprinting::algorithm::SignatureGenerator;
pub use fingerprinting::signature_format::{DecodedSignature, FrequencyBand, FrequencyPeak};

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
