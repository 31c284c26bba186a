//! Binary wire format for a Shazam signature: a 48-byte packed header,
//! CRC-32 checksummed, followed by a length-prefixed TLV body of
//! per-band peak streams, armored as a base64 data URI.

use std::collections::HashMap;
use std::convert::TryFrom;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{FingerprintError, Result};

pub const DATA_URI_PREFIX: &str = "data:audio/vnd.shazam.sig;base64,";

const HEADER_SIZE: usize = 48;
const HEADER_MAGIC1: u32 = 0xCAFE_2580;
const HEADER_MAGIC2: u32 = 0x9411_9C00;
const HEADER_MAGIC3: u32 = (15 << 19) + 0x4_0000;

const BODY_PREAMBLE_MAGIC: u32 = 0x4000_0000;
const TLV_BAND_TAG_BASE: u32 = 0x6003_0040;

/// One of the four closed frequency ranges a peak is bucketed into.
///
/// `Band0To250` is reachable only when decoding non-conforming input (no
/// conforming encoder ever emits it); decoding it is treated as an unknown
/// band tag error rather than a silently accepted empty band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
pub enum FrequencyBand {
    Band0To250 = -1,
    Band250To520 = 0,
    Band520To1450 = 1,
    Band1450To3500 = 2,
    Band3500To5500 = 3,
}

impl FrequencyBand {
    /// Classify a frequency in Hz into its band, discarding anything
    /// outside `[250, 5500]`. Compared as floats before any truncation, so
    /// e.g. `5500.7` is discarded rather than truncating to `5500` and
    /// falling inside `Band3500To5500`.
    pub fn from_frequency_hz(frequency_hz: f64) -> Option<Self> {
        if frequency_hz < 250.0 || frequency_hz > 5500.0 {
            None
        } else if frequency_hz < 520.0 {
            Some(FrequencyBand::Band250To520)
        } else if frequency_hz < 1450.0 {
            Some(FrequencyBand::Band520To1450)
        } else if frequency_hz < 3500.0 {
            Some(FrequencyBand::Band1450To3500)
        } else {
            Some(FrequencyBand::Band3500To5500)
        }
    }

    fn tag(self) -> i32 {
        self as i32
    }

    fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(FrequencyBand::Band250To520),
            1 => Some(FrequencyBand::Band520To1450),
            2 => Some(FrequencyBand::Band1450To3500),
            3 => Some(FrequencyBand::Band3500To5500),
            // -1 (Band0To250) and anything else is a decode-time error, not
            // a valid band: no conforming encoder ever emits it.
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FrequencyBand::Band0To250 => "band_0_250",
            FrequencyBand::Band250To520 => "band_250_520",
            FrequencyBand::Band520To1450 => "band_520_1450",
            FrequencyBand::Band1450To3500 => "band_1450_3500",
            FrequencyBand::Band3500To5500 => "band_3500_5500",
        }
    }
}

/// One detected spectral peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrequencyPeak {
    pub fft_pass_number: u32,
    pub peak_magnitude: u16,
    pub corrected_peak_frequency_bin: u16,
    pub sample_rate_hz: u32,
}

impl FrequencyPeak {
    pub fn new(
        fft_pass_number: u32,
        peak_magnitude: u16,
        corrected_peak_frequency_bin: u16,
        sample_rate_hz: u32,
    ) -> Self {
        Self {
            fft_pass_number,
            peak_magnitude,
            corrected_peak_frequency_bin,
            sample_rate_hz,
        }
    }

    /// Convert back a FFT bin to a frequency, given the sample rate, 1024
    /// useful bins and the multiplication by 64 made before storing it.
    pub fn frequency_hz(&self) -> f64 {
        self.corrected_peak_frequency_bin as f64 * (self.sample_rate_hz as f64 / 2.0 / 1024.0 / 64.0)
    }

    /// Not sure about this calculation but gives small enough numbers.
    pub fn amplitude_pcm(&self) -> f64 {
        (((self.peak_magnitude as f64 - 6144.0) / 1477.3).exp() * (1u64 << 17) as f64 / 2.0).sqrt() / 1024.0
    }

    /// Assumes that new FFT bins are emitted every 128 samples.
    pub fn seconds(&self) -> f64 {
        (self.fft_pass_number as f64 * 128.0) / self.sample_rate_hz as f64
    }
}

const SAMPLE_RATE_TO_TAG: [(u32, u32); 6] = [
    (8000, 1 << 27),
    (11025, 2 << 27),
    (16000, 3 << 27),
    (32000, 4 << 27),
    (44100, 5 << 27),
    (48000, 6 << 27),
];

fn sample_rate_to_tag(sample_rate_hz: u32) -> Option<u32> {
    SAMPLE_RATE_TO_TAG
        .iter()
        .find(|(rate, _)| *rate == sample_rate_hz)
        .map(|(_, tag)| *tag)
}

fn sample_rate_from_tag(tag: u32) -> Option<u32> {
    SAMPLE_RATE_TO_TAG
        .iter()
        .find(|(_, t)| *t == tag)
        .map(|(rate, _)| *rate)
}

/// A decoded (or about-to-be-encoded) Shazam signature: sample metadata
/// plus the peaks detected in each frequency band.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedSignature {
    pub sample_rate_hz: u32,
    pub number_samples: u32,
    pub frequency_band_to_sound_peaks: HashMap<FrequencyBand, Vec<FrequencyPeak>>,
}

impl DecodedSignature {
    pub fn new(sample_rate_hz: u32) -> Self {
        Self {
            sample_rate_hz,
            number_samples: 0,
            frequency_band_to_sound_peaks: HashMap::new(),
        }
    }

    pub fn total_peaks(&self) -> usize {
        self.frequency_band_to_sound_peaks.values().map(Vec::len).sum()
    }

    pub fn decode_from_uri(uri: &str) -> Result<Self> {
        let payload = uri.strip_prefix(DATA_URI_PREFIX).ok_or_else(|| {
            FingerprintError::InvalidUri(format!("missing prefix {:?}", DATA_URI_PREFIX))
        })?;

        let binary = base64::decode(payload)
            .map_err(|e| FingerprintError::InvalidUri(format!("invalid base64 payload: {}", e)))?;

        Self::decode_from_binary(&binary)
    }

    pub fn decode_from_binary(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(FingerprintError::MalformedHeader(format!(
                "message of {} bytes is shorter than the {}-byte header",
                data.len(),
                HEADER_SIZE
            )));
        }

        let crc = crc32fast::hash(&data[8..]);

        let mut header = Cursor::new(&data[..HEADER_SIZE]);
        let magic1 = header.read_u32::<LittleEndian>().unwrap();
        let crc32_field = header.read_u32::<LittleEndian>().unwrap();
        let size_minus_header = header.read_u32::<LittleEndian>().unwrap();
        let magic2 = header.read_u32::<LittleEndian>().unwrap();
        header.set_position(header.position() + 12); // void1
        let shifted_sample_rate_id = header.read_u32::<LittleEndian>().unwrap();
        header.set_position(header.position() + 8); // void2
        let number_samples_plus_rate_offset = header.read_u32::<LittleEndian>().unwrap();
        let _magic3 = header.read_u32::<LittleEndian>().unwrap(); // not checked: may legitimately vary

        if magic1 != HEADER_MAGIC1 || magic2 != HEADER_MAGIC2 {
            return Err(FingerprintError::MalformedHeader("wrong magic string".into()));
        }

        if size_minus_header as usize != data.len() - HEADER_SIZE {
            return Err(FingerprintError::MalformedHeader("wrong size specified in header".into()));
        }

        if crc32_field != crc {
            return Err(FingerprintError::MalformedHeader("wrong checksum specified in header".into()));
        }

        let sample_rate_hz = sample_rate_from_tag(shifted_sample_rate_id).ok_or_else(|| {
            FingerprintError::MalformedHeader(format!("unknown sample rate tag {:#010x}", shifted_sample_rate_id))
        })?;

        let number_samples =
            (number_samples_plus_rate_offset as f64 - sample_rate_hz as f64 * 0.24) as u32;

        let mut body = Cursor::new(&data[HEADER_SIZE..]);

        let preamble_magic = body
            .read_u32::<LittleEndian>()
            .map_err(|_| FingerprintError::MalformedBody("truncated preamble".into()))?;
        let preamble_size = body
            .read_u32::<LittleEndian>()
            .map_err(|_| FingerprintError::MalformedBody("truncated preamble".into()))?;

        if preamble_magic != BODY_PREAMBLE_MAGIC || preamble_size as usize != data.len() - HEADER_SIZE {
            return Err(FingerprintError::MalformedBody("unexpected first chunk format".into()));
        }

        let mut frequency_band_to_sound_peaks = HashMap::new();

        loop {
            let band_id = match body.read_u32::<LittleEndian>() {
                Ok(value) => value,
                Err(_) => break, // end of body
            };
            let peaks_size = body
                .read_u32::<LittleEndian>()
                .map_err(|_| FingerprintError::MalformedBody("truncated TLV length".into()))?;

            let band_tag = band_id as i64 - TLV_BAND_TAG_BASE as i64;
            let band = FrequencyBand::from_tag(band_tag as i32)
                .ok_or_else(|| FingerprintError::MalformedBody(format!("unknown band tag {}", band_tag)))?;

            let start = body.position() as usize;
            let end = start + peaks_size as usize;
            let body_bytes = body.get_ref();
            if end > body_bytes.len() {
                return Err(FingerprintError::MalformedBody("truncated peak stream".into()));
            }
            let mut peaks_buf = Cursor::new(&body_bytes[start..end]);

            let padding = (4 - (peaks_size as usize % 4)) % 4;
            body.set_position((end + padding) as u64);

            let mut peaks = Vec::new();
            let mut fft_pass_number: u32 = 0;

            while (peaks_buf.position() as usize) < peaks_buf.get_ref().len() {
                let offset_byte = peaks_buf
                    .read_u8()
                    .map_err(|_| FingerprintError::MalformedBody("truncated peak entry".into()))?;

                if offset_byte == 0xFF {
                    fft_pass_number = peaks_buf
                        .read_u32::<LittleEndian>()
                        .map_err(|_| FingerprintError::MalformedBody("truncated absolute fft_pass_number".into()))?;
                    continue;
                }

                fft_pass_number += offset_byte as u32;

                let peak_magnitude = peaks_buf
                    .read_u16::<LittleEndian>()
                    .map_err(|_| FingerprintError::MalformedBody("truncated peak magnitude".into()))?;
                let corrected_peak_frequency_bin = peaks_buf
                    .read_u16::<LittleEndian>()
                    .map_err(|_| FingerprintError::MalformedBody("truncated peak frequency bin".into()))?;

                peaks.push(FrequencyPeak::new(
                    fft_pass_number,
                    peak_magnitude,
                    corrected_peak_frequency_bin,
                    sample_rate_hz,
                ));
            }

            frequency_band_to_sound_peaks.insert(band, peaks);
        }

        Ok(DecodedSignature {
            sample_rate_hz,
            number_samples,
            frequency_band_to_sound_peaks,
        })
    }

    pub fn encode_to_uri(&self) -> Result<String> {
        Ok(format!("{}{}", DATA_URI_PREFIX, base64::encode(self.encode_to_binary()?)))
    }

    pub fn encode_to_binary(&self) -> Result<Vec<u8>> {
        let shifted_sample_rate_id = sample_rate_to_tag(self.sample_rate_hz).ok_or_else(|| {
            FingerprintError::MalformedHeader(format!("unsupported sample rate {} Hz", self.sample_rate_hz))
        })?;

        let mut contents = Vec::new();
        let mut bands: Vec<&FrequencyBand> = self.frequency_band_to_sound_peaks.keys().collect();
        bands.sort();

        for band in bands {
            let peaks = &self.frequency_band_to_sound_peaks[band];
            let mut peaks_buf = Vec::new();
            let mut fft_pass_number: u32 = 0;

            for peak in peaks {
                if peak.fft_pass_number < fft_pass_number {
                    return Err(FingerprintError::EncoderInvariantViolation(format!(
                        "peak fft_pass_number {} precedes prior {} within band {}",
                        peak.fft_pass_number,
                        fft_pass_number,
                        band.name()
                    )));
                }

                if peak.fft_pass_number - fft_pass_number >= 255 {
                    peaks_buf.write_u8(0xFF).unwrap();
                    peaks_buf.write_u32::<LittleEndian>(peak.fft_pass_number).unwrap();
                    fft_pass_number = peak.fft_pass_number;
                }

                peaks_buf.write_u8((peak.fft_pass_number - fft_pass_number) as u8).unwrap();
                peaks_buf.write_u16::<LittleEndian>(peak.peak_magnitude).unwrap();
                peaks_buf.write_u16::<LittleEndian>(peak.corrected_peak_frequency_bin).unwrap();

                fft_pass_number = peak.fft_pass_number;
            }

            contents.write_u32::<LittleEndian>(TLV_BAND_TAG_BASE.wrapping_add(band.tag() as u32)).unwrap();
            contents.write_u32::<LittleEndian>(peaks_buf.len() as u32).unwrap();
            contents.extend_from_slice(&peaks_buf);
            let padding = (4 - (peaks_buf.len() % 4)) % 4;
            contents.extend(std::iter::repeat(0u8).take(padding));
        }

        let size_minus_header = contents.len() as u32 + 8;

        let mut buf = Vec::with_capacity(HEADER_SIZE + size_minus_header as usize);
        buf.write_u32::<LittleEndian>(HEADER_MAGIC1).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap(); // crc32 placeholder
        buf.write_u32::<LittleEndian>(size_minus_header).unwrap();
        buf.write_u32::<LittleEndian>(HEADER_MAGIC2).unwrap();
        buf.extend(std::iter::repeat(0u8).take(12)); // void1
        buf.write_u32::<LittleEndian>(shifted_sample_rate_id).unwrap();
        buf.extend(std::iter::repeat(0u8).take(8)); // void2
        buf.write_u32::<LittleEndian>((self.number_samples as f64 + self.sample_rate_hz as f64 * 0.24) as u32)
            .unwrap();
        buf.write_u32::<LittleEndian>(HEADER_MAGIC3).unwrap();

        buf.write_u32::<LittleEndian>(BODY_PREAMBLE_MAGIC).unwrap();
        buf.write_u32::<LittleEndian>(size_minus_header).unwrap();
        buf.extend_from_slice(&contents);

        let crc = crc32fast::hash(&buf[8..]);
        (&mut buf[4..8]).write_u32::<LittleEndian>(crc).unwrap();

        Ok(buf)
    }

    /// Human-readable projection for debugging and test assertions; not
    /// part of the wire format and never consumed by the decoder.
    pub fn to_json_value(&self) -> serde_json::Value {
        let mut bands: Vec<&FrequencyBand> = self.frequency_band_to_sound_peaks.keys().collect();
        bands.sort();

        let frequency_band_to_peaks: serde_json::Map<String, serde_json::Value> = bands
            .into_iter()
            .map(|band| {
                let peaks: Vec<serde_json::Value> = self.frequency_band_to_sound_peaks[band]
                    .iter()
                    .map(|peak| {
                        serde_json::json!({
                            "fft_pass_number": peak.fft_pass_number,
                            "peak_magnitude": peak.peak_magnitude,
                            "corrected_peak_frequency_bin": peak.corrected_peak_frequency_bin,
                            "_frequency_hz": peak.frequency_hz(),
                            "_amplitude_pcm": peak.amplitude_pcm(),
                            "_seconds": peak.seconds(),
                        })
                    })
                    .collect();
                (band.name().to_string(), serde_json::Value::Array(peaks))
            })
            .collect();

        serde_json::json!({
            "sample_rate_hz": self.sample_rate_hz,
            "number_samples": self.number_samples,
            "_seconds": self.number_samples as f64 / self.sample_rate_hz as f64,
            "frequency_band_to_peaks": frequency_band_to_peaks,
        })
    }
}

impl TryFrom<&str> for DecodedSignature {
    type Error = FingerprintError;

    fn try_from(uri: &str) -> Result<Self> {
        Self::decode_from_uri(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_signature() -> DecodedSignature {
        let mut signature = DecodedSignature::new(16000);
        signature.number_samples = 48000;
        signature.frequency_band_to_sound_peaks.insert(
            FrequencyBand::Band520To1450,
            vec![
                FrequencyPeak::new(10, 100, 640, 16000),
                FrequencyPeak::new(265, 200, 640, 16000),
            ],
        );
        signature
    }

    #[test]
    fn empty_signature_round_trips() {
        let signature = DecodedSignature::new(16000);
        let encoded = signature.encode_to_binary().unwrap();
        assert_eq!(encoded.len(), 48 + 8);
        let decoded = DecodedSignature::decode_from_binary(&encoded).unwrap();
        assert_eq!(decoded, signature);
    }

    #[test]
    fn binary_round_trip_preserves_peaks() {
        let signature = sample_signature();
        let encoded = signature.encode_to_binary().unwrap();
        let decoded = DecodedSignature::decode_from_binary(&encoded).unwrap();
        assert_eq!(decoded, signature);
    }

    #[test]
    fn uri_round_trip() {
        let signature = sample_signature();
        let uri = signature.encode_to_uri().unwrap();
        assert!(uri.starts_with(DATA_URI_PREFIX));
        let decoded = DecodedSignature::decode_from_uri(&uri).unwrap();
        assert_eq!(decoded, signature);
    }

    #[test]
    fn delta_escape_resyncs_on_large_gap() {
        // peaks: (10, 100, 640), (265, 200, 640); delta between them is 255,
        // which must trigger the 0xFF absolute-resync escape.
        let signature = sample_signature();
        let encoded = signature.encode_to_binary().unwrap();

        // First peak: delta 10-0=10, no escape needed: 0x0A, mag=100 LE, bin=640 LE.
        let first_peak: [u8; 5] = [0x0A, 0x64, 0x00, 0x80, 0x02];
        // Second peak: delta 265-10=255 >= 255, escape to absolute 265 LE, then
        // delta 0, mag=200 LE, bin=640 LE.
        let second_peak: [u8; 10] = [0xFF, 0x09, 0x01, 0x00, 0x00, 0x00, 0xC8, 0x00, 0x80, 0x02];

        assert!(encoded.windows(first_peak.len()).any(|w| w == first_peak));
        assert!(encoded.windows(second_peak.len()).any(|w| w == second_peak));
    }

    #[test]
    fn crc_mismatch_is_rejected() {
        let signature = sample_signature();
        let mut encoded = signature.encode_to_binary().unwrap();
        encoded[20] ^= 0xFF; // inside void1, covered by the CRC
        let err = DecodedSignature::decode_from_binary(&encoded).unwrap_err();
        assert_eq!(
            err,
            FingerprintError::MalformedHeader("wrong checksum specified in header".into())
        );
    }

    #[test]
    fn corrupted_magic2_is_rejected() {
        let signature = sample_signature();
        let mut encoded = signature.encode_to_binary().unwrap();
        encoded[12] ^= 0xFF;
        let err = DecodedSignature::decode_from_binary(&encoded).unwrap_err();
        assert!(matches!(err, FingerprintError::MalformedHeader(_)));
    }

    #[test]
    fn non_monotonic_peaks_are_rejected_by_encoder() {
        let mut signature = DecodedSignature::new(16000);
        signature.frequency_band_to_sound_peaks.insert(
            FrequencyBand::Band520To1450,
            vec![
                FrequencyPeak::new(265, 200, 640, 16000),
                FrequencyPeak::new(10, 100, 640, 16000),
            ],
        );
        let err = signature.encode_to_binary().unwrap_err();
        assert!(matches!(err, FingerprintError::EncoderInvariantViolation(_)));
    }

    #[test]
    fn uri_without_prefix_is_rejected() {
        let err = DecodedSignature::decode_from_uri("data:audio/x-wav;base64,AAAA").unwrap_err();
        assert!(matches!(err, FingerprintError::InvalidUri(_)));
    }

    #[test]
    fn unknown_band_tag_is_rejected() {
        let band = FrequencyBand::from_tag(-1);
        assert!(band.is_none());
        let band = FrequencyBand::from_tag(4);
        assert!(band.is_none());
    }

    #[test]
    fn fractional_frequency_just_above_5500_is_discarded_not_truncated() {
        assert!(FrequencyBand::from_frequency_hz(5500.7).is_none());
        assert_eq!(FrequencyBand::from_frequency_hz(5500.0), Some(FrequencyBand::Band3500To5500));
        assert_eq!(FrequencyBand::from_frequency_hz(3500.0), Some(FrequencyBand::Band3500To5500));
        assert_eq!(FrequencyBand::from_frequency_hz(249.9), None);
    }

    #[test]
    fn derived_quantities_match_formulas() {
        let peak = FrequencyPeak::new(125, 6144, 640, 16000);
        assert!((peak.seconds() - 1.0).abs() < 1e-9);
        assert!((peak.frequency_hz() - (640.0 * (16000.0 / 2.0 / 1024.0 / 64.0))).abs() < 1e-9);
        assert!((peak.amplitude_pcm() - (((1u64 << 17) as f64 / 2.0).sqrt() / 1024.0)).abs() < 1e-9);
    }
}
