//! The streaming signature generator: windowing + FFT, peak spreading,
//! peak recognition, and the `feed_input` / `get_next_signature`
//! accumulator that ties them together.

use std::convert::TryInto;

use chfft::RFft1D;

use crate::config::GeneratorConfig;
use crate::error::{FingerprintError, Result};
use crate::fingerprinting::hanning::HANNING_WINDOW_2048_MULTIPLIERS;
use crate::fingerprinting::signature_format::{DecodedSignature, FrequencyBand, FrequencyPeak};
use crate::ring_buffer::RingBuffer;

const SAMPLE_RATE_HZ: u32 = 16000;
const SAMPLES_PER_STRIDE: usize = 128;
const SAMPLE_RING_CAPACITY: usize = 2048;
const FFT_BIN_COUNT: usize = 1025;
const FREQUENCY_RING_CAPACITY: usize = 256;

const PEAK_RECOGNITION_MIN_PASSES: u64 = 46;
const FFT_LOOKBACK: i64 = -46;
const SPREAD_LOOKBACK: i64 = -49;

const FREQUENCY_NEIGHBOR_OFFSETS: [i64; 8] = [-10, -7, -4, -3, 1, 2, 5, 8];
const TIME_NEIGHBOR_OFFSETS: [i64; 14] = [-53, -45, 165, 172, 179, 186, 193, 200, 214, 221, 228, 235, 242, 249];
const TIME_SPREAD_OFFSETS: [i64; 3] = [-1, -3, -6];

/// Streaming Shazam signature generator.
///
/// Owns its ring buffers and pending-input queue exclusively; not
/// `Send`/`Sync` by accident of `RFft1D` not being either, which matches
/// the single-threaded, synchronous contract this pipeline is specified
/// to have.
pub struct SignatureGenerator {
    input_pending_processing: Vec<i16>,
    samples_processed: usize,

    sample_ring: RingBuffer<i16>,
    fft_ring: RingBuffer<Vec<f64>>,
    spread_ring: RingBuffer<Vec<f64>>,
    fft: RFft1D<f64>,

    next_signature: DecodedSignature,
    config: GeneratorConfig,
}

impl SignatureGenerator {
    pub fn new() -> Self {
        Self::with_config(GeneratorConfig::default())
    }

    pub fn with_config(config: GeneratorConfig) -> Self {
        Self {
            input_pending_processing: Vec::new(),
            samples_processed: 0,
            sample_ring: RingBuffer::new(SAMPLE_RING_CAPACITY, 0i16),
            fft_ring: RingBuffer::new(FREQUENCY_RING_CAPACITY, vec![0.0f64; FFT_BIN_COUNT]),
            spread_ring: RingBuffer::new(FREQUENCY_RING_CAPACITY, vec![0.0f64; FFT_BIN_COUNT]),
            fft: RFft1D::<f64>::new(SAMPLE_RING_CAPACITY),
            next_signature: DecodedSignature::new(SAMPLE_RATE_HZ),
            config,
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: GeneratorConfig) {
        self.config = config;
    }

    /// Buffer signed 16-bit, 16 kHz mono PCM samples to be processed on the
    /// next call(s) to `get_next_signature`.
    pub fn feed_input(&mut self, samples: &[i16]) {
        self.input_pending_processing.extend_from_slice(samples);
    }

    /// Consume buffered samples in 128-sample strides until both the time
    /// and peak budgets are exhausted, then return the accumulated
    /// signature and start a fresh one. Returns `None` if fewer than 128
    /// unconsumed samples are currently available.
    pub fn get_next_signature(&mut self) -> Result<Option<DecodedSignature>> {
        if self.input_pending_processing.len() - self.samples_processed < SAMPLES_PER_STRIDE {
            return Ok(None);
        }

        while self.input_pending_processing.len() - self.samples_processed >= SAMPLES_PER_STRIDE
            && (self.next_signature.number_samples as f64 / self.next_signature.sample_rate_hz as f64
                < self.config.max_time_seconds
                || self.next_signature.total_peaks() < self.config.max_peaks)
        {
            let start = self.samples_processed;
            let chunk: [i16; SAMPLES_PER_STRIDE] = self.input_pending_processing[start..start + SAMPLES_PER_STRIDE]
                .try_into()
                .expect("slice of exactly SAMPLES_PER_STRIDE samples");
            self.process_stride(&chunk)?;
            self.samples_processed += SAMPLES_PER_STRIDE;
        }

        let returned_signature = std::mem::replace(&mut self.next_signature, DecodedSignature::new(SAMPLE_RATE_HZ));

        self.sample_ring = RingBuffer::new(SAMPLE_RING_CAPACITY, 0i16);
        self.fft_ring = RingBuffer::new(FREQUENCY_RING_CAPACITY, vec![0.0f64; FFT_BIN_COUNT]);
        self.spread_ring = RingBuffer::new(FREQUENCY_RING_CAPACITY, vec![0.0f64; FFT_BIN_COUNT]);

        self.input_pending_processing.drain(0..self.samples_processed);
        self.samples_processed = 0;

        Ok(Some(returned_signature))
    }

    /// Process an entire in-memory buffer with the time/peak budgets
    /// disabled, returning the single resulting signature. Convenience
    /// sugar over the streaming path for tests and simple one-shot callers
    /// who already have a bounded excerpt in hand.
    pub fn signature_from_samples(samples: &[i16]) -> Result<DecodedSignature> {
        let mut generator = Self::with_config(
            GeneratorConfig::new().with_max_time_seconds(f64::INFINITY).with_max_peaks(usize::MAX),
        );
        generator.feed_input(samples);
        Ok(generator.get_next_signature()?.unwrap_or_else(|| DecodedSignature::new(SAMPLE_RATE_HZ)))
    }

    fn process_stride(&mut self, batch: &[i16; SAMPLES_PER_STRIDE]) -> Result<()> {
        self.next_signature.number_samples += SAMPLES_PER_STRIDE as u32;
        self.do_fft(batch)?;
        self.do_peak_spreading();

        if self.spread_ring.num_written() >= PEAK_RECOGNITION_MIN_PASSES {
            self.do_peak_recognition()?;
        }

        Ok(())
    }

    fn do_fft(&mut self, batch: &[i16; SAMPLES_PER_STRIDE]) -> Result<()> {
        self.sample_ring.write_batch(batch);

        let excerpt = self.sample_ring.ordered_snapshot();
        let window = &*HANNING_WINDOW_2048_MULTIPLIERS;

        if excerpt.len() != SAMPLE_RING_CAPACITY || window.len() != SAMPLE_RING_CAPACITY {
            return Err(FingerprintError::DspInvariantViolation(
                "sample excerpt or Hanning window length mismatch".into(),
            ));
        }

        let windowed: Vec<f64> = excerpt.iter().zip(window.iter()).map(|(s, w)| *s as f64 * w).collect();

        let spectrum = self.fft.forward(&windowed);

        if spectrum.len() != FFT_BIN_COUNT {
            return Err(FingerprintError::DspInvariantViolation(format!(
                "FFT produced {} bins, expected {}",
                spectrum.len(),
                FFT_BIN_COUNT
            )));
        }

        let power: Vec<f64> = spectrum
            .iter()
            .map(|bin| ((bin.re.powi(2) + bin.im.powi(2)) / (1u64 << 17) as f64).max(1e-10))
            .collect();

        self.fft_ring.append(power);

        Ok(())
    }

    fn do_peak_spreading(&mut self) {
        let mut spread = self.fft_ring.get(-1).clone();

        for k in 0..=1022 {
            spread[k] = spread[k].max(spread[k + 1]).max(spread[k + 2]);
        }

        let spread_copy = spread.clone();

        for k in 0..FFT_BIN_COUNT {
            let mut m = spread_copy[k];
            for offset in TIME_SPREAD_OFFSETS {
                let index = self.spread_ring.index_of(offset);
                let frame = self.spread_ring.slot_mut(index);
                frame[k] = frame[k].max(m);
                m = frame[k];
            }
        }

        self.spread_ring.append(spread);
    }

    fn do_peak_recognition(&mut self) -> Result<()> {
        let fft_minus_46 = self.fft_ring.get(FFT_LOOKBACK).clone();
        let spread_minus_49 = self.spread_ring.get(SPREAD_LOOKBACK).clone();

        for k in 10..1015usize {
            if !(fft_minus_46[k] >= 1.0 / 64.0 && fft_minus_46[k] >= spread_minus_49[k - 1]) {
                continue;
            }

            let mut max_in_frequency_neighborhood: f64 = 0.0;
            for delta in FREQUENCY_NEIGHBOR_OFFSETS {
                let index = (k as i64 + delta) as usize;
                max_in_frequency_neighborhood = max_in_frequency_neighborhood.max(spread_minus_49[index]);
            }

            if !(fft_minus_46[k] > max_in_frequency_neighborhood) {
                continue;
            }

            let mut max_in_time_neighborhood = max_in_frequency_neighborhood;
            for offset in TIME_NEIGHBOR_OFFSETS {
                let other_frame = self.spread_ring.get(offset);
                max_in_time_neighborhood = max_in_time_neighborhood.max(other_frame[k - 1]);
            }

            if !(fft_minus_46[k] > max_in_time_neighborhood) {
                continue;
            }

            if let Some((band, peak)) = self.build_peak(k, &fft_minus_46)? {
                self.next_signature.frequency_band_to_sound_peaks.entry(band).or_default().push(peak);
            }
        }

        Ok(())
    }

    fn build_peak(&self, k: usize, fft_minus_46: &[f64]) -> Result<Option<(FrequencyBand, FrequencyPeak)>> {
        let log_magnitude = |x: f64| (1.0 / 64.0f64).max(x).ln() * 1477.3 + 6144.0;

        let magnitude = log_magnitude(fft_minus_46[k]);
        let magnitude_before = log_magnitude(fft_minus_46[k - 1]);
        let magnitude_after = log_magnitude(fft_minus_46[k + 1]);

        let variation_1 = magnitude * 2.0 - magnitude_before - magnitude_after;
        if variation_1 <= 0.0 {
            return Err(FingerprintError::DspInvariantViolation(
                "peak interpolation denominator is not positive".into(),
            ));
        }

        let variation_2 = (magnitude_after - magnitude_before) * 32.0 / variation_1;
        let corrected_bin = k as f64 * 64.0 + variation_2;

        let frequency_hz = corrected_bin * (SAMPLE_RATE_HZ as f64 / 2.0 / 1024.0 / 64.0);
        let band = match FrequencyBand::from_frequency_hz(frequency_hz) {
            Some(band) => band,
            None => return Ok(None),
        };

        let fft_pass_number = (self.spread_ring.num_written() - PEAK_RECOGNITION_MIN_PASSES) as u32;

        Ok(Some((
            band,
            FrequencyPeak::new(fft_pass_number, magnitude as u16, corrected_bin as u16, SAMPLE_RATE_HZ),
        )))
    }
}

impl Default for SignatureGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn silence_yields_empty_signature_of_expected_length() {
        let mut generator = SignatureGenerator::new();
        generator.feed_input(&vec![0i16; 2048]);
        let signature = generator.get_next_signature().unwrap().expect("enough samples for one stride");

        assert_eq!(signature.number_samples, 2048);
        assert_eq!(signature.total_peaks(), 0);

        let encoded = signature.encode_to_binary().unwrap();
        assert_eq!(encoded.len(), 48 + 8);
    }

    #[test]
    fn fewer_than_one_stride_returns_none() {
        let mut generator = SignatureGenerator::new();
        generator.feed_input(&vec![0i16; 100]);
        assert!(generator.get_next_signature().unwrap().is_none());
    }

    fn sine_wave(frequency_hz: f64, amplitude: f64, sample_rate_hz: f64, num_samples: usize) -> Vec<i16> {
        (0..num_samples)
            .map(|n| (amplitude * (2.0 * PI * frequency_hz * n as f64 / sample_rate_hz).sin()) as i16)
            .collect()
    }

    #[test]
    fn sinusoid_produces_peak_in_expected_band_only() {
        let samples = sine_wave(1000.0, 10000.0, 16000.0, 16000 * 3);
        let signature = SignatureGenerator::signature_from_samples(&samples).unwrap();

        let mid_band_peaks = signature
            .frequency_band_to_sound_peaks
            .get(&FrequencyBand::Band520To1450)
            .map(Vec::len)
            .unwrap_or(0);
        assert!(mid_band_peaks > 0, "expected at least one peak near 1000 Hz");

        let high_band_peaks = signature
            .frequency_band_to_sound_peaks
            .get(&FrequencyBand::Band3500To5500)
            .map(Vec::len)
            .unwrap_or(0);
        assert_eq!(high_band_peaks, 0);
    }

    #[test]
    fn peaks_within_a_band_are_monotonic_by_fft_pass_number() {
        let samples = sine_wave(1000.0, 10000.0, 16000.0, 16000 * 3);
        let signature = SignatureGenerator::signature_from_samples(&samples).unwrap();

        for peaks in signature.frequency_band_to_sound_peaks.values() {
            for window in peaks.windows(2) {
                assert!(window[0].fft_pass_number <= window[1].fft_pass_number);
            }
        }
    }

    #[test]
    fn emitted_peaks_stay_within_band_coverage() {
        let samples = sine_wave(1000.0, 10000.0, 16000.0, 16000 * 3);
        let signature = SignatureGenerator::signature_from_samples(&samples).unwrap();

        for peaks in signature.frequency_band_to_sound_peaks.values() {
            for peak in peaks {
                let hz = peak.frequency_hz();
                assert!(hz >= 250.0 && hz <= 5500.0);
            }
        }
    }

    #[test]
    fn identical_input_is_deterministic() {
        let samples = sine_wave(1000.0, 10000.0, 16000.0, 16000 * 3);

        let a = SignatureGenerator::signature_from_samples(&samples).unwrap();
        let b = SignatureGenerator::signature_from_samples(&samples).unwrap();

        assert_eq!(a.encode_to_binary().unwrap(), b.encode_to_binary().unwrap());
    }

    #[test]
    fn budget_termination_requires_both_conditions() {
        let config = GeneratorConfig::new().with_max_time_seconds(0.5).with_max_peaks(0);
        let mut generator = SignatureGenerator::with_config(config);

        // Feed much more than 0.5s so the time budget is satisfied quickly;
        // since max_peaks is 0, total_peaks() >= 0 is trivially satisfied
        // too, so the loop should stop as soon as the time budget is met.
        generator.feed_input(&vec![0i16; 16000 * 2]);
        let signature = generator.get_next_signature().unwrap().unwrap();

        let seconds = signature.number_samples as f64 / signature.sample_rate_hz as f64;
        assert!(seconds >= 0.5);
        // Should not have consumed the entire input - the budget ended the
        // first signature early, leaving samples pending for the next one.
        assert!(signature.number_samples < 16000 * 2);
    }

    #[test]
    fn pending_input_is_truncated_after_a_signature_is_drawn() {
        let mut generator = SignatureGenerator::new();
        generator.feed_input(&vec![0i16; 2048]);
        generator.get_next_signature().unwrap();
        assert_eq!(generator.input_pending_processing.len(), 0);
    }
}
