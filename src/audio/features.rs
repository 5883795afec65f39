//! Spectral features on the CPU via STFT + mel filterbank + DCT.
//!
//! Produces the precomputed STFT, Mel and MFCC inputs of the spectral
//! regressor, frame-for-frame identical in layout to the convolutional
//! transforms in [`crate::spectral`]:
//! - Window: periodic Hann, length `n_fft`
//! - Padding: centered, reflect (`n_fft / 2` on each side)
//! - Mel scale/norm: Slaney, range 0 Hz to Nyquist
//! - MFCC: `10 * log10(max(mel, 1e-10))`, 80 dB floor, orthonormal DCT-II
//!
//! The kernel builders here are shared with the convolutional transforms.

use rustfft::FftPlanner;
use rustfft::num_complex::Complex;

use crate::config::SpectralConfig;

/// Smallest power kept before the dB conversion.
pub const AMIN: f64 = 1e-10;
/// Dynamic range kept below each example's peak, in dB.
pub const TOP_DB: f64 = 80.0;

/// Centered power STFT with a fixed frame size and hop.
struct PowerStft {
    n_fft: usize,
    hop: usize,
    window: Vec<f64>,
    fft: std::sync::Arc<dyn rustfft::Fft<f64>>,
}

impl PowerStft {
    fn new(planner: &mut FftPlanner<f64>, n_fft: usize, hop: usize) -> Self {
        Self {
            n_fft,
            hop,
            window: hann_window(n_fft),
            fft: planner.plan_fft_forward(n_fft),
        }
    }

    /// Power spectrum per frame, each `n_fft/2 + 1` long.
    fn frames(&self, samples: &[f32]) -> Vec<Vec<f64>> {
        let n_fft = self.n_fft;
        let num_bins = n_fft / 2 + 1;

        let samples_f64: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
        let padded = reflect_pad(&samples_f64, n_fft / 2, n_fft / 2);

        let num_frames = (padded.len().saturating_sub(n_fft)) / self.hop + 1;
        let mut frames = Vec::with_capacity(num_frames);

        for frame_idx in 0..num_frames {
            let start = frame_idx * self.hop;
            let end = start + n_fft;
            if end > padded.len() {
                break;
            }

            let mut buffer: Vec<Complex<f64>> = (0..n_fft)
                .map(|i| Complex::new(padded[start + i] * self.window[i], 0.0))
                .collect();
            self.fft.process(&mut buffer);

            frames.push(buffer[..num_bins].iter().map(|c| c.norm_sqr()).collect());
        }

        frames
    }
}

/// Feature processor.
///
/// Pre-computes the Hann windows, FFT plans, mel filterbanks and DCT matrix
/// on construction. The MFCC path has its own frame size and hop
/// (`mfcc_n_fft`, `mfcc_hop_length`). All outputs are `[bins][frames]`.
pub struct FeatureExtractor {
    stft: PowerStft,
    mfcc_stft: PowerStft,
    mel_filterbank: Vec<Vec<f64>>,
    mfcc_filterbank: Vec<Vec<f64>>,
    dct: Vec<Vec<f64>>,
}

impl FeatureExtractor {
    pub fn new(config: &SpectralConfig) -> Self {
        let nyquist = config.sample_rate as f64 / 2.0;
        let mel = mel_filterbank(
            config.n_fft,
            config.n_mels,
            config.sample_rate,
            0.0,
            nyquist,
        );
        let mfcc_mel = mel_filterbank(
            config.mfcc_n_fft,
            config.mfcc_n_mels,
            config.sample_rate,
            0.0,
            nyquist,
        );
        let dct = dct_matrix(config.n_mfcc, config.mfcc_n_mels);
        let mut planner = FftPlanner::new();

        Self {
            stft: PowerStft::new(&mut planner, config.n_fft, config.hop_length()),
            mfcc_stft: PowerStft::new(&mut planner, config.mfcc_n_fft, config.mfcc_hop_length),
            mel_filterbank: mel,
            mfcc_filterbank: mfcc_mel,
            dct,
        }
    }

    /// Magnitude spectrogram, `[n_fft/2 + 1][frames]`.
    pub fn stft_magnitude(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let power = self.stft.frames(samples);
        transpose(&power, |p| p.sqrt() as f32)
    }

    /// Mel power spectrogram, `[n_mels][frames]`.
    pub fn mel_power(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let power = self.stft.frames(samples);
        apply_filterbank(&self.mel_filterbank, &power)
            .into_iter()
            .map(|row| row.into_iter().map(|v| v as f32).collect())
            .collect()
    }

    /// Mel-frequency cepstral coefficients, `[n_mfcc][frames]`.
    pub fn mfcc(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let power = self.mfcc_stft.frames(samples);
        let mut mel_db = apply_filterbank(&self.mfcc_filterbank, &power);
        power_to_db(&mut mel_db);

        let num_frames = power.len();
        self.dct
            .iter()
            .map(|basis| {
                (0..num_frames)
                    .map(|t| {
                        basis
                            .iter()
                            .zip(mel_db.iter())
                            .map(|(w, row)| w * row[t])
                            .sum::<f64>() as f32
                    })
                    .collect()
            })
            .collect()
    }
}

/// `[frames][bins]` → `[bins][frames]` with a per-value map.
fn transpose(frames: &[Vec<f64>], f: impl Fn(f64) -> f32) -> Vec<Vec<f32>> {
    let num_bins = frames.first().map_or(0, Vec::len);
    (0..num_bins)
        .map(|bin| frames.iter().map(|frame| f(frame[bin])).collect())
        .collect()
}

/// Project `[frames][bins]` power through `[mels][bins]` filters → `[mels][frames]`.
fn apply_filterbank(filterbank: &[Vec<f64>], power: &[Vec<f64>]) -> Vec<Vec<f64>> {
    filterbank
        .iter()
        .map(|filter| {
            power
                .iter()
                .map(|frame| {
                    filter
                        .iter()
                        .zip(frame.iter())
                        .filter(|(w, _)| **w > 0.0)
                        .map(|(w, p)| w * p)
                        .sum()
                })
                .collect()
        })
        .collect()
}

/// In-place `10 * log10(max(x, AMIN))` with a `TOP_DB` floor below the peak.
pub(crate) fn power_to_db(spec: &mut [Vec<f64>]) {
    let mut peak = f64::NEG_INFINITY;
    for v in spec.iter_mut().flat_map(|row| row.iter_mut()) {
        *v = 10.0 * v.max(AMIN).log10();
        peak = peak.max(*v);
    }
    let floor = peak - TOP_DB;
    for v in spec.iter_mut().flat_map(|row| row.iter_mut()) {
        *v = v.max(floor);
    }
}

/// Generate a periodic Hann window of the given length.
pub(crate) fn hann_window(length: usize) -> Vec<f64> {
    (0..length)
        .map(|i| {
            let phase = 2.0 * std::f64::consts::PI * i as f64 / length as f64;
            0.5 * (1.0 - phase.cos())
        })
        .collect()
}

/// Reflect-pad a signal on both sides.
///
/// The signal must be longer than either pad.
pub(crate) fn reflect_pad(signal: &[f64], pad_left: usize, pad_right: usize) -> Vec<f64> {
    reflect_indices(signal.len(), pad_left, pad_right)
        .map(|i| signal[i])
        .collect()
}

/// Source indices of a reflect-padded signal of length `len`.
pub(crate) fn reflect_indices(
    len: usize,
    pad_left: usize,
    pad_right: usize,
) -> impl Iterator<Item = usize> {
    let last = len.saturating_sub(1) as isize;
    (-(pad_left as isize)..(len + pad_right) as isize).map(move |i| {
        let reflected = if i < 0 {
            -i
        } else if i > last {
            2 * last - i
        } else {
            i
        };
        reflected.clamp(0, last) as usize
    })
}

/// Build a Slaney-normalized mel filterbank.
///
/// Returns `n_mels` filters, each with `n_fft/2 + 1` weights.
pub(crate) fn mel_filterbank(
    n_fft: usize,
    n_mels: usize,
    sample_rate: u32,
    f_min: f64,
    f_max: f64,
) -> Vec<Vec<f64>> {
    let num_bins = n_fft / 2 + 1;
    let sr = sample_rate as f64;

    let mel_min = hz_to_mel_slaney(f_min);
    let mel_max = hz_to_mel_slaney(f_max);

    let hz_points: Vec<f64> = (0..=(n_mels + 1))
        .map(|i| mel_to_hz_slaney(mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64))
        .collect();

    let bin_freqs: Vec<f64> = (0..num_bins)
        .map(|i| sr * i as f64 / n_fft as f64)
        .collect();

    (0..n_mels)
        .map(|i| {
            let f_left = hz_points[i];
            let f_center = hz_points[i + 1];
            let f_right = hz_points[i + 2];
            let norm = 2.0 / (f_right - f_left);

            bin_freqs
                .iter()
                .map(|&f| {
                    if f < f_left || f > f_right {
                        0.0
                    } else if f <= f_center {
                        norm * (f - f_left) / (f_center - f_left)
                    } else {
                        norm * (f_right - f) / (f_right - f_center)
                    }
                })
                .collect()
        })
        .collect()
}

/// Orthonormal DCT-II basis, `[n_out][n_in]`.
pub(crate) fn dct_matrix(n_out: usize, n_in: usize) -> Vec<Vec<f64>> {
    let n = n_in as f64;
    (0..n_out)
        .map(|k| {
            let scale = if k == 0 {
                (1.0 / n).sqrt()
            } else {
                (2.0 / n).sqrt()
            };
            (0..n_in)
                .map(|i| {
                    scale * (std::f64::consts::PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n)).cos()
                })
                .collect()
        })
        .collect()
}

/// Convert frequency in Hz to Slaney mel scale.
///
/// Below 1000 Hz: linear mapping (mel = 3 * f / 200).
/// Above 1000 Hz: logarithmic (mel = 15 + 27 * ln(f / 1000) / ln(6.4)).
fn hz_to_mel_slaney(hz: f64) -> f64 {
    if hz < 1000.0 {
        3.0 * hz / 200.0
    } else {
        15.0 + 27.0 * (hz / 1000.0).ln() / (6.4_f64).ln()
    }
}

/// Convert Slaney mel scale to frequency in Hz.
fn mel_to_hz_slaney(mel: f64) -> f64 {
    if mel < 15.0 {
        200.0 * mel / 3.0
    } else {
        1000.0 * ((mel - 15.0) * (6.4_f64).ln() / 27.0).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, num_samples: usize, sample_rate: u32) -> Vec<f32> {
        (0..num_samples)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate as f64).sin() as f32)
            .collect()
    }

    #[test]
    fn mel_conversion_roundtrip() {
        for &freq in &[40.0, 100.0, 440.0, 1000.0, 4000.0, 11025.0] {
            let back = mel_to_hz_slaney(hz_to_mel_slaney(freq));
            assert!(
                (freq - back).abs() < 0.01,
                "roundtrip failed for {freq} Hz: got {back}"
            );
        }
    }

    #[test]
    fn hann_window_properties() {
        let w = hann_window(2048);
        assert_eq!(w.len(), 2048);
        assert!(w[0].abs() < 1e-10);
        assert!((w[1024] - 1.0).abs() < 1e-10);
        assert!((w[100] - w[2048 - 100]).abs() < 1e-10);
    }

    #[test]
    fn filterbank_shape_and_coverage() {
        let fb = mel_filterbank(2048, 128, 22050, 0.0, 11025.0);
        assert_eq!(fb.len(), 128);
        assert_eq!(fb[0].len(), 1025);
        for (i, filter) in fb.iter().enumerate() {
            assert!(filter.iter().all(|&w| w >= 0.0), "negative weight in filter {i}");
            assert!(filter.iter().sum::<f64>() > 0.0, "filter {i} is all zeros");
        }
    }

    #[test]
    fn dct_is_orthonormal() {
        let d = dct_matrix(8, 8);
        for a in 0..8 {
            for b in 0..8 {
                let dot: f64 = d[a].iter().zip(d[b].iter()).map(|(x, y)| x * y).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-9, "rows {a},{b}: {dot}");
            }
        }
    }

    #[test]
    fn reflect_pad_basic() {
        let signal = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let padded = reflect_pad(&signal, 2, 2);
        assert_eq!(padded, vec![3.0, 2.0, 1.0, 2.0, 3.0, 4.0, 5.0, 4.0, 3.0]);
    }

    #[test]
    fn power_to_db_applies_floor() {
        let mut spec = vec![vec![1.0, 1e-20], vec![100.0, 0.0]];
        power_to_db(&mut spec);
        assert!((spec[0][0] - 0.0).abs() < 1e-9);
        assert!((spec[1][0] - 20.0).abs() < 1e-9);
        assert!((spec[0][1] - (20.0 - TOP_DB)).abs() < 1e-9);
        assert!((spec[1][1] - (20.0 - TOP_DB)).abs() < 1e-9);
    }

    #[test]
    fn feature_shapes() {
        let config = SpectralConfig {
            n_fft: 1024,
            ..SpectralConfig::default()
        };
        let extractor = FeatureExtractor::new(&config);
        let samples = sine(440.0, 22050, 22050);

        let frames = 22050 / 256 + 1;
        let stft = extractor.stft_magnitude(&samples);
        assert_eq!(stft.len(), 513);
        assert_eq!(stft[0].len(), frames);

        let mel = extractor.mel_power(&samples);
        assert_eq!(mel.len(), 128);
        assert_eq!(mel[0].len(), frames);

        let mfcc = extractor.mfcc(&samples);
        assert_eq!(mfcc.len(), 20);
        assert_eq!(mfcc[0].len(), config.mfcc_frames(22050));
        assert_eq!(mfcc[0].len(), 22050 / 512 + 1);
    }

    #[test]
    fn stft_peak_at_sine_frequency() {
        let config = SpectralConfig::default();
        let extractor = FeatureExtractor::new(&config);
        let samples = sine(1000.0, 8192, 22050);
        let stft = extractor.stft_magnitude(&samples);

        // Middle frame, away from padding effects.
        let t = stft[0].len() / 2;
        let peak_bin = (0..stft.len())
            .max_by(|&a, &b| stft[a][t].total_cmp(&stft[b][t]))
            .unwrap();
        let expected = (1000.0 * 2048.0 / 22050.0_f64).round() as usize;
        assert!(peak_bin.abs_diff(expected) <= 1, "peak {peak_bin}, expected {expected}");
    }
}
