// Parametric EQ engine: peak/dip seeding + Levenberg-Marquardt refinement
//
// Fits a small set of peaking biquads that flatten a measured response
// inside [low_freq, high_freq].
//
// Pipeline:
//   1. Preprocess: clamp limits, crop to [0.8·low, 1.2·high], de-mean to 0 dB
//   2. Initial guess: log smoothing → peaks/dips → cancelling bands
//   3. Optimize: LM on [gain, log10(Q), log10(fc)] per band, linear-amplitude error
//   4. Post-process: drop invalid bands, merge collisions, cap the count, pad
//   5. Format: round and clamp for export
//
// Every stage degrades instead of failing: smoothing falls back to the raw
// curve, the optimizer to the initial guess, and the whole pipeline to
// neutral default bands.

pub mod design;
pub mod lm;
pub mod peaks;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::correction::correction_curve;
use crate::diagnostics::{Diagnostics, Warning};
use crate::dsp::smooth_log;
use crate::response::FrequencyResponse;

pub use design::{create_default_bands, initial_guess, pad_with_defaults, process_collisions};
pub use lm::{fit_peq, FitProblem, LmFit, SolveError, StopReason};
pub use peaks::find_peaks_dips;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterType {
    #[default]
    Peaking,
    LowShelf,
    HighShelf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeqBand {
    /// Center (or corner) frequency, Hz
    pub frequency: f64,
    /// dB
    pub gain: f64,
    #[serde(rename = "Q", alias = "q")]
    pub q: f64,
    #[serde(rename = "type", default)]
    pub filter_type: FilterType,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_low_freq() -> f64 { 20.0 }
fn default_high_freq() -> f64 { 20000.0 }
fn default_band_count() -> usize { 5 }
fn default_filter_sample_rate() -> f64 { 96000.0 }
fn default_bins_per_octave() -> f64 { 6.0 }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeqConfig {
    /// Lower edge of the corrected range (clamped to 10..=1000 Hz)
    #[serde(default = "default_low_freq")]
    pub low_freq: f64,
    /// Upper edge of the corrected range (at least 2·low, at most 0.95·Nyquist)
    #[serde(default = "default_high_freq")]
    pub high_freq: f64,
    /// Number of bands returned (clamped to 1..=15)
    #[serde(default = "default_band_count")]
    pub band_count: usize,
    /// Sample rate used for the biquad math
    #[serde(default = "default_filter_sample_rate")]
    pub sample_rate: f64,
    /// Smoothing resolution for peak detection (clamped to 1..=24)
    #[serde(default = "default_bins_per_octave")]
    pub bins_per_octave: f64,
}

impl Default for PeqConfig {
    fn default() -> Self {
        Self {
            low_freq: default_low_freq(),
            high_freq: default_high_freq(),
            band_count: default_band_count(),
            sample_rate: default_filter_sample_rate(),
            bins_per_octave: default_bins_per_octave(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeqResult {
    /// Exactly `band_count` bands, ascending by frequency
    pub bands: Vec<PeqBand>,
    /// LM iterations spent
    pub iterations: usize,
    /// Largest |residual| of the de-meaned response after correction, in range
    pub max_error_db: f64,
    /// True when the bands are the neutral defaults
    pub fallback: bool,
    pub warnings: Vec<Warning>,
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub(crate) const GAIN_LIMIT_DB: f64 = 18.0;
pub(crate) const Q_MIN: f64 = 0.5;
pub(crate) const Q_MAX: f64 = 10.0;
pub(crate) const DEFAULT_Q: f64 = 1.41;
pub(crate) const MAX_BANDS: usize = 15;

const LOW_FREQ_RANGE: (f64, f64) = (10.0, 1000.0);
const NYQUIST_MARGIN: f64 = 0.95;
const BINS_PER_OCTAVE_RANGE: (f64, f64) = (1.0, 24.0);
/// Data kept around the corrected range
const CROP_LOW: f64 = 0.8;
const CROP_HIGH: f64 = 1.2;
const MIN_POINTS: usize = 5;

/// Export limits
const OUT_FREQ_RANGE: (f64, f64) = (20.0, 20000.0);
const OUT_Q_RANGE: (f64, f64) = (0.1, 10.0);

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Limits after clamping.
#[derive(Debug, Clone, Copy)]
struct Limits {
    low: f64,
    high: f64,
    count: usize,
    bins_per_octave: f64,
    sample_rate: f64,
}

impl Limits {
    fn from_config(config: &PeqConfig) -> Self {
        let sample_rate = if config.sample_rate.is_finite() && config.sample_rate > 0.0 {
            config.sample_rate
        } else {
            default_filter_sample_rate()
        };
        let low = finite_or(config.low_freq, default_low_freq()).clamp(LOW_FREQ_RANGE.0, LOW_FREQ_RANGE.1);
        let high = finite_or(config.high_freq, default_high_freq())
            .min(sample_rate / 2.0 * NYQUIST_MARGIN)
            .max(low * 2.0);
        Self {
            low,
            high,
            count: config.band_count.clamp(1, MAX_BANDS),
            bins_per_octave: finite_or(config.bins_per_octave, default_bins_per_octave())
                .clamp(BINS_PER_OCTAVE_RANGE.0, BINS_PER_OCTAVE_RANGE.1),
            sample_rate,
        }
    }
}

fn finite_or(v: f64, fallback: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        fallback
    }
}

/// Compute PEQ bands that flatten `response` inside the configured range.
///
/// Never fails: degraded paths are reported in `PeqResult::warnings`, and
/// the result always holds exactly `band_count` (clamped to 1..=15) bands
/// sorted by frequency.
pub fn calculate_peq_parameters(response: &FrequencyResponse, config: &PeqConfig) -> PeqResult {
    let limits = Limits::from_config(config);
    let mut diag = Diagnostics::new();

    // 1. Preprocess
    let mut data: Vec<(f64, f64)> = response
        .points
        .iter()
        .filter(|p| p.frequency.is_finite() && p.magnitude.is_finite())
        .filter(|p| p.frequency >= limits.low * CROP_LOW && p.frequency <= limits.high * CROP_HIGH)
        .map(|p| (p.frequency, p.magnitude))
        .collect();
    data.sort_by(|a, b| a.0.total_cmp(&b.0));

    if data.len() < MIN_POINTS {
        diag.push(Warning::InsufficientData {
            points: data.len(),
            required: MIN_POINTS,
        });
        return default_result(&limits, diag);
    }

    let freq: Vec<f64> = data.iter().map(|d| d.0).collect();
    let raw: Vec<f64> = data.iter().map(|d| d.1).collect();

    let in_range: Vec<f64> = data
        .iter()
        .filter(|d| d.0 >= limits.low && d.0 <= limits.high)
        .map(|d| d.1)
        .collect();
    let mean_source = if in_range.is_empty() { &raw } else { &in_range };
    let mean = mean_source.iter().sum::<f64>() / mean_source.len() as f64;
    let mag: Vec<f64> = raw.iter().map(|m| m - mean).collect();

    info!(
        "calculate_peq_parameters: {} points in [{:.0}, {:.0}] Hz, mean {:.2} dB, {} bands",
        freq.len(),
        limits.low,
        limits.high,
        mean,
        limits.count
    );

    // 2-4. Design
    let Some((bands, iterations)) = design_bands(&freq, &mag, &limits, &mut diag) else {
        return default_result(&limits, diag);
    };

    // 5. Format
    let mut bands: Vec<PeqBand> = bands.iter().map(format_band).collect();
    separate_frequencies(&mut bands);
    let max_error_db = max_error_in_range(&freq, &mag, &bands, &limits);

    info!(
        "calculate_peq_parameters: result: {} bands, {} iters, max_error={:.1} dB",
        bands.len(),
        iterations,
        max_error_db
    );
    for (i, b) in bands.iter().enumerate() {
        info!(
            "  band[{}]: freq={:.0} Hz, gain={:.1} dB, Q={:.2}",
            i, b.frequency, b.gain, b.q
        );
    }

    PeqResult {
        bands,
        iterations,
        max_error_db,
        fallback: false,
        warnings: diag.into_warnings(),
    }
}

/// Initial guess, optimization and post-processing. `None` when nothing
/// usable survives and the caller should fall back to defaults.
fn design_bands(
    freq: &[f64],
    mag: &[f64],
    limits: &Limits,
    diag: &mut Diagnostics,
) -> Option<(Vec<PeqBand>, usize)> {
    let smoothed = match smooth_log(freq, mag, limits.bins_per_octave) {
        Ok(s) => s,
        Err(e) => {
            diag.push(Warning::SmoothingSkipped {
                reason: e.to_string(),
            });
            mag.to_vec()
        }
    };

    let initial = initial_guess(freq, &smoothed, limits.count, limits.low, limits.high);
    info!("calculate_peq_parameters: initial guess → {} bands", initial.len());

    let problem = FitProblem {
        freq,
        target_db: mag,
        low_freq: limits.low,
        high_freq: limits.high,
        sample_rate: limits.sample_rate,
    };
    let (fitted, iterations) = match fit_peq(&initial, &problem) {
        Ok(fit) => (fit.bands, fit.iterations),
        Err(e) => {
            diag.push(Warning::OptimizerFallback {
                reason: e.to_string(),
            });
            (initial, 0)
        }
    };

    let mut valid = Vec::with_capacity(fitted.len());
    for (index, band) in fitted.into_iter().enumerate() {
        let ok = band.frequency.is_finite()
            && band.frequency > 0.0
            && band.gain.is_finite()
            && band.q.is_finite()
            && band.q > 0.0;
        if ok {
            valid.push(band);
        } else {
            diag.push(Warning::InvalidBandDiscarded { index });
        }
    }
    if valid.is_empty() {
        diag.push(Warning::DefaultBands {
            reason: "no valid bands after optimization".to_string(),
        });
        return None;
    }

    let mut bands = process_collisions(&valid, limits.count);
    let added = pad_with_defaults(&mut bands, limits.count, limits.low, limits.high);
    if added > 0 {
        diag.push(Warning::DefaultBandsAdded { count: added });
    }

    Some((bands, iterations))
}

fn default_result(limits: &Limits, diag: Diagnostics) -> PeqResult {
    let mut bands: Vec<PeqBand> = create_default_bands(limits.count, limits.low, limits.high)
        .iter()
        .map(format_band)
        .collect();
    separate_frequencies(&mut bands);
    info!("calculate_peq_parameters: {} default bands", bands.len());
    PeqResult {
        bands,
        iterations: 0,
        max_error_db: 0.0,
        fallback: true,
        warnings: diag.into_warnings(),
    }
}

/// Round and clamp for export: whole Hz, 0.1 dB, 0.01 Q.
fn format_band(band: &PeqBand) -> PeqBand {
    PeqBand {
        frequency: band.frequency.round().clamp(OUT_FREQ_RANGE.0, OUT_FREQ_RANGE.1),
        gain: ((band.gain * 10.0).round() / 10.0).clamp(-GAIN_LIMIT_DB, GAIN_LIMIT_DB),
        q: ((band.q * 100.0).round() / 100.0).clamp(OUT_Q_RANGE.0, OUT_Q_RANGE.1),
        filter_type: FilterType::Peaking,
        enabled: true,
    }
}

/// Make the rounded, clamped frequencies strictly increasing, at least
/// 1 Hz apart, inside the export range. Bands must already be sorted.
fn separate_frequencies(bands: &mut [PeqBand]) {
    for i in 1..bands.len() {
        let min = bands[i - 1].frequency + 1.0;
        if bands[i].frequency < min {
            bands[i].frequency = min;
        }
    }
    for i in (0..bands.len()).rev() {
        let max = match bands.get(i + 1) {
            Some(next) => next.frequency - 1.0,
            None => OUT_FREQ_RANGE.1,
        };
        if bands[i].frequency > max {
            bands[i].frequency = max;
        }
    }
}

fn max_error_in_range(freq: &[f64], mag: &[f64], bands: &[PeqBand], limits: &Limits) -> f64 {
    let correction = correction_curve(freq, bands, limits.sample_rate);
    freq.iter()
        .zip(mag)
        .zip(&correction)
        .filter(|((&f, _), _)| f >= limits.low && f <= limits.high)
        .map(|((_, &m), &c)| (m + c).abs())
        .fold(0.0_f64, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correction::biquad_magnitude_db;

    /// Log grid with `ppo` points per octave from 20 Hz to 20 kHz.
    fn make_log_freq(ppo: usize) -> Vec<f64> {
        let n = (1000.0_f64.log2() * ppo as f64).ceil() as usize + 1;
        crate::dsp::generate_log_freq_grid(n, 20.0, 20000.0)
    }

    fn response_from(freq: &[f64], f: impl Fn(f64) -> f64) -> FrequencyResponse {
        FrequencyResponse::from_pairs(freq.iter().map(|&x| (x, f(x))).collect())
    }

    fn assert_sorted(bands: &[PeqBand]) {
        for w in bands.windows(2) {
            assert!(
                w[1].frequency > w[0].frequency,
                "Bands must be strictly increasing: {} then {}",
                w[0].frequency,
                w[1].frequency
            );
        }
    }

    #[test]
    fn test_config_defaults_from_empty_json() {
        let c: PeqConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(c, PeqConfig::default());
        assert_eq!(c.band_count, 5);
        assert_eq!(c.sample_rate, 96000.0);
    }

    #[test]
    fn test_band_json_keys() {
        let json = r#"{"frequency":1000.0,"gain":-3.0,"Q":2.0,"type":"lowShelf"}"#;
        let b: PeqBand = serde_json::from_str(json).unwrap();
        assert_eq!(b.filter_type, FilterType::LowShelf);
        assert!(b.enabled);
        let lower: PeqBand = serde_json::from_str(r#"{"frequency":1.0,"gain":0.0,"q":3.0}"#).unwrap();
        assert_eq!(lower.q, 3.0);
        assert_eq!(lower.filter_type, FilterType::Peaking);
        let out = serde_json::to_value(&b).unwrap();
        assert_eq!(out["Q"], 2.0);
        assert_eq!(out["type"], "lowShelf");
    }

    #[test]
    fn test_flat_response_yields_zero_gain() {
        let freq = make_log_freq(24);
        let r = response_from(&freq, |_| 75.0);
        let result = calculate_peq_parameters(&r, &PeqConfig::default());
        assert_eq!(result.bands.len(), 5);
        for b in &result.bands {
            assert!(b.gain.abs() <= 0.5, "Flat input should not be corrected, got {} dB", b.gain);
        }
        assert_sorted(&result.bands);
    }

    #[test]
    fn test_single_notch_is_corrected() {
        let freq = make_log_freq(48);
        let r = response_from(&freq, |f| {
            biquad_magnitude_db(f, 1000.0, -6.0, 4.0, FilterType::Peaking, 96000.0)
        });
        let config = PeqConfig {
            band_count: 1,
            ..PeqConfig::default()
        };
        let result = calculate_peq_parameters(&r, &config);
        assert_eq!(result.bands.len(), 1);
        let b = &result.bands[0];
        assert!((b.frequency - 1000.0).abs() <= 100.0, "freq {}", b.frequency);
        assert!((b.gain - 6.0).abs() <= 1.0, "gain {}", b.gain);
        assert!(b.q >= 2.0 && b.q <= 8.0, "Q {}", b.q);
        assert!(!result.fallback);
        assert!(result.max_error_db < 1.0, "max error {}", result.max_error_db);
    }

    #[test]
    fn test_insufficient_data_falls_back() {
        let r = FrequencyResponse::from_pairs(vec![(100.0, 0.0), (200.0, 3.0), (400.0, 0.0)]);
        let config = PeqConfig {
            band_count: 3,
            ..PeqConfig::default()
        };
        let result = calculate_peq_parameters(&r, &config);
        assert!(result.fallback);
        assert_eq!(result.bands.len(), 3);
        assert!(result.bands.iter().all(|b| b.gain == 0.0 && b.q == 1.41));
        assert!(matches!(result.warnings[0], Warning::InsufficientData { points: 3, required: 5 }));
    }

    #[test]
    fn test_band_count_is_clamped() {
        let freq = make_log_freq(12);
        let r = response_from(&freq, |f| 3.0 * (f / 300.0).log2().sin());
        for (requested, expected) in [(0, 1), (7, 7), (40, 15)] {
            let config = PeqConfig {
                band_count: requested,
                ..PeqConfig::default()
            };
            let result = calculate_peq_parameters(&r, &config);
            assert_eq!(result.bands.len(), expected, "requested {requested}");
            assert_sorted(&result.bands);
        }
    }

    #[test]
    fn test_limits_clamping() {
        let l = Limits::from_config(&PeqConfig {
            low_freq: 2.0,
            high_freq: 100000.0,
            band_count: 3,
            sample_rate: 48000.0,
            bins_per_octave: 100.0,
        });
        assert_eq!(l.low, 10.0);
        assert!((l.high - 22800.0).abs() < 1e-9);
        assert_eq!(l.bins_per_octave, 24.0);

        let l = Limits::from_config(&PeqConfig {
            low_freq: 900.0,
            high_freq: 1000.0,
            ..PeqConfig::default()
        });
        assert_eq!(l.high, 1800.0);
    }

    #[test]
    fn test_narrow_range_defaults_stay_distinct() {
        // Every default lands below 20 Hz and is clamped to the export floor
        let r = FrequencyResponse::from_pairs(vec![(10.0, 0.0), (15.0, 1.0)]);
        let config = PeqConfig {
            low_freq: 10.0,
            high_freq: 20.0,
            band_count: 15,
            ..PeqConfig::default()
        };
        let result = calculate_peq_parameters(&r, &config);
        assert!(result.fallback);
        assert_eq!(result.bands.len(), 15);
        assert_sorted(&result.bands);
        assert_eq!(result.bands[0].frequency, 20.0);
    }

    #[test]
    fn test_separate_frequencies() {
        let band = |frequency| PeqBand {
            frequency,
            gain: 0.0,
            q: 1.0,
            filter_type: FilterType::Peaking,
            enabled: true,
        };
        let mut bands = vec![band(500.0), band(500.0), band(501.0), band(20000.0), band(20000.0)];
        separate_frequencies(&mut bands);
        let freqs: Vec<f64> = bands.iter().map(|b| b.frequency).collect();
        assert_eq!(freqs, vec![500.0, 501.0, 502.0, 19999.0, 20000.0]);
    }

    #[test]
    fn test_format_band() {
        let b = format_band(&PeqBand {
            frequency: 1234.56,
            gain: -25.0,
            q: 0.051,
            filter_type: FilterType::HighShelf,
            enabled: false,
        });
        assert_eq!(b.frequency, 1235.0);
        assert_eq!(b.gain, -18.0);
        assert_eq!(b.q, 0.1);
        assert_eq!(b.filter_type, FilterType::Peaking);
        assert!(b.enabled);
    }
}
